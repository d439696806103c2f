//! pool::worker
//!
//! Worker thread body.
//!
//! # Lifecycle
//!
//! A worker pulls envelopes from the shared job queue until the queue is
//! closed. After taking a job, and before touching any cached template, it
//! drains its private control channel. A broadcast that was handed to the
//! worker before the job was queued is therefore always applied first.
//!
//! # Faults
//!
//! - A panic while handling one job is caught, reported to that job as a 500
//!   `EvaluationFault`, and the engine is recreated. The worker keeps going.
//! - An engine reporting [`ConversionError::Fatal`] ends the worker: the job
//!   resolves with [`PoolError::WorkerCrashed`] and the supervisor decides
//!   whether to restart.
//! - Any panic that escapes the job boundary is seen by the exit guard and
//!   reported as a crash.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;

use super::protocol::{
    ConversionJob, ConversionResult, ControlMessage, Envelope, SupervisorEvent, TemplateSource,
    WorkerConstants,
};
use super::PoolError;
use crate::cache::{CacheError, DirectoryCache};
use crate::convert::{
    ConversionEngine, ConversionError, ConversionOutput, ConversionRequest, EngineFactory,
    TemplateResolver,
};
use crate::core::types::TemplateName;

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// The job queue closed.
    Shutdown,
    /// The engine context became unusable.
    Crashed,
}

/// Reports the worker's exit to the supervisor, including exits by panic.
pub(crate) struct ExitGuard {
    id: usize,
    events: Sender<SupervisorEvent>,
    crashed: bool,
}

impl ExitGuard {
    pub(crate) fn new(id: usize, events: Sender<SupervisorEvent>) -> Self {
        Self {
            id,
            events,
            crashed: true,
        }
    }

    pub(crate) fn finish(mut self, exit: WorkerExit) {
        self.crashed = exit == WorkerExit::Crashed;
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(SupervisorEvent::WorkerExited {
            id: self.id,
            crashed: self.crashed,
        });
    }
}

enum Handled {
    Reply(ConversionResult),
    Fatal(String),
}

/// State owned by one worker thread.
pub(crate) struct Worker {
    id: usize,
    constants: Arc<WorkerConstants>,
    cache: DirectoryCache,
    engine: Box<dyn ConversionEngine>,
    factory: Arc<dyn EngineFactory>,
    default_table: Option<Option<Arc<Value>>>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        constants: Arc<WorkerConstants>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            id,
            cache: DirectoryCache::new(constants.template_dir.clone()),
            engine: factory.create(),
            constants,
            factory,
            default_table: None,
        }
    }

    /// Serve jobs until the queue closes or the engine fails fatally.
    pub(crate) fn run(
        &mut self,
        jobs: &Receiver<Envelope>,
        control: &Receiver<ControlMessage>,
        stopping: &AtomicBool,
    ) -> WorkerExit {
        tracing::debug!(worker = self.id, "worker started");

        while let Ok(Envelope { job, reply }) = jobs.recv() {
            if stopping.load(Ordering::Acquire) {
                let _ = reply.send(Err(PoolError::ShutDown));
                continue;
            }

            for message in control.try_iter() {
                self.apply(message);
            }

            match self.handle(job) {
                Handled::Reply(result) => {
                    let _ = reply.send(Ok(result));
                }
                Handled::Fatal(message) => {
                    tracing::error!(worker = self.id, %message, "engine context failed");
                    let _ = reply.send(Err(PoolError::WorkerCrashed {
                        worker: Some(self.id),
                    }));
                    return WorkerExit::Crashed;
                }
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
        WorkerExit::Shutdown
    }

    fn apply(&mut self, message: ControlMessage) {
        tracing::debug!(worker = self.id, kind = message.kind(), "applying control message");
        match message {
            ControlMessage::TemplatesUpdated => self.cache.clear(),
            ControlMessage::ConstantsUpdated(constants) => {
                if constants.template_dir != self.constants.template_dir {
                    self.cache.rebind(constants.template_dir.clone());
                } else {
                    self.cache.clear();
                }
                self.constants = constants;
            }
        }
        self.default_table = None;
        self.engine.invalidate();
    }

    fn handle(&mut self, job: ConversionJob) -> Handled {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.convert(&job)));

        match outcome {
            Ok(Ok(output)) => Handled::Reply(ConversionResult::success(&output)),
            Ok(Err(ConversionError::Fatal { message })) => Handled::Fatal(message),
            Ok(Err(e)) => Handled::Reply(ConversionResult::failure(
                e.status(),
                e.code(),
                &e.to_string(),
            )),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(worker = self.id, %message, "evaluation panicked");
                self.engine = self.factory.create();
                Handled::Reply(ConversionResult::failure(
                    500,
                    "EvaluationFault",
                    &format!("evaluation fault: {}", message),
                ))
            }
        }
    }

    fn convert(&mut self, job: &ConversionJob) -> Result<ConversionOutput, ConversionError> {
        let template: Arc<str> = match &job.template {
            TemplateSource::Inline(text) => Arc::from(text.as_str()),
            TemplateSource::Stored(name) => self.cache.get(name).map_err(|e| match e {
                CacheError::NotFound { .. } => ConversionError::TemplateNotFound {
                    name: name.to_string(),
                },
                other => ConversionError::Template {
                    message: other.to_string(),
                },
            })?,
        };

        let default_table = match &job.replacement_table {
            Some(_) => None,
            None => self.default_table()?,
        };
        let replacement_table = job.replacement_table.as_ref().or(default_table.as_deref());

        let resolver = JobResolver {
            map: job.template_map.as_ref(),
            cache: &self.cache,
        };
        self.engine.convert(&ConversionRequest {
            template: &template,
            message: &job.message,
            replacement_table,
            resolver: &resolver,
            max_include_depth: self.constants.max_include_depth,
        })
    }

    /// The configured default replacement table, loaded once per invalidation.
    fn default_table(&mut self) -> Result<Option<Arc<Value>>, ConversionError> {
        if let Some(table) = &self.default_table {
            return Ok(table.clone());
        }

        let table = match &self.constants.default_replacement_table {
            None => None,
            Some(name) => match self.cache.get(name) {
                Ok(text) => Some(Arc::new(serde_json::from_str::<Value>(&text).map_err(
                    |e| ConversionError::Template {
                        message: format!("replacement table '{}' is not valid JSON: {}", name, e),
                    },
                )?)),
                Err(CacheError::NotFound { .. }) => None,
                Err(e) => {
                    return Err(ConversionError::Template {
                        message: e.to_string(),
                    })
                }
            },
        };

        self.default_table = Some(table.clone());
        Ok(table)
    }
}

/// Include lookup: the job's own map first, then the worker's cache.
struct JobResolver<'a> {
    map: Option<&'a HashMap<String, String>>,
    cache: &'a DirectoryCache,
}

impl TemplateResolver for JobResolver<'_> {
    fn resolve(&self, name: &str) -> Option<Arc<str>> {
        if let Some(text) = self.map.and_then(|map| map.get(name)) {
            return Some(Arc::from(text.as_str()));
        }
        let name = TemplateName::new(name).ok()?;
        self.cache.get(&name).ok()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::TemplateEngineFactory;
    use std::fs;
    use tempfile::TempDir;

    const MESSAGE: &str = "MSH|^~\\&|A|B|C|D|20240101||ADT^A01|1|P|2.5\rPID|1||42||Doe^Jane||19900101|F";

    fn worker(dir: &TempDir) -> Worker {
        let constants = Arc::new(WorkerConstants {
            template_dir: dir.path().to_path_buf(),
            max_include_depth: 4,
            default_replacement_table: Some(TemplateName::new("replacements.json").unwrap()),
        });
        Worker::new(0, constants, Arc::new(TemplateEngineFactory))
    }

    fn stored(name: &str) -> TemplateSource {
        TemplateSource::Stored(TemplateName::new(name).unwrap())
    }

    fn reply(handled: Handled) -> ConversionResult {
        match handled {
            Handled::Reply(result) => result,
            Handled::Fatal(message) => panic!("unexpected fatal: {}", message),
        }
    }

    #[test]
    fn stored_template_and_default_table() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.json"), r#"{"g": "{{PID-8 | map:Gender}}"}"#).unwrap();
        fs::write(dir.path().join("replacements.json"), r#"{"Gender": {"F": "female"}}"#).unwrap();

        let mut worker = worker(&dir);
        let result = reply(worker.handle(ConversionJob::new(stored("t.json"), MESSAGE)));
        assert_eq!(result.status, 200);
        assert_eq!(result.payload["document"]["g"], "female");
    }

    #[test]
    fn job_table_overrides_default() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("replacements.json"), "not json").unwrap();

        let mut job = ConversionJob::new(
            TemplateSource::Inline(r#"{"g": "{{PID-8 | map:Gender}}"}"#.into()),
            MESSAGE,
        );
        job.replacement_table = Some(serde_json::json!({"Gender": {"F": "W"}}));

        let result = reply(worker(&dir).handle(job));
        assert_eq!(result.payload["document"]["g"], "W");
    }

    #[test]
    fn job_map_includes_win_over_cache() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p.json"), r#""from-cache""#).unwrap();

        let mut job = ConversionJob::new(TemplateSource::Inline(r#"{"p": {{> p.json}}}"#.into()), MESSAGE);
        let mut worker = worker(&dir);
        let result = reply(worker.handle(job.clone()));
        assert_eq!(result.payload["document"]["p"], "from-cache");

        job.template_map = Some(HashMap::from([("p.json".to_string(), r#""from-job""#.to_string())]));
        let result = reply(worker.handle(job));
        assert_eq!(result.payload["document"]["p"], "from-job");
    }

    #[test]
    fn unknown_stored_template_is_404() {
        let dir = TempDir::new().unwrap();
        let result = reply(worker(&dir).handle(ConversionJob::new(stored("missing.json"), MESSAGE)));
        assert_eq!(result.status, 404);
        assert_eq!(result.payload["error"]["code"], "NotFound");
    }

    #[test]
    fn templates_updated_drops_cached_templates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.json"), r#"{"v": "1"}"#).unwrap();
        let mut worker = worker(&dir);

        let first = reply(worker.handle(ConversionJob::new(stored("t.json"), MESSAGE)));
        assert_eq!(first.payload["document"]["v"], "1");

        fs::write(dir.path().join("t.json"), r#"{"v": "2"}"#).unwrap();
        let stale = reply(worker.handle(ConversionJob::new(stored("t.json"), MESSAGE)));
        assert_eq!(stale.payload["document"]["v"], "1");

        worker.apply(ControlMessage::TemplatesUpdated);
        let fresh = reply(worker.handle(ConversionJob::new(stored("t.json"), MESSAGE)));
        assert_eq!(fresh.payload["document"]["v"], "2");
    }

    #[test]
    fn constants_updated_rebinds_cache() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("t.json"), r#"{"dir": "first"}"#).unwrap();
        fs::write(second.path().join("t.json"), r#"{"dir": "second"}"#).unwrap();
        let mut worker = worker(&first);

        worker.apply(ControlMessage::ConstantsUpdated(Arc::new(WorkerConstants {
            template_dir: second.path().to_path_buf(),
            max_include_depth: 4,
            default_replacement_table: None,
        })));
        let result = reply(worker.handle(ConversionJob::new(stored("t.json"), MESSAGE)));
        assert_eq!(result.payload["document"]["dir"], "second");
    }
}
