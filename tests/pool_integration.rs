//! Integration tests for the worker pool.
//!
//! A scripted engine drives the pool through its failure modes: the inline
//! template text selects what the engine does.
//!
//! - `echo:<text>` returns `<text>` as the document
//! - `sleep:<ms>` sleeps, then echoes
//! - `panic` panics inside evaluation
//! - `fatal` reports its context as unusable

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinSet;

use hl7conv::convert::{
    ConversionEngine, ConversionError, ConversionOutput, ConversionRequest, EngineFactory,
    TemplateEngine, TemplateEngineFactory,
};
use hl7conv::core::types::TemplateName;
use hl7conv::pool::{
    ControlMessage, ConversionJob, Dispatcher, PoolError, PoolOptions, PoolStats, TemplateSource,
    WorkerConstants,
};

// =============================================================================
// Test Fixtures
// =============================================================================

struct ScriptedEngine;

impl ConversionEngine for ScriptedEngine {
    fn convert(&mut self, request: &ConversionRequest<'_>) -> Result<ConversionOutput, ConversionError> {
        let script = request.template;
        let text = if let Some(text) = script.strip_prefix("echo:") {
            text.to_string()
        } else if let Some(ms) = script.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            ms.to_string()
        } else if script == "panic" {
            panic!("scripted panic");
        } else if script == "fatal" {
            return Err(ConversionError::Fatal {
                message: "scripted fatal".into(),
            });
        } else {
            return Err(ConversionError::Template {
                message: format!("unknown script {}", script),
            });
        };

        Ok(ConversionOutput {
            document: json!(text),
            unused_segments: Vec::new(),
            invalid_access: Vec::new(),
        })
    }

    fn invalidate(&mut self) {}
}

struct ScriptedFactory;

impl EngineFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn ConversionEngine> {
        Box::new(ScriptedEngine)
    }
}

/// The reference engine, except that a template reading exactly `fatal`
/// kills the worker.
#[derive(Default)]
struct FragileEngine(TemplateEngine);

impl ConversionEngine for FragileEngine {
    fn convert(&mut self, request: &ConversionRequest<'_>) -> Result<ConversionOutput, ConversionError> {
        if request.template == "fatal" {
            return Err(ConversionError::Fatal {
                message: "scripted fatal".into(),
            });
        }
        self.0.convert(request)
    }

    fn invalidate(&mut self) {
        self.0.invalidate();
    }
}

struct FragileFactory;

impl EngineFactory for FragileFactory {
    fn create(&self) -> Box<dyn ConversionEngine> {
        Box::<FragileEngine>::default()
    }
}

fn constants(dir: &std::path::Path) -> WorkerConstants {
    WorkerConstants {
        template_dir: dir.to_path_buf(),
        max_include_depth: 8,
        default_replacement_table: None,
    }
}

fn scripted_pool(size: usize, max_restarts: usize) -> (TempDir, Arc<Dispatcher>) {
    let temp = TempDir::new().unwrap();
    let dispatcher = Dispatcher::start(
        PoolOptions { size, max_restarts },
        constants(temp.path()),
        Arc::new(ScriptedFactory),
    )
    .unwrap();
    (temp, Arc::new(dispatcher))
}

fn inline(script: impl Into<String>) -> ConversionJob {
    ConversionJob::new(TemplateSource::Inline(script.into()), "MSH|^~\\&|A")
}

/// Poll pool stats until `done` holds or a deadline passes.
async fn wait_for(dispatcher: &Dispatcher, done: impl Fn(&PoolStats) -> bool) -> PoolStats {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stats = dispatcher.stats();
        if done(&stats) || Instant::now() > deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_concurrently(dispatcher: &Arc<Dispatcher>, jobs: usize) -> Vec<String> {
    let mut set = JoinSet::new();
    for i in 0..jobs {
        let dispatcher = Arc::clone(dispatcher);
        let script = if i % 3 == 0 {
            "sleep:5".to_string()
        } else {
            format!("echo:{}", i)
        };
        set.spawn(async move { (i, dispatcher.exec(inline(script)).await) });
    }

    let mut seen = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (i, result) = joined.unwrap();
        let result = result.unwrap();
        assert_eq!(result.status, 200);
        let expected = if i % 3 == 0 { "5".to_string() } else { i.to_string() };
        assert_eq!(result.payload["document"], json!(expected));
        seen.push(i.to_string());
    }
    seen
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_resolves_once_with_fewer_workers_than_jobs() {
    let (_temp, dispatcher) = scripted_pool(3, 0);
    let seen = run_concurrently(&dispatcher, 40).await;

    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 40);
    assert_eq!(unique.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_resolves_once_with_more_workers_than_jobs() {
    let (_temp, dispatcher) = scripted_pool(8, 0);
    let seen = run_concurrently(&dispatcher, 5).await;

    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 5);
    assert_eq!(dispatcher.stats().live, 8);
}

#[tokio::test]
async fn worker_status_passes_through() {
    let (_temp, dispatcher) = scripted_pool(1, 0);
    let result = dispatcher.exec(inline("bogus")).await.unwrap();
    assert_eq!(result.status, 400);
    assert_eq!(result.payload["error"]["code"], "TemplateError");
}

// =============================================================================
// Broadcast
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn templates_updated_reaches_every_worker_before_later_jobs() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("t.json"), r#"{"v": "old"}"#).unwrap();
    let dispatcher = Arc::new(
        Dispatcher::start(
            PoolOptions {
                size: 4,
                max_restarts: 0,
            },
            constants(temp.path()),
            Arc::new(TemplateEngineFactory),
        )
        .unwrap(),
    );
    let stored = || {
        ConversionJob::new(
            TemplateSource::Stored(TemplateName::new("t.json").unwrap()),
            "MSH|^~\\&|A|B",
        )
    };

    // Warm every worker's private cache with the old content.
    let mut warm = JoinSet::new();
    for _ in 0..32 {
        let dispatcher = Arc::clone(&dispatcher);
        warm.spawn(async move { dispatcher.exec(stored()).await });
    }
    while let Some(result) = warm.join_next().await {
        assert_eq!(result.unwrap().unwrap().payload["document"]["v"], "old");
    }

    fs::write(temp.path().join("t.json"), r#"{"v": "new"}"#).unwrap();
    assert_eq!(dispatcher.broadcast(ControlMessage::TemplatesUpdated), 4);

    let mut after = JoinSet::new();
    for _ in 0..32 {
        let dispatcher = Arc::clone(&dispatcher);
        after.spawn(async move { dispatcher.exec(stored()).await });
    }
    while let Some(result) = after.join_next().await {
        assert_eq!(result.unwrap().unwrap().payload["document"]["v"], "new");
    }
}

#[tokio::test]
async fn constants_updated_repoints_workers() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    fs::write(first.path().join("t.json"), r#"{"dir": "first"}"#).unwrap();
    fs::write(second.path().join("t.json"), r#"{"dir": "second"}"#).unwrap();

    let dispatcher = Dispatcher::start(
        PoolOptions {
            size: 2,
            max_restarts: 0,
        },
        constants(first.path()),
        Arc::new(TemplateEngineFactory),
    )
    .unwrap();
    let job = || {
        ConversionJob::new(
            TemplateSource::Stored(TemplateName::new("t.json").unwrap()),
            "MSH|^~\\&|A",
        )
    };
    assert_eq!(dispatcher.exec(job()).await.unwrap().payload["document"]["dir"], "first");

    dispatcher.broadcast(ControlMessage::ConstantsUpdated(Arc::new(constants(
        second.path(),
    ))));
    for _ in 0..4 {
        assert_eq!(dispatcher.exec(job()).await.unwrap().payload["document"]["dir"], "second");
    }
}

#[tokio::test]
async fn restarted_worker_starts_with_current_constants() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    fs::write(first.path().join("t.json"), r#"{"dir": "first"}"#).unwrap();
    fs::write(second.path().join("t.json"), r#"{"dir": "second"}"#).unwrap();

    let dispatcher = Dispatcher::start(
        PoolOptions {
            size: 1,
            max_restarts: 1,
        },
        constants(first.path()),
        Arc::new(FragileFactory),
    )
    .unwrap();
    let job = || {
        ConversionJob::new(
            TemplateSource::Stored(TemplateName::new("t.json").unwrap()),
            "MSH|^~\\&|A",
        )
    };
    assert_eq!(dispatcher.exec(job()).await.unwrap().payload["document"]["dir"], "first");

    dispatcher.broadcast(ControlMessage::ConstantsUpdated(Arc::new(constants(
        second.path(),
    ))));
    let crashed = dispatcher.exec(inline("fatal")).await;
    assert!(matches!(crashed, Err(PoolError::WorkerCrashed { .. })));
    let stats = wait_for(&dispatcher, |s| s.restarts == 1 && s.live == 1).await;
    assert_eq!(stats.live, 1);

    // The replacement never saw the broadcast; it must have been built with it.
    assert_eq!(dispatcher.exec(job()).await.unwrap().payload["document"]["dir"], "second");
}

// =============================================================================
// Faults and supervision
// =============================================================================

#[tokio::test]
async fn panic_fails_only_its_job() {
    let (_temp, dispatcher) = scripted_pool(1, 0);

    let result = dispatcher.exec(inline("panic")).await.unwrap();
    assert_eq!(result.status, 500);
    assert_eq!(result.payload["error"]["code"], "EvaluationFault");

    let result = dispatcher.exec(inline("echo:still-alive")).await.unwrap();
    assert_eq!(result.payload["document"], "still-alive");
    let stats = dispatcher.stats();
    assert_eq!((stats.live, stats.restarts, stats.degraded), (1, 0, false));
}

#[tokio::test]
async fn crash_restarts_then_degrades() {
    let (_temp, dispatcher) = scripted_pool(1, 1);

    let crashed = dispatcher.exec(inline("fatal")).await;
    assert!(matches!(crashed, Err(PoolError::WorkerCrashed { worker: Some(0) })));

    let stats = wait_for(&dispatcher, |s| s.restarts == 1 && s.live == 1).await;
    assert_eq!((stats.live, stats.restarts, stats.degraded), (1, 1, false));
    let result = dispatcher.exec(inline("echo:restarted")).await.unwrap();
    assert_eq!(result.payload["document"], "restarted");

    let crashed = dispatcher.exec(inline("fatal")).await;
    assert!(matches!(crashed, Err(PoolError::WorkerCrashed { .. })));

    let stats = wait_for(&dispatcher, |s| s.degraded && s.live == 0).await;
    assert!(stats.degraded);
    assert_eq!(stats.live, 0);
    assert_eq!(
        dispatcher.exec(inline("echo:late")).await,
        Err(PoolError::Degraded)
    );
}

#[tokio::test]
async fn shutdown_rejects_new_jobs() {
    let (_temp, dispatcher) = scripted_pool(2, 0);
    dispatcher.shutdown();
    dispatcher.shutdown();

    assert_eq!(
        dispatcher.exec(inline("echo:x")).await,
        Err(PoolError::ShutDown)
    );
    assert_eq!(dispatcher.stats().live, 0);
}
