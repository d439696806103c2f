//! pool::dispatcher
//!
//! Worker pool with a shared job queue and a supervisor thread.
//!
//! # Architecture
//!
//! ```text
//!   exec() ──► job queue (FIFO, unbounded) ──► idle worker pulls
//!                                              │
//!   broadcast() ──► per-worker control channel ┘ (drained before each job)
//!
//!   worker exit ──► supervisor ──► restart (within budget) | degrade
//! ```
//!
//! Idle workers pull from one queue, so the least-loaded worker always takes
//! the next job. Results travel back on a oneshot channel owned by the job;
//! if the worker holding it dies, the channel closes and the caller sees
//! [`PoolError::WorkerCrashed`] instead of waiting forever.
//!
//! # Supervision
//!
//! Every worker thread carries an exit guard that tells the supervisor how it
//! ended. Crashed workers are replaced immediately while the restart budget
//! lasts; after that the pool is marked degraded. When a degraded pool has no
//! live workers left, the supervisor fails every queued job and closes the
//! queue so new jobs fail fast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;

use super::protocol::{
    ControlMessage, ConversionJob, ConversionResult, Envelope, SupervisorEvent, WorkerConstants,
};
use super::worker::{ExitGuard, Worker};
use super::PoolError;
use crate::convert::EngineFactory;

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Number of workers
    pub size: usize,
    /// Restarts allowed over the pool's lifetime
    pub max_restarts: usize,
}

/// Snapshot of pool health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub live: usize,
    pub restarts: usize,
    pub degraded: bool,
}

struct WorkerHandle {
    control: Sender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
}

struct Shared {
    options: PoolOptions,
    factory: Arc<dyn EngineFactory>,
    /// Lock order: `workers` before `constants`. A spawn reads the constants
    /// and registers under one `workers` guard, and a broadcast swaps them
    /// under the same guard, so a new worker either starts with the new
    /// constants or is in the map when they are delivered.
    constants: RwLock<Arc<WorkerConstants>>,
    workers: Mutex<HashMap<usize, WorkerHandle>>,
    events: Sender<SupervisorEvent>,
    next_id: AtomicUsize,
    restarts: AtomicUsize,
    degraded: AtomicBool,
    stopping: Arc<AtomicBool>,
}

impl Shared {
    fn live(&self) -> usize {
        self.workers.lock().len()
    }

    fn exhausted(&self) -> bool {
        self.degraded.load(Ordering::Acquire) && self.live() == 0
    }

    fn spawn_worker(&self, jobs: Receiver<Envelope>) -> Result<usize, PoolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = unbounded();
        let factory = Arc::clone(&self.factory);
        let events = self.events.clone();
        let stopping = Arc::clone(&self.stopping);

        // Register before the thread runs so an immediate exit finds its entry.
        let mut workers = self.workers.lock();
        let constants = Arc::clone(&self.constants.read());
        let thread = std::thread::Builder::new()
            .name(format!("hl7conv-worker-{}", id))
            .spawn(move || {
                let guard = ExitGuard::new(id, events);
                let mut worker = Worker::new(id, constants, factory);
                let exit = worker.run(&jobs, &control_rx, &stopping);
                guard.finish(exit);
            })
            .map_err(|e| PoolError::Spawn {
                message: e.to_string(),
            })?;

        workers.insert(
            id,
            WorkerHandle {
                control: control_tx,
                thread: Some(thread),
            },
        );
        Ok(id)
    }
}

/// The process pool dispatcher.
pub struct Dispatcher {
    shared: Arc<Shared>,
    jobs: Mutex<Option<Sender<Envelope>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Dispatcher {
    /// Start `options.size` workers and the supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a thread cannot be started.
    pub fn start(
        options: PoolOptions,
        constants: WorkerConstants,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self, PoolError> {
        let size = options.size.max(1);
        let options = PoolOptions { size, ..options };
        let (jobs_tx, jobs_rx) = unbounded::<Envelope>();
        let (events_tx, events_rx) = unbounded();

        let shared = Arc::new(Shared {
            options,
            factory,
            constants: RwLock::new(Arc::new(constants)),
            workers: Mutex::new(HashMap::new()),
            events: events_tx,
            next_id: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            stopping: Arc::new(AtomicBool::new(false)),
        });

        let dispatcher = Self {
            shared: Arc::clone(&shared),
            jobs: Mutex::new(Some(jobs_tx)),
            supervisor: Mutex::new(None),
        };

        for _ in 0..size {
            shared.spawn_worker(jobs_rx.clone())?;
        }

        let supervisor_shared = Arc::clone(&shared);
        let supervisor = std::thread::Builder::new()
            .name("hl7conv-supervisor".to_string())
            .spawn(move || supervise(supervisor_shared, events_rx, jobs_rx))
            .map_err(|e| PoolError::Spawn {
                message: e.to_string(),
            })?;
        *dispatcher.supervisor.lock() = Some(supervisor);

        tracing::info!(workers = size, max_restarts = options.max_restarts, "worker pool started");
        Ok(dispatcher)
    }

    /// Queue a job and wait for its result.
    ///
    /// The result's status is the worker's; it is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`PoolError::WorkerCrashed`] if the worker handling the job died
    /// - [`PoolError::Degraded`] if no worker is left to run it
    /// - [`PoolError::ShutDown`] if the pool is stopping
    pub async fn exec(&self, job: ConversionJob) -> Result<ConversionResult, PoolError> {
        if self.shared.exhausted() {
            return Err(PoolError::Degraded);
        }

        let sender = self.jobs.lock().clone().ok_or(PoolError::ShutDown)?;
        let (reply, result) = oneshot::channel();
        sender.send(Envelope { job, reply }).map_err(|_| {
            if self.shared.degraded.load(Ordering::Acquire) {
                PoolError::Degraded
            } else {
                PoolError::ShutDown
            }
        })?;
        drop(sender);

        match result.await {
            Ok(outcome) => outcome,
            Err(_) if self.shared.exhausted() => Err(PoolError::Degraded),
            Err(_) => Err(PoolError::WorkerCrashed { worker: None }),
        }
    }

    /// Hand a control message to every live worker.
    ///
    /// Returns the number of workers it was delivered to. A worker applies it
    /// before its next job; there is no acknowledgement.
    pub fn broadcast(&self, message: ControlMessage) -> usize {
        let workers = self.shared.workers.lock();
        if let ControlMessage::ConstantsUpdated(constants) = &message {
            *self.shared.constants.write() = Arc::clone(constants);
        }
        let delivered = workers
            .values()
            .filter(|handle| handle.control.send(message.clone()).is_ok())
            .count();

        tracing::debug!(kind = message.kind(), delivered, "broadcast control message");
        delivered
    }

    /// Current pool health.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.shared.options.size,
            live: self.shared.live(),
            restarts: self.shared.restarts.load(Ordering::Relaxed),
            degraded: self.shared.degraded.load(Ordering::Acquire),
        }
    }

    /// Stop every worker and the supervisor.
    ///
    /// Jobs still queued resolve with [`PoolError::ShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        let sender = match self.jobs.lock().take() {
            Some(sender) => sender,
            None => return,
        };
        self.shared.stopping.store(true, Ordering::Release);
        drop(sender);

        let _ = self.shared.events.send(SupervisorEvent::Shutdown);
        if let Some(supervisor) = self.supervisor.lock().take() {
            let _ = supervisor.join();
        }

        let handles: Vec<WorkerHandle> = self.shared.workers.lock().drain().map(|(_, h)| h).collect();
        for mut handle in handles {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }

        tracing::info!("worker pool stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn supervise(shared: Arc<Shared>, events: Receiver<SupervisorEvent>, jobs: Receiver<Envelope>) {
    let mut jobs = Some(jobs);

    while let Ok(event) = events.recv() {
        let (id, crashed) = match event {
            SupervisorEvent::WorkerExited { id, crashed } => (id, crashed),
            SupervisorEvent::Shutdown => break,
        };

        let handle = shared.workers.lock().remove(&id);
        if let Some(thread) = handle.and_then(|mut h| h.thread.take()) {
            let _ = thread.join();
        }

        if !crashed || shared.stopping.load(Ordering::Acquire) {
            continue;
        }

        tracing::warn!(worker = id, "worker crashed");
        let restarted = match &jobs {
            Some(jobs) if shared.restarts.load(Ordering::Relaxed) < shared.options.max_restarts => {
                shared.restarts.fetch_add(1, Ordering::Relaxed);
                match shared.spawn_worker(jobs.clone()) {
                    Ok(new_id) => {
                        tracing::info!(worker = new_id, replaces = id, "worker restarted");
                        true
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to restart worker");
                        false
                    }
                }
            }
            _ => false,
        };

        if !restarted && !shared.degraded.swap(true, Ordering::AcqRel) {
            tracing::error!(
                restarts = shared.restarts.load(Ordering::Relaxed),
                "restart budget exhausted, pool degraded"
            );
        }

        if shared.exhausted() {
            if let Some(jobs) = jobs.take() {
                let failed = fail_queued(&jobs, PoolError::Degraded);
                tracing::error!(failed, "no live workers left, closing job queue");
            }
        }
    }

    if let Some(jobs) = jobs.take() {
        fail_queued(&jobs, PoolError::ShutDown);
    }
}

fn fail_queued(jobs: &Receiver<Envelope>, error: PoolError) -> usize {
    jobs.try_iter()
        .map(|envelope| {
            let _ = envelope.reply.send(Err(error.clone()));
        })
        .count()
}
