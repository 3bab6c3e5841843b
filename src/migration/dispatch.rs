//! Worker pool between the event producer and the migration visitors.
//!
//! Each worker is a tokio task that owns one [`MigrationVisitor`] (and so one
//! endpoint pool) and reads events from its own bounded queue. Records go to
//! workers round-robin; phase events are copied to every queue, so each worker
//! sees them in order with its own records.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::event::Event;
use super::report::MigrationReport;
use super::visitor::MigrationVisitor;
use crate::client::endpoint::Connector;
use crate::error::{MigrationError, Result};

/// How a worker task ended.
#[derive(Debug)]
struct WorkerExit {
    report: MigrationReport,
    error: Option<MigrationError>,
}

struct WorkerHandle {
    id: usize,
    sender: Option<mpsc::Sender<Event>>,
    task: Option<JoinHandle<WorkerExit>>,
}

/// Fans parser events out to migration workers.
pub struct Dispatcher {
    workers: Vec<WorkerHandle>,
    next: usize,
    cancel: watch::Sender<bool>,
    /// Reports of workers that already stopped.
    collected: MigrationReport,
    /// Workers that stopped on a fatal error.
    failed: Vec<usize>,
}

impl Dispatcher {
    /// Start `migrationThreads` workers. Must be called within a tokio runtime.
    pub fn spawn<C: Connector>(context: Arc<Context>, connector: Arc<C>) -> Self {
        let threads = context.config.migration_threads.max(1);
        let capacity = context.config.queue_capacity.max(1);
        let (cancel, _) = watch::channel(false);

        let workers = (0..threads)
            .map(|id| {
                let (sender, receiver) = mpsc::channel(capacity);
                let visitor =
                    MigrationVisitor::new(id, Arc::clone(&context), Arc::clone(&connector));
                let task = tokio::spawn(run_worker(visitor, receiver, cancel.subscribe()));
                WorkerHandle {
                    id,
                    sender: Some(sender),
                    task: Some(task),
                }
            })
            .collect();

        info!(workers = threads, queue_capacity = capacity, "Started migration workers");
        Self {
            workers,
            next: 0,
            cancel,
            collected: MigrationReport::default(),
            failed: Vec::new(),
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Hand one event to the workers.
    ///
    /// Waits while the chosen queue is full. Fails if a worker has stopped on a
    /// fatal error; the run should then be cancelled or shut down.
    pub async fn dispatch(&mut self, event: Event) -> Result<()> {
        if event.is_phase_boundary() {
            for idx in 0..self.workers.len() {
                self.send_to(idx, event.clone()).await?;
            }
            return Ok(());
        }

        let idx = self.next % self.workers.len().max(1);
        self.next = self.next.wrapping_add(1);
        self.send_to(idx, event).await
    }

    async fn send_to(&mut self, idx: usize, event: Event) -> Result<()> {
        let Some(worker) = self.workers.get_mut(idx) else {
            return Err(MigrationError::WorkerStopped(idx));
        };
        let Some(ref sender) = worker.sender else {
            return Err(MigrationError::WorkerStopped(worker.id));
        };
        if sender.send(event).await.is_ok() {
            return Ok(());
        }

        // The receiver is gone, so the task has ended.
        worker.sender = None;
        let id = worker.id;
        let exit = join_worker(id, worker.task.take()).await;
        self.collected += exit.report;
        self.failed.push(id);
        Err(exit.error.unwrap_or(MigrationError::WorkerStopped(id)))
    }

    /// Close every queue, let each worker flush and close its pool, and merge
    /// their reports.
    ///
    /// Fails if any worker stopped on a fatal error.
    pub async fn shutdown(mut self) -> Result<MigrationReport> {
        for worker in &mut self.workers {
            worker.sender = None;
        }

        let mut total = self.collected;
        let mut first_error = None;
        for worker in &mut self.workers {
            let exit = join_worker(worker.id, worker.task.take()).await;
            total += exit.report;
            if let Some(e) = exit.error {
                error!(worker = worker.id, error = %e, "Worker failed");
                first_error.get_or_insert(e);
            }
        }

        if first_error.is_none()
            && let Some(&id) = self.failed.first()
        {
            first_error = Some(MigrationError::WorkerStopped(id));
        }

        match first_error {
            Some(e) => {
                error!(report = %total, "Migration aborted");
                Err(e)
            }
            None => {
                info!(report = %total, "Migration complete");
                Ok(total)
            }
        }
    }

    /// Stop every worker without flushing. Pending records are abandoned.
    pub async fn cancel(mut self) -> MigrationReport {
        if self.cancel.send(true).is_err() {
            debug!("All workers already stopped");
        }
        for worker in &mut self.workers {
            worker.sender = None;
        }

        let mut total = self.collected;
        for worker in &mut self.workers {
            total += join_worker(worker.id, worker.task.take()).await.report;
        }
        warn!(report = %total, "Migration cancelled");
        total
    }
}

/// Feed every event of `events` through a fresh dispatcher.
///
/// Shuts down gracefully at the end of the stream. If a worker stops on a fatal
/// error the remaining workers are cancelled and the error is returned.
pub async fn run<C, S>(context: Arc<Context>, connector: Arc<C>, events: S) -> Result<MigrationReport>
where
    C: Connector,
    S: Stream<Item = Event>,
{
    let mut dispatcher = Dispatcher::spawn(context, connector);
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        if let Err(e) = dispatcher.dispatch(event).await {
            let report = dispatcher.cancel().await;
            error!(report = %report, error = %e, "Migration aborted");
            return Err(e);
        }
    }
    dispatcher.shutdown().await
}

async fn run_worker<C: Connector>(
    mut visitor: MigrationVisitor<C>,
    mut events: mpsc::Receiver<Event>,
    mut cancel: watch::Receiver<bool>,
) -> WorkerExit {
    loop {
        let event = tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_ok() && !*cancel.borrow_and_update() {
                    continue;
                }
                abandon_queued(&mut visitor, &mut events).await;
                return WorkerExit {
                    report: visitor.cancel().await,
                    error: None,
                };
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            break;
        };
        if let Err(e) = visitor.handle(event).await {
            abandon_queued(&mut visitor, &mut events).await;
            return WorkerExit {
                report: visitor.cancel().await,
                error: Some(e),
            };
        }
    }

    debug!(worker = visitor.worker(), "Queue closed, finishing");
    WorkerExit {
        report: visitor.shutdown().await,
        error: None,
    }
}

/// Stop accepting events and count queued records as abandoned.
async fn abandon_queued<C: Connector>(
    visitor: &mut MigrationVisitor<C>,
    events: &mut mpsc::Receiver<Event>,
) {
    events.close();
    while let Some(event) = events.recv().await {
        visitor.abandon(&event);
    }
}

async fn join_worker(id: usize, task: Option<JoinHandle<WorkerExit>>) -> WorkerExit {
    let Some(task) = task else {
        return WorkerExit {
            report: MigrationReport::default(),
            error: None,
        };
    };
    match task.await {
        Ok(exit) => exit,
        Err(e) => {
            error!(worker = id, error = %e, "Worker task panicked");
            WorkerExit {
                report: MigrationReport::default(),
                error: Some(MigrationError::WorkerStopped(id)),
            }
        }
    }
}
