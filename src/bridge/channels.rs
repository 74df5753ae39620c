//! Inbound event dispatch.
//!
//! Adapters push events into one unbounded channel. The dispatcher fans them
//! out to one worker queue per sender, so events from the same user are
//! handled in arrival order while different users run concurrently. A
//! semaphore caps how many events are in flight at once. A worker that stays
//! idle for a while closes its queue and is forgotten; the sender's next
//! event starts a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::common::{InboundEvent, Side};

/// How long a sender queue may sit empty before its worker exits.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Handles one inbound event to completion. Never fails: everything that
/// goes wrong is logged and the event is dropped.
#[async_trait]
pub trait EventProcessor: Send + Sync + 'static {
    async fn process(&self, event: InboundEvent);
}

type WorkerKey = (Side, String);

struct Worker {
    queue: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

/// What every sender worker shares.
#[derive(Clone)]
struct WorkerContext {
    processor: Arc<dyn EventProcessor>,
    limit: Arc<Semaphore>,
    idle_timeout: Duration,
    retired: mpsc::UnboundedSender<WorkerKey>,
}

/// Routes inbound events to per-sender workers.
pub struct Dispatcher {
    context: WorkerContext,
    workers: HashMap<WorkerKey, Worker>,
    retired: mpsc::UnboundedReceiver<WorkerKey>,
}

impl Dispatcher {
    pub fn new(processor: Arc<dyn EventProcessor>, max_concurrent_events: usize) -> Self {
        let (retired_tx, retired) = mpsc::unbounded_channel();
        Self {
            context: WorkerContext {
                processor,
                limit: Arc::new(Semaphore::new(max_concurrent_events.max(1))),
                idle_timeout: WORKER_IDLE_TIMEOUT,
                retired: retired_tx,
            },
            workers: HashMap::new(),
            retired,
        }
    }

    #[cfg(test)]
    fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.context.idle_timeout = idle_timeout;
        self
    }

    /// Consume events until the channel closes or `shutdown` fires, then
    /// wait for queued events to drain.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<InboundEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Dispatcher received shutdown");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        debug!("All event sources closed");
                        break;
                    }
                },
                Some(key) = self.retired.recv() => self.retire(key),
            }
        }

        info!("Draining {} sender queues", self.workers.len());
        let handles: Vec<_> = self.workers.drain().map(|(_, w)| w.handle).collect();
        join_all(handles).await;
    }

    fn dispatch(&mut self, event: InboundEvent) {
        let key = event.ordering_key();
        let (event, previous) = match self.workers.remove(&key) {
            Some(worker) => match worker.queue.send(event) {
                Ok(()) => {
                    self.workers.insert(key, worker);
                    return;
                }
                // Worker is retiring; the new one waits for it to finish.
                Err(mpsc::error::SendError(event)) => (event, Some(worker.handle)),
            },
            None => (event, None),
        };
        self.spawn_worker(key, event, previous);
    }

    fn spawn_worker(
        &mut self,
        key: WorkerKey,
        first: InboundEvent,
        previous: Option<JoinHandle<()>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, cannot fail.
        let _ = tx.send(first);
        debug!(source = %key.0, sender = %key.1, "Starting sender queue");

        let handle = tokio::spawn(sender_worker(key.clone(), rx, previous, self.context.clone()));
        self.workers.insert(key, Worker { queue: tx, handle });
    }

    /// Forget a worker that exited on idle, unless it was already replaced.
    fn retire(&mut self, key: WorkerKey) {
        let closed = self
            .workers
            .get(&key)
            .is_some_and(|worker| worker.queue.is_closed());
        if closed {
            debug!(source = %key.0, sender = %key.1, "Sender queue retired");
            self.workers.remove(&key);
        }
    }
}

async fn sender_worker(
    key: WorkerKey,
    mut queue: mpsc::UnboundedReceiver<InboundEvent>,
    previous: Option<JoinHandle<()>>,
    context: WorkerContext,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    loop {
        match tokio::time::timeout(context.idle_timeout, queue.recv()).await {
            Ok(Some(event)) => {
                if !process_one(&context, event).await {
                    return;
                }
            }
            Ok(None) => return,
            Err(_) => break,
        }
    }

    // Idle: refuse new events, finish the ones that raced with closing.
    queue.close();
    while let Some(event) = queue.recv().await {
        if !process_one(&context, event).await {
            return;
        }
    }
    let _ = context.retired.send(key);
}

/// Run one event on its own task. False once the semaphore is closed.
async fn process_one(context: &WorkerContext, event: InboundEvent) -> bool {
    let Ok(permit) = Arc::clone(&context.limit).acquire_owned().await else {
        return false;
    };
    let processor = Arc::clone(&context.processor);
    // Own task per event: a panic is contained and the queue keeps going.
    let task = tokio::spawn(async move {
        let _permit = permit;
        processor.process(event).await;
    });
    if let Err(e) = task.await {
        error!("Event handler crashed: {}", e);
    }
    true
}
