//! The producer/worker ingestion pipeline.
//!
//! ```text
//! UpdateSource ──▶ producer ──▶ bounded queue ──▶ worker 0 ──▶ Router::dispatch
//!                                            ├──▶ worker 1 ──▶ ...
//!                                            └──▶ worker N ──▶ ...
//! ```
//!
//! The pipeline moves through `Idle → Running → Draining → Stopped`:
//!
//! - **Running** — the producer pulls updates and pushes each onto the
//!   bounded queue, blocking on push while capacity holds. Workers pop
//!   concurrently and dispatch; a slow handler stalls only its own worker.
//! - **Draining** — on cancellation the producer stops pulling immediately.
//!   An update already pulled but not yet enqueued gets a bounded enqueue
//!   budget; the whole producer gets a bounded drain budget. Items that
//!   miss their budget are dropped and logged, never blocking shutdown.
//! - **Stopped** — the queue has closed and every worker has exited; no
//!   further dispatch occurs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::update::Update;
use courier_router::Router;

use crate::error::{IngestError, IngestResult};
use crate::source::UpdateSource;

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Capacity of the hand-off queue between producer and workers.
    pub queue_capacity: usize,
    /// Number of worker tasks dispatching concurrently.
    pub workers: usize,
    /// Per-item budget to enqueue an in-flight update during drain.
    pub enqueue_budget: Duration,
    /// Overall budget for the producer to finish once draining starts.
    pub drain_budget: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 4,
            enqueue_budget: Duration::from_secs(2),
            drain_budget: Duration::from_secs(5),
        }
    }
}

/// The concurrent ingestion pipeline.
///
/// A pipeline runs once: create it, hand out its
/// [`shutdown_token`](Pipeline::shutdown_token), and await
/// [`run`](Pipeline::run).
pub struct Pipeline {
    router: Arc<Router>,
    config: IngestConfig,
    shutdown: CancellationToken,
    state: AtomicU8,
}

impl Pipeline {
    /// Creates an idle pipeline dispatching into `router`.
    pub fn new(router: Arc<Router>, config: IngestConfig) -> Self {
        Self {
            router,
            config,
            shutdown: CancellationToken::new(),
            state: AtomicU8::new(PipelineState::Idle as u8),
        }
    }

    /// Returns a token that cancels this pipeline when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests a graceful shutdown (equivalent to cancelling the token).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runs the pipeline until the source is exhausted or the shutdown
    /// token fires and the drain completes.
    ///
    /// Workers observe queue closure — not the cancellation signal — as
    /// their termination condition, so updates that were fully enqueued
    /// are never abandoned.
    pub async fn run<S: UpdateSource>(&self, source: S) -> IngestResult<()> {
        let idle = PipelineState::Idle as u8;
        let running = PipelineState::Running as u8;
        if self
            .state
            .compare_exchange(idle, running, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IngestError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&self.router),
            )));
        }

        let mut producer = tokio::spawn(produce(
            source,
            tx,
            self.shutdown.clone(),
            self.config.enqueue_budget,
        ));

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "ingestion pipeline running"
        );

        tokio::select! {
            result = &mut producer => {
                if let Err(e) = result {
                    error!(error = %e, "producer task failed");
                }
            }
            () = self.shutdown.cancelled() => {
                self.set_state(PipelineState::Draining);
                debug!("drain started");
                match timeout(self.config.drain_budget, &mut producer).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "producer task failed"),
                    Err(_) => {
                        warn!("drain budget exhausted, aborting producer");
                        producer.abort();
                        let _ = producer.await;
                    }
                }
            }
        }

        // The producer owned the only sender; the queue is now closing.
        // Workers drain whatever is left and exit on queue closure.
        let mut dispatched = 0u64;
        for worker in workers {
            match worker.await {
                Ok(count) => dispatched += count,
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        self.set_state(PipelineState::Stopped);
        info!(dispatched, "ingestion pipeline stopped");
        Ok(())
    }
}

/// The producer loop: pull, enqueue, repeat — with a cancellation-aware
/// hand-off so drain never abandons a fully pulled update without a fight.
async fn produce<S: UpdateSource>(
    mut source: S,
    tx: mpsc::Sender<Update>,
    shutdown: CancellationToken,
    enqueue_budget: Duration,
) {
    loop {
        let update = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            maybe = source.next_update() => match maybe {
                Some(update) => update,
                None => {
                    debug!("update source exhausted");
                    break;
                }
            },
        };

        // Reserve a slot rather than sending outright: reservation leaves
        // the update in hand if cancellation wins the race.
        let permit = tokio::select! {
            biased;
            () = shutdown.cancelled() => match timeout(enqueue_budget, tx.reserve()).await {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(_)) | Err(_) => None,
            },
            reserved = tx.reserve() => reserved.ok(),
        };

        match permit {
            Some(permit) => permit.send(update),
            None => {
                warn!(
                    update_id = update.update_id,
                    "enqueue budget exhausted, dropping update"
                );
                break;
            }
        }
    }
    source.close().await;
    debug!("producer stopped");
}

/// One worker: pop from the shared queue, dispatch, repeat until closure.
///
/// The receiver lock is held only while waiting for the next update;
/// dispatch runs outside it, so handlers never serialize across workers.
/// A panicking chain abandons that update and is logged — sibling workers
/// and the producer are unaffected.
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Update>>>,
    router: Arc<Router>,
) -> u64 {
    let mut dispatched = 0u64;
    loop {
        let update = { rx.lock().await.recv().await };
        let Some(update) = update else { break };
        let update_id = update.update_id;
        dispatched += 1;
        let outcome = AssertUnwindSafe(router.dispatch(update)).catch_unwind().await;
        if outcome.is_err() {
            error!(worker_id, update_id, "dispatch panicked, update abandoned");
        }
    }
    debug!(worker_id, dispatched, "worker exited");
    dispatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::handler::BoxedHandler;
    use courier_core::update::{Chat, Message, Payload};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn update(id: u64) -> Update {
        Update::new(
            id,
            Payload::Message(Message::new(id as i64, Chat::private(1)).with_text("hello")),
        )
    }

    fn counting_router(counter: &Arc<AtomicUsize>) -> Arc<Router> {
        let router = Arc::new(Router::new());
        let counter = Arc::clone(counter);
        router.on_update(BoxedHandler::new(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        router
    }

    #[tokio::test]
    async fn every_update_is_dispatched_exactly_once() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let router = Arc::new(Router::new());
        {
            let seen = Arc::clone(&seen);
            router.on_update(BoxedHandler::new(move |ctx: Arc<courier_core::Context>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(ctx.update().update_id);
                }
            }));
        }

        let (tx, rx) = mpsc::channel(64);
        let pipeline = Pipeline::new(
            router,
            IngestConfig {
                workers: 8,
                ..IngestConfig::default()
            },
        );

        const TOTAL: u64 = 200;
        let feeder = tokio::spawn(async move {
            for id in 0..TOTAL {
                tx.send(update(id)).await.unwrap();
            }
            // Dropping the sender exhausts the source.
        });

        pipeline.run(rx).await.unwrap();
        feeder.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len() as u64, TOTAL);
        let distinct: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(distinct.len() as u64, TOTAL);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn drain_processes_everything_already_enqueued() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(Router::new());
        {
            let counter = Arc::clone(&counter);
            router.on_update(BoxedHandler::new(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    // Slow handler: updates are still queued when the
                    // cancellation signal arrives.
                    sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let (tx, rx) = mpsc::channel(16);
        let pipeline = Arc::new(Pipeline::new(
            router,
            IngestConfig {
                workers: 2,
                queue_capacity: 16,
                ..IngestConfig::default()
            },
        ));

        const TOTAL: usize = 8;
        for id in 0..TOTAL as u64 {
            tx.send(update(id)).await.unwrap();
        }

        let runner = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run(rx).await })
        };

        // Give the producer time to move everything onto the queue, then
        // cancel while the workers are still grinding through it.
        sleep(Duration::from_millis(100)).await;
        pipeline.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), TOTAL);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn cancellation_stops_the_producer_from_pulling() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = counting_router(&counter);

        let (tx, rx) = mpsc::channel(16);
        let pipeline = Arc::new(Pipeline::new(router, IngestConfig::default()));

        let runner = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run(rx).await })
        };

        tx.send(update(1)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        pipeline.shutdown();
        runner.await.unwrap().unwrap();

        // Sent after shutdown: the producer must not pull it.
        let _ = tx.try_send(update(2));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_panicking_dispatch_does_not_kill_the_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(Router::new());
        {
            let counter = Arc::clone(&counter);
            router.on_update(BoxedHandler::new(move |ctx: Arc<courier_core::Context>| {
                let counter = Arc::clone(&counter);
                async move {
                    if ctx.update().update_id == 2 {
                        panic!("poisoned update");
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let (tx, rx) = mpsc::channel(16);
        let pipeline = Pipeline::new(
            router,
            IngestConfig {
                workers: 1,
                ..IngestConfig::default()
            },
        );

        for id in 1..=4u64 {
            tx.send(update(id)).await.unwrap();
        }
        drop(tx);
        pipeline.run(rx).await.unwrap();

        // Updates 1, 3 and 4 survive the poisoned one.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = counting_router(&counter);
        let pipeline = Pipeline::new(Arc::clone(&router), IngestConfig::default());

        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        pipeline.run(rx).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        assert!(matches!(
            pipeline.run(rx).await,
            Err(IngestError::AlreadyStarted)
        ));
    }
}
