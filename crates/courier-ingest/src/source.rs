//! The inbound update source boundary.

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_core::update::Update;

/// A long-lived source of updates, pulled by the pipeline's producer task.
///
/// Implementations wrap the platform's long-poll client (or a webhook
/// receiver's channel). The producer owns the source exclusively, so
/// implementations need no internal synchronization.
#[async_trait]
pub trait UpdateSource: Send + 'static {
    /// Pulls the next update, waiting as long as necessary.
    ///
    /// Returning `None` means the source is exhausted; the pipeline then
    /// drains its queue and stops.
    async fn next_update(&mut self) -> Option<Update>;

    /// Cooperative stop hook, called once by the producer after it stops
    /// pulling — on drain or on source exhaustion. Implementations can use
    /// it to close connections or persist their resume offset.
    async fn close(&mut self) {}
}

/// A plain bounded channel works as a source; useful for webhook-style
/// feeds and for tests.
#[async_trait]
impl UpdateSource for mpsc::Receiver<Update> {
    async fn next_update(&mut self) -> Option<Update> {
        self.recv().await
    }
}
