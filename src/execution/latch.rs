//! Counting completion barrier.

use tokio::sync::watch;

/// Releases waiters once `count_down` has been called `count` times.
///
/// One latch is created per batch and never reset.
#[derive(Debug)]
pub struct CountdownLatch {
    count: watch::Sender<usize>,
}

impl CountdownLatch {
    /// Create a latch expecting `count` completions.
    pub fn new(count: usize) -> Self {
        let (count, _) = watch::channel(count);
        Self { count }
    }

    /// Record one completion. Extra calls past zero are ignored.
    pub fn count_down(&self) {
        self.count.send_modify(|c| *c = c.saturating_sub(1));
    }

    /// Completions still outstanding.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until every expected completion has been recorded.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|c| *c == 0).await;
    }
}
