// src/cancel.rs
//! One-shot cancellation signal built on a `watch` channel.

use tokio::sync::watch;

/// Sending side. Dropping it without cancelling leaves receivers uncancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving side handed to a unit of work.
#[derive(Debug, Clone)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
}

pub fn pair() -> (CancelHandle, Cancel) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancel { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Cancel {
    /// A signal that never fires; for callers outside the scheduler.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation was requested.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|c| *c).await.is_err() {
            // Handle dropped without cancelling: nothing will ever cancel us.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let (handle, mut c) = pair();
        assert!(!c.is_cancelled());
        let waiter = tokio::spawn(async move {
            c.cancelled().await;
            true
        });
        handle.cancel();
        let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .unwrap();
        assert!(woke);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut c = Cancel::never();
        let r = tokio::time::timeout(Duration::from_millis(20), c.cancelled()).await;
        assert!(r.is_err());
    }
}
