//! Cooperative cancellation.
//!
//! A [`CancelHandle`] flips a shared flag once; every cloned [`CancelSignal`]
//! observes it, either by polling [`CancelSignal::is_cancelled`] between
//! units of blocking work or by awaiting [`CancelSignal::cancelled`].

use tokio::sync::watch;

/// Owner side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }
}

/// Observer side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  rx: watch::Receiver<bool>,
}

/// Create a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
  /// A signal that never fires.
  pub fn never() -> Self {
    let (_, rx) = watch::channel(false);
    Self { rx }
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation is requested. Pending forever if the handle
  /// was dropped without cancelling.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

impl Default for CancelSignal {
  fn default() -> Self {
    Self::never()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn cancel_wakes_waiters() {
    let (handle, signal) = cancel_pair();
    let waiter = signal.clone();
    let task = tokio::spawn(async move { waiter.cancelled().await });

    assert!(!signal.is_cancelled());
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
      .await
      .expect("waiter should wake")
      .unwrap();
    assert!(signal.is_cancelled());
  }

  #[tokio::test]
  async fn never_signal_stays_pending() {
    let signal = CancelSignal::never();
    let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
    assert!(result.is_err());
    assert!(!signal.is_cancelled());
  }
}
