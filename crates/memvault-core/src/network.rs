//! Network status monitor.
//!
//! Holds the current online/offline signal. Whatever observes connectivity
//! (an OS hook, a probe loop, a user toggle) calls `set_online`; everything
//! else reads `is_online` or subscribes to transitions.

use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a connectivity observation. Subscribers are only woken when
    /// the value actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Network status changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Wait for the next transition on `rx` and return the new value, or `None`
/// once the monitor has been dropped.
pub async fn wait_for_change(rx: &mut watch::Receiver<bool>) -> Option<bool> {
    rx.changed().await.ok()?;
    let online = *rx.borrow_and_update();
    Some(online)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(NetworkMonitor::new(true).is_online());
        assert!(!NetworkMonitor::new(false).is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert_eq!(wait_for_change(&mut rx).await, Some(true));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_repeated_value_does_not_notify() {
        let monitor = NetworkMonitor::new(true);
        let rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_ends_when_monitor_dropped() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        drop(monitor);
        assert_eq!(wait_for_change(&mut rx).await, None);
    }
}
