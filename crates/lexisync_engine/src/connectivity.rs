//! Connectivity monitor.
//!
//! A passive observer of network reachability. Platform code either pushes
//! observations through [`ConnectivityMonitor::report`] or exposes a
//! [`NetworkCheck`] that [`ConnectivityMonitor::run`] polls. Handlers run
//! once per actual transition; repeated identical observations are dropped.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Kind of network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Wi-Fi.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired.
    Ethernet,
    /// Connected, link unknown.
    Other,
    /// No link.
    None,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkType::Wifi => "wifi",
            LinkType::Cellular => "cellular",
            LinkType::Ethernet => "ethernet",
            LinkType::Other => "other",
            LinkType::None => "none",
        };
        f.write_str(name)
    }
}

/// Reachability observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    /// Whether the network is reachable.
    pub is_connected: bool,
    /// Link metadata.
    pub link_type: LinkType,
}

impl ConnectivityStatus {
    /// Connected over `link`.
    pub fn online(link: LinkType) -> Self {
        Self {
            is_connected: true,
            link_type: link,
        }
    }

    /// Not connected.
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            link_type: LinkType::None,
        }
    }

    /// Status assumed when the platform signal is unavailable.
    pub fn fail_open() -> Self {
        Self::online(LinkType::Other)
    }
}

/// Source of platform reachability signals.
pub trait NetworkCheck: Send + Sync {
    /// Returns the current status, or `None` if the signal is unavailable.
    fn check(&self) -> Option<ConnectivityStatus>;
}

type Handler = Arc<dyn Fn(ConnectivityStatus) + Send + Sync>;

struct Inner {
    status: ConnectivityStatus,
    handlers: Vec<(u64, Handler)>,
    next_id: u64,
}

/// Observes reachability and notifies subscribers of transitions.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts connected (fail-open).
    pub fn new() -> Self {
        Self::with_status(ConnectivityStatus::fail_open())
    }

    /// Creates a monitor with a known initial status.
    pub fn with_status(status: ConnectivityStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status,
                handlers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Returns the last observed status.
    pub fn current_status(&self) -> ConnectivityStatus {
        self.inner.lock().status
    }

    /// Returns true if the last observation was connected.
    pub fn is_online(&self) -> bool {
        self.current_status().is_connected
    }

    /// Registers a transition handler.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectivityStatus) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(handler)));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Records an observation. Returns true if it was a transition.
    pub fn report(&self, status: ConnectivityStatus) -> bool {
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock();
            if inner.status == status {
                return false;
            }
            inner.status = status;
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        info!(
            connected = status.is_connected,
            link = %status.link_type,
            "connectivity changed"
        );

        // Handlers may call back into the monitor.
        for handler in handlers {
            handler(status);
        }
        true
    }

    /// Polls `check` once and records the result.
    pub fn poll_once(&self, check: &dyn NetworkCheck) -> bool {
        let status = check.check().unwrap_or_else(|| {
            debug!("network check unavailable, assuming connected");
            ConnectivityStatus::fail_open()
        });
        self.report(status)
    }

    /// Polls `check` every `interval` until the task is aborted.
    pub async fn run<P: NetworkCheck>(&self, check: P, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once(&check);
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConnectivityMonitor")
            .field("status", &inner.status)
            .field("handlers", &inner.handlers.len())
            .finish()
    }
}

/// Keeps a handler registered; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    monitor: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Removes the handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.lock().handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCheck(Option<ConnectivityStatus>);

    impl NetworkCheck for FixedCheck {
        fn check(&self) -> Option<ConnectivityStatus> {
            self.0
        }
    }

    fn counter(monitor: &ConnectivityMonitor) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = monitor.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn starts_fail_open() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.is_online());
        assert_eq!(monitor.current_status().link_type, LinkType::Other);
    }

    #[test]
    fn identical_states_do_not_notify() {
        let monitor = ConnectivityMonitor::new();
        let (count, _sub) = counter(&monitor);

        assert!(monitor.report(ConnectivityStatus::offline()));
        assert!(!monitor.report(ConnectivityStatus::offline()));
        assert!(monitor.report(ConnectivityStatus::online(LinkType::Wifi)));
        assert!(!monitor.report(ConnectivityStatus::online(LinkType::Wifi)));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn link_change_is_a_transition() {
        let monitor = ConnectivityMonitor::with_status(ConnectivityStatus::online(LinkType::Wifi));
        let (count, _sub) = counter(&monitor);
        monitor.report(ConnectivityStatus::online(LinkType::Cellular));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_removes_handler() {
        let monitor = ConnectivityMonitor::new();
        let (count, sub) = counter(&monitor);
        assert_eq!(monitor.handler_count(), 1);

        sub.unsubscribe();
        assert_eq!(monitor.handler_count(), 0);

        monitor.report(ConnectivityStatus::offline());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unavailable_check_fails_open() {
        let monitor = ConnectivityMonitor::with_status(ConnectivityStatus::offline());
        assert!(monitor.poll_once(&FixedCheck(None)));
        assert!(monitor.is_online());

        assert!(monitor.poll_once(&FixedCheck(Some(ConnectivityStatus::offline()))));
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_check() {
        let monitor = ConnectivityMonitor::new();
        let (count, _sub) = counter(&monitor);

        let task = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                monitor
                    .run(
                        FixedCheck(Some(ConnectivityStatus::offline())),
                        Duration::from_secs(1),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!monitor.is_online());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        task.abort();
    }
}
