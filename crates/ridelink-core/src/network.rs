//! Network connectivity observation
//!
//! The platform reports connectivity through [`NetworkObserver`].
//! [`ManualNetwork`] is an in-process implementation whose status is pushed
//! by whoever knows it (a platform bridge, a reachability probe, a test).

use std::sync::{Arc, Mutex};

use tracing::debug;

/// A connectivity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    /// A network interface is up
    pub connected: bool,
    /// The internet is reachable through it, `None` while unknown
    pub internet_reachable: Option<bool>,
}

impl NetworkStatus {
    pub const OFFLINE: NetworkStatus = NetworkStatus {
        connected: false,
        internet_reachable: Some(false),
    };

    pub const ONLINE: NetworkStatus = NetworkStatus {
        connected: true,
        internet_reachable: Some(true),
    };

    /// Connected and not known to be unreachable
    pub fn is_online(&self) -> bool {
        self.connected && self.internet_reachable != Some(false)
    }
}

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked with every status change
pub type NetworkListener = Box<dyn Fn(NetworkStatus) + Send + Sync>;

/// Reports current connectivity and signals transitions
pub trait NetworkObserver: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_internet_reachable(&self) -> bool;
    fn add_listener(&self, listener: NetworkListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

struct Inner {
    status: NetworkStatus,
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn Fn(NetworkStatus) + Send + Sync>)>,
}

/// A network observer whose status is set explicitly
pub struct ManualNetwork {
    inner: Mutex<Inner>,
}

impl ManualNetwork {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status,
                next_id: 1,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::ONLINE)
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::OFFLINE)
    }

    pub fn status(&self) -> NetworkStatus {
        self.lock().status
    }

    /// Update the status, notifying listeners if it changed
    pub fn set_status(&self, status: NetworkStatus) {
        let listeners = {
            let mut inner = self.lock();
            if inner.status == status {
                return;
            }
            inner.status = status;
            inner
                .listeners
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect::<Vec<_>>()
        };

        debug!(?status, listeners = listeners.len(), "network status changed");
        // Called outside the lock so listeners may query the observer
        for listener in listeners {
            listener(status);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.set_status(if online {
            NetworkStatus::ONLINE
        } else {
            NetworkStatus::OFFLINE
        });
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl NetworkObserver for ManualNetwork {
    fn is_connected(&self) -> bool {
        self.status().is_online()
    }

    fn is_internet_reachable(&self) -> bool {
        self.status().internet_reachable.unwrap_or(false)
    }

    fn add_listener(&self, listener: NetworkListener) -> ListenerId {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_status_helpers() {
        assert!(NetworkStatus::ONLINE.is_online());
        assert!(!NetworkStatus::OFFLINE.is_online());

        let unknown = NetworkStatus {
            connected: true,
            internet_reachable: None,
        };
        assert!(unknown.is_online());
    }

    #[test]
    fn test_listeners_notified_on_change_only() {
        let network = ManualNetwork::offline();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = network.add_listener(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        network.set_online(true);
        network.set_online(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(network.is_connected());
        assert!(network.is_internet_reachable());

        network.remove_listener(id);
        network.set_online(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(network.listener_count(), 0);
        assert!(!network.is_connected());
    }
}
