//! Network reachability tracking and request preflight.
//!
//! The platform layer forwards its connectivity callbacks here. The current
//! [`NetworkState`] lives behind an [`ArcSwap`] so any thread can read it
//! without locking, and listeners are only told about transitions of
//! `connected` or the network type, never about capability-only ticks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::settings::ConnectivitySettings;

/// Fast-fail reason when no network is attached.
pub const REASON_OFFLINE: &str = "offline";
/// Fast-fail reason when a network is attached but not validated.
pub const REASON_NO_VALIDATED_INTERNET: &str = "no_validated_internet";

/// Transport type of the active network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    Other,
    None,
    Unknown,
}

impl NetworkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Other => "other",
            Self::None => "none",
            Self::Unknown => "unknown",
        }
    }

    /// Numeric codes used across the C ABI.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Wifi,
            2 => Self::Cellular,
            3 => Self::Ethernet,
            4 => Self::Other,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of the device's network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub connected: bool,
    pub network_type: NetworkType,
    pub metered: bool,
    pub has_internet_capability: bool,
}

impl NetworkState {
    /// Optimistic state used before the platform has reported anything.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            connected: true,
            network_type: NetworkType::Unknown,
            metered: false,
            has_internet_capability: true,
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self {
            connected: false,
            network_type: NetworkType::None,
            metered: false,
            has_internet_capability: false,
        }
    }

    fn is_transition_from(&self, previous: &NetworkState) -> bool {
        self.connected != previous.connected || self.network_type != previous.network_type
    }
}

/// Capability update as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCapabilities {
    pub network_type: NetworkType,
    pub metered: bool,
    pub validated: bool,
}

/// Outcome of a connectivity preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    /// The network looks usable.
    Proceed(NetworkState),
    /// Do not attempt a network call.
    FastFail {
        reason: &'static str,
        state: NetworkState,
    },
}

/// Handle returned by [`ConnectivityMonitor::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&NetworkState) + Send + Sync>;

/// Tracks live network state and derives preflight decisions from it.
pub struct ConnectivityMonitor {
    state: ArcSwap<NetworkState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    fast_fail_timeout: Duration,
    normal_timeout: Duration,
    fast_fail_offline: bool,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(settings: &ConnectivitySettings) -> Self {
        Self {
            state: ArcSwap::from_pointee(NetworkState::unknown()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            fast_fail_timeout: Duration::from_millis(settings.fast_fail_timeout_ms),
            normal_timeout: Duration::from_millis(settings.normal_timeout_ms),
            fast_fail_offline: settings.fast_fail_offline,
        }
    }

    /// Current state; lock-free.
    #[must_use]
    pub fn current(&self) -> Arc<NetworkState> {
        self.state.load_full()
    }

    /// Replace the state wholesale.
    pub fn update(&self, state: NetworkState) {
        self.apply(|_| state.clone());
    }

    /// Platform callback: a network became the default.
    pub fn on_network_available(&self, network_type: NetworkType) {
        self.apply(|current| NetworkState {
            connected: true,
            network_type,
            metered: current.metered,
            has_internet_capability: true,
        });
    }

    /// Platform callback: the default network went away.
    pub fn on_network_lost(&self) {
        self.apply(|_| NetworkState::offline());
    }

    /// Platform callback: capabilities of the default network changed.
    pub fn on_capabilities_changed(&self, capabilities: NetworkCapabilities) {
        self.apply(|current| NetworkState {
            connected: current.connected,
            network_type: capabilities.network_type,
            metered: capabilities.metered,
            has_internet_capability: capabilities.validated,
        });
    }

    /// Decide whether a network call is worth attempting.
    #[must_use]
    pub fn preflight(&self) -> Preflight {
        let state = NetworkState::clone(&self.current());
        if !self.fast_fail_offline {
            return Preflight::Proceed(state);
        }
        if !state.connected {
            return Preflight::FastFail {
                reason: REASON_OFFLINE,
                state,
            };
        }
        if !state.has_internet_capability {
            return Preflight::FastFail {
                reason: REASON_NO_VALIDATED_INTERNET,
                state,
            };
        }
        Preflight::Proceed(state)
    }

    /// Upper bound for a network call given the current state.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        if self.current().connected {
            self.normal_timeout
        } else {
            self.fast_fail_timeout
        }
    }

    /// Subscribe to transitions. The current state is delivered immediately.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners.lock().push((id, Arc::clone(&listener)));
        listener(&self.current());
        id
    }

    /// Unsubscribe; returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn apply<F>(&self, next: F)
    where
        F: Fn(&NetworkState) -> NetworkState,
    {
        let mut installed = None;
        let previous = self.state.rcu(|current| {
            let state = Arc::new(next(current));
            installed = Some(Arc::clone(&state));
            state
        });
        let Some(installed) = installed else {
            return;
        };

        if installed.is_transition_from(&previous) {
            log::info!(
                "connectivity: connected={} type={} (was connected={} type={})",
                installed.connected,
                installed.network_type.as_str(),
                previous.connected,
                previous.network_type.as_str()
            );
            // Snapshot so listeners run without holding the lock.
            let listeners: Vec<Listener> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener(&installed);
            }
        } else {
            log::debug!(
                "connectivity: capability update metered={} validated={}",
                installed.metered,
                installed.has_internet_capability
            );
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(&ConnectivitySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_monitor() -> (ConnectivityMonitor, Arc<Mutex<Vec<NetworkState>>>) {
        let monitor = ConnectivityMonitor::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.add_listener(move |state| sink.lock().push(state.clone()));
        (monitor, seen)
    }

    #[test]
    fn starts_optimistic() {
        let monitor = ConnectivityMonitor::default();
        assert_eq!(
            monitor.preflight(),
            Preflight::Proceed(NetworkState::unknown())
        );
        assert_eq!(monitor.effective_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn offline_fast_fails_with_short_timeout() {
        let monitor = ConnectivityMonitor::default();
        monitor.on_network_lost();

        let Preflight::FastFail { reason, state } = monitor.preflight() else {
            unreachable!("offline monitor should fast fail");
        };
        assert_eq!(reason, REASON_OFFLINE);
        assert!(!state.connected);
        assert_eq!(monitor.effective_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn unvalidated_network_fast_fails() {
        let monitor = ConnectivityMonitor::default();
        monitor.on_network_available(NetworkType::Wifi);
        monitor.on_capabilities_changed(NetworkCapabilities {
            network_type: NetworkType::Wifi,
            metered: false,
            validated: false,
        });

        assert!(matches!(
            monitor.preflight(),
            Preflight::FastFail {
                reason: REASON_NO_VALIDATED_INTERNET,
                ..
            }
        ));
        // Attached but unvalidated is still "connected" for timeout purposes.
        assert_eq!(monitor.effective_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn fast_fail_can_be_disabled() {
        let monitor = ConnectivityMonitor::new(&ConnectivitySettings {
            fast_fail_offline: false,
            ..Default::default()
        });
        monitor.on_network_lost();
        assert!(matches!(monitor.preflight(), Preflight::Proceed(_)));
    }

    #[test]
    fn listener_receives_current_state_on_subscribe() {
        let (_monitor, seen) = recording_monitor();
        assert_eq!(seen.lock().as_slice(), &[NetworkState::unknown()]);
    }

    #[test]
    fn listener_fires_only_on_connected_or_type_transitions() {
        let (monitor, seen) = recording_monitor();

        monitor.on_network_available(NetworkType::Wifi); // type change
        monitor.on_capabilities_changed(NetworkCapabilities {
            network_type: NetworkType::Wifi,
            metered: true,
            validated: true,
        }); // capability tick only
        monitor.on_capabilities_changed(NetworkCapabilities {
            network_type: NetworkType::Wifi,
            metered: false,
            validated: true,
        }); // capability tick only
        monitor.on_network_lost(); // connected change
        monitor.on_network_lost(); // no change

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].network_type, NetworkType::Wifi);
        assert!(!seen[2].connected);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let monitor = ConnectivityMonitor::default();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = monitor.add_listener(move |_| *sink.lock() += 1);

        assert!(monitor.remove_listener(id));
        assert!(!monitor.remove_listener(id));
        monitor.on_network_lost();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn capability_update_preserves_metered_on_available() {
        let monitor = ConnectivityMonitor::default();
        monitor.on_capabilities_changed(NetworkCapabilities {
            network_type: NetworkType::Cellular,
            metered: true,
            validated: true,
        });
        monitor.on_network_available(NetworkType::Cellular);
        assert!(monitor.current().metered);
    }
}
