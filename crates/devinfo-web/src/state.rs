//! Shared application state.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use axum::extract::State;

use devinfo_core::export::ChartLayout;
use devinfo_core::{CollectorState, DeviceMonitor, Snapshot, TimeSeries};

pub(crate) struct WebAppInner {
    pub(crate) name: &'static str,
    /// Held by the shutdown task while it joins the sampling thread.
    pub(crate) monitor: Mutex<Box<dyn DeviceMonitor>>,
    /// Read without the monitor lock.
    pub(crate) series: TimeSeries,
    pub(crate) layout: ChartLayout,
    /// Window used when a request does not name one.
    pub(crate) default_window: usize,
}

impl WebAppInner {
    pub(crate) fn new(monitor: Box<dyn DeviceMonitor>, layout: ChartLayout, default_window: usize) -> Self {
        Self {
            name: monitor.name(),
            series: monitor.series(),
            monitor: Mutex::new(monitor),
            layout,
            default_window,
        }
    }

    pub(crate) fn collector_state(&self) -> CollectorState {
        match self.monitor.try_lock() {
            Ok(monitor) => monitor.state(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().state(),
            // Locked only while shutdown joins the sampling thread.
            Err(TryLockError::WouldBlock) => CollectorState::Running,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.series.snapshot()
    }

    pub(crate) fn with_monitor<T>(&self, f: impl FnOnce(&mut dyn DeviceMonitor) -> T) -> T {
        let mut guard = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    }
}

pub(crate) type SharedState = Arc<WebAppInner>;

pub(crate) type AppState = State<SharedState>;
