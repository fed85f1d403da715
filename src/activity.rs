//! Work-activity notifications.
//!
//! An executor configured with an [`ActivityObserver`] reports every task it
//! accepts and every task that finishes. [`ActivityIndicator`] turns those
//! notifications into a single "busy" flag, hiding it only after a short
//! grace period so back-to-back requests do not make it flicker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

/// Default delay before an idle indicator is hidden.
pub const DEFAULT_HIDE_GRACE: Duration = Duration::from_secs(1);

/// Fire-and-forget hooks invoked around task execution.
///
/// Called from arbitrary threads; implementations must not block.
pub trait ActivityObserver: Send + Sync {
    /// A task was submitted.
    fn work_started(&self);

    /// A submitted task finished.
    fn work_ended(&self);
}

type VisibilityCallback = Box<dyn Fn(bool) + Send + Sync>;

struct IndicatorState {
    active: AtomicUsize,
    visible: AtomicBool,
    generation: AtomicU64,
    grace: Duration,
    on_change: Option<VisibilityCallback>,
}

impl IndicatorState {
    fn set_visible(&self, visible: bool) {
        if self.visible.swap(visible, Ordering::SeqCst) != visible {
            trace!(visible, "activity indicator changed");
            if let Some(callback) = &self.on_change {
                callback(visible);
            }
        }
    }
}

/// Counts in-flight work and exposes a debounced visibility flag.
#[derive(Clone)]
pub struct ActivityIndicator {
    state: Arc<IndicatorState>,
}

impl ActivityIndicator {
    /// Indicator with the default grace period.
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_HIDE_GRACE)
    }

    /// Indicator that hides `grace` after the last task ends.
    pub fn with_grace(grace: Duration) -> Self {
        Self::build(grace, None)
    }

    /// Indicator that also reports visibility changes to `on_change`.
    pub fn with_callback(
        grace: Duration,
        on_change: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        Self::build(grace, Some(Box::new(on_change)))
    }

    fn build(grace: Duration, on_change: Option<VisibilityCallback>) -> Self {
        Self {
            state: Arc::new(IndicatorState {
                active: AtomicUsize::new(0),
                visible: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                grace,
                on_change,
            }),
        }
    }

    /// Whether the indicator is currently shown.
    pub fn is_visible(&self) -> bool {
        self.state.visible.load(Ordering::SeqCst)
    }

    /// Number of tasks currently reported as in flight.
    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    fn schedule_hide(&self) {
        // Any later start bumps the generation and thereby voids this hide.
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = Arc::clone(&self.state);

        let hide = move || {
            if state.generation.load(Ordering::SeqCst) == generation
                && state.active.load(Ordering::SeqCst) == 0
            {
                state.set_visible(false);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let grace = self.state.grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    hide();
                });
            }
            Err(_) => hide(),
        }
    }
}

impl Default for ActivityIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityObserver for ActivityIndicator {
    fn work_started(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_add(1, Ordering::SeqCst);
        self.state.set_visible(true);
    }

    fn work_ended(&self) {
        let previous = self
            .state
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);

        if previous <= 1 {
            self.schedule_hide();
        }
    }
}
