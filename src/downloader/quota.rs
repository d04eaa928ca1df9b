//! Quota tracking for the service's independent rate limit windows
//!
//! Each window counts consumption against a capacity until its reset deadline.
//! Callers that would overflow a window are parked until the deadline passes,
//! then re-check. Windows never share state: a media download consumes from
//! the hourly and daily media windows, a page query from the daily query
//! window only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::shutdown::SharedShutdown;

/// How often a parked caller reports the remaining wait.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Resource governed by a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaKind {
    /// API page queries per day
    QueriesPerDay,
    /// Media bytes per hour
    MediaBytesPerHour,
    /// Media bytes per day
    MediaBytesPerDay,
}

impl QuotaKind {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            QuotaKind::QueriesPerDay => "queries_per_day",
            QuotaKind::MediaBytesPerHour => "media_bytes_per_hour",
            QuotaKind::MediaBytesPerDay => "media_bytes_per_day",
        }
    }

    /// Windows charged for a media download
    pub const MEDIA: [QuotaKind; 2] = [QuotaKind::MediaBytesPerHour, QuotaKind::MediaBytesPerDay];
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Definition of one window, passed at tracker construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Resource the window governs
    pub kind: QuotaKind,
    /// Units allowed per window
    pub capacity: u64,
    /// Window length
    pub duration: Duration,
}

impl WindowSpec {
    /// Create a window definition
    pub fn new(kind: QuotaKind, capacity: u64, duration: Duration) -> Self {
        Self {
            kind,
            capacity,
            duration,
        }
    }
}

/// Current state of one quota window
#[derive(Debug, Clone, Copy)]
pub struct QuotaWindow {
    consumed: u64,
    capacity: u64,
    resets_at: Instant,
    duration: Duration,
}

impl QuotaWindow {
    fn open(spec: &WindowSpec, now: Instant) -> Self {
        Self {
            consumed: 0,
            capacity: spec.capacity,
            resets_at: now + spec.duration,
            duration: spec.duration,
        }
    }

    /// Start a fresh window if the current one has expired
    fn refresh(&mut self, now: Instant) -> bool {
        if now >= self.resets_at {
            self.consumed = 0;
            self.resets_at = now + self.duration;
            return true;
        }
        false
    }

    /// Units consumed in the current window
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Units allowed per window
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Deadline after which the window resets
    pub fn resets_at(&self) -> Instant {
        self.resets_at
    }

    /// Units left before the capacity is reached (zero when overshot)
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.consumed)
    }
}

#[derive(Debug, Clone, Copy)]
enum Admission {
    /// Reserve `amount` units; requires `consumed + amount <= capacity`
    Consume(u64),
    /// Wait for any room; requires `consumed < capacity`
    Room,
}

/// Quota tracker errors
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Request can never fit in the window
    #[error("quota request of {amount} exceeds {kind} capacity of {capacity}")]
    ExceedsCapacity {
        /// Window
        kind: QuotaKind,
        /// Requested units
        amount: u64,
        /// Window capacity
        capacity: u64,
    },

    /// Tracker was built without this window
    #[error("quota window not configured: {0}")]
    UnknownWindow(QuotaKind),

    /// Shutdown requested while parked
    #[error("shutdown requested while waiting for {0} quota")]
    Cancelled(QuotaKind),
}

impl QuotaError {
    /// Whether the error comes from an impossible configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QuotaError::ExceedsCapacity { .. } | QuotaError::UnknownWindow(_)
        )
    }
}

/// Owned set of quota windows, shared by reference (`Arc`) between callers.
///
/// Every window sits behind its own mutex, so a check-and-increment is a single
/// critical section and concurrent callers serialize per window.
pub struct QuotaTracker {
    windows: HashMap<QuotaKind, Mutex<QuotaWindow>>,
    report_interval: Duration,
    shutdown: Option<SharedShutdown>,
}

impl QuotaTracker {
    /// Create a tracker with the given windows, all starting now.
    pub fn new(specs: impl IntoIterator<Item = WindowSpec>) -> Self {
        let now = Instant::now();
        let windows = specs
            .into_iter()
            .map(|spec| (spec.kind, Mutex::new(QuotaWindow::open(&spec, now))))
            .collect();
        Self {
            windows,
            report_interval: DEFAULT_REPORT_INTERVAL,
            shutdown: None,
        }
    }

    /// Interrupt waits when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override how often parked callers report the remaining wait
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Copy of a window's current state
    pub fn snapshot(&self, kind: QuotaKind) -> Option<QuotaWindow> {
        self.windows.get(&kind).map(|slot| *lock(slot))
    }

    /// Reserve `amount` units, waiting for window resets as needed.
    pub async fn consume(&self, kind: QuotaKind, amount: u64) -> Result<(), QuotaError> {
        self.acquire(kind, Admission::Consume(amount)).await
    }

    /// Wait until the window has any room left, without reserving.
    ///
    /// Used before transfers whose size is only known afterwards; the size is
    /// then charged with [`QuotaTracker::record`].
    pub async fn admit(&self, kind: QuotaKind) -> Result<(), QuotaError> {
        self.acquire(kind, Admission::Room).await
    }

    /// Wait for room in every listed window.
    pub async fn admit_all(&self, kinds: &[QuotaKind]) -> Result<(), QuotaError> {
        for kind in kinds {
            self.admit(*kind).await?;
        }
        Ok(())
    }

    /// Charge `amount` units after the fact.
    ///
    /// May push the window past its capacity; the next admission check parks
    /// until the window resets.
    pub fn record(&self, kind: QuotaKind, amount: u64) -> Result<(), QuotaError> {
        let slot = self.windows.get(&kind).ok_or(QuotaError::UnknownWindow(kind))?;
        let mut window = lock(slot);
        window.refresh(Instant::now());
        window.consumed = window.consumed.saturating_add(amount);
        if window.consumed > window.capacity {
            debug!(
                window = kind.label(),
                consumed = window.consumed,
                capacity = window.capacity,
                "Window overshot by post-transfer accounting"
            );
        }
        metrics::record_quota_consumed(kind, amount);
        Ok(())
    }

    /// Charge `amount` to every listed window after the fact.
    pub fn record_all(&self, kinds: &[QuotaKind], amount: u64) -> Result<(), QuotaError> {
        for kind in kinds {
            self.record(*kind, amount)?;
        }
        Ok(())
    }

    async fn acquire(&self, kind: QuotaKind, admission: Admission) -> Result<(), QuotaError> {
        let slot = self.windows.get(&kind).ok_or(QuotaError::UnknownWindow(kind))?;

        loop {
            let deadline = {
                let mut window = lock(slot);
                let now = Instant::now();
                if window.refresh(now) {
                    debug!(window = kind.label(), "Quota window reset");
                }

                let admitted = match admission {
                    Admission::Consume(amount) => {
                        if amount > window.capacity {
                            return Err(QuotaError::ExceedsCapacity {
                                kind,
                                amount,
                                capacity: window.capacity,
                            });
                        }
                        window.consumed + amount <= window.capacity
                    }
                    Admission::Room => {
                        if window.capacity == 0 {
                            return Err(QuotaError::ExceedsCapacity {
                                kind,
                                amount: 1,
                                capacity: 0,
                            });
                        }
                        window.consumed < window.capacity
                    }
                };

                if admitted {
                    if let Admission::Consume(amount) = admission {
                        window.consumed += amount;
                        metrics::record_quota_consumed(kind, amount);
                    }
                    return Ok(());
                }

                window.resets_at
            };

            // Lock released; re-validate after waking.
            self.park(kind, deadline).await?;
        }
    }

    async fn park(&self, kind: QuotaKind, deadline: Instant) -> Result<(), QuotaError> {
        let wait = deadline.saturating_duration_since(Instant::now());
        warn!(
            window = kind.label(),
            wait = %format_wait(wait),
            "iNaturalist quota exhausted, download will resume when the window resets"
        );
        metrics::record_quota_wait(kind, wait);

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.report_interval,
            self.report_interval,
        );

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                _ = ticker.tick() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    info!(
                        window = kind.label(),
                        remaining = %format_wait(remaining),
                        "Waiting for quota window reset"
                    );
                }
                _ = wait_for_shutdown(self.shutdown.as_ref()) => {
                    warn!(window = kind.label(), "Shutdown requested during quota wait");
                    return Err(QuotaError::Cancelled(kind));
                }
            }
        }
    }
}

fn lock(slot: &Mutex<QuotaWindow>) -> MutexGuard<'_, QuotaWindow> {
    // A panic inside the critical section cannot leave the counters half-updated.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn wait_for_shutdown(shutdown: Option<&SharedShutdown>) {
    match shutdown {
        Some(handle) => handle.wait_for_shutdown().await,
        None => std::future::pending::<()>().await,
    }
}

/// Format a wait as `HH:MM:SS`
pub fn format_wait(wait: Duration) -> String {
    let secs = wait.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
