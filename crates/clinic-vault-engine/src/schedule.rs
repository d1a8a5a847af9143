//! Cadence-driven automatic backups.
//!
//! A [`ScheduleGate`] is checked periodically. Each check records when it ran, skips when a
//! run is already in flight, and triggers [`BackupWriter::run_auto`] once the configured
//! cadence has elapsed since the last successful backup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clinic_vault_core::{needs_auto_backup, BackupError, Clock, SettingsStore};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::writer::{BackupOutcome, BackupWriter};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotDue,
    SkippedInFlight,
    Completed(BackupOutcome),
    Failed(BackupError),
    /// The backup task panicked or was cancelled by the runtime.
    Aborted(String),
}

#[derive(Clone)]
pub struct ScheduleGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    writer: Arc<BackupWriter>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<AtomicBool>,
    last_checked_at: Mutex<Option<OffsetDateTime>>,
    /// Last auto backup this gate delivered, in case the settings store failed to record it.
    last_delivered_at: Mutex<Option<OffsetDateTime>>,
}

/// Holds the in-flight flag for the duration of one run and clears it on drop, including
/// when the run panics.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ScheduleGate {
    #[must_use]
    pub fn new(
        writer: Arc<BackupWriter>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                writer,
                settings,
                clock,
                in_flight: Arc::new(AtomicBool::new(false)),
                last_checked_at: Mutex::new(None),
                last_delivered_at: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn last_checked_at(&self) -> Option<OffsetDateTime> {
        *self.inner.last_checked_at.lock()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Check and, when due, run the backup on the calling thread.
    #[must_use]
    pub fn check(&self) -> TickOutcome {
        self.record_check();
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            debug!("auto backup still in flight; skipping check");
            return TickOutcome::SkippedInFlight;
        };
        self.inner.run_if_due(&guard)
    }

    /// Same as [`ScheduleGate::check`], with the backup itself on tokio's blocking pool.
    pub async fn tick(&self) -> TickOutcome {
        self.record_check();
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            debug!("auto backup still in flight; skipping tick");
            return TickOutcome::SkippedInFlight;
        };
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || inner.run_if_due(&guard)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "auto backup task aborted");
                TickOutcome::Aborted(err.to_string())
            }
        }
    }

    /// Tick every `every` on the current tokio runtime until [`ScheduleHandle::stop`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, every: Duration) -> ScheduleHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let gate = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = gate.tick().await;
                        debug!(?outcome, "scheduled backup check");
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("backup scheduler stopped");
        });
        info!(interval_secs = every.as_secs(), "backup scheduler started");
        ScheduleHandle {
            stop: stop_tx,
            task,
        }
    }

    fn record_check(&self) {
        *self.inner.last_checked_at.lock() = Some(self.inner.clock.now());
    }
}

impl GateInner {
    fn run_if_due(&self, _guard: &InFlightGuard) -> TickOutcome {
        let mut settings = match self.settings.load_settings() {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "could not read backup settings for schedule check");
                return TickOutcome::Failed(err.into());
            }
        };
        let delivered = *self.last_delivered_at.lock();
        settings.last_backup_at = settings.last_backup_at.max(delivered);
        if !needs_auto_backup(&settings, self.clock.now()) {
            return TickOutcome::NotDue;
        }

        info!(interval = settings.auto_backup_interval.as_str(), "auto backup due");
        match self.writer.run_auto() {
            Ok(outcome) => {
                if let BackupOutcome::Completed(receipt) = &outcome {
                    *self.last_delivered_at.lock() = Some(receipt.item.created_at);
                }
                TickOutcome::Completed(outcome)
            }
            Err(err) => {
                warn!(error = %err, "auto backup failed");
                TickOutcome::Failed(err)
            }
        }
    }
}

/// Running scheduler loop.
pub struct ScheduleHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// End the loop after the current tick and wait for it. A backup already running is
    /// allowed to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "backup scheduler ended abnormally");
        }
    }
}
