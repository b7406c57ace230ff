//! Poll loop.
//!
//! One cycle: capture, classify, confirm an `Open`, publish. Cycles run back to
//! back with a fixed pause in between. Shutdown is cooperative: `RunState` is
//! checked between cycles and wakes the pause early, after which `offline` is
//! published and the bus connection closed.

use chrono::{Local, SecondsFormat};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::classify::{Classify, GateStatus, Sleeper};
use crate::confirm::{evaluate, CycleOutcome, GateDecision};
use crate::ingest::FrameSource;
use crate::storage::SnapshotStore;
use crate::transport::{Availability, GateAlert, Publisher};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
}

/// Shared run/stop flag with an interruptible wait.
#[derive(Debug)]
pub struct RunState {
    phase: Mutex<Phase>,
    changed: Condvar,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Running),
            changed: Condvar::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Ask the loop to stop and wake any pending wait.
    pub fn request_shutdown(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        *phase = Phase::ShuttingDown;
        self.changed.notify_all();
    }

    /// Wait up to `timeout`. Returns `true` if the full time elapsed while
    /// still running, `false` if shutdown was requested.
    ///
    /// A timeout too large to represent as an `Instant` waits for shutdown only.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *phase == Phase::ShuttingDown {
                return false;
            }
            phase = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    self.changed
                        .wait_timeout(phase, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .changed
                    .wait(phase)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl Sleeper for RunState {
    fn sleep(&self, duration: Duration) -> bool {
        self.wait(duration)
    }
}

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    pub camera_name: String,
    pub check_interval: Duration,
    pub startup_delay: Duration,
}

/// What a single cycle ended up publishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleReport {
    /// Primary capture failed; nothing published.
    Skipped,
    /// A classification failed; nothing published.
    Aborted,
    /// Status published; `alerted` is true when an open alert was also sent.
    Published { status: GateStatus, alerted: bool },
}

pub struct Monitor<S, C, P> {
    settings: MonitorSettings,
    source: S,
    classifier: C,
    publisher: P,
    snapshots: SnapshotStore,
}

impl<S, C, P> Monitor<S, C, P>
where
    S: FrameSource,
    C: Classify,
    P: Publisher,
{
    pub fn new(
        settings: MonitorSettings,
        source: S,
        classifier: C,
        publisher: P,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            settings,
            source,
            classifier,
            publisher,
            snapshots,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Publish `online`, wait out the startup delay, then poll until shutdown.
    pub fn run(&mut self, run_state: &RunState) {
        self.announce(Availability::Online);

        if run_state.wait(self.settings.startup_delay) {
            loop {
                log::info!("starting gate check");
                self.run_cycle();

                let minutes = self.settings.check_interval.as_secs_f64() / 60.0;
                log::info!("next check in {} minutes", minutes);
                if !run_state.wait(self.settings.check_interval) {
                    break;
                }
            }
        }

        log::info!("shutting down");
        self.shutdown();
    }

    /// Publish `online`, run one cycle, then shut down.
    pub fn run_once(&mut self) -> CycleReport {
        self.announce(Availability::Online);
        let report = self.run_cycle();
        self.shutdown();
        report
    }

    /// Capture, classify, confirm and publish once.
    pub fn run_cycle(&mut self) -> CycleReport {
        match evaluate(&mut self.source, &mut self.classifier) {
            CycleOutcome::CaptureFailed(_) => CycleReport::Skipped,
            CycleOutcome::Aborted(e) => {
                log::error!("gate check aborted, nothing published: {}", e);
                CycleReport::Aborted
            }
            CycleOutcome::Decided(decision) => self.publish_decision(&decision),
        }
    }

    fn publish_decision(&mut self, decision: &GateDecision) -> CycleReport {
        if let Err(e) = self.publisher.publish_status(decision.status) {
            log::warn!("failed to publish status: {}", e);
        }

        if decision.status != GateStatus::Open {
            match decision.confidence {
                Some(confidence) => log::info!(
                    "gate status: {} (confidence: {}%)",
                    decision.status,
                    confidence
                ),
                None => log::info!("gate status: {} (unconfirmed)", decision.status),
            }
            return CycleReport::Published {
                status: decision.status,
                alerted: false,
            };
        }

        let now = Local::now();
        let snapshot = match self.snapshots.save(
            decision.snapshot.full.jpeg(),
            &self.settings.camera_name,
            &now,
        ) {
            Ok(path) => Some(path),
            Err(e) => {
                log::error!("failed to save snapshot: {:#}", e);
                None
            }
        };
        let alert = GateAlert::gate_open(
            &self.settings.camera_name,
            now.to_rfc3339_opts(SecondsFormat::Secs, false),
            snapshot,
        );
        let alerted = match self.publisher.publish_alert(&alert) {
            Ok(()) => {
                log::warn!("GATE IS OPEN - alert sent with snapshot");
                true
            }
            Err(e) => {
                log::error!("failed to publish alert: {}", e);
                false
            }
        };
        CycleReport::Published {
            status: GateStatus::Open,
            alerted,
        }
    }

    fn announce(&mut self, availability: Availability) {
        if let Err(e) = self.publisher.publish_availability(availability) {
            log::warn!("failed to publish availability: {}", e);
        }
    }

    /// Publish `offline` and close the bus connection.
    pub fn shutdown(&mut self) {
        self.announce(Availability::Offline);
        if let Err(e) = self.publisher.close() {
            log::warn!("{}", e);
        }
        log::info!("goodbye");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn wait_elapses_while_running() {
        let state = RunState::new();
        assert!(state.wait(Duration::from_millis(10)));
        assert!(state.is_running());
    }

    #[test]
    fn shutdown_wakes_a_pending_wait() {
        let state = Arc::new(RunState::new());
        let waker = state.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            waker.request_shutdown();
        });
        let started = Instant::now();
        assert!(!state.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(state.phase(), Phase::ShuttingDown);
        handle.join().unwrap();
    }

    #[test]
    fn unrepresentable_timeout_waits_for_shutdown() {
        let state = Arc::new(RunState::new());
        let waker = state.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            waker.request_shutdown();
        });
        assert!(!state.wait(Duration::MAX));
        assert!(!state.wait(Duration::from_secs(u64::MAX)));
        handle.join().unwrap();
    }

    #[test]
    fn huge_configured_interval_does_not_panic() {
        let cfg = crate::config::GateMonitorConfig::from_json(
            r#"{"rtsp_url": "stub://gate", "gemini_api_key": "k",
                "check_interval_minutes": 200000000000000000,
                "startup_delay_secs": 18446744073709551615}"#,
        )
        .expect("config");
        let state = RunState::new();
        state.request_shutdown();
        assert!(!state.wait(cfg.check_interval));
        assert!(!state.wait(cfg.startup_delay));
    }

    #[test]
    fn wait_after_shutdown_returns_immediately() {
        let state = RunState::new();
        state.request_shutdown();
        assert!(!state.wait(Duration::from_secs(30)));
        assert!(!Sleeper::sleep(&state, Duration::from_secs(30)));
    }
}
