//! Run coordinator.
//!
//! One run acquires a session, ensures the canary device and then drives four
//! legs concurrently:
//!
//! ```text
//!                    ┌── connectivity ── ensure hub, connect, subscribe, publish, verify
//! session ── device ─┼── command workflow ── deploy + start once subscribed
//!                    ├── event workflow ─── deploy, verify once published
//!                    └── metadata ───────── rename, verify propagation
//! ```
//!
//! Legs share no mutable state. They only exchange phase signals over `watch`
//! channels, and every wait on a signal is bounded by `leg_sync_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use canary_core::config::CanaryConfig;
use canary_core::metrics::{AUTH, RUN_DURATION_MS, RUNS_REJECTED_TOTAL, RUNS_STARTED_TOTAL};
use canary_core::types::{Device, Session};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::envelope::CommandTracker;
use crate::gate::RunGate;
use crate::platform::Platform;
use crate::probe::ConnectionProbe;
use crate::provisioner::ResourceProvisioner;
use crate::recorder::{OutcomeRecorder, metered};
use crate::transport::Transport;
use crate::verifier::StateVerifier;
use crate::workflow::{LegProgress, WorkflowLifecycle, WorkflowStrategy};

/// Result of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

/// Where the connectivity leg is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityPhase {
    Pending,
    Subscribed,
    Published,
    Done,
    Failed,
}

/// Waits until `ready` holds for the watched value, at most `limit`.
async fn wait_until<V: Clone>(
    rx: &mut watch::Receiver<V>,
    limit: Duration,
    ready: impl FnMut(&V) -> bool,
) -> Option<V> {
    match tokio::time::timeout(limit, rx.wait_for(ready)).await {
        Ok(Ok(value)) => Some((*value).clone()),
        _ => None,
    }
}

pub struct Orchestrator<P: Platform, T: Transport> {
    platform: Arc<P>,
    recorder: Arc<dyn OutcomeRecorder>,
    gate: RunGate,
    provisioner: ResourceProvisioner<P>,
    probe: ConnectionProbe<T>,
    verifier: StateVerifier<P>,
    command: WorkflowLifecycle<P>,
    event: WorkflowLifecycle<P>,
    convergence: Duration,
    leg_sync_timeout: Duration,
}

impl<P: Platform, T: Transport> Orchestrator<P, T> {
    pub fn new(
        config: &CanaryConfig,
        platform: Arc<P>,
        transport: Arc<T>,
        recorder: Arc<dyn OutcomeRecorder>,
        gate: RunGate,
    ) -> Self {
        let convergence = config.timing.convergence_window();
        let tracker = CommandTracker::new();

        Self {
            provisioner: ResourceProvisioner::new(config, Arc::clone(&platform), Arc::clone(&recorder)),
            probe: ConnectionProbe::new(config, transport, Arc::clone(&recorder), tracker.clone()),
            verifier: StateVerifier::new(Arc::clone(&platform), Arc::clone(&recorder), convergence),
            command: WorkflowLifecycle::new(
                Arc::clone(&platform),
                Arc::clone(&recorder),
                WorkflowStrategy::command(),
                convergence,
            )
            .with_command_tracker(tracker),
            event: WorkflowLifecycle::new(
                Arc::clone(&platform),
                Arc::clone(&recorder),
                WorkflowStrategy::event(),
                convergence,
            ),
            platform,
            recorder,
            gate,
            convergence,
            leg_sync_timeout: config.timing.leg_sync_timeout(),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// Starts a run in the background unless one is active. Never blocks.
    pub fn try_run(self: &Arc<Self>) -> TriggerOutcome {
        let Some(permit) = self.gate.try_acquire() else {
            self.recorder.increment(RUNS_REJECTED_TOTAL);
            info!("canary run already in progress, trigger ignored");
            return TriggerOutcome::AlreadyRunning;
        };
        self.recorder.increment(RUNS_STARTED_TOTAL);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            // released when the run ends, even by panic
            let _permit = permit;
            this.run_once().await;
        });
        TriggerOutcome::Started
    }

    /// Runs to completion on the current task unless a run is active.
    pub async fn run(&self) -> TriggerOutcome {
        let Some(_permit) = self.gate.try_acquire() else {
            self.recorder.increment(RUNS_REJECTED_TOTAL);
            return TriggerOutcome::AlreadyRunning;
        };
        self.recorder.increment(RUNS_STARTED_TOTAL);
        self.run_once().await;
        TriggerOutcome::Started
    }

    async fn run_once(&self) {
        let started = Instant::now();
        info!("canary run started");

        match metered(&*self.recorder, AUTH, self.platform.acquire()).await {
            Ok(session) => {
                match self.provisioner.ensure_device(&session).await {
                    Ok(device) => self.run_legs(&session, &device).await,
                    Err(e) => error!(error = %e, "canary run aborted: canary device unavailable"),
                }
                if let Err(e) = self.platform.release(&session).await {
                    warn!(error = %e, "session release failed");
                }
            }
            Err(e) => error!(error = %e, "canary run aborted: no session"),
        }

        let elapsed = started.elapsed();
        self.recorder
            .set_gauge(RUN_DURATION_MS, elapsed.as_millis() as f64);
        info!(duration_ms = elapsed.as_millis() as u64, "run finished");
    }

    async fn run_legs(&self, session: &Session, device: &Device) {
        let (phase_tx, phase_rx) = watch::channel(ConnectivityPhase::Pending);
        let (event_ready_tx, event_ready_rx) = watch::channel(false);
        let (command_done_tx, command_done_rx) = watch::channel(false);

        tokio::join!(
            self.connectivity_leg(session, device, &phase_tx, event_ready_rx, command_done_rx),
            self.command_leg(session, device, phase_rx.clone(), &command_done_tx),
            self.event_leg(session, device, phase_rx, &event_ready_tx),
            self.verifier.check_metadata(session, device),
        );
    }

    async fn connectivity_leg(
        &self,
        session: &Session,
        device: &Device,
        phase: &watch::Sender<ConnectivityPhase>,
        mut event_ready: watch::Receiver<bool>,
        mut command_done: watch::Receiver<bool>,
    ) {
        self.verifier
            .check_connection_state(session, device, false)
            .await;

        let hub = match self.provisioner.ensure_hub(session, device).await {
            Ok(hub) => hub,
            Err(e) => {
                error!(error = %e, "connectivity leg aborted: canary hub unavailable");
                phase.send_replace(ConnectivityPhase::Failed);
                return;
            }
        };

        let connection = match self.probe.connect(&hub.id).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "connectivity leg aborted: connect failed");
                phase.send_replace(ConnectivityPhase::Failed);
                return;
            }
        };

        if let Err(e) = self.probe.subscribe(&connection, device).await {
            error!(error = %e, "connectivity leg aborted: subscribe failed");
            phase.send_replace(ConnectivityPhase::Failed);
            self.probe.disconnect(&connection).await;
            return;
        }
        phase.send_replace(ConnectivityPhase::Subscribed);

        if wait_until(&mut event_ready, self.leg_sync_timeout, |ready| *ready)
            .await
            .is_none()
        {
            warn!("event workflow not ready in time, publishing anyway");
        }

        let value1 = i64::from(rand::random::<u32>());
        let value2 = i64::from(rand::random::<u32>());
        let published = match self.probe.publish(&connection, device, value1, value2).await {
            Ok(()) => {
                phase.send_replace(ConnectivityPhase::Published);
                true
            }
            Err(e) => {
                error!(error = %e, "sensor reading not published");
                phase.send_replace(ConnectivityPhase::Failed);
                false
            }
        };

        tokio::time::sleep(self.convergence).await;
        self.verifier
            .check_connection_state(session, device, true)
            .await;
        if published {
            self.verifier
                .check_device_data(session, device, value1, value2)
                .await;
        }

        if wait_until(&mut command_done, self.leg_sync_timeout, |done| *done)
            .await
            .is_none()
        {
            warn!("command workflow did not finish in time, disconnecting anyway");
        }

        self.probe.disconnect(&connection).await;
        tokio::time::sleep(self.convergence).await;
        self.verifier
            .check_connection_state(session, device, false)
            .await;

        if published {
            phase.send_replace(ConnectivityPhase::Done);
        }
    }

    async fn command_leg(
        &self,
        session: &Session,
        device: &Device,
        mut phase: watch::Receiver<ConnectivityPhase>,
        command_done: &watch::Sender<bool>,
    ) {
        let mut progress = LegProgress::default();

        let subscribed = matches!(
            wait_until(&mut phase, self.leg_sync_timeout, |p| *p != ConnectivityPhase::Pending).await,
            Some(ConnectivityPhase::Subscribed | ConnectivityPhase::Published | ConnectivityPhase::Done)
        );
        if subscribed {
            match self.command.start(session, device, &mut progress).await {
                // give the instance time to run before verifying it
                Ok(()) => tokio::time::sleep(self.convergence).await,
                Err(e) => error!(error = %e, "command workflow start failed"),
            }
        } else {
            warn!("canary device never subscribed, command workflow not started");
        }

        self.command.teardown(session, &mut progress).await;
        command_done.send_replace(true);
    }

    async fn event_leg(
        &self,
        session: &Session,
        device: &Device,
        mut phase: watch::Receiver<ConnectivityPhase>,
        event_ready: &watch::Sender<bool>,
    ) {
        let mut progress = LegProgress::default();

        let started = self.event.start(session, device, &mut progress).await;
        // released even on failure so the publisher does not wait out the timeout
        event_ready.send_replace(true);

        match started {
            Ok(()) => {
                let outcome = wait_until(&mut phase, self.leg_sync_timeout, |p| {
                    !matches!(p, ConnectivityPhase::Pending | ConnectivityPhase::Subscribed)
                })
                .await;
                if matches!(
                    outcome,
                    Some(ConnectivityPhase::Published | ConnectivityPhase::Done)
                ) {
                    progress.mark_triggered();
                    tokio::time::sleep(self.convergence).await;
                } else {
                    warn!("no sensor reading published, event workflow not verified");
                }
            }
            Err(e) => error!(error = %e, "event workflow start failed"),
        }

        self.event.teardown(session, &mut progress).await;
    }
}
