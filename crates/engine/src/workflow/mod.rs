//! Workflow life cycle shared by the command and event workflows.
//!
//! ```text
//! Absent ──deploy──▶ Deployed ──start / event──▶ Triggered ──verify──▶ Verified
//! ```
//!
//! [`WorkflowLifecycle::start`] repairs stale deployments left by an earlier
//! run, checks the deployment preview, deploys and (for [`TriggerMode::Direct`])
//! starts the workflow. [`WorkflowLifecycle::teardown`] is always attempted
//! once a leg began, even after `start` failed: it verifies the instance only
//! when the leg reached `Triggered`, then removes every reserved deployment.

use std::sync::Arc;
use std::time::Duration;

use canary_core::error::{CanaryError, PlatformError, WorkflowError};
use canary_core::types::{Device, INSTANCE_STATE_COMPLETED, Session};
use tracing::{debug, info, warn};

use crate::envelope::CommandTracker;
use crate::platform::{DEPLOYMENT_PAGE_SIZE, INSTANCE_HISTORY_LIMIT, Platform};
use crate::recorder::{OutcomeRecorder, uncategorized};

pub mod strategy;

pub use strategy::{TriggerMode, WorkflowStrategy};

/// How far a workflow leg got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    #[default]
    Absent,
    Deployed,
    Triggered,
    Verified,
}

/// Progress of one leg, carried from `start` into `teardown`.
#[derive(Debug, Clone, Default)]
pub struct LegProgress {
    pub state: LifecycleState,
    pub deployment_id: Option<String>,
}

impl LegProgress {
    /// Records that an event-driven workflow had its trigger emitted.
    pub fn mark_triggered(&mut self) {
        if self.state == LifecycleState::Deployed {
            self.state = LifecycleState::Triggered;
        }
    }
}

pub struct WorkflowLifecycle<P> {
    platform: Arc<P>,
    recorder: Arc<dyn OutcomeRecorder>,
    strategy: WorkflowStrategy,
    tracker: Option<CommandTracker>,
    convergence: Duration,
}

impl<P: Platform> WorkflowLifecycle<P> {
    pub fn new(
        platform: Arc<P>,
        recorder: Arc<dyn OutcomeRecorder>,
        strategy: WorkflowStrategy,
        convergence: Duration,
    ) -> Self {
        Self {
            platform,
            recorder,
            strategy,
            tracker: None,
            convergence,
        }
    }

    /// Counts delivered commands; reset on `start`, asserted on `teardown`.
    pub fn with_command_tracker(mut self, tracker: CommandTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn strategy(&self) -> &WorkflowStrategy {
        &self.strategy
    }

    /// Ids of every deployment carrying the reserved name, across all pages.
    async fn reserved_deployments(&self, session: &Session) -> Result<Vec<String>, PlatformError> {
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .platform
                .list_deployments(session, DEPLOYMENT_PAGE_SIZE, offset)
                .await?;
            let page_len = page.len();
            ids.extend(
                page.into_iter()
                    .filter(|d| d.name == self.strategy.reserved_name)
                    .map(|d| d.id),
            );
            if page_len < DEPLOYMENT_PAGE_SIZE as usize {
                return Ok(ids);
            }
            offset += DEPLOYMENT_PAGE_SIZE;
            debug!(offset, workflow = self.strategy.reserved_name, "listing next deployment page");
        }
    }

    /// Advisory: the preview must offer the device and the service at the anchor.
    async fn check_preview(&self, session: &Session, device: &Device, service_id: &str) {
        let metrics = &self.strategy.metrics;
        let prepared = match self
            .platform
            .prepare_deployment(session, self.strategy.bpmn, self.strategy.svg)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(workflow = self.strategy.reserved_name, error = %e, "deployment preview failed");
                self.recorder.increment(metrics.prepared_deployment_errors);
                return;
            }
        };

        let options = prepared
            .elements
            .iter()
            .filter(|e| e.bpmn_id == self.strategy.anchor_bpmn_id)
            .filter_map(|e| self.strategy.anchor_selection(e))
            .flat_map(|s| s.selection_options.iter());

        let (mut found_device, mut found_service) = (false, false);
        for option in options {
            found_device |= option.device.as_ref().is_some_and(|d| d.id == device.id);
            found_service |= option.services.iter().any(|s| s.id == service_id);
        }

        if !found_device {
            warn!(workflow = self.strategy.reserved_name, device_id = %device.id, "preview does not offer the canary device");
            self.recorder
                .increment(metrics.unexpected_prepared_deployment_selectables);
        }
        if !found_service {
            warn!(workflow = self.strategy.reserved_name, service_id, "preview does not offer the canary service");
            self.recorder
                .increment(metrics.unexpected_prepared_deployment_selectables);
        }
    }

    /// Repairs, deploys and (if direct) starts the workflow.
    ///
    /// Any error is fatal to the leg; the caller still runs [`Self::teardown`].
    pub async fn start(
        &self,
        session: &Session,
        device: &Device,
        progress: &mut LegProgress,
    ) -> Result<(), CanaryError> {
        let name = self.strategy.reserved_name;
        let metrics = &self.strategy.metrics;

        if let Some(tracker) = &self.tracker {
            tracker.reset();
        }

        let stale = self
            .reserved_deployments(session)
            .await
            .inspect_err(|e| uncategorized(&*self.recorder, "list workflow deployments", e))?;
        for id in &stale {
            self.platform
                .delete_deployment(session, id)
                .await
                .inspect_err(|e| uncategorized(&*self.recorder, "delete stale deployment", e))?;
        }
        if !stale.is_empty() {
            info!(workflow = name, count = stale.len(), "stale deployments removed");
        }

        let device_type = self
            .platform
            .read_device_type(session, &device.device_type_id)
            .await
            .inspect_err(|e| uncategorized(&*self.recorder, "read device type", e))?;
        let service_id = device_type
            .service_by_local_id(self.strategy.service_role)
            .map(|s| s.id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkflowError::ServiceNotFound {
                role: self.strategy.service_role.to_owned(),
                device_type_id: device.device_type_id.clone(),
            })?;

        self.check_preview(session, device, &service_id).await;

        let deployed = async {
            let document = self.strategy.render_deployment(&device.id, &service_id)?;
            Ok::<_, CanaryError>(self.platform.deploy(session, &document).await?)
        }
        .await
        .inspect_err(|e| {
            warn!(workflow = name, error = %e, "deployment failed");
            self.recorder.increment(metrics.deployment_errors);
        })?;
        progress.state = LifecycleState::Deployed;
        progress.deployment_id = Some(deployed.id.clone());
        info!(workflow = name, deployment_id = %deployed.id, "workflow deployed");

        tokio::time::sleep(self.convergence).await;

        if self.strategy.trigger == TriggerMode::Direct {
            self.platform
                .start_deployment(session, &deployed.id)
                .await
                .inspect_err(|e| {
                    warn!(workflow = name, error = %e, "workflow start failed");
                    if let Some(counter) = metrics.start_errors {
                        self.recorder.increment(counter);
                    }
                })?;
            progress.state = LifecycleState::Triggered;
            info!(workflow = name, "workflow started");
        }

        Ok(())
    }

    async fn verify_instance(&self, session: &Session, progress: &mut LegProgress) {
        let name = self.strategy.reserved_name;
        let metrics = &self.strategy.metrics;

        match self
            .platform
            .process_instances(session, INSTANCE_HISTORY_LIMIT)
            .await
        {
            Err(e) => uncategorized(&*self.recorder, "list workflow instances", e),
            Ok(history) => {
                let instances: Vec<_> = history
                    .into_iter()
                    .filter(|i| i.process_definition_name == name)
                    .collect();
                match instances.as_slice() {
                    [instance] if instance.state == INSTANCE_STATE_COMPLETED => {
                        self.recorder.set_gauge(
                            metrics.instance_duration_ms,
                            instance.duration_in_millis as f64,
                        );
                        progress.state = LifecycleState::Verified;
                        debug!(workflow = name, duration_ms = instance.duration_in_millis, "workflow instance completed");
                    }
                    [instance] => {
                        warn!(workflow = name, state = %instance.state, expected = INSTANCE_STATE_COMPLETED, "unexpected workflow instance state");
                        self.recorder.increment(metrics.instance_state_errors);
                    }
                    _ => {
                        warn!(workflow = name, count = instances.len(), expected = 1, "unexpected workflow instance count");
                        self.recorder.increment(metrics.unexpected_instance_count);
                    }
                }
            }
        }

        if let (Some(tracker), Some(counter)) = (&self.tracker, metrics.unexpected_command_count) {
            if tracker.count() == 0 {
                warn!(workflow = name, "no command reached the canary device");
                self.recorder.increment(counter);
            }
        }
    }

    /// Verifies (if triggered) and removes every reserved deployment.
    pub async fn teardown(&self, session: &Session, progress: &mut LegProgress) {
        let name = self.strategy.reserved_name;

        let (ids, listed) = match self.reserved_deployments(session).await {
            Ok(ids) => (ids, true),
            Err(e) => {
                uncategorized(&*self.recorder, "list workflow deployments", e);
                // fall back to the deployment this leg created itself
                (progress.deployment_id.iter().cloned().collect::<Vec<_>>(), false)
            }
        };
        if listed && progress.state >= LifecycleState::Deployed && ids.len() != 1 {
            uncategorized(
                &*self.recorder,
                "workflow deployment count",
                format!("{} deployments named {name}", ids.len()),
            );
        }

        if progress.state >= LifecycleState::Triggered {
            self.verify_instance(session, progress).await;
        }

        for id in &ids {
            if let Err(e) = self.platform.delete_deployment(session, id).await {
                uncategorized(&*self.recorder, "delete workflow deployment", e);
            }
        }
        debug!(workflow = name, removed = ids.len(), "workflow torn down");
    }
}
