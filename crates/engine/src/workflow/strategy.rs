//! Per-workflow parameters of the shared lifecycle.

use canary_core::error::WorkflowError;
use canary_core::metrics::{COMMAND_WORKFLOW, EVENT_WORKFLOW, WorkflowMetrics};
use canary_core::types::{CMD_SERVICE_LOCAL_ID, PreparedElement, SENSOR_SERVICE_LOCAL_ID, Selection};
use serde_json::Value;

/// How a deployed workflow gets its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Started explicitly by deployment id.
    Direct,
    /// Started by the platform when a qualifying device event arrives.
    EventDriven,
}

/// Everything that differs between the command and the event workflow.
#[derive(Debug, Clone)]
pub struct WorkflowStrategy {
    pub trigger: TriggerMode,
    /// Diagram element whose selectables the preview must offer.
    pub anchor_bpmn_id: &'static str,
    pub deployment_template: &'static str,
    pub bpmn: &'static str,
    pub svg: &'static str,
    /// Deployment and process definition name owned by the canary.
    pub reserved_name: &'static str,
    /// Local id of the device-type service the workflow binds.
    pub service_role: &'static str,
    pub metrics: WorkflowMetrics,
}

impl WorkflowStrategy {
    /// Deploy, then start: exercises device commands.
    pub fn command() -> Self {
        Self {
            trigger: TriggerMode::Direct,
            anchor_bpmn_id: "Task_0yuqb45",
            deployment_template: include_str!("../../assets/command_deployment.json"),
            bpmn: include_str!("../../assets/command.bpmn"),
            svg: include_str!("../../assets/command.svg"),
            reserved_name: "snowflake_canary_process",
            service_role: CMD_SERVICE_LOCAL_ID,
            metrics: COMMAND_WORKFLOW,
        }
    }

    /// Deploy only; the sensor reading starts the instance.
    pub fn event() -> Self {
        Self {
            trigger: TriggerMode::EventDriven,
            anchor_bpmn_id: "StartEvent_1",
            deployment_template: include_str!("../../assets/event_deployment.json"),
            bpmn: include_str!("../../assets/event.bpmn"),
            svg: include_str!("../../assets/event.svg"),
            reserved_name: "canary_event_process",
            service_role: SENSOR_SERVICE_LOCAL_ID,
            metrics: EVENT_WORKFLOW,
        }
    }

    /// Where the anchor element keeps its selection for this trigger mode.
    pub fn anchor_selection<'a>(&self, element: &'a PreparedElement) -> Option<&'a Selection> {
        let holder = match self.trigger {
            TriggerMode::Direct => element.task.as_ref(),
            TriggerMode::EventDriven => element.conditional_event.as_ref(),
        };
        holder.map(|h| &h.selection)
    }

    /// Renders the deployment document for `device_id` / `service_id`.
    pub fn render_deployment(&self, device_id: &str, service_id: &str) -> Result<Value, WorkflowError> {
        let mut document: Value = serde_json::from_str(self.deployment_template)
            .map_err(|e| WorkflowError::Template(e.to_string()))?;

        let substitutions = [
            ("{{DeviceId}}", device_id),
            ("{{ServiceId}}", service_id),
            ("{{Bpmn}}", self.bpmn),
            ("{{Svg}}", self.svg),
        ];
        substitute(&mut document, &substitutions);
        Ok(document)
    }
}

/// Replaces placeholders inside every string of `value`.
fn substitute(value: &mut Value, substitutions: &[(&str, &str)]) {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                for (placeholder, replacement) in substitutions {
                    if s.contains(placeholder) {
                        *s = s.replace(placeholder, replacement);
                    }
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, substitutions)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, substitutions)),
        _ => {}
    }
}
