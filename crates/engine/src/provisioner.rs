//! Idempotent ensure-or-create provisioning of the canary's platform resources.
//!
//! Each `ensure_*` lists by marker (the hub: by configured name) with limit 1
//! and returns the first hit. Only when nothing is found is a resource created.
//! Every create or update is followed by one convergence-window sleep so the
//! read models catch up before the resource is used. Errors propagate as-is;
//! there are no retries.

use std::sync::Arc;
use std::time::Duration;

use canary_core::config::{CanaryConfig, DeviceTypeConfig};
use canary_core::error::PlatformError;
use canary_core::metrics::{DEVICE_META_UPDATE, PERMISSIONS_REQUEST};
use canary_core::types::{
    Attribute, CANARY_DEVICE_TYPE_NAME, CANARY_MARKER_KEY, CMD_SERVICE_LOCAL_ID, Content,
    ContentVariable, Device, DeviceType, Hub, Interaction, SENSOR_SERVICE_LOCAL_ID, Service,
    Session,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::platform::{DeviceTypeQuery, Platform};
use crate::recorder::{OutcomeRecorder, metered};

const JSON_SERIALIZATION: &str = "json";

/// Builds the canary device type from configured content metadata.
pub fn canary_device_type(config: &DeviceTypeConfig) -> DeviceType {
    let content = |value_type: &str, characteristic_id: &str, function_id: &str, aspect_id: &str| {
        Content {
            content_variable: ContentVariable {
                name: "value".to_owned(),
                value_type: value_type.to_owned(),
                characteristic_id: characteristic_id.to_owned(),
                function_id: function_id.to_owned(),
                aspect_id: aspect_id.to_owned(),
                ..ContentVariable::default()
            },
            serialization: JSON_SERIALIZATION.to_owned(),
            protocol_segment_id: config.protocol_segment_id.clone(),
            ..Content::default()
        }
    };

    DeviceType {
        name: CANARY_DEVICE_TYPE_NAME.to_owned(),
        description: "used for canary service".to_owned(),
        device_class_id: config.device_class_id.clone(),
        attributes: vec![Attribute::canary_marker()],
        services: vec![
            Service {
                local_id: CMD_SERVICE_LOCAL_ID.to_owned(),
                name: CMD_SERVICE_LOCAL_ID.to_owned(),
                description: "canary cmd service, needed to test online state by subscription"
                    .to_owned(),
                interaction: Interaction::Request,
                protocol_id: config.protocol_id.clone(),
                inputs: vec![content(
                    &config.cmd_value_type,
                    &config.cmd_characteristic_id,
                    &config.cmd_function_id,
                    "",
                )],
                ..Service::default()
            },
            Service {
                local_id: SENSOR_SERVICE_LOCAL_ID.to_owned(),
                name: SENSOR_SERVICE_LOCAL_ID.to_owned(),
                description: "canary sensor service, needed to test device data handling"
                    .to_owned(),
                interaction: Interaction::Event,
                protocol_id: config.protocol_id.clone(),
                outputs: vec![content(
                    &config.sensor_value_type,
                    &config.sensor_characteristic_id,
                    &config.sensor_function_id,
                    &config.sensor_aspect_id,
                )],
                ..Service::default()
            },
        ],
        ..DeviceType::default()
    }
}

/// A new canary device of `device_type_id`.
pub fn canary_device(device_type_id: &str) -> Device {
    Device {
        id: String::new(),
        local_id: format!("canary_{}", Uuid::new_v4()),
        name: format!("canary-{}", Utc::now().to_rfc3339()),
        attributes: vec![Attribute::canary_marker()],
        device_type_id: device_type_id.to_owned(),
    }
}

pub struct ResourceProvisioner<P> {
    platform: Arc<P>,
    recorder: Arc<dyn OutcomeRecorder>,
    device_type: DeviceTypeConfig,
    hub_name: String,
    convergence: Duration,
}

impl<P: Platform> ResourceProvisioner<P> {
    pub fn new(config: &CanaryConfig, platform: Arc<P>, recorder: Arc<dyn OutcomeRecorder>) -> Self {
        Self {
            platform,
            recorder,
            device_type: config.device_type.clone(),
            hub_name: config.hub.name.clone(),
            convergence: config.timing.convergence_window(),
        }
    }

    /// Creates or updates, then waits one convergence window either way.
    async fn write<T, F>(&self, call: F) -> Result<T, PlatformError>
    where
        F: std::future::Future<Output = Result<T, PlatformError>>,
    {
        let result = metered(&*self.recorder, DEVICE_META_UPDATE, call).await;
        tokio::time::sleep(self.convergence).await;
        result
    }

    /// Marker listings are filtered by the caller's rights, so they count as
    /// permission requests.
    pub async fn ensure_device_type(&self, session: &Session) -> Result<DeviceType, PlatformError> {
        let query = DeviceTypeQuery {
            attribute_key: CANARY_MARKER_KEY.to_owned(),
            limit: 1,
            offset: 0,
            sort_by: "name".to_owned(),
        };
        let existing = metered(
            &*self.recorder,
            PERMISSIONS_REQUEST,
            self.platform.list_device_types(session, &query),
        )
        .await?;
        if let Some(device_type) = existing.into_iter().next() {
            return Ok(device_type);
        }

        let wanted = canary_device_type(&self.device_type);
        let created = self
            .write(self.platform.create_device_type(session, &wanted))
            .await?;
        info!(device_type_id = %created.id, "canary device type created");
        Ok(created)
    }

    /// The device type is only ensured when a device has to be created.
    pub async fn ensure_device(&self, session: &Session) -> Result<Device, PlatformError> {
        let existing = metered(
            &*self.recorder,
            PERMISSIONS_REQUEST,
            self.platform.list_devices(session, CANARY_MARKER_KEY, 1),
        )
        .await?;
        if let Some(device) = existing.into_iter().next() {
            return Ok(device);
        }

        let device_type = self.ensure_device_type(session).await?;
        let wanted = canary_device(&device_type.id);
        let created = self.write(self.platform.create_device(session, &wanted)).await?;
        info!(device_id = %created.id, local_id = %created.local_id, "canary device created");
        Ok(created)
    }

    /// Finds the hub by name and makes sure it references `device`.
    pub async fn ensure_hub(&self, session: &Session, device: &Device) -> Result<Hub, PlatformError> {
        let existing = metered(
            &*self.recorder,
            PERMISSIONS_REQUEST,
            self.platform.find_hubs_by_name(session, &self.hub_name, 1),
        )
        .await?;

        let wanted = |id: String| Hub {
            id,
            name: self.hub_name.clone(),
            device_ids: Vec::new(),
            device_local_ids: vec![device.local_id.clone()],
        };

        match existing.into_iter().next() {
            Some(hub) if hub.references(device) => Ok(hub),
            Some(hub) => {
                let updated = self
                    .write(self.platform.update_hub(session, &wanted(hub.id.clone())))
                    .await?;
                info!(hub_id = %hub.id, device_id = %device.id, "canary hub reconciled");
                // an empty update body decodes to a hub without id
                Ok(Hub {
                    id: if updated.id.is_empty() { hub.id } else { updated.id },
                    ..updated
                })
            }
            None => {
                let created = self
                    .write(self.platform.create_hub(session, &wanted(String::new())))
                    .await?;
                info!(hub_id = %created.id, "canary hub created");
                Ok(created)
            }
        }
    }
}
