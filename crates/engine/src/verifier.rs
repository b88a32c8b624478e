//! Eventual-consistency assertions.
//!
//! Every check is a single read taken after the caller waited one convergence
//! window. Outcomes are counted and logged with expected and observed values;
//! a failed assertion never aborts the run.

use std::sync::Arc;
use std::time::Duration;

use canary_core::metrics::{
    DEVICE_DATA_REQUEST, DEVICE_META_UPDATE, DEVICE_REPO_REQUEST, PERMISSIONS_REQUEST,
    UNEXPECTED_DEVICE_DATA_TOTAL, UNEXPECTED_DEVICE_OFFLINE_STATE_TOTAL,
    UNEXPECTED_DEVICE_ONLINE_STATE_TOTAL, UNEXPECTED_DEVICE_REPO_METADATA_TOTAL,
    UNEXPECTED_PERMISSIONS_METADATA_TOTAL,
};
use canary_core::types::{Device, LastValueRequest, SENSOR_SERVICE_LOCAL_ID, Session};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::platform::Platform;
use crate::recorder::{OutcomeRecorder, metered, uncategorized};

/// Column holding the XML measurement value.
pub const MEASUREMENT_COLUMN: &str = "measurements.measurement.value";
/// Column holding the plain second segment value.
pub const AREA_COLUMN: &str = "area";

/// Rewrites every JSON number into float shape, recursively.
///
/// Integers and floats that denote the same value compare equal afterwards.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub struct StateVerifier<P> {
    platform: Arc<P>,
    recorder: Arc<dyn OutcomeRecorder>,
    convergence: Duration,
}

impl<P: Platform> StateVerifier<P> {
    pub fn new(platform: Arc<P>, recorder: Arc<dyn OutcomeRecorder>, convergence: Duration) -> Self {
        Self {
            platform,
            recorder,
            convergence,
        }
    }

    /// Compares the projected `connected` annotation with `expected`.
    pub async fn check_connection_state(&self, session: &Session, device: &Device, expected: bool) {
        let ids = [device.id.clone()];
        let result = metered(
            &*self.recorder,
            PERMISSIONS_REQUEST,
            self.platform.list_devices_by_ids(session, &ids, 1),
        )
        .await;
        let Ok(devices) = result else {
            return;
        };

        let Some(projected) = devices.first() else {
            uncategorized(
                &*self.recorder,
                "check connection state",
                format!("device {} missing from permission search", device.id),
            );
            return;
        };

        let observed = projected.connected();
        if observed == Some(expected) {
            debug!(device_id = %device.id, expected, "connection state as expected");
            return;
        }

        warn!(device_id = %device.id, ?observed, expected, "unexpected connection state");
        if expected {
            self.recorder.increment(UNEXPECTED_DEVICE_OFFLINE_STATE_TOTAL);
        } else {
            self.recorder.increment(UNEXPECTED_DEVICE_ONLINE_STATE_TOTAL);
        }
    }

    /// Checks that the last stored sensor values equal what was published.
    pub async fn check_device_data(&self, session: &Session, device: &Device, value1: i64, value2: i64) {
        let device_type = match metered(
            &*self.recorder,
            DEVICE_REPO_REQUEST,
            self.platform.read_device_type(session, &device.device_type_id),
        )
        .await
        {
            Ok(device_type) => device_type,
            Err(_) => return,
        };

        let service_id = device_type
            .service_by_local_id(SENSOR_SERVICE_LOCAL_ID)
            .map(|s| s.id.clone())
            .unwrap_or_default();

        let requests = [MEASUREMENT_COLUMN, AREA_COLUMN].map(|column| LastValueRequest {
            device_id: device.id.clone(),
            service_id: service_id.clone(),
            column_name: column.to_owned(),
        });

        let Ok(values) = metered(
            &*self.recorder,
            DEVICE_DATA_REQUEST,
            self.platform.last_values(session, &requests),
        )
        .await
        else {
            return;
        };

        if values.len() != 2 {
            warn!(count = values.len(), "unexpected number of last values");
            self.recorder.increment(UNEXPECTED_DEVICE_DATA_TOTAL);
            return;
        }

        let expected = [Value::from(value1), Value::from(value2)];
        for ((column, observed), expected) in [MEASUREMENT_COLUMN, AREA_COLUMN]
            .iter()
            .zip(&values)
            .zip(&expected)
        {
            if normalize(&observed.value) != normalize(expected) {
                warn!(column, observed = %observed.value, expected = %expected, "unexpected device data");
                self.recorder.increment(UNEXPECTED_DEVICE_DATA_TOTAL);
            }
        }
    }

    /// Renames the device and checks the rename reaches both read models.
    pub async fn check_metadata(&self, session: &Session, device: &Device) {
        let Ok(mut current) = metered(
            &*self.recorder,
            DEVICE_REPO_REQUEST,
            self.platform.read_device(session, &device.id),
        )
        .await
        else {
            return;
        };

        current.name = format!("snowflake-canary-{}", Utc::now().to_rfc3339());
        let wanted = current.name.clone();

        // a failed update is counted; the reads below then report the mismatch
        let _ = metered(
            &*self.recorder,
            DEVICE_META_UPDATE,
            self.platform.update_device(session, &current),
        )
        .await;

        tokio::time::sleep(self.convergence).await;

        if let Ok(repo_device) = metered(
            &*self.recorder,
            DEVICE_REPO_REQUEST,
            self.platform.read_device(session, &device.id),
        )
        .await
        {
            if repo_device.name != wanted {
                warn!(observed = %repo_device.name, expected = %wanted, "device repository name not updated");
                self.recorder.increment(UNEXPECTED_DEVICE_REPO_METADATA_TOTAL);
            }
        }

        let ids = [device.id.clone()];
        let Ok(projected) = metered(
            &*self.recorder,
            PERMISSIONS_REQUEST,
            self.platform.list_devices_by_ids(session, &ids, 1),
        )
        .await
        else {
            return;
        };

        let observed = projected.first().map(|d| d.name.as_str());
        if observed != Some(wanted.as_str()) {
            warn!(?observed, expected = %wanted, "permission search name not updated");
            self.recorder.increment(UNEXPECTED_PERMISSIONS_METADATA_TOTAL);
        }
    }
}
