//! Device-side message shapes and topic layout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Command delivered by the platform to `command/<local_id>/<service>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub completion_strategy: String,
}

/// Answer published to the matching `response/...` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    pub payload: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    /// Same correlation id, every inbound key mapped to an empty string.
    pub fn empty_for(command: &CommandEnvelope) -> Self {
        Self {
            correlation_id: command.correlation_id.clone(),
            payload: command
                .payload
                .keys()
                .map(|k| (k.clone(), String::new()))
                .collect(),
        }
    }
}

/// Payload the command workflow sends to the canary device.
pub fn expected_command_payload() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "data".to_owned(),
            r#"<commands><valueCommand value="42"/></commands>"#.to_owned(),
        ),
        ("metadata".to_owned(), "on".to_owned()),
    ])
}

pub fn event_topic(local_id: &str) -> String {
    format!("event/{local_id}/sensor")
}

pub fn command_filter(local_id: &str) -> String {
    format!("command/{local_id}/+")
}

/// Replaces the first `command/` with `response/`.
pub fn response_topic(command_topic: &str) -> String {
    command_topic.replacen("command/", "response/", 1)
}

/// Encodes a sensor reading as published on the event topic.
///
/// `value1` travels as an XML measurement in `segment`, `value2` as a plain
/// string in `segment_2`.
pub fn sensor_reading(segment: &str, segment_2: &str, value1: i64, value2: i64) -> Vec<u8> {
    let reading = BTreeMap::from([
        (
            segment.to_owned(),
            format!(r#"<measurements><measurement value="{value1}" /></measurements>"#),
        ),
        (segment_2.to_owned(), value2.to_string()),
    ]);
    // a map of strings always serializes
    serde_json::to_vec(&reading).unwrap_or_default()
}

/// Count of commands delivered to the canary device during one command leg.
#[derive(Debug, Clone, Default)]
pub struct CommandTracker(Arc<AtomicU64>);

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
