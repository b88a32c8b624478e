#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`recorder`]: Outcome sinks (`OutcomeRecorder`, `MetricsRecorder`, `MemoryRecorder`)
//! - [`gate`]: Single-flight run gate (`RunGate`, `RunPermit`)
//! - [`platform`]: Platform API abstraction (client traits, `HttpPlatform`)
//! - [`transport`]: Broker abstraction (`Transport`, `TransportSession`, `MqttTransport`)
//! - [`envelope`]: Device message shapes and topic layout
//! - [`provisioner`]: Ensure-or-create of device type, device and hub
//! - [`probe`]: Device-side connectivity probe with command auto-responder
//! - [`verifier`]: Connection state, device data and metadata assertions
//! - [`workflow`]: Command and event workflow life cycle (`WorkflowLifecycle`)
//! - [`orchestrator`]: Run coordinator (`Orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! trigger --try_run--> Orchestrator --(RunGate)--> run
//!                          |
//!               IdentityProvider.acquire()
//!                          |
//!            ResourceProvisioner.ensure_device()
//!                          |
//!      join!(connectivity, command, event, metadata)
//!                          |
//!                OutcomeRecorder (counters, gauges)
//! ```

pub mod envelope;
pub mod gate;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod provisioner;
pub mod recorder;
pub mod transport;
pub mod verifier;
pub mod workflow;

// --- Public API Re-exports ---

// Orchestrator
pub use orchestrator::{ConnectivityPhase, Orchestrator, TriggerOutcome};

// Gate
pub use gate::{RunGate, RunPermit};

// Recording
pub use recorder::{MemoryRecorder, MetricsRecorder, OutcomeRecorder};

// Platform
pub use platform::{
    DeviceDataQuery, DeviceManager, DeviceRepository, DeviceTypeQuery, HttpPlatform,
    IdentityProvider, PermissionSearch, Platform, WorkflowEngine,
};

// Transport
pub use transport::{InboundHandler, InboundMessage, MqttTransport, Transport, TransportSession};

// Components
pub use probe::ConnectionProbe;
pub use provisioner::ResourceProvisioner;
pub use verifier::StateVerifier;
pub use workflow::{LegProgress, LifecycleState, TriggerMode, WorkflowLifecycle, WorkflowStrategy};
