//! Platform API abstraction for testability.
//!
//! The canary talks to six platform services. Each one is a trait so the
//! engine can run against [`HttpPlatform`] in production and against
//! in-memory fakes in tests.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ Orchestrator │
//!                 └──────┬───────┘
//!                        │
//!                        ▼
//!  IdentityProvider  DeviceManager  DeviceRepository
//!  PermissionSearch  DeviceDataQuery  WorkflowEngine   (traits)
//!                        │
//!                 ┌──────┴──────┐
//!                 ▼             ▼
//!           HttpPlatform    test fakes
//! ```
//!
//! Every call except [`IdentityProvider::acquire`] carries the run's
//! [`Session`].

use std::future::Future;

use canary_core::error::PlatformError;
use canary_core::types::{
    Device, DeviceType, Hub, LastValue, LastValueRequest, PermDevice, PreparedDeployment,
    ProcessInstance, Session, WorkflowDeployment,
};

pub mod http;

pub use http::HttpPlatform;

/// Page size used when listing workflow deployments.
pub const DEPLOYMENT_PAGE_SIZE: u32 = 200;

/// Number of history entries fetched when verifying a workflow instance.
pub const INSTANCE_HISTORY_LIMIT: u32 = 20;

/// Credential acquisition and release.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Acquires a fresh session with the configured credentials.
    fn acquire(&self) -> impl Future<Output = Result<Session, PlatformError>> + Send;

    /// Releases a session. Best effort; callers only log failures.
    fn release(&self, session: &Session)
    -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Write side of device metadata.
pub trait DeviceManager: Send + Sync + 'static {
    fn create_device_type(
        &self,
        session: &Session,
        device_type: &DeviceType,
    ) -> impl Future<Output = Result<DeviceType, PlatformError>> + Send;

    fn create_device(
        &self,
        session: &Session,
        device: &Device,
    ) -> impl Future<Output = Result<Device, PlatformError>> + Send;

    fn update_device(
        &self,
        session: &Session,
        device: &Device,
    ) -> impl Future<Output = Result<Device, PlatformError>> + Send;

    fn create_hub(
        &self,
        session: &Session,
        hub: &Hub,
    ) -> impl Future<Output = Result<Hub, PlatformError>> + Send;

    fn update_hub(
        &self,
        session: &Session,
        hub: &Hub,
    ) -> impl Future<Output = Result<Hub, PlatformError>> + Send;
}

/// Query options for listing device types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTypeQuery {
    pub attribute_key: String,
    pub limit: u32,
    pub offset: u32,
    pub sort_by: String,
}

/// Read side of device metadata.
pub trait DeviceRepository: Send + Sync + 'static {
    fn list_device_types(
        &self,
        session: &Session,
        query: &DeviceTypeQuery,
    ) -> impl Future<Output = Result<Vec<DeviceType>, PlatformError>> + Send;

    /// Lists devices carrying an attribute with `attribute_key`.
    fn list_devices(
        &self,
        session: &Session,
        attribute_key: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Device>, PlatformError>> + Send;

    fn read_device_type(
        &self,
        session: &Session,
        id: &str,
    ) -> impl Future<Output = Result<DeviceType, PlatformError>> + Send;

    fn read_device(
        &self,
        session: &Session,
        id: &str,
    ) -> impl Future<Output = Result<Device, PlatformError>> + Send;
}

/// Permission-filtered search projection.
pub trait PermissionSearch: Send + Sync + 'static {
    /// Hubs named `name` that the session may write to, sorted by name.
    fn find_hubs_by_name(
        &self,
        session: &Session,
        name: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Hub>, PlatformError>> + Send;

    /// Projected devices with the given ids that the session may read.
    fn list_devices_by_ids(
        &self,
        session: &Session,
        ids: &[String],
        limit: u32,
    ) -> impl Future<Output = Result<Vec<PermDevice>, PlatformError>> + Send;
}

/// Last-value query over stored device data.
pub trait DeviceDataQuery: Send + Sync + 'static {
    fn last_values(
        &self,
        session: &Session,
        requests: &[LastValueRequest],
    ) -> impl Future<Output = Result<Vec<LastValue>, PlatformError>> + Send;
}

/// Workflow deployment and execution.
pub trait WorkflowEngine: Send + Sync + 'static {
    /// One page of deployments.
    fn list_deployments(
        &self,
        session: &Session,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<WorkflowDeployment>, PlatformError>> + Send;

    fn delete_deployment(
        &self,
        session: &Session,
        id: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Asks the platform which devices and services the diagram could bind.
    fn prepare_deployment(
        &self,
        session: &Session,
        bpmn: &str,
        svg: &str,
    ) -> impl Future<Output = Result<PreparedDeployment, PlatformError>> + Send;

    fn deploy(
        &self,
        session: &Session,
        document: &serde_json::Value,
    ) -> impl Future<Output = Result<WorkflowDeployment, PlatformError>> + Send;

    fn start_deployment(
        &self,
        session: &Session,
        id: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Most recent history entries across all workflows.
    fn process_instances(
        &self,
        session: &Session,
        max_results: u32,
    ) -> impl Future<Output = Result<Vec<ProcessInstance>, PlatformError>> + Send;
}

/// Everything the orchestrator needs from the platform.
pub trait Platform:
    IdentityProvider
    + DeviceManager
    + DeviceRepository
    + PermissionSearch
    + DeviceDataQuery
    + WorkflowEngine
{
}

impl<T> Platform for T where
    T: IdentityProvider
        + DeviceManager
        + DeviceRepository
        + PermissionSearch
        + DeviceDataQuery
        + WorkflowEngine
{
}
