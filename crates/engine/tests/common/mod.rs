//! 통합 테스트 공용 fake -- 인메모리 플랫폼과 브로커
//!
//! `FakePlatform`과 `FakeTransport`는 같은 `World`를 공유합니다.
//! 브로커 연결 상태, 발행된 센서 값, 이벤트 워크플로 인스턴스가
//! 플랫폼 읽기 모델에 그대로 반영됩니다.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use canary_core::config::CanaryConfig;
use canary_core::error::{PlatformError, TransportError};
use canary_core::types::{
    Device, DeviceType, Hub, INSTANCE_STATE_COMPLETED, LastValue, LastValueRequest, NamedRef,
    PermDevice, PreparedDeployment, PreparedElement, ProcessInstance, Selection, SelectionHolder,
    SelectionOption, Session, WorkflowDeployment,
};
use canary_engine::envelope::{CommandEnvelope, expected_command_payload};
use canary_engine::transport::topic_matches;
use canary_engine::{
    DeviceDataQuery, DeviceManager, DeviceRepository, DeviceTypeQuery, IdentityProvider,
    InboundHandler, InboundMessage, PermissionSearch, Transport, TransportSession,
    WorkflowEngine,
};
use chrono::Utc;

pub const COMMAND_PROCESS: &str = "snowflake_canary_process";
pub const EVENT_PROCESS: &str = "canary_event_process";

/// 짧은 테스트용 설정 (`start_paused` 테스트에서는 시간이 자동 진행됨)
pub fn test_config() -> CanaryConfig {
    let mut config = CanaryConfig::default();
    config.timing.convergence_window_ms = 1_000;
    config.timing.leg_sync_timeout_ms = 30_000;
    config.timing.transport_ack_timeout_secs = 5;
    config
}

pub fn session() -> Session {
    Session {
        access_token: "access".to_owned(),
        refresh_token: "refresh".to_owned(),
        issued_at: Utc::now(),
    }
}

/// 플랫폼과 브로커가 공유하는 상태
#[derive(Default)]
pub struct State {
    next_id: u64,
    pub device_types: Vec<DeviceType>,
    pub devices: Vec<Device>,
    /// 권한 검색 프로젝션이 보는 디바이스 이름
    pub projected_names: HashMap<String, String>,
    pub hubs: Vec<Hub>,
    pub deployments: Vec<WorkflowDeployment>,
    /// (deployment id, instance)
    pub instances: Vec<(String, ProcessInstance)>,

    pub connected: bool,
    pub forced_connected: Option<bool>,
    pub reading: Option<(i64, i64)>,
    pub handlers: Vec<(String, InboundHandler)>,
    pub responses: Vec<(String, Vec<u8>)>,
    pub connected_as: Vec<String>,

    pub acquired: usize,
    pub released: usize,
    pub device_type_creates: usize,
    pub device_creates: usize,
    pub hub_creates: usize,
    pub hub_updates: usize,
    pub deleted_deployments: Vec<String>,

    /// 저장소가 디바이스 수정을 반영하지 않음
    pub stale_repository: bool,
    /// 권한 검색이 디바이스 수정을 반영하지 않음
    pub stale_projection: bool,
    /// 마지막 값이 발행 값과 다름
    pub corrupt_readings: bool,
    /// 미리보기가 아무것도 제안하지 않음
    pub empty_preview: bool,
    /// 시작된 명령 워크플로 인스턴스의 상태
    pub instance_state: Option<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn resolve_hub(&self, hub: &mut Hub) {
        hub.device_ids = self
            .devices
            .iter()
            .filter(|d| hub.device_local_ids.contains(&d.local_id))
            .map(|d| d.id.clone())
            .collect();
    }

    fn instance(&mut self, deployment_id: &str, name: &str) {
        let id = self.id("instance");
        let state = self
            .instance_state
            .clone()
            .unwrap_or_else(|| INSTANCE_STATE_COMPLETED.to_owned());
        self.instances.push((
            deployment_id.to_owned(),
            ProcessInstance {
                id,
                process_definition_name: name.to_owned(),
                duration_in_millis: 42,
                state,
                ..ProcessInstance::default()
            },
        ));
    }

    fn deployment_named(&self, name: &str) -> Option<String> {
        self.deployments
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id.clone())
    }

    /// 이름으로 배포를 미리 심어 둡니다.
    pub fn seed_deployment(&mut self, name: &str) -> String {
        let id = self.id("deployment");
        self.deployments.push(WorkflowDeployment {
            id: id.clone(),
            name: name.to_owned(),
        });
        id
    }

    pub fn deployments_named(&self, name: &str) -> usize {
        self.deployments.iter().filter(|d| d.name == name).count()
    }
}

#[derive(Default)]
pub struct World {
    state: Mutex<State>,
    failures: Mutex<HashSet<&'static str>>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// 이름이 `op`인 호출을 실패시킵니다.
    pub fn fail(&self, op: &'static str) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    fn check(&self, op: &'static str) -> Result<(), PlatformError> {
        if self.failures.lock().unwrap().contains(op) {
            return Err(PlatformError::Status {
                service: "fake".to_owned(),
                status: 500,
                body: format!("{op} failed"),
            });
        }
        Ok(())
    }

    fn failing(&self, op: &'static str) -> bool {
        self.failures.lock().unwrap().contains(op)
    }

    /// 브로커처럼 일치하는 구독 핸들러에 메시지를 전달합니다.
    fn deliver(&self, topic: &str, payload: Vec<u8>) {
        let handlers: Vec<InboundHandler> = self
            .state()
            .handlers
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(InboundMessage {
                topic: topic.to_owned(),
                payload: payload.clone(),
            });
        }
    }
}

fn not_found(what: &str, id: &str) -> PlatformError {
    PlatformError::Status {
        service: "fake".to_owned(),
        status: 404,
        body: format!("{what} {id} not found"),
    }
}

/// `<measurements><measurement value="N" /></measurements>`에서 N 을 꺼냅니다.
fn measurement(xml: &str) -> Option<i64> {
    let start = xml.find("value=\"")? + "value=\"".len();
    let end = xml[start..].find('"')? + start;
    xml[start..end].parse().ok()
}

// --- FakePlatform ---

#[derive(Clone)]
pub struct FakePlatform {
    pub world: Arc<World>,
}

impl FakePlatform {
    pub fn new(world: &Arc<World>) -> Self {
        Self {
            world: Arc::clone(world),
        }
    }
}

impl IdentityProvider for FakePlatform {
    async fn acquire(&self) -> Result<Session, PlatformError> {
        self.world.check("acquire")?;
        self.world.state().acquired += 1;
        Ok(session())
    }

    async fn release(&self, _session: &Session) -> Result<(), PlatformError> {
        self.world.state().released += 1;
        self.world.check("release")
    }
}

impl DeviceManager for FakePlatform {
    async fn create_device_type(
        &self,
        _session: &Session,
        device_type: &DeviceType,
    ) -> Result<DeviceType, PlatformError> {
        self.world.check("create_device_type")?;
        let mut state = self.world.state();
        let mut created = device_type.clone();
        created.id = state.id("device-type");
        for service in &mut created.services {
            service.id = state.id(&format!("service-{}", service.local_id));
        }
        state.device_types.push(created.clone());
        state.device_type_creates += 1;
        Ok(created)
    }

    async fn create_device(&self, _session: &Session, device: &Device) -> Result<Device, PlatformError> {
        self.world.check("create_device")?;
        let mut state = self.world.state();
        let mut created = device.clone();
        created.id = state.id("device");
        state
            .projected_names
            .insert(created.id.clone(), created.name.clone());
        state.devices.push(created.clone());
        state.device_creates += 1;
        Ok(created)
    }

    async fn update_device(&self, _session: &Session, device: &Device) -> Result<Device, PlatformError> {
        self.world.check("update_device")?;
        let mut state = self.world.state();
        if !state.stale_projection {
            state
                .projected_names
                .insert(device.id.clone(), device.name.clone());
        }
        if !state.stale_repository {
            let Some(stored) = state.devices.iter_mut().find(|d| d.id == device.id) else {
                return Err(not_found("device", &device.id));
            };
            *stored = device.clone();
        }
        Ok(device.clone())
    }

    async fn create_hub(&self, _session: &Session, hub: &Hub) -> Result<Hub, PlatformError> {
        self.world.check("create_hub")?;
        let mut state = self.world.state();
        let mut created = hub.clone();
        created.id = state.id("hub");
        state.resolve_hub(&mut created);
        state.hubs.push(created.clone());
        state.hub_creates += 1;
        Ok(created)
    }

    async fn update_hub(&self, _session: &Session, hub: &Hub) -> Result<Hub, PlatformError> {
        self.world.check("update_hub")?;
        let mut state = self.world.state();
        let mut updated = hub.clone();
        state.resolve_hub(&mut updated);
        let Some(stored) = state.hubs.iter_mut().find(|h| h.id == hub.id) else {
            return Err(not_found("hub", &hub.id));
        };
        *stored = updated;
        state.hub_updates += 1;
        // the real service answers with an empty body here
        Ok(Hub::default())
    }
}

impl DeviceRepository for FakePlatform {
    async fn list_device_types(
        &self,
        _session: &Session,
        query: &DeviceTypeQuery,
    ) -> Result<Vec<DeviceType>, PlatformError> {
        self.world.check("list_device_types")?;
        Ok(self
            .world
            .state()
            .device_types
            .iter()
            .filter(|dt| dt.attributes.iter().any(|a| a.key == query.attribute_key))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn list_devices(
        &self,
        _session: &Session,
        attribute_key: &str,
        limit: u32,
    ) -> Result<Vec<Device>, PlatformError> {
        self.world.check("list_devices")?;
        Ok(self
            .world
            .state()
            .devices
            .iter()
            .filter(|d| d.attributes.iter().any(|a| a.key == attribute_key))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn read_device_type(&self, _session: &Session, id: &str) -> Result<DeviceType, PlatformError> {
        self.world.check("read_device_type")?;
        self.world
            .state()
            .device_types
            .iter()
            .find(|dt| dt.id == id)
            .cloned()
            .ok_or_else(|| not_found("device type", id))
    }

    async fn read_device(&self, _session: &Session, id: &str) -> Result<Device, PlatformError> {
        self.world.check("read_device")?;
        self.world
            .state()
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found("device", id))
    }
}

impl PermissionSearch for FakePlatform {
    async fn find_hubs_by_name(
        &self,
        _session: &Session,
        name: &str,
        limit: u32,
    ) -> Result<Vec<Hub>, PlatformError> {
        self.world.check("find_hubs_by_name")?;
        Ok(self
            .world
            .state()
            .hubs
            .iter()
            .filter(|h| h.name == name)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_devices_by_ids(
        &self,
        _session: &Session,
        ids: &[String],
        limit: u32,
    ) -> Result<Vec<PermDevice>, PlatformError> {
        self.world.check("list_devices_by_ids")?;
        let state = self.world.state();
        let connected = state.forced_connected.unwrap_or(state.connected);
        Ok(state
            .devices
            .iter()
            .filter(|d| ids.contains(&d.id))
            .take(limit as usize)
            .map(|d| PermDevice {
                id: d.id.clone(),
                name: state
                    .projected_names
                    .get(&d.id)
                    .cloned()
                    .unwrap_or_else(|| d.name.clone()),
                local_id: d.local_id.clone(),
                device_type_id: d.device_type_id.clone(),
                annotations: HashMap::from([(
                    "connected".to_owned(),
                    serde_json::Value::Bool(connected),
                )]),
            })
            .collect())
    }
}

impl DeviceDataQuery for FakePlatform {
    async fn last_values(
        &self,
        _session: &Session,
        requests: &[LastValueRequest],
    ) -> Result<Vec<LastValue>, PlatformError> {
        self.world.check("last_values")?;
        let state = self.world.state();
        let Some((value1, value2)) = state.reading else {
            return Ok(Vec::new());
        };
        let skew = i64::from(state.corrupt_readings);
        // the measurement column comes back as a float, like the real store
        let values = [
            serde_json::json!((value1 + skew) as f64),
            serde_json::json!(value2 + skew),
        ];
        Ok(requests
            .iter()
            .zip(values)
            .map(|(_, value)| LastValue { time: None, value })
            .collect())
    }
}

impl WorkflowEngine for FakePlatform {
    async fn list_deployments(
        &self,
        _session: &Session,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<WorkflowDeployment>, PlatformError> {
        self.world.check("list_deployments")?;
        Ok(self
            .world
            .state()
            .deployments
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_deployment(&self, _session: &Session, id: &str) -> Result<(), PlatformError> {
        self.world.check("delete_deployment")?;
        let mut state = self.world.state();
        state.deployments.retain(|d| d.id != id);
        state.instances.retain(|(deployment_id, _)| deployment_id != id);
        state.deleted_deployments.push(id.to_owned());
        Ok(())
    }

    async fn prepare_deployment(
        &self,
        _session: &Session,
        bpmn: &str,
        _svg: &str,
    ) -> Result<PreparedDeployment, PlatformError> {
        self.world.check("prepare_deployment")?;
        let state = self.world.state();
        if state.empty_preview {
            return Ok(PreparedDeployment::default());
        }

        let options = state
            .devices
            .iter()
            .map(|device| SelectionOption {
                device: Some(NamedRef {
                    id: device.id.clone(),
                    name: device.name.clone(),
                }),
                services: state
                    .device_types
                    .iter()
                    .filter(|dt| dt.id == device.device_type_id)
                    .flat_map(|dt| dt.services.iter())
                    .map(|s| NamedRef {
                        id: s.id.clone(),
                        name: s.name.clone(),
                    })
                    .collect(),
            })
            .collect();
        let holder = Some(SelectionHolder {
            selection: Selection {
                selection_options: options,
            },
        });

        let element = if bpmn.contains("conditionalEventDefinition") {
            PreparedElement {
                bpmn_id: "StartEvent_1".to_owned(),
                conditional_event: holder,
                ..PreparedElement::default()
            }
        } else {
            PreparedElement {
                bpmn_id: "Task_0yuqb45".to_owned(),
                task: holder,
                ..PreparedElement::default()
            }
        };
        Ok(PreparedDeployment {
            elements: vec![element],
            ..PreparedDeployment::default()
        })
    }

    async fn deploy(
        &self,
        _session: &Session,
        document: &serde_json::Value,
    ) -> Result<WorkflowDeployment, PlatformError> {
        self.world.check("deploy")?;
        let name = document["name"].as_str().unwrap_or_default().to_owned();
        let mut state = self.world.state();
        let id = state.seed_deployment(&name);
        Ok(WorkflowDeployment { id, name })
    }

    async fn start_deployment(&self, _session: &Session, id: &str) -> Result<(), PlatformError> {
        self.world.check("start_deployment")?;
        let command_topic = {
            let mut state = self.world.state();
            let Some(name) = state
                .deployments
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.name.clone())
            else {
                return Err(not_found("deployment", id));
            };
            state.instance(id, &name);
            state
                .devices
                .first()
                .map(|d| format!("command/{}/cmd", d.local_id))
        };

        if let Some(topic) = command_topic {
            let command = CommandEnvelope {
                correlation_id: format!("correlation-{id}"),
                payload: expected_command_payload(),
                timestamp: Utc::now().timestamp(),
                completion_strategy: "optimistic".to_owned(),
            };
            self.world
                .deliver(&topic, serde_json::to_vec(&command).unwrap());
        }
        Ok(())
    }

    async fn process_instances(
        &self,
        _session: &Session,
        max_results: u32,
    ) -> Result<Vec<ProcessInstance>, PlatformError> {
        self.world.check("process_instances")?;
        Ok(self
            .world
            .state()
            .instances
            .iter()
            .rev()
            .take(max_results as usize)
            .map(|(_, instance)| instance.clone())
            .collect())
    }
}

// --- FakeTransport ---

#[derive(Clone)]
pub struct FakeTransport {
    pub world: Arc<World>,
}

impl FakeTransport {
    pub fn new(world: &Arc<World>) -> Self {
        Self {
            world: Arc::clone(world),
        }
    }
}

#[derive(Clone)]
pub struct FakeSession {
    world: Arc<World>,
}

impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn connect(&self, client_id: &str) -> Result<FakeSession, TransportError> {
        if self.world.failing("connect") {
            return Err(TransportError::Connect("connection refused".to_owned()));
        }
        let mut state = self.world.state();
        state.connected = true;
        state.connected_as.push(client_id.to_owned());
        Ok(FakeSession {
            world: Arc::clone(&self.world),
        })
    }
}

impl TransportSession for FakeSession {
    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError> {
        if self.world.failing("subscribe") {
            return Err(TransportError::Subscribe {
                topic: filter.to_owned(),
                reason: "not authorized".to_owned(),
            });
        }
        self.world
            .state()
            .handlers
            .push((filter.to_owned(), handler));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if topic.starts_with("response/") {
            self.world
                .state()
                .responses
                .push((topic.to_owned(), payload));
            return Ok(());
        }

        if self.world.failing("publish") {
            return Err(TransportError::Publish {
                topic: topic.to_owned(),
                reason: "rejected".to_owned(),
            });
        }

        let reading: HashMap<String, String> = serde_json::from_slice(&payload).map_err(|e| {
            TransportError::Publish {
                topic: topic.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let value1 = reading.get("data").and_then(|xml| measurement(xml));
        let value2 = reading.get("metadata").and_then(|v| v.parse().ok());

        let mut state = self.world.state();
        if let (Some(value1), Some(value2)) = (value1, value2) {
            state.reading = Some((value1, value2));
        }
        if let Some(id) = state.deployment_named(EVENT_PROCESS) {
            state.instance(&id, EVENT_PROCESS);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.world.state();
        state.connected = false;
        state.handlers.clear();
        Ok(())
    }
}

