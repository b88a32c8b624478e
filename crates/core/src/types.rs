//! 도메인 타입 -- 플랫폼 API 가 주고받는 데이터 모델
//!
//! 필드 이름은 각 서비스의 JSON 표현을 그대로 따릅니다.
//! 응답에서 누락될 수 있는 필드는 `#[serde(default)]`로 처리합니다.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// canary 가 생성한 리소스에 붙이는 마커 속성 키
pub const CANARY_MARKER_KEY: &str = "used-for-canary";

/// 마커 속성 값
pub const CANARY_MARKER_VALUE: &str = "true";

/// 마커 속성 origin
pub const CANARY_MARKER_ORIGIN: &str = "canary";

/// 명령 서비스 로컬 ID
pub const CMD_SERVICE_LOCAL_ID: &str = "cmd";

/// 센서 서비스 로컬 ID
pub const SENSOR_SERVICE_LOCAL_ID: &str = "sensor";

/// canary 디바이스 타입 이름
pub const CANARY_DEVICE_TYPE_NAME: &str = "canary-device-type";

/// 워크플로 인스턴스의 정상 종료 상태
pub const INSTANCE_STATE_COMPLETED: &str = "COMPLETED";

/// 인증 세션
///
/// 한 번의 실행(run)이 소유하며 실행 종료 시 best-effort 로 반납합니다.
#[derive(Clone)]
pub struct Session {
    /// 액세스 토큰 (`Bearer ` 접두어 없음)
    pub access_token: String,
    /// 리프레시 토큰
    pub refresh_token: String,
    /// 발급 시각
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// `Authorization` 헤더 값을 반환합니다.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// 토큰이 로그에 남지 않도록 Debug 를 직접 구현합니다.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// 리소스 속성 (key/value/origin)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub origin: String,
}

impl Attribute {
    /// canary 마커 속성을 생성합니다.
    pub fn canary_marker() -> Self {
        Self {
            key: CANARY_MARKER_KEY.to_owned(),
            value: CANARY_MARKER_VALUE.to_owned(),
            origin: CANARY_MARKER_ORIGIN.to_owned(),
        }
    }
}

/// 디바이스
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: String,
    pub local_id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    pub device_type_id: String,
}

/// 디바이스 타입
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceType {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub device_class_id: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl DeviceType {
    /// 로컬 ID 로 서비스를 찾습니다.
    pub fn service_by_local_id(&self, local_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.local_id == local_id)
    }
}

/// 서비스 상호작용 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interaction {
    #[default]
    Request,
    Event,
    EventAndRequest,
}

/// 디바이스 타입의 서비스
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub id: String,
    pub local_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interaction: Interaction,
    #[serde(default)]
    pub protocol_id: String,
    #[serde(default)]
    pub inputs: Vec<Content>,
    #[serde(default)]
    pub outputs: Vec<Content>,
}

/// 서비스 입출력 콘텐츠
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub id: String,
    pub content_variable: ContentVariable,
    pub serialization: String,
    pub protocol_segment_id: String,
}

/// 콘텐츠 변수 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentVariable {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub characteristic_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aspect_id: String,
}

/// 허브
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_local_ids: Vec<String>,
}

impl Hub {
    /// 허브가 디바이스를 ID 와 로컬 ID 양쪽으로 참조하는지 확인합니다.
    pub fn references(&self, device: &Device) -> bool {
        self.device_ids.iter().any(|id| id == &device.id)
            && self.device_local_ids.iter().any(|id| id == &device.local_id)
    }
}

/// 권한 검색 프로젝션의 디바이스
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermDevice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub device_type_id: String,
    #[serde(default)]
    pub annotations: HashMap<String, serde_json::Value>,
}

impl PermDevice {
    /// `annotations.connected` 값 (불리언이 아니면 `None`)
    pub fn connected(&self) -> Option<bool> {
        self.annotations.get("connected").and_then(|v| v.as_bool())
    }
}

/// 마지막 값 조회 요청 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastValueRequest {
    pub device_id: String,
    pub service_id: String,
    pub column_name: String,
}

/// 마지막 값 조회 결과 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastValue {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// 워크플로 배포
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDeployment {
    pub id: String,
    pub name: String,
}

/// 워크플로 실행 이력 인스턴스
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub id: String,
    #[serde(default)]
    pub process_definition_name: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration_in_millis: i64,
    #[serde(default)]
    pub state: String,
}

/// 배포 미리보기 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedDeployment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<PreparedElement>,
}

impl PreparedDeployment {
    /// BPMN ID 로 요소를 찾습니다.
    pub fn element(&self, bpmn_id: &str) -> Option<&PreparedElement> {
        self.elements.iter().find(|e| e.bpmn_id == bpmn_id)
    }
}

/// 배포 미리보기 요소
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedElement {
    pub bpmn_id: String,
    #[serde(default)]
    pub task: Option<SelectionHolder>,
    #[serde(default)]
    pub conditional_event: Option<SelectionHolder>,
}

/// `task` 또는 `conditional_event` 의 선택 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionHolder {
    #[serde(default)]
    pub selection: Selection,
}

/// 선택 가능한 디바이스/서비스 목록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub selection_options: Vec<SelectionOption>,
}

/// 선택 항목
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionOption {
    #[serde(default)]
    pub device: Option<NamedRef>,
    #[serde(default)]
    pub services: Vec<NamedRef>,
}

/// id + name 참조
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}
