//! 설정 관리 -- canary.toml 파싱 및 런타임 설정
//!
//! [`CanaryConfig`]는 canary 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`CANARY_TIMING_CONVERGENCE_WINDOW_MS=5000` 형식)
//! 3. 설정 파일 (`canary.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), canary_core::error::CanaryError> {
//! use canary_core::config::CanaryConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = CanaryConfig::load("canary.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = CanaryConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CanaryError, ConfigError};

/// Canary 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 트리거/메트릭 HTTP 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 대기 시간 및 타임아웃
    #[serde(default)]
    pub timing: TimingConfig,
    /// 인증 설정
    #[serde(default)]
    pub auth: AuthConfig,
    /// 플랫폼 서비스 엔드포인트
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// canary 디바이스 타입 메타데이터
    #[serde(default)]
    pub device_type: DeviceTypeConfig,
    /// canary 허브 설정
    #[serde(default)]
    pub hub: HubConfig,
}

impl CanaryConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CanaryError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    ///
    /// 검증은 호출자가 오버라이드를 모두 적용한 뒤 수행합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CanaryError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CanaryError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CanaryError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, CanaryError> {
        toml::from_str(toml_str).map_err(|e| {
            CanaryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CANARY_{SECTION}_{FIELD}`
    /// 예: `CANARY_ENDPOINTS_MQTT_BROKER_URL=tcp://broker:1883`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "CANARY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CANARY_GENERAL_LOG_FORMAT");

        // Server
        override_string(&mut self.server.listen_addr, "CANARY_SERVER_LISTEN_ADDR");
        override_u16(&mut self.server.port, "CANARY_SERVER_PORT");

        // Timing
        override_u64(
            &mut self.timing.convergence_window_ms,
            "CANARY_TIMING_CONVERGENCE_WINDOW_MS",
        );
        override_u64(
            &mut self.timing.http_timeout_secs,
            "CANARY_TIMING_HTTP_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.timing.transport_ack_timeout_secs,
            "CANARY_TIMING_TRANSPORT_ACK_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.timing.disconnect_linger_ms,
            "CANARY_TIMING_DISCONNECT_LINGER_MS",
        );
        override_u64(
            &mut self.timing.leg_sync_timeout_ms,
            "CANARY_TIMING_LEG_SYNC_TIMEOUT_MS",
        );

        // Auth
        override_string(&mut self.auth.endpoint, "CANARY_AUTH_ENDPOINT");
        override_string(&mut self.auth.client_id, "CANARY_AUTH_CLIENT_ID");
        override_string(&mut self.auth.username, "CANARY_AUTH_USERNAME");
        override_string(&mut self.auth.password, "CANARY_AUTH_PASSWORD");

        // Endpoints
        let e = &mut self.endpoints;
        override_string(
            &mut e.permission_search_url,
            "CANARY_ENDPOINTS_PERMISSION_SEARCH_URL",
        );
        override_string(
            &mut e.device_manager_url,
            "CANARY_ENDPOINTS_DEVICE_MANAGER_URL",
        );
        override_string(
            &mut e.device_repository_url,
            "CANARY_ENDPOINTS_DEVICE_REPOSITORY_URL",
        );
        override_string(&mut e.mqtt_broker_url, "CANARY_ENDPOINTS_MQTT_BROKER_URL");
        override_string(
            &mut e.last_value_query_url,
            "CANARY_ENDPOINTS_LAST_VALUE_QUERY_URL",
        );
        override_string(
            &mut e.process_deployment_url,
            "CANARY_ENDPOINTS_PROCESS_DEPLOYMENT_URL",
        );
        override_string(
            &mut e.process_engine_wrapper_url,
            "CANARY_ENDPOINTS_PROCESS_ENGINE_WRAPPER_URL",
        );

        // Device type
        let d = &mut self.device_type;
        override_string(&mut d.device_class_id, "CANARY_DEVICE_TYPE_DEVICE_CLASS_ID");
        override_string(&mut d.protocol_id, "CANARY_DEVICE_TYPE_PROTOCOL_ID");
        override_string(
            &mut d.protocol_segment_id,
            "CANARY_DEVICE_TYPE_PROTOCOL_SEGMENT_ID",
        );
        override_string(
            &mut d.protocol_segment_name,
            "CANARY_DEVICE_TYPE_PROTOCOL_SEGMENT_NAME",
        );
        override_string(
            &mut d.protocol_segment_name_2,
            "CANARY_DEVICE_TYPE_PROTOCOL_SEGMENT_NAME_2",
        );
        override_string(&mut d.cmd_function_id, "CANARY_DEVICE_TYPE_CMD_FUNCTION_ID");
        override_string(
            &mut d.cmd_characteristic_id,
            "CANARY_DEVICE_TYPE_CMD_CHARACTERISTIC_ID",
        );
        override_string(&mut d.cmd_value_type, "CANARY_DEVICE_TYPE_CMD_VALUE_TYPE");
        override_string(
            &mut d.sensor_function_id,
            "CANARY_DEVICE_TYPE_SENSOR_FUNCTION_ID",
        );
        override_string(
            &mut d.sensor_characteristic_id,
            "CANARY_DEVICE_TYPE_SENSOR_CHARACTERISTIC_ID",
        );
        override_string(
            &mut d.sensor_value_type,
            "CANARY_DEVICE_TYPE_SENSOR_VALUE_TYPE",
        );
        override_string(&mut d.sensor_aspect_id, "CANARY_DEVICE_TYPE_SENSOR_ASPECT_ID");

        // Hub
        override_string(&mut self.hub.name, "CANARY_HUB_NAME");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), CanaryError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.server.port == 0 {
            return Err(invalid("server.port", "must be greater than 0".to_owned()));
        }

        // 타임아웃 0 은 모든 호출을 즉시 실패시킴
        let timeouts = [
            ("timing.http_timeout_secs", self.timing.http_timeout_secs),
            (
                "timing.transport_ack_timeout_secs",
                self.timing.transport_ack_timeout_secs,
            ),
            ("timing.leg_sync_timeout_ms", self.timing.leg_sync_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        let required = [
            ("auth.endpoint", &self.auth.endpoint),
            (
                "endpoints.permission_search_url",
                &self.endpoints.permission_search_url,
            ),
            (
                "endpoints.device_manager_url",
                &self.endpoints.device_manager_url,
            ),
            (
                "endpoints.device_repository_url",
                &self.endpoints.device_repository_url,
            ),
            ("endpoints.mqtt_broker_url", &self.endpoints.mqtt_broker_url),
            (
                "endpoints.last_value_query_url",
                &self.endpoints.last_value_query_url,
            ),
            (
                "endpoints.process_deployment_url",
                &self.endpoints.process_deployment_url,
            ),
            (
                "endpoints.process_engine_wrapper_url",
                &self.endpoints.process_engine_wrapper_url,
            ),
            ("hub.name", &self.hub.name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty".to_owned()));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> CanaryError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// HTTP 서버 설정 (`/metrics`, `/health`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

/// 대기 시간 및 타임아웃 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// 쓰기 후 읽기 모델 반영을 기다리는 시간 (ms)
    pub convergence_window_ms: u64,
    /// HTTP 요청 타임아웃 (초)
    pub http_timeout_secs: u64,
    /// 브로커 확인 응답 대기 타임아웃 (초)
    pub transport_ack_timeout_secs: u64,
    /// 연결 종료 시 대기 시간 (ms)
    pub disconnect_linger_ms: u64,
    /// leg 간 단계 신호 대기 상한 (ms)
    pub leg_sync_timeout_ms: u64,
}

impl TimingConfig {
    pub fn convergence_window(&self) -> Duration {
        Duration::from_millis(self.convergence_window_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn transport_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_ack_timeout_secs)
    }

    pub fn disconnect_linger(&self) -> Duration {
        Duration::from_millis(self.disconnect_linger_ms)
    }

    pub fn leg_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.leg_sync_timeout_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            convergence_window_ms: 10_000,
            http_timeout_secs: 5,
            transport_ack_timeout_secs: 10,
            disconnect_linger_ms: 250,
            leg_sync_timeout_ms: 120_000,
        }
    }
}

/// 인증 설정
///
/// `client_id`, `username`, `password`는 로그에 남기지 않습니다.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OpenID 제공자 기본 URL
    pub endpoint: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("endpoint", &self.endpoint)
            .field("client_id", &"<redacted>")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8087".to_owned(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// 플랫폼 서비스 엔드포인트
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub permission_search_url: String,
    pub device_manager_url: String,
    pub device_repository_url: String,
    /// `tcp://`, `mqtt://`, `ssl://`, `mqtts://` 스킴 지원
    pub mqtt_broker_url: String,
    pub last_value_query_url: String,
    pub process_deployment_url: String,
    pub process_engine_wrapper_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            permission_search_url: "http://localhost:8081".to_owned(),
            device_manager_url: "http://localhost:8082".to_owned(),
            device_repository_url: "http://localhost:8083".to_owned(),
            mqtt_broker_url: "tcp://localhost:1883".to_owned(),
            last_value_query_url: "http://localhost:8084/last-values".to_owned(),
            process_deployment_url: "http://localhost:8085".to_owned(),
            process_engine_wrapper_url: "http://localhost:8086".to_owned(),
        }
    }
}

/// canary 디바이스 타입 메타데이터
///
/// 대상 플랫폼의 디바이스 클래스, 함수, 특성 ID 는 설치마다 다르므로
/// 기본값이 없습니다. 세그먼트 이름만 기본값을 가집니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTypeConfig {
    pub device_class_id: String,
    pub protocol_id: String,
    pub protocol_segment_id: String,
    /// 측정값 XML 을 담는 세그먼트 이름
    pub protocol_segment_name: String,
    /// 보조 값을 담는 세그먼트 이름
    pub protocol_segment_name_2: String,
    pub cmd_function_id: String,
    pub cmd_characteristic_id: String,
    pub cmd_value_type: String,
    pub sensor_function_id: String,
    pub sensor_characteristic_id: String,
    pub sensor_value_type: String,
    pub sensor_aspect_id: String,
}

impl Default for DeviceTypeConfig {
    fn default() -> Self {
        Self {
            device_class_id: String::new(),
            protocol_id: String::new(),
            protocol_segment_id: String::new(),
            protocol_segment_name: "data".to_owned(),
            protocol_segment_name_2: "metadata".to_owned(),
            cmd_function_id: String::new(),
            cmd_characteristic_id: String::new(),
            cmd_value_type: "https://schema.org/Float".to_owned(),
            sensor_function_id: String::new(),
            sensor_characteristic_id: String::new(),
            sensor_value_type: "https://schema.org/Float".to_owned(),
            sensor_aspect_id: String::new(),
        }
    }
}

/// canary 허브 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// 허브 이름 (조회 키)
    pub name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: "canary-hub".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
