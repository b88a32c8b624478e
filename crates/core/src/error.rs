//! 에러 타입 -- 도메인별 에러 정의
//!
//! 실행(run) 경계에서의 분류는 다음과 같습니다.
//! - 설정/인증 실패: 실행 전체 중단
//! - 프로비저닝, 배포, 전송 연결 실패: 해당 leg 만 중단
//! - 검증 불일치: 에러 타입으로 표현하지 않고 카운터로만 기록

/// Canary 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum CanaryError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 플랫폼 HTTP API 에러
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// 메시지 전송(MQTT) 에러
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// 워크플로 수명주기 에러
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 플랫폼 HTTP API 호출 에러
///
/// `service`는 호출 대상 서비스 이름입니다 (예: `device-manager`).
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// 요청 전송 실패 (연결, 타임아웃 등)
    #[error("{service}: request failed: {reason}")]
    Request { service: String, reason: String },

    /// 2xx 가 아닌 응답
    #[error("{service}: unexpected status {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    /// 응답 본문 디코딩 실패
    #[error("{service}: unable to decode response: {reason}")]
    Decode { service: String, reason: String },
}

impl PlatformError {
    /// 응답 상태 코드를 반환합니다 (상태 에러인 경우에만).
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 메시지 전송 에러
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 브로커 연결 실패
    #[error("connect failed: {0}")]
    Connect(String),

    /// 구독 실패
    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// 발행 실패
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// 브로커 확인 응답 대기 시간 초과
    #[error("{op} not acknowledged within {timeout_ms}ms")]
    AckTimeout { op: String, timeout_ms: u64 },

    /// 세션이 이미 닫힘
    #[error("session closed")]
    Closed,

    /// 브로커 URL 형식 오류
    #[error("invalid broker url '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
}

/// 워크플로 수명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// 디바이스 타입에서 역할에 해당하는 서비스를 찾지 못함
    #[error("no '{role}' service found on device type {device_type_id}")]
    ServiceNotFound {
        role: String,
        device_type_id: String,
    },

    /// 배포 템플릿 처리 실패
    #[error("deployment template error: {0}")]
    Template(String),
}
