//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 엔진은 이 상수를 `OutcomeRecorder`에 넘겨 카운터와 게이지를 갱신합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `canary_`
//! - 접미어: `_total` (counter), `_latency_ms` (호출 지연 gauge), `_duration_ms` (실행 시간 gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use canary_core::metrics;
//! use metrics::counter;
//!
//! counter!(canary_core::metrics::UNCATEGORIZED_ERRORS_TOTAL).increment(1);
//! ```

// ─── 호출 메트릭 묶음 ──────────────────────────────────────────────

/// 하나의 외부 호출 종류에 대한 (호출 수, 지연, 에러 수) 메트릭 이름 묶음
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallMetrics {
    /// 호출 수 (counter)
    pub count: &'static str,
    /// 마지막 호출 지연 (gauge, ms)
    pub latency_ms: &'static str,
    /// 실패 수 (counter)
    pub errors: &'static str,
}

/// 인증 (세션 획득)
pub const AUTH: CallMetrics = CallMetrics {
    count: "canary_auth_total",
    latency_ms: "canary_auth_latency_ms",
    errors: "canary_auth_errors_total",
};

/// 디바이스 매니저 쓰기 (디바이스/타입/허브 생성, 수정)
pub const DEVICE_META_UPDATE: CallMetrics = CallMetrics {
    count: "canary_device_meta_update_total",
    latency_ms: "canary_device_meta_update_latency_ms",
    errors: "canary_device_meta_update_errors_total",
};

/// 디바이스 저장소 읽기
pub const DEVICE_REPO_REQUEST: CallMetrics = CallMetrics {
    count: "canary_device_repo_request_total",
    latency_ms: "canary_device_repo_request_latency_ms",
    errors: "canary_device_repo_request_errors_total",
};

/// 디바이스 데이터(마지막 값) 조회
pub const DEVICE_DATA_REQUEST: CallMetrics = CallMetrics {
    count: "canary_device_data_request_total",
    latency_ms: "canary_device_data_request_latency_ms",
    errors: "canary_device_data_request_errors_total",
};

/// 권한 검색 조회
pub const PERMISSIONS_REQUEST: CallMetrics = CallMetrics {
    count: "canary_permissions_request_total",
    latency_ms: "canary_permissions_request_latency_ms",
    errors: "canary_permissions_request_errors_total",
};

/// 커넥터 로그인 (브로커 연결)
pub const CONNECTOR_LOGIN: CallMetrics = CallMetrics {
    count: "canary_connector_login_total",
    latency_ms: "canary_connector_login_latency_ms",
    errors: "canary_connector_login_errors_total",
};

/// 커넥터 구독
pub const CONNECTOR_SUBSCRIBE: CallMetrics = CallMetrics {
    count: "canary_connector_subscribe_total",
    latency_ms: "canary_connector_subscribe_latency_ms",
    errors: "canary_connector_subscribe_errors_total",
};

/// 커넥터 발행
pub const CONNECTOR_PUBLISH: CallMetrics = CallMetrics {
    count: "canary_connector_publish_total",
    latency_ms: "canary_connector_publish_latency_ms",
    errors: "canary_connector_publish_errors_total",
};

// ─── 검증 이상(anomaly) 메트릭 ──────────────────────────────────────

/// 오프라인이어야 할 디바이스가 온라인으로 관측됨 (counter)
pub const UNEXPECTED_DEVICE_ONLINE_STATE_TOTAL: &str = "canary_unexpected_device_online_state_total";

/// 온라인이어야 할 디바이스가 오프라인으로 관측됨 (counter)
pub const UNEXPECTED_DEVICE_OFFLINE_STATE_TOTAL: &str =
    "canary_unexpected_device_offline_state_total";

/// 디바이스 저장소의 메타데이터 불일치 (counter)
pub const UNEXPECTED_DEVICE_REPO_METADATA_TOTAL: &str =
    "canary_unexpected_device_repo_metadata_total";

/// 권한 검색 프로젝션의 메타데이터 불일치 (counter)
pub const UNEXPECTED_PERMISSIONS_METADATA_TOTAL: &str =
    "canary_unexpected_permissions_metadata_total";

/// 마지막 값 불일치 (counter)
pub const UNEXPECTED_DEVICE_DATA_TOTAL: &str = "canary_unexpected_device_data_total";

/// 분류되지 않은 에러 (counter)
pub const UNCATEGORIZED_ERRORS_TOTAL: &str = "canary_uncategorized_errors_total";

// ─── 워크플로 메트릭 ────────────────────────────────────────────────

/// 워크플로 한 종류(명령/이벤트)의 메트릭 이름 묶음
///
/// `start_errors`와 `unexpected_command_count`는 직접 시작하는 명령
/// 워크플로에만 존재합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowMetrics {
    pub deployment_errors: &'static str,
    pub start_errors: Option<&'static str>,
    pub instance_state_errors: &'static str,
    pub unexpected_instance_count: &'static str,
    pub instance_duration_ms: &'static str,
    pub prepared_deployment_errors: &'static str,
    pub unexpected_prepared_deployment_selectables: &'static str,
    pub unexpected_command_count: Option<&'static str>,
}

impl WorkflowMetrics {
    /// 정의된 모든 메트릭 이름
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec![
            self.deployment_errors,
            self.instance_state_errors,
            self.unexpected_instance_count,
            self.instance_duration_ms,
            self.prepared_deployment_errors,
            self.unexpected_prepared_deployment_selectables,
        ];
        names.extend(self.start_errors);
        names.extend(self.unexpected_command_count);
        names
    }
}

/// 명령 워크플로 (`snowflake_canary_process`)
pub const COMMAND_WORKFLOW: WorkflowMetrics = WorkflowMetrics {
    deployment_errors: "canary_process_deployment_errors_total",
    start_errors: Some("canary_process_start_errors_total"),
    instance_state_errors: "canary_process_instance_state_errors_total",
    unexpected_instance_count: "canary_process_unexpected_instance_count_total",
    instance_duration_ms: "canary_process_instance_duration_ms",
    prepared_deployment_errors: "canary_process_prepared_deployment_errors_total",
    unexpected_prepared_deployment_selectables:
        "canary_process_unexpected_prepared_deployment_selectables_total",
    unexpected_command_count: Some("canary_process_unexpected_command_count_total"),
};

/// 이벤트 워크플로 (`canary_event_process`)
pub const EVENT_WORKFLOW: WorkflowMetrics = WorkflowMetrics {
    deployment_errors: "canary_event_process_deployment_errors_total",
    start_errors: None,
    instance_state_errors: "canary_event_process_instance_state_errors_total",
    unexpected_instance_count: "canary_event_process_unexpected_instance_count_total",
    instance_duration_ms: "canary_event_process_instance_duration_ms",
    prepared_deployment_errors: "canary_event_process_prepared_deployment_errors_total",
    unexpected_prepared_deployment_selectables:
        "canary_event_process_unexpected_prepared_deployment_selectables_total",
    unexpected_command_count: None,
};

// ─── 실행(run) 메트릭 ───────────────────────────────────────────────

/// 시작된 실행 수 (counter)
pub const RUNS_STARTED_TOTAL: &str = "canary_runs_started_total";

/// 이미 실행 중이라 거절된 트리거 수 (counter)
pub const RUNS_REJECTED_TOTAL: &str = "canary_runs_rejected_total";

/// 마지막 실행 소요 시간 (gauge, ms)
pub const RUN_DURATION_MS: &str = "canary_run_duration_ms";

/// 호출 메트릭 묶음 전체
pub const ALL_CALL_METRICS: [CallMetrics; 8] = [
    AUTH,
    DEVICE_META_UPDATE,
    DEVICE_REPO_REQUEST,
    DEVICE_DATA_REQUEST,
    PERMISSIONS_REQUEST,
    CONNECTOR_LOGIN,
    CONNECTOR_SUBSCRIBE,
    CONNECTOR_PUBLISH,
];

/// 검증 이상 카운터 전체 (정상 실행에서는 모두 0 이어야 함)
pub const ANOMALY_COUNTERS: [&str; 6] = [
    UNEXPECTED_DEVICE_ONLINE_STATE_TOTAL,
    UNEXPECTED_DEVICE_OFFLINE_STATE_TOTAL,
    UNEXPECTED_DEVICE_REPO_METADATA_TOTAL,
    UNEXPECTED_PERMISSIONS_METADATA_TOTAL,
    UNEXPECTED_DEVICE_DATA_TOTAL,
    UNCATEGORIZED_ERRORS_TOTAL,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

const COUNT_HELP: &str = "How often this call has been started. Used to tell a passing canary \
                          apart from one that never ran.";

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `canary-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    for call in ALL_CALL_METRICS {
        describe_counter!(call.count, COUNT_HELP);
        describe_gauge!(call.latency_ms, "Latency of the most recent call in milliseconds");
        describe_counter!(call.errors, "Total number of failed calls since canary startup");
    }

    describe_counter!(
        UNEXPECTED_DEVICE_ONLINE_STATE_TOTAL,
        "Device reported online where offline was expected"
    );
    describe_counter!(
        UNEXPECTED_DEVICE_OFFLINE_STATE_TOTAL,
        "Device reported offline where online was expected"
    );
    describe_counter!(
        UNEXPECTED_DEVICE_REPO_METADATA_TOTAL,
        "Device repository did not reflect a metadata update"
    );
    describe_counter!(
        UNEXPECTED_PERMISSIONS_METADATA_TOTAL,
        "Permission search did not reflect a metadata update"
    );
    describe_counter!(
        UNEXPECTED_DEVICE_DATA_TOTAL,
        "Last-value query returned unexpected device data"
    );
    describe_counter!(
        UNCATEGORIZED_ERRORS_TOTAL,
        "Total number of uncategorized errors since canary startup"
    );

    for workflow in [COMMAND_WORKFLOW, EVENT_WORKFLOW] {
        describe_counter!(
            workflow.deployment_errors,
            "Total number of workflow deployment errors"
        );
        if let Some(name) = workflow.start_errors {
            describe_counter!(name, "Total number of workflow start errors");
        }
        describe_counter!(
            workflow.instance_state_errors,
            "Workflow instance finished in a state other than COMPLETED"
        );
        describe_counter!(
            workflow.unexpected_instance_count,
            "Workflow history did not contain exactly one instance"
        );
        describe_gauge!(
            workflow.instance_duration_ms,
            "Duration of the most recent completed workflow instance in milliseconds"
        );
        describe_counter!(
            workflow.prepared_deployment_errors,
            "Total number of prepared deployment request errors"
        );
        describe_counter!(
            workflow.unexpected_prepared_deployment_selectables,
            "Prepared deployment did not offer the canary device or service"
        );
        if let Some(name) = workflow.unexpected_command_count {
            describe_counter!(name, "Workflow completed without delivering a command");
        }
    }

    describe_counter!(RUNS_STARTED_TOTAL, "Total number of canary runs started");
    describe_counter!(
        RUNS_REJECTED_TOTAL,
        "Triggers rejected because a run was already in progress"
    );
    describe_gauge!(RUN_DURATION_MS, "Duration of the most recent run in milliseconds");
}
