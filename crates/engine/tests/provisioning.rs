//! 통합 테스트 -- 리소스 프로비저닝 멱등성과 허브 정합

mod common;

use std::sync::Arc;

use canary_core::metrics::{DEVICE_META_UPDATE, DEVICE_REPO_REQUEST, PERMISSIONS_REQUEST};
use canary_core::types::{Attribute, CANARY_MARKER_KEY, Device, Hub};
use canary_engine::{MemoryRecorder, OutcomeRecorder, ResourceProvisioner};

use common::{FakePlatform, World, session, test_config};

fn provisioner(world: &Arc<World>) -> (ResourceProvisioner<FakePlatform>, Arc<MemoryRecorder>) {
    let recorder = Arc::new(MemoryRecorder::new());
    let provisioner = ResourceProvisioner::new(
        &test_config(),
        Arc::new(FakePlatform::new(world)),
        Arc::clone(&recorder) as Arc<dyn OutcomeRecorder>,
    );
    (provisioner, recorder)
}

#[tokio::test(start_paused = true)]
async fn ensure_device_creates_type_and_device_once() {
    let world = World::new();
    let (provisioner, recorder) = provisioner(&world);
    let session = session();

    let first = provisioner.ensure_device(&session).await.unwrap();
    let second = provisioner.ensure_device(&session).await.unwrap();

    assert_eq!(first, second);
    let state = world.state();
    assert_eq!(state.device_type_creates, 1);
    assert_eq!(state.device_creates, 1);
    assert_eq!(first.device_type_id, state.device_types[0].id);
    assert!(first.attributes.iter().any(|a| a.key == CANARY_MARKER_KEY));

    // 두 번의 create (타입, 디바이스)
    assert_eq!(recorder.counter(DEVICE_META_UPDATE.count), 2);
    assert_eq!(recorder.counter(DEVICE_META_UPDATE.errors), 0);
    // 목록 조회 세 번 (디바이스, 타입, 디바이스) 은 권한 요청으로 집계
    assert_eq!(recorder.counter(PERMISSIONS_REQUEST.count), 3);
    assert_eq!(recorder.counter(DEVICE_REPO_REQUEST.count), 0);
}

#[tokio::test(start_paused = true)]
async fn existing_device_skips_device_type_lookup() {
    let world = World::new();
    world.state().devices.push(Device {
        id: "device-existing".to_owned(),
        local_id: "canary_existing".to_owned(),
        name: "canary-old".to_owned(),
        attributes: vec![Attribute::canary_marker()],
        device_type_id: "device-type-existing".to_owned(),
    });
    world.fail("list_device_types");

    let (provisioner, _recorder) = provisioner(&world);
    let device = provisioner.ensure_device(&session()).await.unwrap();

    assert_eq!(device.id, "device-existing");
    assert_eq!(world.state().device_creates, 0);
}

#[tokio::test(start_paused = true)]
async fn ensure_device_type_is_idempotent() {
    let world = World::new();
    let (provisioner, _recorder) = provisioner(&world);
    let session = session();

    let first = provisioner.ensure_device_type(&session).await.unwrap();
    let second = provisioner.ensure_device_type(&session).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(world.state().device_type_creates, 1);
    assert!(first.service_by_local_id("cmd").is_some());
    assert!(first.service_by_local_id("sensor").is_some());
}

#[tokio::test(start_paused = true)]
async fn create_failure_propagates_and_is_counted() {
    let world = World::new();
    world.fail("create_device");
    let (provisioner, recorder) = provisioner(&world);

    let result = provisioner.ensure_device(&session()).await;

    assert!(result.is_err());
    assert_eq!(recorder.counter(DEVICE_META_UPDATE.errors), 1);
    // 타입은 생성되었고 재실행 시 재사용됨
    assert_eq!(world.state().device_type_creates, 1);
}

#[tokio::test(start_paused = true)]
async fn ensure_hub_creates_hub_referencing_device() {
    let world = World::new();
    let (provisioner, recorder) = provisioner(&world);
    let session = session();
    let device = provisioner.ensure_device(&session).await.unwrap();

    let hub = provisioner.ensure_hub(&session, &device).await.unwrap();

    assert!(!hub.id.is_empty());
    assert_eq!(hub.name, "canary-hub");
    assert!(hub.references(&device));
    assert_eq!(world.state().hub_creates, 1);
    // 디바이스/타입 목록 2회 + 허브 검색 1회
    assert_eq!(recorder.counter(PERMISSIONS_REQUEST.count), 3);

    // 두 번째 호출은 기존 허브를 그대로 반환
    let again = provisioner.ensure_hub(&session, &device).await.unwrap();
    assert_eq!(again.id, hub.id);
    let state = world.state();
    assert_eq!(state.hub_creates, 1);
    assert_eq!(state.hub_updates, 0);
}

#[tokio::test(start_paused = true)]
async fn stale_hub_is_reconciled_in_place() {
    let world = World::new();
    let (provisioner, _recorder) = provisioner(&world);
    let session = session();
    let device = provisioner.ensure_device(&session).await.unwrap();

    world.state().hubs.push(Hub {
        id: "hub-old".to_owned(),
        name: "canary-hub".to_owned(),
        device_ids: vec!["device-gone".to_owned()],
        device_local_ids: vec!["canary_gone".to_owned()],
    });

    let hub = provisioner.ensure_hub(&session, &device).await.unwrap();

    // 빈 응답 본문이어도 기존 ID 를 유지
    assert_eq!(hub.id, "hub-old");
    let state = world.state();
    assert_eq!(state.hub_updates, 1);
    assert_eq!(state.hub_creates, 0);
    assert_eq!(state.hubs.len(), 1);
    assert!(state.hubs[0].references(&device));
    assert_eq!(state.hubs[0].device_local_ids, vec![device.local_id.clone()]);
}

#[tokio::test(start_paused = true)]
async fn hub_search_failure_is_fatal() {
    let world = World::new();
    let (provisioner, recorder) = provisioner(&world);
    let session = session();
    let device = provisioner.ensure_device(&session).await.unwrap();
    world.fail("find_hubs_by_name");

    assert!(provisioner.ensure_hub(&session, &device).await.is_err());
    assert_eq!(recorder.counter(PERMISSIONS_REQUEST.errors), 1);
    assert_eq!(world.state().hub_creates, 0);
}
