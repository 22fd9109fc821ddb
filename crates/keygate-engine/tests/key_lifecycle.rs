//! Init, key preparation and the precondition taxonomy

#![allow(clippy::unwrap_used)]

mod common;

use common::{Harness, SALT, SCENE};
use keygate_core::effects::{KeyStoreEffects, NetworkError, StorageEffects};
use keygate_core::{KeyRecord, KeyStatus, KeyTier};
use keygate_engine::{
    AuthenticateRequest, ErrorCode, InitRequest, PrepareRootKeyRequest, PrepareSceneKeyRequest,
    SceneId,
};
use keygate_testkit::{MemoryStorageHandler, MockKeyStore, StubKeyUploader, StubSupportProvider};
use std::sync::Arc;

fn auth() -> AuthenticateRequest {
    AuthenticateRequest::new(SCENE).with_challenge("n")
}

#[tokio::test]
async fn test_operations_before_init_fail_fast() {
    let h = Harness::new();
    assert!(!h.engine.is_initialized());
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotInitialized);
    let err = h
        .prepare_root(PrepareRootKeyRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotInitialized);
    assert_eq!(
        h.engine.has_scene_key(SCENE).await.unwrap_err().code,
        ErrorCode::NotInitialized
    );
}

#[tokio::test]
async fn test_repeated_init_is_a_no_op() {
    let h = Harness::new();
    assert!(!h.init().await.unwrap().already_initialized);
    let again = h
        .init_with(InitRequest::new([SceneId(1)], "bob"))
        .await
        .unwrap();
    assert!(again.already_initialized);
    // The first registration stands
    let err = h
        .prepare_scene(PrepareSceneKeyRequest::new(SceneId(1)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneUnregistered);
}

#[tokio::test]
async fn test_unsupported_key_store() {
    let key_store = MockKeyStore::new("device-1");
    key_store.set_supported(false);
    let h = Harness::with_parts(key_store, MemoryStorageHandler::new());

    let err = h.init().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceUnsupported);
    assert!(h.engine.is_initialized());
    assert!(!h.engine.is_supported());

    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceUnsupported);
    let err = h.init().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceUnsupported);
}

#[tokio::test]
async fn test_support_verdict_is_cached() {
    let storage = MemoryStorageHandler::new();
    let key_store = MockKeyStore::new("device-1");
    let provider = Arc::new(StubSupportProvider::new(true));

    let h = Harness::with_parts(key_store.clone(), storage.clone());
    h.init_with(InitRequest::new([SCENE], SALT).with_support(provider.clone()))
        .await
        .unwrap();
    assert_eq!(provider.queries(), vec![key_store.device_fingerprint()]);

    // Server unreachable: the cached verdict decides
    provider.fail_with(Some(NetworkError::Transport("offline".into())));
    let restarted = Harness::with_parts(key_store.clone(), storage.clone());
    let outcome = restarted
        .init_with(InitRequest::new([SCENE], SALT).with_support(provider.clone()))
        .await
        .unwrap();
    assert!(outcome.supported);

    // Nothing cached anywhere
    let fresh = Harness::with_parts(key_store, MemoryStorageHandler::new());
    let err = fresh
        .init_with(InitRequest::new([SCENE], SALT).with_support(provider))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::GetSupportFailed);
    assert!(!fresh.engine.is_initialized());
}

#[tokio::test]
async fn test_server_can_refuse_support() {
    let h = Harness::new();
    let err = h
        .init_with(
            InitRequest::new([SCENE], SALT).with_support(Arc::new(StubSupportProvider::new(false))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DeviceUnsupported);
    assert!(!h.engine.is_supported());
}

#[tokio::test]
async fn test_init_rejects_bad_salt() {
    let h = Harness::new();
    let err = h
        .init_with(InitRequest::new([SCENE], ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParameter);
    assert!(!h.engine.is_initialized());
}

#[tokio::test]
async fn test_init_removes_abandoned_keys() {
    let storage = MemoryStorageHandler::new();
    let key_store = MockKeyStore::new("device-1");
    let h = Harness::with_parts(key_store.clone(), storage.clone());
    let name = h.scene_key_name(SCENE);
    key_store.seed_scene_key(&name);
    let record = KeyRecord::new(name.clone(), KeyTier::Scene, KeyStatus::GeneratedNotUploaded);
    storage
        .store(
            &format!("keygate/key/{name}"),
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();

    let outcome = h.init().await.unwrap();
    assert_eq!(outcome.abandoned_keys_removed, 1);
    assert!(key_store.scene_key_names().is_empty());
    assert!(storage.get_string(&format!("keygate/key/{name}")).await.is_none());
}

#[tokio::test]
async fn test_scene_key_requires_root() {
    let h = Harness::new();
    h.init().await.unwrap();
    let err = h
        .prepare_scene(PrepareSceneKeyRequest::new(SCENE))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RootKeyAbsent);

    let root_uploader = Arc::new(StubKeyUploader::verifying());
    let prepared = h
        .prepare_scene(
            PrepareSceneKeyRequest::new(SCENE).auto_create_root(Some(root_uploader.clone())),
        )
        .await
        .unwrap();
    assert!(prepared.generated);
    assert_eq!(root_uploader.uploads().len(), 1);
    assert!(h.engine.has_root_key().await.unwrap());
    assert!(h.engine.has_scene_key(SCENE).await.unwrap());

    let model = h.engine.scene_key_model(SCENE).await.unwrap();
    assert!(h.key_store.verify_root_attestation(&model.json, &model.signature));
}

#[tokio::test]
async fn test_existing_keys_are_reused_unless_forced() {
    let h = Harness::ready().await;
    let again = h
        .prepare_scene(PrepareSceneKeyRequest::new(SCENE))
        .await
        .unwrap();
    assert!(!again.generated);

    let root = h
        .prepare_root(PrepareRootKeyRequest::default())
        .await
        .unwrap();
    assert!(!root.generated);

    // Replacing the root takes the scene keys it attested with it
    let root = h
        .prepare_root(PrepareRootKeyRequest {
            force: true,
            uploader: None,
        })
        .await
        .unwrap();
    assert!(root.generated);
    assert!(!h.engine.has_scene_key(SCENE).await.unwrap());
}

#[tokio::test]
async fn test_rejected_upload_rolls_back_scene_key() {
    let h = Harness::new();
    h.init().await.unwrap();
    h.prepare_root(PrepareRootKeyRequest::default()).await.unwrap();

    let err = h
        .prepare_scene(
            PrepareSceneKeyRequest::new(SCENE)
                .with_uploader(Arc::new(StubKeyUploader::rejecting())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UploadKeyFailed);
    assert!(!h.engine.has_scene_key(SCENE).await.unwrap());
    let name = h.scene_key_name(SCENE);
    assert!(h
        .storage
        .get_string(&format!("keygate/key/{name}"))
        .await
        .is_none());
    // The root is untouched
    assert!(h.engine.has_root_key().await.unwrap());
}

#[tokio::test]
async fn test_failed_root_upload_rolls_back_root() {
    let h = Harness::new();
    h.init().await.unwrap();
    let uploader = StubKeyUploader::verifying();
    uploader.fail_with(Some(NetworkError::Rejected("quota".into())));
    let err = h
        .prepare_root(PrepareRootKeyRequest {
            force: false,
            uploader: Some(Arc::new(uploader)),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UploadKeyFailed);
    assert!(!h.engine.has_root_key().await.unwrap());
}

#[tokio::test]
async fn test_generation_failures() {
    let h = Harness::new();
    h.init().await.unwrap();
    h.key_store.fail_next_root_generation();
    let err = h
        .prepare_root(PrepareRootKeyRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RootKeyGenerationFailed);

    h.prepare_root(PrepareRootKeyRequest::default()).await.unwrap();
    h.key_store.fail_next_scene_generation();
    let err = h
        .prepare_scene(PrepareSceneKeyRequest::new(SCENE))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneKeyGenerationFailed);
    assert!(!h.engine.has_scene_key(SCENE).await.unwrap());
}

#[tokio::test]
async fn test_remove_scene_key() {
    let h = Harness::ready().await;
    assert_eq!(h.remove_scene(SCENE).await.unwrap(), SCENE);
    assert!(!h.engine.has_scene_key(SCENE).await.unwrap());
    assert!(h.engine.has_root_key().await.unwrap());

    let err = h.remove_scene(SceneId(9)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneUnregistered);
}

#[tokio::test]
async fn test_precondition_order() {
    let h = Harness::new();
    h.init().await.unwrap();

    // Sensor absence is reported before any key state
    h.sensor.set_hardware_available(false);
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SensorUnavailable);
    h.sensor.set_hardware_available(true);

    let err = h
        .authenticate(AuthenticateRequest::new(SceneId(7)).with_challenge("n"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneUnregistered);

    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RootKeyAbsent);

    h.prepare_root(PrepareRootKeyRequest::default()).await.unwrap();
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneKeyAbsent);

    h.prepare_scene(PrepareSceneKeyRequest::new(SCENE)).await.unwrap();
    h.sensor.set_enrolled(false);
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoBiometricEnrolled);
    h.sensor.set_enrolled(true);

    let name = h.scene_key_name(SCENE);
    h.key_store.make_indeterminate(&name);
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyIndeterminate);
    assert!(h.engine.has_scene_key(SCENE).await.unwrap());

    h.key_store.invalidate_key(&name);
    let err = h.authenticate(auth()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SceneKeyExpired);
    assert!(!h.engine.has_scene_key(SCENE).await.unwrap());

    assert_eq!(h.sensor.authenticate_calls(), 0);
}

#[tokio::test]
async fn test_invalid_key_is_regenerated_on_prepare() {
    let h = Harness::ready().await;
    let name = h.scene_key_name(SCENE);
    h.key_store.make_unrecoverable(&name);
    let prepared = h
        .prepare_scene(PrepareSceneKeyRequest::new(SCENE))
        .await
        .unwrap();
    assert!(prepared.generated);
    h.authenticate(auth()).await.unwrap();
}
