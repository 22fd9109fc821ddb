//! Mock hardware key store
//!
//! Keeps real ed25519 key pairs in memory so exported keys and signatures
//! can be verified end to end. Export blobs follow the key-store format:
//! the JSON segment is `{counter, uid, cpu_id, pub_key}` for keys and
//! `{challenge, counter, uid, cpu_id, fid}` for signatures.
//!
//! Fault injection covers every failure the engine must classify:
//! generation failures, permanently invalidated keys, indeterminate
//! backend errors and signature-primitive failures.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use keygate_core::effects::{KeyStoreEffects, KeyStoreError, SigningHandle};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::blob::encode_export_blob;

/// How a stored key misbehaves when a signing handle is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFault {
    Unrecoverable,
    Invalidated,
    Indeterminate,
}

#[derive(Debug, Default)]
struct KeyStoreState {
    root: Option<SigningKey>,
    scenes: HashMap<String, SigningKey>,
    key_faults: HashMap<String, KeyFault>,
    signature_faults: HashSet<String>,
    fail_root_generation: bool,
    fail_scene_generation: bool,
    fail_export: bool,
    counter: u64,
    removed: Vec<String>,
    handles_issued: usize,
    handle_requests: usize,
}

/// In-memory key store backed by real ed25519 keys
#[derive(Debug, Clone)]
pub struct MockKeyStore {
    state: Arc<Mutex<KeyStoreState>>,
    device_id: String,
    uid: u64,
    supported: Arc<Mutex<bool>>,
    fid: Option<String>,
    handle_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl MockKeyStore {
    /// Alias under which the root key is reported in `removed_keys`
    pub const ROOT_ALIAS: &'static str = "<root>";

    /// A supported key store for `device_id`
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(KeyStoreState::default())),
            device_id: device_id.into(),
            uid: 10_086,
            supported: Arc::new(Mutex::new(true)),
            fid: Some("finger-0".to_string()),
            handle_gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Toggle platform support
    pub fn set_supported(&self, supported: bool) {
        *self.supported.lock() = supported;
    }

    /// Make the next root generation fail
    pub fn fail_next_root_generation(&self) {
        self.state.lock().fail_root_generation = true;
    }

    /// Make the next scene generation fail
    pub fn fail_next_scene_generation(&self) {
        self.state.lock().fail_scene_generation = true;
    }

    /// Make key exports fail until cleared
    pub fn set_fail_export(&self, fail: bool) {
        self.state.lock().fail_export = fail;
    }

    /// Permanently invalidate a key, as a new enrollment would
    pub fn invalidate_key(&self, name: &str) {
        self.state
            .lock()
            .key_faults
            .insert(name.to_string(), KeyFault::Invalidated);
    }

    /// Make a key entry unrecoverable
    pub fn make_unrecoverable(&self, name: &str) {
        self.state
            .lock()
            .key_faults
            .insert(name.to_string(), KeyFault::Unrecoverable);
    }

    /// Make handle acquisition fail with a non-invalidating backend error
    pub fn make_indeterminate(&self, name: &str) {
        self.state
            .lock()
            .key_faults
            .insert(name.to_string(), KeyFault::Indeterminate);
    }

    /// Make handles for this key fail inside the signature primitive
    pub fn corrupt_signatures(&self, name: &str) {
        self.state.lock().signature_faults.insert(name.to_string());
    }

    /// Insert a scene key without going through generation
    pub fn seed_scene_key(&self, name: &str) {
        self.state
            .lock()
            .scenes
            .insert(name.to_string(), SigningKey::generate(&mut OsRng));
    }

    /// Names of all scene keys currently held
    pub fn scene_key_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().scenes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every alias removed so far, in order
    pub fn removed_keys(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    /// Number of signing handles handed out
    pub fn handles_issued(&self) -> usize {
        self.state.lock().handles_issued
    }

    /// Number of signing handle requests received, including held ones
    pub fn handle_requests(&self) -> usize {
        self.state.lock().handle_requests
    }

    /// Hold every subsequent handle request until the returned gate is
    /// notified once per request
    pub fn hold_signing_handles(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.handle_gate.lock() = Some(gate.clone());
        gate
    }

    /// Verify a base64 signature over `json` with the named scene key
    pub fn verify_scene_signature(&self, name: &str, json: &str, signature_b64: &str) -> bool {
        let state = self.state.lock();
        let Some(key) = state.scenes.get(name) else {
            return false;
        };
        verify_with(&key.verifying_key(), json, signature_b64)
    }

    /// Verify a base64 attestation over `json` with the root key
    pub fn verify_root_attestation(&self, json: &str, signature_b64: &str) -> bool {
        let state = self.state.lock();
        let Some(root) = state.root.as_ref() else {
            return false;
        };
        verify_with(&root.verifying_key(), json, signature_b64)
    }

    fn next_counter(state: &mut KeyStoreState) -> u64 {
        state.counter += 1;
        state.counter
    }

    fn export_with_root(
        &self,
        state: &mut KeyStoreState,
        public: &ed25519_dalek::VerifyingKey,
    ) -> Result<Vec<u8>, KeyStoreError> {
        if state.fail_export {
            return Err(KeyStoreError::Backend("injected export failure".to_string()));
        }
        let counter = Self::next_counter(state);
        let root = state
            .root
            .as_ref()
            .ok_or_else(|| KeyStoreError::NotFound("root key".to_string()))?;
        let json = serde_json::json!({
            "counter": counter,
            "uid": self.uid,
            "cpu_id": self.device_id,
            "pub_key": hex::encode(public.to_bytes()),
        })
        .to_string();
        let signature = root.sign(json.as_bytes());
        Ok(encode_export_blob(&json, &signature.to_bytes()))
    }
}

fn verify_with(key: &ed25519_dalek::VerifyingKey, json: &str, signature_b64: &str) -> bool {
    let Ok(bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(json.as_bytes(), &signature).is_ok()
}

#[async_trait]
impl KeyStoreEffects for MockKeyStore {
    fn is_supported(&self) -> bool {
        *self.supported.lock()
    }

    fn device_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.device_id.as_bytes()))
    }

    async fn generate_root_key(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_root_generation) {
            return Err(KeyStoreError::Backend(
                "injected root generation failure".to_string(),
            ));
        }
        state.root = Some(SigningKey::generate(&mut OsRng));
        Ok(())
    }

    async fn has_root_key(&self) -> bool {
        self.state.lock().root.is_some()
    }

    async fn remove_root_key(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        if state.root.take().is_some() {
            state.removed.push(Self::ROOT_ALIAS.to_string());
        }
        Ok(())
    }

    async fn export_root_key(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let mut state = self.state.lock();
        let Some(public) = state.root.as_ref().map(SigningKey::verifying_key) else {
            return Ok(None);
        };
        self.export_with_root(&mut state, &public).map(Some)
    }

    async fn generate_scene_key(&self, name: &str) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_scene_generation) {
            return Err(KeyStoreError::Backend(
                "injected scene generation failure".to_string(),
            ));
        }
        if state.root.is_none() {
            return Err(KeyStoreError::NotFound(
                "scene keys must be attested by a root key".to_string(),
            ));
        }
        state.key_faults.remove(name);
        state.signature_faults.remove(name);
        state
            .scenes
            .insert(name.to_string(), SigningKey::generate(&mut OsRng));
        Ok(())
    }

    async fn has_scene_key(&self, name: &str) -> bool {
        self.state.lock().scenes.contains_key(name)
    }

    async fn remove_scene_key(
        &self,
        name: &str,
        also_remove_root: bool,
    ) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        if state.scenes.remove(name).is_some() {
            state.removed.push(name.to_string());
        }
        state.key_faults.remove(name);
        state.signature_faults.remove(name);
        if also_remove_root && state.root.take().is_some() {
            state.removed.push(Self::ROOT_ALIAS.to_string());
        }
        Ok(())
    }

    async fn prepare_signing_handle(
        &self,
        name: &str,
    ) -> Result<Box<dyn SigningHandle>, KeyStoreError> {
        self.state.lock().handle_requests += 1;
        let gate = self.handle_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock();
        match state.key_faults.get(name) {
            Some(KeyFault::Unrecoverable) => {
                return Err(KeyStoreError::Unrecoverable(format!(
                    "{name}: entry cannot be recovered"
                )))
            }
            Some(KeyFault::Invalidated) => {
                return Err(KeyStoreError::InvalidKey(format!(
                    "{name}: key permanently invalidated"
                )))
            }
            Some(KeyFault::Indeterminate) => {
                return Err(KeyStoreError::Backend(format!(
                    "{name}: key store busy"
                )))
            }
            None => {}
        }
        let key = state
            .scenes
            .get(name)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(name.to_string()))?;
        let corrupt = state.signature_faults.contains(name);
        let counter = Self::next_counter(&mut state);
        state.handles_issued += 1;

        Ok(Box::new(MockSigningHandle {
            name: name.to_string(),
            key,
            corrupt,
            counter,
            uid: self.uid,
            device_id: self.device_id.clone(),
            fid: self.fid.clone(),
            data: Vec::new(),
        }))
    }

    async fn export_scene_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let mut state = self.state.lock();
        let Some(public) = state.scenes.get(name).map(SigningKey::verifying_key) else {
            return Ok(None);
        };
        self.export_with_root(&mut state, &public).map(Some)
    }
}

/// Signing handle over an in-memory scene key
#[derive(Debug)]
struct MockSigningHandle {
    name: String,
    key: SigningKey,
    corrupt: bool,
    counter: u64,
    uid: u64,
    device_id: String,
    fid: Option<String>,
    data: Vec<u8>,
}

impl SigningHandle for MockSigningHandle {
    fn key_name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, data: &[u8]) -> Result<(), KeyStoreError> {
        if self.corrupt {
            return Err(KeyStoreError::Signature(format!(
                "{}: signature object rejected update",
                self.name
            )));
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn sign(self: Box<Self>) -> Result<Vec<u8>, KeyStoreError> {
        if self.corrupt {
            return Err(KeyStoreError::Signature(format!(
                "{}: signature object rejected sign",
                self.name
            )));
        }
        let json = serde_json::json!({
            "challenge": String::from_utf8_lossy(&self.data),
            "counter": self.counter,
            "uid": self.uid,
            "cpu_id": self.device_id,
            "fid": self.fid,
        })
        .to_string();
        let signature = self.key.sign(json.as_bytes());
        Ok(encode_export_blob(&json, &signature.to_bytes()))
    }
}
