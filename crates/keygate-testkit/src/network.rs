//! Stub network collaborators
//!
//! Each stub answers from a configured verdict, can be switched to fail with
//! a [`NetworkError`], and records what it was asked so tests can assert on
//! calls and payloads.

use async_trait::async_trait;
use keygate_core::effects::{
    ChallengeProvider, KeyUploader, NetworkError, SignatureUpload, SignatureUploader,
    SupportProvider,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Answer {
    error: Option<NetworkError>,
    delay_ms: u64,
}

impl Answer {
    async fn wait(&self) -> Result<(), NetworkError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Support verdict server
#[derive(Debug, Clone)]
pub struct StubSupportProvider {
    supported: Arc<Mutex<bool>>,
    error: Arc<Mutex<Option<NetworkError>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl StubSupportProvider {
    pub fn new(supported: bool) -> Self {
        Self {
            supported: Arc::new(Mutex::new(supported)),
            error: Arc::new(Mutex::new(None)),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_supported(&self, supported: bool) {
        *self.supported.lock() = supported;
    }

    pub fn fail_with(&self, error: Option<NetworkError>) {
        *self.error.lock() = error;
    }

    /// Device fingerprints asked about, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SupportProvider for StubSupportProvider {
    async fn get_support(&self, device_fingerprint: &str) -> Result<bool, NetworkError> {
        self.queries.lock().push(device_fingerprint.to_string());
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(*self.supported.lock())
    }
}

/// Challenge server
#[derive(Debug, Clone)]
pub struct StubChallengeProvider {
    challenge: String,
    answer: Arc<Mutex<Answer>>,
    issued: Arc<Mutex<usize>>,
}

impl StubChallengeProvider {
    pub fn new(challenge: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
            answer: Arc::new(Mutex::new(Answer::default())),
            issued: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail every fetch with `error`
    pub fn failing(error: NetworkError) -> Self {
        let stub = Self::new("");
        stub.answer.lock().error = Some(error);
        stub
    }

    /// Delay every answer by `ms` of real time
    pub fn with_delay_ms(self, ms: u64) -> Self {
        self.answer.lock().delay_ms = ms;
        self
    }

    /// Number of challenges handed out
    pub fn issued(&self) -> usize {
        *self.issued.lock()
    }
}

#[async_trait]
impl ChallengeProvider for StubChallengeProvider {
    async fn get_challenge(&self) -> Result<String, NetworkError> {
        let (error, delay_ms) = {
            let answer = self.answer.lock();
            (answer.error.clone(), answer.delay_ms)
        };
        Answer { error, delay_ms }.wait().await?;
        *self.issued.lock() += 1;
        Ok(self.challenge.clone())
    }
}

/// Public key registration server
#[derive(Debug, Clone)]
pub struct StubKeyUploader {
    verified: Arc<Mutex<bool>>,
    error: Arc<Mutex<Option<NetworkError>>>,
    uploads: Arc<Mutex<Vec<(String, String)>>>,
}

impl StubKeyUploader {
    pub fn new(verified: bool) -> Self {
        Self {
            verified: Arc::new(Mutex::new(verified)),
            error: Arc::new(Mutex::new(None)),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Uploader that accepts every key
    pub fn verifying() -> Self {
        Self::new(true)
    }

    /// Uploader that rejects every key
    pub fn rejecting() -> Self {
        Self::new(false)
    }

    pub fn fail_with(&self, error: Option<NetworkError>) {
        *self.error.lock() = error;
    }

    /// `(json, signature)` pairs received, in order
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl KeyUploader for StubKeyUploader {
    async fn upload_key(&self, json: &str, signature: &str) -> Result<bool, NetworkError> {
        self.uploads
            .lock()
            .push((json.to_string(), signature.to_string()));
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(*self.verified.lock())
    }
}

/// Signature verification server
#[derive(Debug, Clone)]
pub struct StubSignatureUploader {
    verified: Arc<Mutex<bool>>,
    answer: Arc<Mutex<Answer>>,
    uploads: Arc<Mutex<Vec<SignatureUpload>>>,
}

impl StubSignatureUploader {
    pub fn new(verified: bool) -> Self {
        Self {
            verified: Arc::new(Mutex::new(verified)),
            answer: Arc::new(Mutex::new(Answer::default())),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn verifying() -> Self {
        Self::new(true)
    }

    pub fn rejecting() -> Self {
        Self::new(false)
    }

    pub fn fail_with(&self, error: Option<NetworkError>) {
        self.answer.lock().error = error;
    }

    /// Delay every answer by `ms` of real time
    pub fn with_delay_ms(self, ms: u64) -> Self {
        self.answer.lock().delay_ms = ms;
        self
    }

    pub fn uploads(&self) -> Vec<SignatureUpload> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl SignatureUploader for StubSignatureUploader {
    async fn upload_signature(&self, upload: &SignatureUpload) -> Result<bool, NetworkError> {
        self.uploads.lock().push(upload.clone());
        let (error, delay_ms) = {
            let answer = self.answer.lock();
            (answer.error.clone(), answer.delay_ms)
        };
        Answer { error, delay_ms }.wait().await?;
        Ok(*self.verified.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_uploader_records_and_answers() {
        let uploader = StubKeyUploader::rejecting();
        assert!(!uploader.upload_key("{}", "c2ln").await.unwrap());
        uploader.fail_with(Some(NetworkError::Transport("reset".into())));
        assert!(uploader.upload_key("{}", "c2ln").await.is_err());
        assert_eq!(uploader.uploads().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_challenge_provider() {
        let provider = StubChallengeProvider::failing(NetworkError::Timeout { timeout_ms: 10 });
        assert!(provider.get_challenge().await.is_err());
        assert_eq!(provider.issued(), 0);
    }
}
