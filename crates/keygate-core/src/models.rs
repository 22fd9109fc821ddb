//! Key and signature models decoded from export blobs
//!
//! Both models keep the raw JSON text next to the parsed fields: verifiers
//! check the signature over the exact bytes the key store produced, never a
//! re-serialization.

use serde::{Deserialize, Serialize};

use crate::export_blob::{self, ExportBlobError, ExportedKeyBlob};

/// Public half of a root or scene key, as exported by the key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyModel {
    /// Monotonic key-store counter at export time
    pub counter: u64,
    /// Owning application uid as reported by the key store
    pub uid: u64,
    /// Hardware identifier of the device
    pub device_id: String,
    /// Public key material
    pub pub_key: String,
    /// Raw JSON segment exactly as exported
    pub json: String,
    /// Attestation signature over `json`, base64
    pub signature: String,
}

#[derive(Deserialize)]
struct PublicKeyFields {
    #[serde(default)]
    counter: u64,
    #[serde(default)]
    uid: u64,
    #[serde(rename = "cpu_id", alias = "device_id", default)]
    device_id: String,
    pub_key: String,
}

impl PublicKeyModel {
    /// Decode a raw export blob into a key model
    pub fn from_export(bytes: &[u8]) -> Result<Self, ExportBlobError> {
        Self::from_blob(export_blob::decode(bytes)?)
    }

    /// Build a key model from an already decoded blob
    pub fn from_blob(blob: ExportedKeyBlob) -> Result<Self, ExportBlobError> {
        let fields: PublicKeyFields = serde_json::from_str(&blob.json)
            .map_err(|e| ExportBlobError::MalformedJson(e.to_string()))?;
        let signature = blob.signature_base64();
        Ok(Self {
            counter: fields.counter,
            uid: fields.uid,
            device_id: fields.device_id,
            pub_key: fields.pub_key,
            json: blob.json,
            signature,
        })
    }
}

/// A finalized biometric-gated signature over a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureModel {
    /// Challenge echoed back by the key store
    pub challenge: String,
    /// Key-store counter at signing time
    pub counter: u64,
    /// Owning application uid
    pub uid: u64,
    /// Hardware identifier of the device
    pub device_id: String,
    /// Identifier of the biometric template that unlocked the key, if reported
    pub fid: Option<String>,
    /// Raw JSON segment exactly as signed
    pub json: String,
    /// Signature over `json`, base64
    pub signature: String,
    /// Salt length of the signature scheme, forwarded to verifiers
    pub salt_len: u32,
}

#[derive(Deserialize)]
struct SignatureFields {
    #[serde(default)]
    challenge: String,
    #[serde(default)]
    counter: u64,
    #[serde(default)]
    uid: u64,
    #[serde(rename = "cpu_id", alias = "device_id", default)]
    device_id: String,
    #[serde(default)]
    fid: Option<String>,
}

impl SignatureModel {
    /// Decode a raw signing output blob
    pub fn from_export(bytes: &[u8], salt_len: u32) -> Result<Self, ExportBlobError> {
        let blob = export_blob::decode(bytes)?;
        let fields: SignatureFields = serde_json::from_str(&blob.json)
            .map_err(|e| ExportBlobError::MalformedJson(e.to_string()))?;
        let signature = blob.signature_base64();
        Ok(Self {
            challenge: fields.challenge,
            counter: fields.counter,
            uid: fields.uid,
            device_id: fields.device_id,
            fid: fields.fid,
            json: blob.json,
            signature,
            salt_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(json: &str, signature: &[u8]) -> Vec<u8> {
        let mut out = (json.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(json.as_bytes());
        out.extend_from_slice(signature);
        out
    }

    #[test]
    fn test_public_key_model_reads_cpu_id_alias() {
        let json = r#"{"counter":3,"uid":10086,"cpu_id":"dev-1","pub_key":"AAAA"}"#;
        let model = PublicKeyModel::from_export(&blob(json, &[1, 2, 3])).unwrap();
        assert_eq!(model.counter, 3);
        assert_eq!(model.uid, 10086);
        assert_eq!(model.device_id, "dev-1");
        assert_eq!(model.pub_key, "AAAA");
        assert_eq!(model.json, json);
        assert_eq!(model.signature, "AQID");
    }

    #[test]
    fn test_public_key_model_requires_key_material() {
        let err = PublicKeyModel::from_export(&blob(r#"{"counter":1}"#, &[])).unwrap_err();
        assert!(matches!(err, ExportBlobError::MalformedJson(_)));
    }

    #[test]
    fn test_signature_model_keeps_raw_json_and_salt() {
        let json = r#"{"challenge":"nonce-1","counter":9,"uid":7,"device_id":"d","fid":"f1"}"#;
        let model = SignatureModel::from_export(&blob(json, b"sig"), 20).unwrap();
        assert_eq!(model.challenge, "nonce-1");
        assert_eq!(model.fid.as_deref(), Some("f1"));
        assert_eq!(model.json, json);
        assert_eq!(model.salt_len, 20);
        assert_eq!(model.signature, "c2ln");
    }

    #[test]
    fn test_signature_model_rejects_non_json() {
        let err = SignatureModel::from_export(&blob("not json", b"sig"), 20).unwrap_err();
        assert!(matches!(err, ExportBlobError::MalformedJson(_)));
    }
}
