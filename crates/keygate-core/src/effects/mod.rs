//! Effect traits for every external collaborator
//!
//! The engine never talks to hardware, the network, storage or the clock
//! directly; it is handed trait objects implementing these interfaces.

pub mod biometric;
pub mod keystore;
pub mod network;
pub mod storage;
pub mod task;
pub mod time;

pub use biometric::{
    BiometricCapability, BiometricEffects, BiometricEvent, BiometricEventReceiver,
    BiometricEventSender, BiometricFailure, BiometricRequest, BiometricType, PromptText,
};
pub use keystore::{KeyStoreEffects, KeyStoreError, SigningHandle};
pub use network::{
    ChallengeProvider, KeyUploader, NetworkError, SignatureUpload, SignatureUploader,
    SupportProvider,
};
pub use storage::{StorageEffects, StorageError};
pub use task::{CancelToken, CancellationToken};
pub use time::{PhysicalTimeEffects, TimeError};
