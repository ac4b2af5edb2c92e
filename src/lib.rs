pub mod attestation;
pub mod crypto;
pub mod error;
pub mod sync;

// Re-export key types at crate root for convenience.
pub use error::{AttestError, Error, KeyError, Result, SyncError};

pub use crypto::entropy::{EntropySource, SystemEntropy};
pub use crypto::material::{KeyMaterial, Nonce};

pub use attestation::document::AttestationDocument;
pub use attestation::policy::MeasurementPolicy;
pub use attestation::verifier::Verifier;
pub use attestation::AttestationProvider;

pub use sync::{KeySyncFollower, KeySyncLeader, KeySyncRequest, KeySyncResponse};

#[cfg(feature = "nsm")]
pub use attestation::nsm::NsmProvider;
