use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::KeyError;

/// Supplier of cryptographically secure random bytes.
///
/// Every generation routine takes an `EntropySource` so that the failure
/// path can be exercised in tests by injecting a failing source, without
/// mutating process-global state. A failed read is fatal to the calling
/// operation; callers must never fall back to weaker entropy or zero-fill.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), KeyError>;
}

/// The operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), KeyError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| KeyError::RandomnessUnavailable(e.to_string()))
    }
}

/// Entropy source that always fails; used to test failure propagation.
#[cfg(test)]
pub(crate) struct FailingEntropy;

#[cfg(test)]
impl EntropySource for FailingEntropy {
    fn fill(&self, _buf: &mut [u8]) -> Result<(), KeyError> {
        Err(KeyError::RandomnessUnavailable(
            "not enough randomness".into(),
        ))
    }
}
