//! Anonymous client identifiers.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

/// Source of random bytes for identifiers.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8; 16]);
}

/// Operating system CSPRNG (hardware RNG on the device).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8; 16]) {
        OsRng.fill_bytes(buf);
    }
}

/// Produces version-4 UUID strings.
///
/// No uniqueness check is made; collisions are left to probability.
#[derive(Clone)]
pub struct IdentityGenerator {
    random: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for IdentityGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGenerator").finish_non_exhaustive()
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom))
    }
}

impl IdentityGenerator {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// A fresh identifier in lowercase 8-4-4-4-12 form.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; 16];
        self.random.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string()
    }
}
