use std::fmt;

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};

use crate::error::{EngineError, Result};

/// Single source of cryptographically secure randomness. Modules never reach
/// for a thread-local or seeded generator directly.
pub trait RandomnessPort: Send + Sync + fmt::Debug {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;

    fn next_u64(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Uniform value in `0..bound`, drawn from a generator seeded by this
    /// port. `bound` must be non-zero.
    fn below(&self, bound: u64) -> Result<u64> {
        if bound == 0 {
            return Err(EngineError::Internal(
                "random bound must be non-zero".into(),
            ));
        }
        let mut seed = <StdRng as SeedableRng>::Seed::default();
        self.fill_bytes(&mut seed)?;
        Ok(StdRng::from_seed(seed).random_range(0..bound))
    }
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomness;

impl RandomnessPort for OsRandomness {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(dest).map_err(|err| {
            EngineError::Internal(format!("OS randomness unavailable: {err}"))
        })
    }
}
