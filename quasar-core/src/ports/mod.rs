//! Security-sensitive capabilities handed to modules. Modules receive these
//! through their context and have no other route to randomness, hashing or
//! process execution.

pub mod command;
pub mod hash;
pub mod random;

use std::sync::Arc;

pub use command::{
    CommandOutput, CommandPort, CommandRequest, ResolvedExecutable,
    TokioCommandPort,
};
pub use hash::{HashAlgorithm, HashPort, Sha2Hasher};
pub use random::{OsRandomness, RandomnessPort};

/// Bundle of ports threaded through the orchestrator.
#[derive(Debug, Clone)]
pub struct Ports {
    pub randomness: Arc<dyn RandomnessPort>,
    pub hash: Arc<dyn HashPort>,
    pub command: Arc<dyn CommandPort>,
}

impl Ports {
    pub fn new(
        randomness: Arc<dyn RandomnessPort>,
        hash: Arc<dyn HashPort>,
        command: Arc<dyn CommandPort>,
    ) -> Self {
        Self {
            randomness,
            hash,
            command,
        }
    }

    pub fn with_command(mut self, command: Arc<dyn CommandPort>) -> Self {
        self.command = command;
        self
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            randomness: Arc::new(OsRandomness),
            hash: Arc::new(Sha2Hasher),
            command: Arc::new(TokioCommandPort),
        }
    }
}
