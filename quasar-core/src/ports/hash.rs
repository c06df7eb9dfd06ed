use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};

use crate::error::EngineError;

/// Digest algorithms modules are allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(EngineError::Validation(format!(
                "hash algorithm `{other}` is not approved"
            ))),
        }
    }
}

pub trait HashPort: Send + Sync + fmt::Debug {
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8>;

    /// Lowercase hex rendering of [`HashPort::digest`].
    fn hex_digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> String {
        hex::encode(self.digest(algorithm, data))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha2Hasher;

impl HashPort for Sha2Hasher {
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        match algorithm {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        let hasher = Sha2Hasher;
        assert_eq!(
            hasher.hex_digest(HashAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hasher.digest(HashAlgorithm::Sha512, b"abc").len(), 64);
    }

    #[test]
    fn weak_algorithms_are_not_approved() {
        assert!("md5".parse::<HashAlgorithm>().is_err());
        assert!("sha1".parse::<HashAlgorithm>().is_err());
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
    }
}
