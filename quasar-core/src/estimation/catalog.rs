//! Named algorithms and how a quantum adversary threatens each of them.

use quasar_model::Severity;

use super::structural::KeyFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumThreat {
    /// Polynomial-time break via period finding.
    Shor,
    /// Quadratic speed-up via amplified search.
    Grover,
    /// Already broken without a quantum computer.
    Classical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Signature,
    KeyExchange,
    PublicKeyEncryption,
    BlockCipher,
    StreamCipher,
    Hash,
}

/// How the estimator scores a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assessment {
    /// Structural estimate at a typical deployed key size.
    Structural { family: KeyFamily, typical_bits: u32 },
    /// Search estimate over a key or preimage space.
    Search { keyspace_bits: u32 },
    /// Fixed severity for primitives broken classically.
    Broken { severity: Severity },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: AlgorithmKind,
    pub threat: QuantumThreat,
    pub assessment: Assessment,
    pub replacement: &'static str,
}

const ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        name: "RSA",
        aliases: &["rsa-2048", "rsaencryption"],
        kind: AlgorithmKind::PublicKeyEncryption,
        threat: QuantumThreat::Shor,
        assessment: Assessment::Structural {
            family: KeyFamily::Rsa,
            typical_bits: 2048,
        },
        replacement: "ML-KEM (CRYSTALS-Kyber) or NTRU",
    },
    CatalogEntry {
        name: "DSA",
        aliases: &[],
        kind: AlgorithmKind::Signature,
        threat: QuantumThreat::Shor,
        assessment: Assessment::Structural {
            family: KeyFamily::Dsa,
            typical_bits: 2048,
        },
        replacement: "ML-DSA (CRYSTALS-Dilithium) or SLH-DSA (SPHINCS+)",
    },
    CatalogEntry {
        name: "ECDSA",
        aliases: &["ecc", "p-256"],
        kind: AlgorithmKind::Signature,
        threat: QuantumThreat::Shor,
        assessment: Assessment::Structural {
            family: KeyFamily::EllipticCurve,
            typical_bits: 256,
        },
        replacement: "ML-DSA (CRYSTALS-Dilithium)",
    },
    CatalogEntry {
        name: "ECDH",
        aliases: &["ecdhe", "x25519"],
        kind: AlgorithmKind::KeyExchange,
        threat: QuantumThreat::Shor,
        assessment: Assessment::Structural {
            family: KeyFamily::EllipticCurve,
            typical_bits: 256,
        },
        replacement: "ML-KEM (CRYSTALS-Kyber)",
    },
    CatalogEntry {
        name: "DH",
        aliases: &["dhe", "ffdh"],
        kind: AlgorithmKind::KeyExchange,
        threat: QuantumThreat::Shor,
        assessment: Assessment::Structural {
            family: KeyFamily::FiniteFieldDh,
            typical_bits: 2048,
        },
        replacement: "ML-KEM (CRYSTALS-Kyber)",
    },
    CatalogEntry {
        name: "DES",
        aliases: &[],
        kind: AlgorithmKind::BlockCipher,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 56 },
        replacement: "AES-256",
    },
    CatalogEntry {
        name: "3DES",
        aliases: &["tdes", "des-ede3", "triple-des"],
        kind: AlgorithmKind::BlockCipher,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 112 },
        replacement: "AES-256",
    },
    CatalogEntry {
        name: "AES-128",
        aliases: &["aes128", "aes-128-gcm", "aes-128-cbc"],
        kind: AlgorithmKind::BlockCipher,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 128 },
        replacement: "AES-256",
    },
    CatalogEntry {
        name: "AES-192",
        aliases: &["aes192"],
        kind: AlgorithmKind::BlockCipher,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 192 },
        replacement: "AES-256",
    },
    CatalogEntry {
        name: "AES-256",
        aliases: &["aes256", "aes-256-gcm", "aes-256-cbc"],
        kind: AlgorithmKind::BlockCipher,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 256 },
        replacement: "none required",
    },
    CatalogEntry {
        name: "RC4",
        aliases: &["arcfour"],
        kind: AlgorithmKind::StreamCipher,
        threat: QuantumThreat::Classical,
        assessment: Assessment::Broken {
            severity: Severity::Critical,
        },
        replacement: "AES-256-GCM or ChaCha20-Poly1305",
    },
    CatalogEntry {
        name: "MD5",
        aliases: &[],
        kind: AlgorithmKind::Hash,
        threat: QuantumThreat::Classical,
        assessment: Assessment::Broken {
            severity: Severity::High,
        },
        replacement: "SHA-3 or BLAKE2",
    },
    CatalogEntry {
        name: "SHA1",
        aliases: &["sha-1"],
        kind: AlgorithmKind::Hash,
        threat: QuantumThreat::Classical,
        assessment: Assessment::Broken {
            severity: Severity::Medium,
        },
        replacement: "SHA-256 or SHA-3",
    },
    CatalogEntry {
        name: "SHA-256",
        aliases: &["sha256"],
        kind: AlgorithmKind::Hash,
        threat: QuantumThreat::Grover,
        assessment: Assessment::Search { keyspace_bits: 256 },
        replacement: "none required",
    },
];

/// Case-insensitive lookup over canonical names and aliases.
pub fn lookup(name: &str) -> Option<&'static CatalogEntry> {
    let needle = name.trim();
    ENTRIES.iter().find(|entry| {
        entry.name.eq_ignore_ascii_case(needle)
            || entry
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(needle))
    })
}

pub fn entries() -> impl Iterator<Item = &'static CatalogEntry> {
    ENTRIES.iter()
}
