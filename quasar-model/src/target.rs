use std::fmt;

use crate::error::{ModelError, Result};
use crate::ids::TargetId;

const MAX_HOSTNAME_LEN: usize = 253;

/// Protocol spoken by the assessed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Protocol {
    Tls,
    Ssh,
    Ipsec,
    Other(String),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tls => f.write_str("tls"),
            Protocol::Ssh => f.write_str("ssh"),
            Protocol::Ipsec => f.write_str("ipsec"),
            Protocol::Other(name) => f.write_str(name),
        }
    }
}

/// Network location of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetDescriptor {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl TargetDescriptor {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Result<Self> {
        let descriptor = Self {
            host: host.into(),
            port,
            protocol,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Rejects hostnames outside `[A-Za-z0-9.-]` (IPv6 literals may also use
    /// `:`), oversize names, and port zero.
    pub fn validate(&self) -> Result<()> {
        let host = self.host.as_str();
        if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
            return Err(ModelError::InvalidTarget(format!(
                "hostname must be 1..={MAX_HOSTNAME_LEN} characters"
            )));
        }
        let valid = host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
        if !valid || host.starts_with('-') || host.contains("..") {
            return Err(ModelError::InvalidTarget(format!(
                "hostname `{host}` contains unsupported characters"
            )));
        }
        if self.port == 0 {
            return Err(ModelError::InvalidTarget("port must be 1-65535".into()));
        }
        Ok(())
    }
}

/// What a captured artifact blob represents. The engine does not parse the
/// blobs itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ArtifactKind {
    Certificate,
    Handshake,
    Capture,
    Other,
}

/// Opaque blob captured by a recon collaborator.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub label: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            label: label.into(),
            bytes,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// An assessed endpoint plus whatever artifacts were captured from it.
/// Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Target {
    pub id: TargetId,
    pub descriptor: TargetDescriptor,
    #[cfg_attr(feature = "serde", serde(default))]
    pub artifacts: Vec<Artifact>,
}

impl Target {
    pub fn new(id: TargetId, descriptor: TargetDescriptor) -> Self {
        Self {
            id,
            descriptor,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_injection_in_hostnames() {
        assert!(TargetDescriptor::new("../etc/passwd", 443, Protocol::Tls).is_err());
        assert!(TargetDescriptor::new("host;reboot", 443, Protocol::Tls).is_err());
        assert!(TargetDescriptor::new("example.com", 0, Protocol::Tls).is_err());
        assert!(TargetDescriptor::new("example.com", 443, Protocol::Tls).is_ok());
        assert!(TargetDescriptor::new("::1", 22, Protocol::Ssh).is_ok());
    }

    #[test]
    fn debug_hides_artifact_bytes() {
        let artifact = Artifact::new(ArtifactKind::Handshake, "client-hello", vec![0xde; 64]);
        let rendered = format!("{artifact:?}");
        assert!(rendered.contains("len: 64"));
        assert!(!rendered.contains("222"));
    }
}
