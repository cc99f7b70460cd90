//! Session keys and the names of every shared resource derived from them

use crate::error::{ProbeError, Result};
use std::fmt;
use uuid::Uuid;

/// Default prefix of every shared resource name
pub const DEFAULT_PREFIX: &str = "venom_probe_";

/// Opaque per-run token namespacing all shared resources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Fresh key from a random UUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Accept a key handed over by the host (e.g. read from the environment)
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProbeError::InvalidKey(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of one shared resource within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRole {
    ControlBuffer,
    TelemetryBuffer,
    ControlRequest,
    ControlResponse,
    TelemetryRequest,
    TelemetryResponse,
    Doorbell,
}

impl ResourceRole {
    pub const ALL: [ResourceRole; 7] = [
        ResourceRole::ControlBuffer,
        ResourceRole::TelemetryBuffer,
        ResourceRole::ControlRequest,
        ResourceRole::ControlResponse,
        ResourceRole::TelemetryRequest,
        ResourceRole::TelemetryResponse,
        ResourceRole::Doorbell,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            ResourceRole::ControlBuffer => "ControlBuffer",
            ResourceRole::TelemetryBuffer => "TelemetryBuffer",
            ResourceRole::ControlRequest => "ControlRequest",
            ResourceRole::ControlResponse => "ControlResponse",
            ResourceRole::TelemetryRequest => "TelemetryRequest",
            ResourceRole::TelemetryResponse => "TelemetryResponse",
            ResourceRole::Doorbell => "Doorbell",
        }
    }
}

/// Name generator for one session's resources: `<prefix><role>_<key>`
#[derive(Debug, Clone)]
pub struct ResourceNames {
    prefix: String,
    key: SessionKey,
}

impl ResourceNames {
    pub fn new(prefix: impl Into<String>, key: SessionKey) -> Self {
        Self {
            prefix: prefix.into(),
            key,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn name(&self, role: ResourceRole) -> String {
        format!("{}{}_{}", self.prefix, role.suffix(), self.key)
    }

    /// Every name this session will create, in [`ResourceRole::ALL`] order
    pub fn all(&self) -> Vec<String> {
        ResourceRole::ALL.iter().map(|r| self.name(*r)).collect()
    }
}
