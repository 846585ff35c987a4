//! Shared API type definitions
//!
//! This crate contains the types exchanged between the arbiter daemon, its
//! client processes, and the reclaim transport: resource descriptions, policy
//! settings, and the IPC message envelopes.

use serde::Deserialize;
use serde::Serialize;

/// Client identity, unique across the service lifetime, chosen by the caller
/// at registration.
pub type ClientId = i64;

/// Kinds of scarce media resources tracked by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Secure codec instance
    SecureCodec,
    /// Non-secure codec instance
    NonSecureCodec,
    /// Graphics memory, in bytes
    GraphicMemory,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::SecureCodec => write!(f, "secure-codec"),
            ResourceKind::NonSecureCodec => write!(f, "non-secure-codec"),
            ResourceKind::GraphicMemory => write!(f, "graphic-memory"),
        }
    }
}

/// A typed quantity held by a client: instance count for codecs, bytes for
/// graphic memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResource {
    pub kind: ResourceKind,
    pub value: u64,
}

impl MediaResource {
    pub fn new(kind: ResourceKind, value: u64) -> Self {
        Self { kind, value }
    }
}

impl std::fmt::Display for MediaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Whether two or more secure codecs may coexist on the host.
pub const POLICY_SUPPORTS_MULTIPLE_SECURE_CODECS: &str = "supports-multiple-secure-codecs";

/// Whether a secure codec may coexist with a non-secure codec.
pub const POLICY_SUPPORTS_SECURE_WITH_NON_SECURE_CODEC: &str =
    "supports-secure-with-non-secure-codec";

/// A single policy setting. The value is interpreted as a boolean, non-zero
/// meaning enabled. Unrecognized keys are ignored by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyItem {
    pub key: String,
    pub value: u64,
}

impl PolicyItem {
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl std::fmt::Display for PolicyItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Request sent by a client process to the arbiter daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArbiterRequest {
    /// Update policy flags
    Config { policies: Vec<PolicyItem> },
    /// Register resources held by a client of the sending process
    AddResource {
        pid: u32,
        client_id: ClientId,
        resources: Vec<MediaResource>,
    },
    /// Drop every record registered under the client id
    RemoveResource { client_id: ClientId },
    /// Ask the arbiter to reclaim the listed resources from other holders
    ReclaimResource {
        calling_pid: u32,
        resources: Vec<MediaResource>,
    },
}

/// Message from a client process to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// A service request with its correlation id
    Request { id: u64, request: ArbiterRequest },
    /// Reply to a reclaim callback previously sent by the daemon
    ReclaimReply { id: u64, success: bool },
}

/// Message from the daemon to a client process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Outcome of a request; `success` is only meaningful for reclaim
    Response { id: u64, success: bool },
    /// Ask the client to release whatever it holds
    Reclaim { id: u64 },
}
