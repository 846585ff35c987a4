//! Reclaim callback plumbing between the arbiter and its client processes.
//!
//! The arbiter core only sees [`ReclaimClient`] handles; the [`ipc`] module
//! provides the process-boundary implementation plus the matching client-side
//! endpoint.

pub mod dummy;
pub mod ipc;

use std::sync::Arc;

use api_types::{ClientId, MediaResource, PolicyItem};
use thiserror::Error;

/// Handle to a registered client, usable to ask it to release its resources.
pub trait ReclaimClient: Send + Sync {
    /// Ask the client to release whatever it holds. Returns true iff the
    /// client acted on the request.
    fn reclaim_resources(&self) -> bool;
}

impl<T> ReclaimClient for Arc<T>
where
    T: ReclaimClient + Send + Sync + ?Sized,
{
    fn reclaim_resources(&self) -> bool {
        ReclaimClient::reclaim_resources(&**self)
    }
}

/// Client-process hook invoked when the arbiter asks this process to release
/// resources.
pub trait ReclaimHandler: Send + Sync {
    /// Release whatever can be released; true iff the request was acted on.
    fn reclaim(&self) -> bool;
}

/// Operations the transport routes into the resource arbitration service.
pub trait ArbiterService: Send + Sync {
    fn config(&self, policies: &[PolicyItem]);

    fn add_resource(
        &self,
        pid: u32,
        client_id: ClientId,
        client: Arc<dyn ReclaimClient>,
        resources: &[MediaResource],
    );

    fn remove_resource(&self, client_id: ClientId);

    fn reclaim_resource(&self, calling_pid: u32, resources: &[MediaResource]) -> bool;
}

#[derive(Error, Debug)]
pub enum ReclaimError {
    #[error("IPC error: {0}")]
    Ipc(#[from] ipc_channel::Error),
    #[error("IPC recv error: {0}")]
    IpcRecv(#[from] ipc_channel::ipc::IpcError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arbiter connection closed")]
    ConnectionClosed,
}
