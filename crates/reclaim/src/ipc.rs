//! IPC implementation of the arbiter service surface.
//!
//! Clients announce themselves by writing a one-shot server address file into
//! the daemon's socket directory; the daemon connects back and both sides
//! exchange their channel endpoints. Requests and reclaim callbacks travel as
//! [`ClientMessage`] / [`ServerMessage`] envelopes correlated by id.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;

use ipc_channel::ipc;
use ipc_channel::ipc::IpcOneShotServer;
use ipc_channel::ipc::IpcReceiver;
use ipc_channel::ipc::IpcSender;

use api_types::ArbiterRequest;
use api_types::ClientId;
use api_types::ClientMessage;
use api_types::MediaResource;
use api_types::PolicyItem;
use api_types::ServerMessage;

use crate::ArbiterService;
use crate::ReclaimClient;
use crate::ReclaimError;
use crate::ReclaimHandler;

const ADDR_FILE_PREFIX: &str = "arbiter_client_";
const ADDR_FILE_SUFFIX: &str = ".addr";

/// Endpoints exchanged during the connection handshake: the client's request
/// sender and its end of the daemon-to-client channel.
type Handshake = (IpcSender<ClientMessage>, IpcReceiver<ServerMessage>);

/// A value waited on by one thread and supplied by the demux thread.
struct WaitSlot<T> {
    value: Option<T>,
}

type WaitPair<T> = Arc<(Mutex<WaitSlot<T>>, Condvar)>;

/// Correlation table for in-flight round-trips.
struct WaitTable<T> {
    slots: Mutex<HashMap<u64, WaitPair<T>>>,
    next_id: AtomicU64,
}

impl<T: Copy> WaitTable<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self) -> (u64, WaitPair<T>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pair: WaitPair<T> = Arc::new((Mutex::new(WaitSlot { value: None }), Condvar::new()));
        self.slots
            .lock()
            .expect("poisoned")
            .insert(id, Arc::clone(&pair));
        (id, pair)
    }

    fn forget(&self, id: u64) {
        self.slots.lock().expect("poisoned").remove(&id);
    }

    fn complete(&self, id: u64, value: T) {
        let maybe_pair = self.slots.lock().expect("poisoned").remove(&id);
        if let Some(pair) = maybe_pair {
            let (mutex, condvar) = &*pair;
            mutex.lock().expect("poisoned").value = Some(value);
            condvar.notify_one();
        }
    }

    /// Complete every in-flight slot with `value`. Used on disconnect.
    fn complete_all(&self, value: T) {
        let drained: Vec<WaitPair<T>> = self
            .slots
            .lock()
            .expect("poisoned")
            .drain()
            .map(|(_, pair)| pair)
            .collect();
        for pair in drained {
            let (mutex, condvar) = &*pair;
            mutex.lock().expect("poisoned").value = Some(value);
            condvar.notify_one();
        }
    }

    fn wait(pair: &WaitPair<T>) -> T {
        let (mutex, condvar) = &**pair;
        let mut slot = mutex.lock().expect("poisoned");
        while slot.value.is_none() {
            slot = condvar.wait(slot).expect("poisoned");
        }
        slot.value.take().expect("checked above")
    }
}

/// Server-side handle to one connected client process. `reclaim_resources`
/// performs a blocking round-trip to the client's reclaim handler.
#[derive(Clone)]
pub struct IpcClientHandle {
    pid: u32,
    // IpcSender is Send but not Sync; the handle is shared across threads.
    sender: Arc<Mutex<IpcSender<ServerMessage>>>,
    pending_reclaims: Arc<WaitTable<bool>>,
}

impl IpcClientHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn send(&self, message: ServerMessage) -> Result<(), ipc_channel::Error> {
        self.sender.lock().expect("poisoned").send(message)
    }
}

impl ReclaimClient for IpcClientHandle {
    fn reclaim_resources(&self) -> bool {
        let (id, pair) = self.pending_reclaims.register();
        if let Err(e) = self.send(ServerMessage::Reclaim { id }) {
            tracing::warn!("failed to send reclaim callback to pid {}: {}", self.pid, e);
            self.pending_reclaims.forget(id);
            return false;
        }
        WaitTable::wait(&pair)
    }
}

/// Daemon-side transport: accepts client connections from a socket directory
/// and routes their requests into the service.
pub struct IpcArbiterServer<S: ArbiterService + 'static> {
    service: Arc<S>,
    socket_dir: PathBuf,
}

impl<S: ArbiterService + 'static> IpcArbiterServer<S> {
    pub fn new(service: Arc<S>, socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            socket_dir: socket_dir.into(),
        }
    }

    /// Scan the socket directory for clients awaiting connection and connect
    /// each one. Returns the number of clients connected by this pass.
    pub fn scan_clients(&self) -> Result<usize, ReclaimError> {
        let mut connected = 0;
        for dir_entry in fs::read_dir(&self.socket_dir)? {
            let path = dir_entry?.path();
            let Some(pid) = addr_file_pid(&path) else {
                continue;
            };
            match self.accept_client(pid, &path) {
                Ok(()) => {
                    tracing::info!("client pid {} connected", pid);
                    connected += 1;
                }
                Err(e) => {
                    tracing::warn!("failed to connect client pid {}: {}", pid, e);
                }
            }
        }
        Ok(connected)
    }

    fn accept_client(&self, pid: u32, addr_file: &Path) -> Result<(), ReclaimError> {
        let server_name = fs::read_to_string(addr_file)?;
        // Remove the announcement so the next scan does not connect twice.
        let _ = fs::remove_file(addr_file);

        let bootstrap = IpcSender::connect(server_name)?;
        let (request_sender, request_receiver) = ipc::channel::<ClientMessage>()?;
        let (server_sender, server_receiver) = ipc::channel::<ServerMessage>()?;
        bootstrap.send((request_sender, server_receiver))?;

        let handle = IpcClientHandle {
            pid,
            sender: Arc::new(Mutex::new(server_sender)),
            pending_reclaims: Arc::new(WaitTable::new()),
        };
        let service = Arc::clone(&self.service);
        thread::spawn(move || client_loop(service, handle, request_receiver));
        Ok(())
    }
}

/// Demux loop for one connected client. Requests are dispatched on their own
/// threads so a blocked reclaim round-trip cannot stall reply routing.
fn client_loop<S: ArbiterService + 'static>(
    service: Arc<S>,
    handle: IpcClientHandle,
    receiver: IpcReceiver<ClientMessage>,
) {
    loop {
        match receiver.recv() {
            Ok(ClientMessage::Request { id, request }) => {
                let service = Arc::clone(&service);
                let handle = handle.clone();
                thread::spawn(move || {
                    let success = dispatch(&*service, &handle, request);
                    if let Err(e) = handle.send(ServerMessage::Response { id, success }) {
                        tracing::warn!("failed to respond to pid {}: {}", handle.pid, e);
                    }
                });
            }
            Ok(ClientMessage::ReclaimReply { id, success }) => {
                handle.pending_reclaims.complete(id, success);
            }
            Err(e) => {
                tracing::debug!("client pid {} disconnected: {:?}", handle.pid, e);
                // Anyone still waiting on this client sees a failed reclaim.
                handle.pending_reclaims.complete_all(false);
                break;
            }
        }
    }
}

fn dispatch<S: ArbiterService>(service: &S, handle: &IpcClientHandle, request: ArbiterRequest) -> bool {
    match request {
        ArbiterRequest::Config { policies } => {
            service.config(&policies);
            true
        }
        ArbiterRequest::AddResource {
            pid,
            client_id,
            resources,
        } => {
            service.add_resource(pid, client_id, Arc::new(handle.clone()), &resources);
            true
        }
        ArbiterRequest::RemoveResource { client_id } => {
            service.remove_resource(client_id);
            true
        }
        ArbiterRequest::ReclaimResource {
            calling_pid,
            resources,
        } => service.reclaim_resource(calling_pid, &resources),
    }
}

fn addr_file_pid(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(ADDR_FILE_PREFIX)?
        .strip_suffix(ADDR_FILE_SUFFIX)?
        .parse()
        .ok()
}

#[derive(Clone, Copy)]
enum RequestOutcome {
    Done(bool),
    Closed,
}

/// Client-process endpoint: issues requests to the daemon and serves reclaim
/// callbacks through the handler supplied at connect time.
pub struct ArbiterClient {
    // IpcSender is Send but not Sync; requests may come from any thread.
    sender: Mutex<IpcSender<ClientMessage>>,
    pending_requests: Arc<WaitTable<RequestOutcome>>,
}

impl ArbiterClient {
    /// Connect to the arbiter daemon watching `path`. Writes an address file
    /// named after this process id and blocks until the daemon picks it up.
    pub fn connect<P: AsRef<Path>>(
        path: P,
        handler: Arc<dyn ReclaimHandler>,
    ) -> Result<Self, ReclaimError> {
        let pid = std::process::id();
        let (one_shot, server_name) = IpcOneShotServer::<Handshake>::new()?;

        // Write-then-rename so the daemon's scan never sees a partial file.
        let filename = path
            .as_ref()
            .join(format!("{ADDR_FILE_PREFIX}{pid}{ADDR_FILE_SUFFIX}"));
        let staging = filename.with_extension("tmp");
        fs::write(&staging, server_name)?;
        fs::rename(&staging, &filename)?;

        let (_bootstrap_receiver, (sender, receiver)) = one_shot.accept()?;

        let pending_requests = Arc::new(WaitTable::<RequestOutcome>::new());
        let pending = Arc::clone(&pending_requests);
        let reply_sender = sender.clone();
        thread::spawn(move || {
            loop {
                match receiver.recv() {
                    Ok(ServerMessage::Response { id, success }) => {
                        pending.complete(id, RequestOutcome::Done(success));
                    }
                    Ok(ServerMessage::Reclaim { id }) => {
                        // The handler may call back into the arbiter, so it
                        // must not run on the demux thread.
                        let handler = Arc::clone(&handler);
                        let reply_sender = reply_sender.clone();
                        thread::spawn(move || {
                            let success = handler.reclaim();
                            if let Err(e) =
                                reply_sender.send(ClientMessage::ReclaimReply { id, success })
                            {
                                tracing::warn!("failed to send reclaim reply: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("arbiter connection closed: {:?}", e);
                        pending.complete_all(RequestOutcome::Closed);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sender: Mutex::new(sender),
            pending_requests,
        })
    }

    fn request(&self, request: ArbiterRequest) -> Result<bool, ReclaimError> {
        let (id, pair) = self.pending_requests.register();
        let send_result = self
            .sender
            .lock()
            .expect("poisoned")
            .send(ClientMessage::Request { id, request });
        if let Err(e) = send_result {
            self.pending_requests.forget(id);
            return Err(ReclaimError::Ipc(e));
        }
        match WaitTable::wait(&pair) {
            RequestOutcome::Done(success) => Ok(success),
            RequestOutcome::Closed => Err(ReclaimError::ConnectionClosed),
        }
    }

    pub fn config(&self, policies: Vec<PolicyItem>) -> Result<(), ReclaimError> {
        self.request(ArbiterRequest::Config { policies })?;
        Ok(())
    }

    pub fn add_resource(
        &self,
        pid: u32,
        client_id: ClientId,
        resources: Vec<MediaResource>,
    ) -> Result<(), ReclaimError> {
        self.request(ArbiterRequest::AddResource {
            pid,
            client_id,
            resources,
        })?;
        Ok(())
    }

    pub fn remove_resource(&self, client_id: ClientId) -> Result<(), ReclaimError> {
        self.request(ArbiterRequest::RemoveResource { client_id })?;
        Ok(())
    }

    pub fn reclaim_resource(
        &self,
        calling_pid: u32,
        resources: Vec<MediaResource>,
    ) -> Result<bool, ReclaimError> {
        self.request(ArbiterRequest::ReclaimResource {
            calling_pid,
            resources,
        })
    }
}
