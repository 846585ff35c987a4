use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use api_types::{ClientId, MediaResource, PolicyItem, ResourceKind};
use reclaim::ipc::{ArbiterClient, IpcArbiterServer};
use reclaim::{ArbiterService, ReclaimClient, ReclaimHandler};

/// A test service that records calls and reclaims from every stored handle.
struct MockService {
    config_calls: Mutex<Vec<Vec<PolicyItem>>>,
    added: Mutex<Vec<(u32, ClientId, Vec<MediaResource>)>>,
    removed: Mutex<Vec<ClientId>>,
    handles: Mutex<HashMap<ClientId, Arc<dyn ReclaimClient>>>,
}

impl MockService {
    fn new() -> Self {
        Self {
            config_calls: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }
}

impl ArbiterService for MockService {
    fn config(&self, policies: &[PolicyItem]) {
        self.config_calls.lock().unwrap().push(policies.to_vec());
    }

    fn add_resource(
        &self,
        pid: u32,
        client_id: ClientId,
        client: Arc<dyn ReclaimClient>,
        resources: &[MediaResource],
    ) {
        self.handles.lock().unwrap().insert(client_id, client);
        self.added
            .lock()
            .unwrap()
            .push((pid, client_id, resources.to_vec()));
    }

    fn remove_resource(&self, client_id: ClientId) {
        self.handles.lock().unwrap().remove(&client_id);
        self.removed.lock().unwrap().push(client_id);
    }

    fn reclaim_resource(&self, _calling_pid: u32, _resources: &[MediaResource]) -> bool {
        let handles: Vec<Arc<dyn ReclaimClient>> =
            self.handles.lock().unwrap().values().cloned().collect();
        if handles.is_empty() {
            return false;
        }
        handles.iter().all(|handle| handle.reclaim_resources())
    }
}

/// A reclaim handler with a configurable outcome and a call counter.
struct TestHandler {
    succeed: bool,
    calls: Mutex<u32>,
}

impl TestHandler {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ReclaimHandler for TestHandler {
    fn reclaim(&self) -> bool {
        *self.calls.lock().unwrap() += 1;
        self.succeed
    }
}

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("arbiter-ipc-{}-{}", std::process::id(), name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Connect a client to the server, driving the server's accept scan until the
/// handshake completes.
fn connect_client(
    dir: &Path,
    server: &IpcArbiterServer<MockService>,
    handler: Arc<dyn ReclaimHandler>,
) -> ArbiterClient {
    let client_dir = dir.to_path_buf();
    let join = thread::spawn(move || ArbiterClient::connect(&client_dir, handler).unwrap());

    let mut connected = false;
    for _ in 0..500 {
        if server.scan_clients().unwrap() > 0 {
            connected = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(connected, "client never connected to the server");

    join.join().unwrap()
}

#[test]
fn test_request_round_trips() {
    let dir = test_dir("round-trips");
    let service = Arc::new(MockService::new());
    let server = IpcArbiterServer::new(Arc::clone(&service), &dir);

    let client = connect_client(&dir, &server, Arc::new(TestHandler::new(true)));

    client
        .config(vec![PolicyItem::new("supports-multiple-secure-codecs", 0)])
        .unwrap();
    client
        .add_resource(
            4001,
            7,
            vec![MediaResource::new(ResourceKind::SecureCodec, 1)],
        )
        .unwrap();
    client.remove_resource(7).unwrap();

    assert_eq!(service.config_calls.lock().unwrap().len(), 1);
    assert_eq!(
        service.added.lock().unwrap().as_slice(),
        &[(
            4001,
            7,
            vec![MediaResource::new(ResourceKind::SecureCodec, 1)]
        )]
    );
    assert_eq!(service.removed.lock().unwrap().as_slice(), &[7]);
}

#[test]
fn test_addr_file_removed_after_connect() {
    let dir = test_dir("addr-cleanup");
    let service = Arc::new(MockService::new());
    let server = IpcArbiterServer::new(Arc::clone(&service), &dir);

    let _client = connect_client(&dir, &server, Arc::new(TestHandler::new(true)));

    let leftovers: Vec<_> = fs::read_dir(&dir).unwrap().collect();
    assert!(leftovers.is_empty(), "address file should have been removed");
}

#[test]
fn test_reclaim_invokes_registered_handler() {
    let dir = test_dir("reclaim-callback");
    let service = Arc::new(MockService::new());
    let server = IpcArbiterServer::new(Arc::clone(&service), &dir);

    let handler = Arc::new(TestHandler::new(true));
    let client = connect_client(&dir, &server, handler.clone());

    client
        .add_resource(
            4002,
            11,
            vec![MediaResource::new(ResourceKind::GraphicMemory, 1 << 20)],
        )
        .unwrap();
    assert_eq!(service.added_count(), 1);

    // The stored handle round-trips back into this process's handler.
    let reclaimed = client
        .reclaim_resource(
            4003,
            vec![MediaResource::new(ResourceKind::GraphicMemory, 1 << 10)],
        )
        .unwrap();

    assert!(reclaimed);
    assert_eq!(handler.calls(), 1);
}

#[test]
fn test_reclaim_failure_propagates() {
    let dir = test_dir("reclaim-failure");
    let service = Arc::new(MockService::new());
    let server = IpcArbiterServer::new(Arc::clone(&service), &dir);

    let handler = Arc::new(TestHandler::new(false));
    let client = connect_client(&dir, &server, handler.clone());

    client
        .add_resource(
            4004,
            21,
            vec![MediaResource::new(ResourceKind::GraphicMemory, 2048)],
        )
        .unwrap();

    let reclaimed = client
        .reclaim_resource(
            4005,
            vec![MediaResource::new(ResourceKind::GraphicMemory, 1024)],
        )
        .unwrap();

    assert!(!reclaimed);
    assert_eq!(handler.calls(), 1);
}

#[test]
fn test_two_clients_reclaim_across_processes() {
    let dir = test_dir("two-clients");
    let service = Arc::new(MockService::new());
    let server = IpcArbiterServer::new(Arc::clone(&service), &dir);

    let victim_handler = Arc::new(TestHandler::new(true));
    let victim = connect_client(&dir, &server, victim_handler.clone());
    victim
        .add_resource(
            5001,
            31,
            vec![MediaResource::new(ResourceKind::SecureCodec, 1)],
        )
        .unwrap();

    let requester_handler = Arc::new(TestHandler::new(true));
    let requester = connect_client(&dir, &server, requester_handler.clone());

    let reclaimed = requester
        .reclaim_resource(
            5002,
            vec![MediaResource::new(ResourceKind::SecureCodec, 1)],
        )
        .unwrap();

    assert!(reclaimed);
    assert_eq!(victim_handler.calls(), 1);
    assert_eq!(requester_handler.calls(), 0);
}
