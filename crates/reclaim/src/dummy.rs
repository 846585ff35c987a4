use crate::ReclaimClient;
use crate::ReclaimHandler;

/// Client handle that refuses every reclaim request.
pub struct DummyClient;

impl ReclaimClient for DummyClient {
    fn reclaim_resources(&self) -> bool {
        false
    }
}

impl ReclaimHandler for DummyClient {
    fn reclaim(&self) -> bool {
        false
    }
}
