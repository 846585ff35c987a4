//! Registry of which client in which process holds which resources.
//!
//! Backed by vectors rather than hash maps: selection tie-breaks are defined
//! by registration order, so iteration must be stable across runs.

use std::sync::Arc;

use api_types::{ClientId, MediaResource, ResourceKind};
use reclaim::ReclaimClient;

/// Holdings registered by a single client. The resource sequence mirrors
/// exactly what was registered; repeated registrations append.
pub(crate) struct ResourceInfo {
    pub(crate) client_id: ClientId,
    pub(crate) client: Arc<dyn ReclaimClient>,
    pub(crate) resources: Vec<MediaResource>,
}

/// All clients registered under one process id, in registration order.
pub(crate) struct ProcessEntry {
    pub(crate) pid: u32,
    pub(crate) infos: Vec<ResourceInfo>,
}

impl ProcessEntry {
    pub(crate) fn holds_kind(&self, kind: ResourceKind) -> bool {
        self.infos
            .iter()
            .any(|info| has_kind(kind, &info.resources))
    }
}

pub(crate) fn has_kind(kind: ResourceKind, resources: &[MediaResource]) -> bool {
    resources.iter().any(|resource| resource.kind == kind)
}

/// Counts reported by [`Registry::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub processes: usize,
    pub clients: usize,
    pub resources: usize,
}

/// The pid -> clients map. Entries are never reordered; a pid entry emptied
/// by client removal stays in place and is skipped during selection.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<ProcessEntry>,
}

impl Registry {
    pub(crate) fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    /// The client list for `pid`, creating an empty entry on first use.
    pub(crate) fn infos_for_edit(&mut self, pid: u32) -> &mut Vec<ResourceInfo> {
        if let Some(index) = self.entries.iter().position(|entry| entry.pid == pid) {
            &mut self.entries[index].infos
        } else {
            self.entries.push(ProcessEntry {
                pid,
                infos: Vec::new(),
            });
            &mut self.entries.last_mut().expect("just pushed").infos
        }
    }

    /// Remove every record with this id inside the first process entry that
    /// contains it. Returns false when no entry matched.
    pub(crate) fn remove_client(&mut self, client_id: ClientId) -> bool {
        for entry in &mut self.entries {
            let before = entry.infos.len();
            entry.infos.retain(|info| info.client_id != client_id);
            if entry.infos.len() != before {
                return true;
            }
        }
        false
    }

    pub(crate) fn retain_entries<F>(&mut self, keep: F)
    where
        F: FnMut(&ProcessEntry) -> bool,
    {
        self.entries.retain(keep);
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        RegistryStats {
            processes: self.entries.len(),
            clients: self.entries.iter().map(|entry| entry.infos.len()).sum(),
            resources: self
                .entries
                .iter()
                .flat_map(|entry| entry.infos.iter())
                .map(|info| info.resources.len())
                .sum(),
        }
    }
}

/// The record for `client_id` within one process entry, created with the
/// supplied handle on first use. The handle of an existing record is kept.
pub(crate) fn info_for_edit<'a>(
    infos: &'a mut Vec<ResourceInfo>,
    client_id: ClientId,
    client: Arc<dyn ReclaimClient>,
) -> &'a mut ResourceInfo {
    if let Some(index) = infos.iter().position(|info| info.client_id == client_id) {
        &mut infos[index]
    } else {
        infos.push(ResourceInfo {
            client_id,
            client,
            resources: Vec::new(),
        });
        infos.last_mut().expect("just pushed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim::dummy::DummyClient;

    fn resource(kind: ResourceKind, value: u64) -> MediaResource {
        MediaResource::new(kind, value)
    }

    fn add(registry: &mut Registry, pid: u32, client_id: ClientId, resources: &[MediaResource]) {
        let infos = registry.infos_for_edit(pid);
        let info = info_for_edit(infos, client_id, Arc::new(DummyClient));
        info.resources.extend_from_slice(resources);
    }

    #[test]
    fn test_add_accumulates_in_registration_order() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::SecureCodec, 1)],
        );
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::GraphicMemory, 2048)],
        );

        let entry = &registry.entries()[0];
        assert_eq!(entry.pid, 100);
        assert_eq!(entry.infos.len(), 1);
        assert_eq!(
            entry.infos[0].resources,
            vec![
                resource(ResourceKind::SecureCodec, 1),
                resource(ResourceKind::GraphicMemory, 2048),
            ]
        );
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            300,
            1,
            &[resource(ResourceKind::SecureCodec, 1)],
        );
        add(
            &mut registry,
            100,
            2,
            &[resource(ResourceKind::SecureCodec, 1)],
        );
        add(
            &mut registry,
            200,
            3,
            &[resource(ResourceKind::SecureCodec, 1)],
        );

        let pids: Vec<u32> = registry.entries().iter().map(|entry| entry.pid).collect();
        assert_eq!(pids, vec![300, 100, 200]);
    }

    #[test]
    fn test_remove_client_leaves_empty_entry() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::SecureCodec, 1)],
        );

        assert!(registry.remove_client(1));
        assert_eq!(registry.entries().len(), 1);
        assert!(registry.entries()[0].infos.is_empty());
        assert_eq!(registry.stats().clients, 0);
    }

    #[test]
    fn test_remove_unknown_client_is_a_no_op() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::SecureCodec, 1)],
        );

        assert!(!registry.remove_client(42));
        assert_eq!(registry.stats().clients, 1);
    }

    #[test]
    fn test_remove_keeps_other_clients_of_same_process() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::SecureCodec, 1)],
        );
        add(
            &mut registry,
            100,
            2,
            &[resource(ResourceKind::NonSecureCodec, 1)],
        );

        assert!(registry.remove_client(1));
        let entry = &registry.entries()[0];
        assert_eq!(entry.infos.len(), 1);
        assert_eq!(entry.infos[0].client_id, 2);
    }

    #[test]
    fn test_holds_kind() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[resource(ResourceKind::GraphicMemory, 1024)],
        );

        let entry = &registry.entries()[0];
        assert!(entry.holds_kind(ResourceKind::GraphicMemory));
        assert!(!entry.holds_kind(ResourceKind::SecureCodec));
    }

    #[test]
    fn test_stats_counts() {
        let mut registry = Registry::default();
        add(
            &mut registry,
            100,
            1,
            &[
                resource(ResourceKind::SecureCodec, 1),
                resource(ResourceKind::GraphicMemory, 1024),
            ],
        );
        add(
            &mut registry,
            200,
            2,
            &[resource(ResourceKind::NonSecureCodec, 1)],
        );

        let stats = registry.stats();
        assert_eq!(stats.processes, 2);
        assert_eq!(stats.clients, 2);
        assert_eq!(stats.resources, 3);
    }
}
