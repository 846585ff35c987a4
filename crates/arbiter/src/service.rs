//! The resource arbiter: policy flags, registry mutation, and the reclaim
//! engine.
//!
//! All registry access is serialized by one mutex. `reclaim_resource` selects
//! its victims under the lock and invokes their callbacks after releasing it;
//! a victim that releases a codec will call straight back into
//! `remove_resource`, so the lock must never be held across a callback.

use std::sync::Arc;
use std::sync::Mutex;

use api_types::{
    ClientId, MediaResource, PolicyItem, ResourceKind, POLICY_SUPPORTS_MULTIPLE_SECURE_CODECS,
    POLICY_SUPPORTS_SECURE_WITH_NON_SECURE_CODEC,
};
use reclaim::{ArbiterService, ReclaimClient};

use crate::process_info::ProcessInfo;
use crate::registry::{self, has_kind, Registry, RegistryStats};

struct State {
    registry: Registry,
    supports_multiple_secure_codecs: bool,
    supports_secure_with_non_secure_codec: bool,
}

pub struct ResourceArbiter {
    process_info: Arc<dyn ProcessInfo>,
    state: Mutex<State>,
}

impl ResourceArbiter {
    /// A new arbiter with permissive policy defaults.
    pub fn new(process_info: Arc<dyn ProcessInfo>) -> Self {
        Self {
            process_info,
            state: Mutex::new(State {
                registry: Registry::default(),
                supports_multiple_secure_codecs: true,
                supports_secure_with_non_secure_codec: true,
            }),
        }
    }

    /// Update policy flags. Later items override earlier ones; unknown keys
    /// are ignored.
    pub fn config(&self, policies: &[PolicyItem]) {
        tracing::debug!("config([{}])", format_items(policies));

        let mut state = self.state.lock().expect("poisoned");
        for policy in policies {
            match policy.key.as_str() {
                POLICY_SUPPORTS_MULTIPLE_SECURE_CODECS => {
                    state.supports_multiple_secure_codecs = policy.value != 0;
                }
                POLICY_SUPPORTS_SECURE_WITH_NON_SECURE_CODEC => {
                    state.supports_secure_with_non_secure_codec = policy.value != 0;
                }
                other => {
                    tracing::debug!("ignoring unknown policy key {:?}", other);
                }
            }
        }
    }

    /// Register resources held by `client_id` in process `pid`. The handle is
    /// only used on first registration of the id; the stored one is kept
    /// afterwards.
    pub fn add_resource(
        &self,
        pid: u32,
        client_id: ClientId,
        client: Arc<dyn ReclaimClient>,
        resources: &[MediaResource],
    ) {
        tracing::debug!(
            "add_resource(pid {}, client {}, resources [{}])",
            pid,
            client_id,
            format_items(resources)
        );

        let mut state = self.state.lock().expect("poisoned");
        let infos = state.registry.infos_for_edit(pid);
        let info = registry::info_for_edit(infos, client_id, client);
        info.resources.extend_from_slice(resources);
    }

    /// Drop every record registered under `client_id`.
    pub fn remove_resource(&self, client_id: ClientId) {
        tracing::debug!("remove_resource({})", client_id);

        let mut state = self.state.lock().expect("poisoned");
        if !state.registry.remove_client(client_id) {
            tracing::debug!("no client {} registered", client_id);
        }
    }

    /// Reclaim the requested resources on behalf of `calling_pid`. Returns
    /// true iff at least one victim was asked and every victim complied.
    pub fn reclaim_resource(&self, calling_pid: u32, resources: &[MediaResource]) -> bool {
        tracing::debug!(
            "reclaim_resource(calling pid {}, resources [{}])",
            calling_pid,
            format_items(resources)
        );

        let mut victims: Vec<Arc<dyn ReclaimClient>> = Vec::new();
        {
            let state = self.state.lock().expect("poisoned");

            // First pass: secure/non-secure codec conflicts. A conflict
            // requires evicting every conflicting holder, however many.
            for resource in resources {
                match resource.kind {
                    ResourceKind::SecureCodec => {
                        if !state.supports_multiple_secure_codecs
                            && !self.collect_all_holders(
                                &state,
                                calling_pid,
                                ResourceKind::SecureCodec,
                                &mut victims,
                            )
                        {
                            return false;
                        }
                        if !state.supports_secure_with_non_secure_codec
                            && !self.collect_all_holders(
                                &state,
                                calling_pid,
                                ResourceKind::NonSecureCodec,
                                &mut victims,
                            )
                        {
                            return false;
                        }
                    }
                    ResourceKind::NonSecureCodec => {
                        if !state.supports_secure_with_non_secure_codec
                            && !self.collect_all_holders(
                                &state,
                                calling_pid,
                                ResourceKind::SecureCodec,
                                &mut victims,
                            )
                        {
                            return false;
                        }
                    }
                    _ => {}
                }
            }

            // Second pass, only when no policy conflict applied: one victim
            // per requested resource with a pressure rule.
            if victims.is_empty() {
                for resource in resources {
                    if resource.kind == ResourceKind::GraphicMemory {
                        match self.lowest_priority_biggest_client(
                            &state,
                            calling_pid,
                            resource.kind,
                        ) {
                            Some(client) => victims.push(client),
                            None => return false,
                        }
                    }
                }
            }
        }

        if victims.is_empty() {
            return false;
        }

        for victim in &victims {
            if !victim.reclaim_resources() {
                tracing::warn!("a victim refused to reclaim, giving up");
                return false;
            }
        }
        true
    }

    /// Drop process entries that are empty or whose priority can no longer be
    /// read. Selection never depends on this having run.
    pub fn prune_dead_processes(&self) {
        let mut state = self.state.lock().expect("poisoned");
        let process_info = &self.process_info;
        state.registry.retain_entries(|entry| {
            if entry.infos.is_empty() {
                tracing::debug!("pruning empty entry for pid {}", entry.pid);
                return false;
            }
            if process_info.priority(entry.pid).is_none() {
                tracing::info!("pruning pid {} with unreadable priority", entry.pid);
                return false;
            }
            true
        });
    }

    pub fn stats(&self) -> RegistryStats {
        self.state.lock().expect("poisoned").registry.stats()
    }

    /// Append every holder of `kind` to `victims`. Fails when any holder the
    /// oracle can rate is at equal or higher priority than the caller, or
    /// when a holder exists but the caller itself cannot be rated. Holders
    /// the oracle cannot rate are invisible: neither victims nor blockers.
    fn collect_all_holders(
        &self,
        state: &State,
        calling_pid: u32,
        kind: ResourceKind,
        victims: &mut Vec<Arc<dyn ReclaimClient>>,
    ) -> bool {
        let mut calling_priority: Option<i32> = None;
        let mut matched: Vec<Arc<dyn ReclaimClient>> = Vec::new();

        for entry in state.registry.entries() {
            if !entry.holds_kind(kind) {
                continue;
            }
            let Some(priority) = self.process_info.priority(entry.pid) else {
                tracing::debug!("cannot get priority of pid {}, skipped", entry.pid);
                continue;
            };
            let caller = match calling_priority {
                Some(p) => p,
                None => match self.process_info.priority(calling_pid) {
                    Some(p) => {
                        calling_priority = Some(p);
                        p
                    }
                    None => {
                        tracing::warn!(
                            "cannot get process priority for calling pid {}",
                            calling_pid
                        );
                        return false;
                    }
                },
            };
            if caller >= priority {
                tracing::error!(
                    "cannot reclaim {} from pid {} at priority {}",
                    kind,
                    entry.pid,
                    priority
                );
                return false;
            }
            for info in &entry.infos {
                if has_kind(kind, &info.resources) {
                    matched.push(Arc::clone(&info.client));
                }
            }
        }

        if matched.is_empty() {
            tracing::debug!("no holders of {}", kind);
        }
        victims.append(&mut matched);
        true
    }

    /// The biggest consumer of `kind` within the lowest-priority process that
    /// holds any, provided that process is strictly lower priority than the
    /// caller.
    fn lowest_priority_biggest_client(
        &self,
        state: &State,
        calling_pid: u32,
        kind: ResourceKind,
    ) -> Option<Arc<dyn ReclaimClient>> {
        let Some(calling_priority) = self.process_info.priority(calling_pid) else {
            tracing::error!("cannot get process priority for calling pid {}", calling_pid);
            return None;
        };
        let (pid, priority) = self.lowest_priority_pid(state, kind)?;
        if priority <= calling_priority {
            tracing::error!(
                "lowest priority {} vs calling priority {}, cannot reclaim {}",
                priority,
                calling_priority,
                kind
            );
            return None;
        }
        self.biggest_client(state, pid, kind)
    }

    /// The pid with the numerically greatest priority among processes holding
    /// `kind`. First encountered wins on ties; unratable pids are skipped.
    fn lowest_priority_pid(&self, state: &State, kind: ResourceKind) -> Option<(u32, i32)> {
        let mut lowest: Option<(u32, i32)> = None;
        for entry in state.registry.entries() {
            if entry.infos.is_empty() || !entry.holds_kind(kind) {
                continue;
            }
            let Some(priority) = self.process_info.priority(entry.pid) else {
                tracing::debug!("cannot get priority of pid {}, skipped", entry.pid);
                continue;
            };
            if lowest.map_or(true, |(_, p)| priority > p) {
                lowest = Some((entry.pid, priority));
            }
        }
        if lowest.is_none() {
            tracing::debug!("no process holds {}", kind);
        }
        lowest
    }

    /// The client in `pid` whose single largest resource of `kind` is
    /// maximal. Only a strictly greater value displaces the running winner,
    /// so equal-valued later clients lose to earlier ones.
    fn biggest_client(
        &self,
        state: &State,
        pid: u32,
        kind: ResourceKind,
    ) -> Option<Arc<dyn ReclaimClient>> {
        let Some(entry) = state.registry.entries().iter().find(|entry| entry.pid == pid) else {
            tracing::error!("no resource entry for pid {}", pid);
            return None;
        };

        let mut largest = 0u64;
        let mut client: Option<Arc<dyn ReclaimClient>> = None;
        for info in &entry.infos {
            for resource in &info.resources {
                if resource.kind == kind && resource.value > largest {
                    largest = resource.value;
                    client = Some(Arc::clone(&info.client));
                }
            }
        }

        if client.is_none() {
            tracing::error!("cannot find resource {} on pid {}", kind, pid);
        }
        client
    }
}

impl ArbiterService for ResourceArbiter {
    fn config(&self, policies: &[PolicyItem]) {
        ResourceArbiter::config(self, policies);
    }

    fn add_resource(
        &self,
        pid: u32,
        client_id: ClientId,
        client: Arc<dyn ReclaimClient>,
        resources: &[MediaResource],
    ) {
        ResourceArbiter::add_resource(self, pid, client_id, client, resources);
    }

    fn remove_resource(&self, client_id: ClientId) {
        ResourceArbiter::remove_resource(self, client_id);
    }

    fn reclaim_resource(&self, calling_pid: u32, resources: &[MediaResource]) -> bool {
        ResourceArbiter::reclaim_resource(self, calling_pid, resources)
    }
}

fn format_items<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
