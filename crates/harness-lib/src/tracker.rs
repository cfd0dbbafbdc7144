//! Resource tracking and deterministic teardown
//!
//! Every container and network the harness creates is registered here. A
//! resource leaves the registry only once its disposition is final, so a
//! teardown cut short by an interrupt leaves the rest for the next pass.

use crate::error::RuntimeError;
use crate::models::{ManagedResource, ResourceKind, ResourceStatus};
use crate::runtime::{ContainerRuntime, PruneReport, RunState};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal disposition of one tracked resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Stopped (if needed) and removed by the tracker
    Removed,
    /// The runtime no longer knew the resource
    AlreadyGone,
    /// Stop or remove failed; the prune pass is responsible for it
    LeftForPrune(String),
}

/// Result of a cleanup or release pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub entries: Vec<(ManagedResource, Disposition)>,
    pub pruned: Option<PruneReport>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of resources the tracker could not remove itself
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| matches!(d, Disposition::LeftForPrune(_)))
            .count()
    }
}

#[derive(Debug, Default)]
struct Registry {
    containers: Vec<ManagedResource>,
    networks: Vec<ManagedResource>,
}

/// Registry of runtime resources created during a benchmark run
pub struct ResourceTracker {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Mutex<Registry>,
    stop_grace: Duration,
}

impl ResourceTracker {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, stop_grace: Duration) -> Self {
        Self {
            runtime,
            registry: Mutex::new(Registry::default()),
            stop_grace,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the vectors half-updated
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a resource for later cleanup
    pub fn track(&self, resource: ManagedResource) -> ManagedResource {
        debug!(
            kind = %resource.kind,
            id = %resource.short_id(),
            name = %resource.name,
            "Tracking resource"
        );
        let mut registry = self.registry();
        match resource.kind {
            ResourceKind::Container => registry.containers.push(resource.clone()),
            ResourceKind::Network => registry.networks.push(resource.clone()),
        }
        resource
    }

    /// Snapshot of everything currently tracked
    pub fn tracked(&self) -> Vec<ManagedResource> {
        let registry = self.registry();
        registry
            .containers
            .iter()
            .chain(registry.networks.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        let registry = self.registry();
        registry.containers.len() + registry.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down a subset of tracked containers, e.g. one engine's roles
    pub async fn release(&self, ids: &[String]) -> CleanupReport {
        let containers: Vec<ManagedResource> = self
            .registry()
            .containers
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();

        let mut report = CleanupReport::default();
        for resource in containers.into_iter().rev() {
            let disposition = self.dispose_container(&resource).await;
            self.forget(&resource);
            report.entries.push((settle(resource, &disposition), disposition));
        }
        report
    }

    /// Tear down everything tracked, then prune what the registry missed
    ///
    /// Never fails: each resource's error is logged and recorded in the report.
    /// The prune runs even when nothing is tracked.
    pub async fn cleanup(&self) -> CleanupReport {
        let (containers, networks) = {
            let registry = self.registry();
            (registry.containers.clone(), registry.networks.clone())
        };

        let mut report = CleanupReport::default();

        if containers.is_empty() && networks.is_empty() {
            debug!("Nothing tracked, pruning only");
        } else {
            info!(
                containers = containers.len(),
                networks = networks.len(),
                "Starting cleanup"
            );
        }

        // Newest first so engines go before the broker they depend on
        for resource in containers.into_iter().rev() {
            let disposition = self.dispose_container(&resource).await;
            self.forget(&resource);
            report.entries.push((settle(resource, &disposition), disposition));
        }

        for resource in networks.into_iter().rev() {
            let disposition = self.dispose_network(&resource).await;
            self.forget(&resource);
            report.entries.push((settle(resource, &disposition), disposition));
        }

        match self.runtime.prune().await {
            Ok(pruned) => {
                info!(
                    containers = pruned.containers,
                    networks = pruned.networks,
                    volumes = pruned.volumes,
                    "Pruned unused resources"
                );
                report.pruned = Some(pruned);
            }
            Err(e) => warn!(error = %e, "Failed to prune resources"),
        }

        info!(
            disposed = report.entries.len(),
            failures = report.failures(),
            "Cleanup complete"
        );
        report
    }

    /// Drop a resource whose disposition is final
    fn forget(&self, resource: &ManagedResource) {
        let mut guard = self.registry();
        let registry = &mut *guard;
        let list = match resource.kind {
            ResourceKind::Container => &mut registry.containers,
            ResourceKind::Network => &mut registry.networks,
        };
        list.retain(|r| r.id != resource.id);
    }

    async fn dispose_container(&self, resource: &ManagedResource) -> Disposition {
        match self.runtime.inspect_container(&resource.id).await {
            Ok(snapshot) => {
                if snapshot.status().needs_stop() || snapshot.state == RunState::Restarting {
                    match self.runtime.stop_container(&resource.id, self.stop_grace).await {
                        Ok(()) => info!(name = %resource.name, "Stopped container"),
                        Err(e) if e.is_not_found() => {
                            debug!(name = %resource.name, "Container already removed");
                            return Disposition::AlreadyGone;
                        }
                        Err(e) => {
                            warn!(name = %resource.name, error = %e, "Failed to stop container")
                        }
                    }
                } else {
                    debug!(name = %resource.name, state = ?snapshot.state, "Container already stopped");
                }
            }
            Err(e) if e.is_not_found() => {
                debug!(name = %resource.name, "Container already removed");
                return Disposition::AlreadyGone;
            }
            Err(e) => warn!(name = %resource.name, error = %e, "Failed to inspect container"),
        }

        removal(
            resource,
            self.runtime.remove_container(&resource.id).await,
        )
    }

    async fn dispose_network(&self, resource: &ManagedResource) -> Disposition {
        removal(resource, self.runtime.remove_network(&resource.id).await)
    }
}

fn removal(resource: &ManagedResource, result: Result<(), RuntimeError>) -> Disposition {
    match result {
        Ok(()) => {
            debug!(kind = %resource.kind, name = %resource.name, "Removed resource");
            Disposition::Removed
        }
        Err(e) if e.is_not_found() => {
            debug!(kind = %resource.kind, name = %resource.name, "Resource already removed");
            Disposition::AlreadyGone
        }
        Err(e) => {
            warn!(kind = %resource.kind, name = %resource.name, error = %e, "Failed to remove resource");
            Disposition::LeftForPrune(e.to_string())
        }
    }
}

fn settle(mut resource: ManagedResource, disposition: &Disposition) -> ManagedResource {
    if !matches!(disposition, Disposition::LeftForPrune(_)) {
        resource.status = ResourceStatus::Removed;
    }
    resource
}
