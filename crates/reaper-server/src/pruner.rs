//! Resource plan computation and execution.
//!
//! The pruner runs once per prune check: it enumerates the resources matching
//! the filter snapshot, refuses anything created after the prune began, and
//! on execution deletes with bounded retries, containers first and images
//! last. Failures are collected, never propagated early, so cleanup stays
//! best effort.

use crate::error::ReaperError;
use chrono::{DateTime, Utc};
use reaper_core::{Config, Filter, REAPER_LABEL};
use reaper_runtime::{Resource, ResourceKind, RuntimeClient, RuntimeError};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

/// Wait between delete attempts within one kind.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// The identifiers selected for deletion in one prune pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResourcePlan {
    containers: Vec<String>,
    networks: Vec<String>,
    volumes: Vec<String>,
    images: Vec<String>,
}

impl ResourcePlan {
    fn kind_mut(&mut self, kind: ResourceKind) -> &mut Vec<String> {
        match kind {
            ResourceKind::Container => &mut self.containers,
            ResourceKind::Network => &mut self.networks,
            ResourceKind::Volume => &mut self.volumes,
            ResourceKind::Image => &mut self.images,
        }
    }
}

/// Enumerates matching resources and removes them with bounded retries.
#[derive(Clone)]
pub(crate) struct Pruner {
    cfg: Config,
    client: Arc<dyn RuntimeClient>,
}

impl Pruner {
    pub(crate) const fn new(cfg: Config, client: Arc<dyn RuntimeClient>) -> Self {
        Self { cfg, client }
    }

    /// Computes the plan for `filters`, excluding resources created after
    /// `since`. Listing failures and change detections are collected; they
    /// never abort the remaining kinds or filters.
    pub(crate) async fn plan(
        &self,
        since: DateTime<Utc>,
        filters: &[Filter],
    ) -> (ResourcePlan, Vec<ReaperError>) {
        let mut plan = ResourcePlan::default();
        let mut errors = Vec::new();

        for filter in filters {
            for kind in ResourceKind::ORDERED {
                match self.affected(kind, since, filter).await {
                    Ok((ids, changes)) => {
                        errors.extend(changes);
                        plan.kind_mut(kind).extend(ids);
                    }
                    Err(err) => {
                        error!(resource = %kind, error = %err, "list");
                        errors.push(err);
                    }
                }
            }
        }

        (plan, errors)
    }

    /// Lists one kind for one filter and splits the result into removable
    /// identifiers and change-detected errors.
    async fn affected(
        &self,
        kind: ResourceKind,
        since: DateTime<Utc>,
        filter: &Filter,
    ) -> Result<(Vec<String>, Vec<ReaperError>), ReaperError> {
        debug!(resource = %kind, filter = %filter.canonical(), "listing");
        let listed = self
            .bounded(kind, self.list(kind, filter))
            .await
            .map_err(|source| ReaperError::List { kind, source })?;

        let mut ids = Vec::with_capacity(listed.len());
        let mut changes = Vec::new();
        for resource in listed {
            if kind == ResourceKind::Container && is_reaper_container(&resource) {
                debug!(id = %resource.id, "skipping reaper container");
                continue;
            }

            let changed = resource.created.is_some_and(|created| created > since);
            debug!(
                resource = %kind,
                id = %resource.id,
                created = ?resource.created,
                changed,
                since = %since,
                "found"
            );
            if changed {
                // Removing something created after the prune began could race
                // a client that is still connecting.
                changes.push(ReaperError::ChangesDetected {
                    kind,
                    id: resource.id,
                });
                continue;
            }

            ids.push(resource.id);
        }

        Ok((ids, changes))
    }

    /// Applies the plan in removal order and reports the outcome. Counts are
    /// logged; errors are returned for joining.
    pub(crate) async fn execute(&self, plan: ResourcePlan) -> Vec<ReaperError> {
        let mut errors = Vec::new();
        let mut containers = 0;
        let mut networks = 0;
        let mut volumes = 0;
        let mut images = 0;

        // Containers must go first.
        let batches = [
            (ResourceKind::Container, plan.containers, &mut containers),
            (ResourceKind::Network, plan.networks, &mut networks),
            (ResourceKind::Volume, plan.volumes, &mut volumes),
            (ResourceKind::Image, plan.images, &mut images),
        ];
        for (kind, ids, removed) in batches {
            if let Some(err) = self.remove_kind(kind, ids, removed).await {
                errors.push(err);
            }
        }

        info!(containers, networks, volumes, images, "removed");
        errors
    }

    /// Removes every identifier of one kind, retrying transient failures up
    /// to the configured budget with a fixed delay between attempts.
    async fn remove_kind(
        &self,
        kind: ResourceKind,
        ids: Vec<String>,
        removed: &mut usize,
    ) -> Option<ReaperError> {
        debug!(resource = %kind, count = ids.len(), "removing");
        if ids.is_empty() {
            return None;
        }

        // Overlapping filters can select the same resource twice.
        let mut todo: BTreeSet<String> = ids.into_iter().collect();

        for attempt in 1..=self.cfg.remove_retries {
            let mut retry = false;
            for id in todo.clone() {
                debug!(resource = %kind, id = %id, attempt, "remove");
                match self.bounded(kind, self.remove_one(kind, &id)).await {
                    Ok(count) => {
                        todo.remove(&id);
                        *removed += count;
                    }
                    Err(err) if err.is_not_found() => {
                        // Already gone.
                        debug!(resource = %kind, id = %id, "not found");
                        todo.remove(&id);
                    }
                    Err(err) => {
                        error!(resource = %kind, id = %id, attempt, error = %err, "remove");
                        retry = true;
                    }
                }
            }

            if !retry {
                return None;
            }
            if attempt < self.cfg.remove_retries {
                sleep(RETRY_DELAY).await;
            }
        }

        if todo.is_empty() {
            None
        } else {
            Some(ReaperError::ResourcesLeft {
                kind,
                count: todo.len(),
            })
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> Result<Vec<Resource>, RuntimeError> {
        match kind {
            ResourceKind::Container => self.client.list_containers(filter).await,
            ResourceKind::Network => self.client.list_networks(filter).await,
            ResourceKind::Volume => self.client.list_volumes(filter).await,
            ResourceKind::Image => self.client.list_images(filter).await,
        }
    }

    /// Removes one resource and returns how many removals it counted for.
    /// Image removals are counted from the delete entries the runtime
    /// reports; everything else counts as one.
    async fn remove_one(&self, kind: ResourceKind, id: &str) -> Result<usize, RuntimeError> {
        match kind {
            ResourceKind::Container => self.client.remove_container(id).await.map(|()| 1),
            ResourceKind::Network => self.client.remove_network(id).await.map(|()| 1),
            ResourceKind::Volume => self.client.remove_volume(id).await.map(|()| 1),
            ResourceKind::Image => self
                .client
                .remove_image(id)
                .await
                .map(|deletions| deletions.iter().filter(|entry| entry.counts()).count()),
        }
    }

    /// Bounds a runtime call by the configured request timeout.
    async fn bounded<T>(
        &self,
        kind: ResourceKind,
        call: impl Future<Output = Result<T, RuntimeError>>,
    ) -> Result<T, RuntimeError> {
        timeout(self.cfg.request_timeout, call)
            .await
            .map_err(|_| RuntimeError::timeout(format!("{kind} request")))?
    }
}

fn is_reaper_container(resource: &Resource) -> bool {
    resource
        .labels
        .get(REAPER_LABEL)
        .is_some_and(|value| value == "true")
}
