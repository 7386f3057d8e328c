//! Shared test support: a scripted runtime client the reaper runs against.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reaper_core::Filter;
use reaper_runtime::{ImageDeletion, Resource, ResourceKind, Result, RuntimeClient, RuntimeError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Builds a resource created `age` ago carrying the given labels. A negative
/// age places the creation time in the future.
pub fn resource(id: &str, age: Duration, labels: &[(&str, &str)]) -> Resource {
    Resource {
        id: id.to_owned(),
        created: Some(Utc::now() - age),
        labels: labels
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect(),
    }
}

/// Scripted state for one resource kind.
#[derive(Debug, Default)]
struct KindState {
    /// Steady-state listing pool.
    resources: Vec<Resource>,
    /// Listings served before the pool, one per list call.
    queued: VecDeque<Vec<Resource>>,
    /// Error returned by every list call.
    list_error: Option<String>,
    /// Remaining transient remove failures per identifier.
    failures: HashMap<String, usize>,
    removed: Vec<String>,
    list_calls: usize,
}

impl KindState {
    fn list(&mut self, filter: &Filter) -> Result<Vec<Resource>> {
        self.list_calls += 1;
        if let Some(message) = &self.list_error {
            return Err(RuntimeError::other(message.clone()));
        }

        let pool = self
            .queued
            .pop_front()
            .unwrap_or_else(|| self.resources.clone());
        Ok(pool
            .into_iter()
            .filter(|resource| matches(filter, resource))
            .collect())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        if let Some(left) = self.failures.get_mut(id) {
            if *left > 0 {
                *left -= 1;
                return Err(RuntimeError::other("transient failure"));
            }
        }

        let before = self.resources.len();
        self.resources.retain(|resource| resource.id != id);
        if self.resources.len() == before && !self.failures.contains_key(id) {
            return Err(RuntimeError::not_found(id));
        }

        self.removed.push(id.to_owned());
        Ok(())
    }
}

/// Label matching as the engine would apply it: every `label` filter value
/// (`k` or `k=v`) must be satisfied. Non-label keys are ignored.
fn matches(filter: &Filter, resource: &Resource) -> bool {
    filter.values("label").map_or(true, |values| {
        values.iter().all(|value| match value.split_once('=') {
            Some((key, expected)) => resource
                .labels
                .get(key)
                .is_some_and(|actual| actual == expected),
            None => resource.labels.contains_key(value.as_str()),
        })
    })
}

#[derive(Debug, Default)]
struct Inner {
    containers: KindState,
    networks: KindState,
    volumes: KindState,
    images: KindState,
    ping_error: bool,
}

impl Inner {
    fn kind_mut(&mut self, kind: ResourceKind) -> &mut KindState {
        match kind {
            ResourceKind::Container => &mut self.containers,
            ResourceKind::Network => &mut self.networks,
            ResourceKind::Volume => &mut self.volumes,
            ResourceKind::Image => &mut self.images,
        }
    }
}

/// Scripted [`RuntimeClient`] recording every removal.
#[derive(Debug, Default)]
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&self, kind: ResourceKind, resource: Resource) {
        self.inner.lock().unwrap().kind_mut(kind).resources.push(resource);
    }

    /// Queues a listing served for the next list call of `kind`, before the
    /// steady-state pool takes over again.
    pub fn queue_listing(&self, kind: ResourceKind, resources: Vec<Resource>) {
        self.inner
            .lock()
            .unwrap()
            .kind_mut(kind)
            .queued
            .push_back(resources);
    }

    /// Makes the next `times` removals of `id` fail with a transient error.
    pub fn fail_removals(&self, kind: ResourceKind, id: &str, times: usize) {
        self.inner
            .lock()
            .unwrap()
            .kind_mut(kind)
            .failures
            .insert(id.to_owned(), times);
    }

    pub fn set_list_error(&self, kind: ResourceKind, message: &str) {
        self.inner.lock().unwrap().kind_mut(kind).list_error = Some(message.to_owned());
    }

    pub fn set_ping_error(&self) {
        self.inner.lock().unwrap().ping_error = true;
    }

    /// Identifiers removed so far, in removal order.
    pub fn removed(&self, kind: ResourceKind) -> Vec<String> {
        self.inner.lock().unwrap().kind_mut(kind).removed.clone()
    }

    pub fn list_calls(&self, kind: ResourceKind) -> usize {
        self.inner.lock().unwrap().kind_mut(kind).list_calls
    }

    fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Resource>> {
        self.inner.lock().unwrap().kind_mut(kind).list(filter)
    }

    fn remove(&self, kind: ResourceKind, id: &str) -> Result<()> {
        self.inner.lock().unwrap().kind_mut(kind).remove(id)
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn ping(&self) -> Result<()> {
        if self.inner.lock().unwrap().ping_error {
            return Err(RuntimeError::other("ping failed"));
        }
        Ok(())
    }

    async fn negotiate_api_version(&self) {}

    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Resource>> {
        self.list(ResourceKind::Container, filter)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.remove(ResourceKind::Container, id)
    }

    async fn list_networks(&self, filter: &Filter) -> Result<Vec<Resource>> {
        self.list(ResourceKind::Network, filter)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.remove(ResourceKind::Network, id)
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<Resource>> {
        self.list(ResourceKind::Volume, filter)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.remove(ResourceKind::Volume, name)
    }

    async fn list_images(&self, filter: &Filter) -> Result<Vec<Resource>> {
        self.list(ResourceKind::Image, filter)
    }

    async fn remove_image(&self, id: &str) -> Result<Vec<ImageDeletion>> {
        self.remove(ResourceKind::Image, id)?;
        Ok(vec![ImageDeletion {
            deleted: Some(id.to_owned()),
            untagged: None,
        }])
    }
}
