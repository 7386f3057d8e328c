//! Docker engine adapter for the runtime capability.
//!
//! Maps the engine's wire types onto the reaper's [`Resource`] model and maps
//! HTTP 404 responses onto the [`RuntimeError::NotFound`] sentinel so the
//! pruner can treat already-removed resources as success.

use crate::error::{Result, RuntimeError};
use crate::{ImageDeletion, Resource, RuntimeClient};
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{
    ListContainersOptionsBuilder, ListImagesOptionsBuilder, ListNetworksOptionsBuilder,
    ListVolumesOptionsBuilder, RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder,
    RemoveVolumeOptionsBuilder,
};
use bollard::Docker;
use chrono::DateTime;
use reaper_core::Filter;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Runtime client backed by the local Docker engine.
pub struct DockerRuntime {
    docker: RwLock<Docker>,
}

impl DockerRuntime {
    /// Connects using the standard Docker environment (`DOCKER_HOST` et al).
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed.
    pub fn from_env() -> Result<Self> {
        let docker = Docker::connect_with_defaults().map_err(RuntimeError::Api)?;
        Ok(Self {
            docker: RwLock::new(docker),
        })
    }

    /// A handle to the engine. The handle is cheap to clone; the lock exists
    /// only so version negotiation can swap it.
    fn client(&self) -> Result<Docker> {
        self.docker
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| RuntimeError::other("docker handle lock poisoned"))
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client()?
            .ping()
            .await
            .map(|_| ())
            .map_err(RuntimeError::Api)
    }

    async fn negotiate_api_version(&self) {
        let Ok(client) = self.client() else { return };
        match client.negotiate_version().await {
            Ok(negotiated) => {
                if let Ok(mut guard) = self.docker.write() {
                    *guard = negotiated;
                }
            }
            Err(err) => debug!(error = %err, "api version negotiation failed"),
        }
    }

    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Resource>> {
        // Stopped containers are reaped too.
        let options = ListContainersOptionsBuilder::new()
            .all(true)
            .filters(&filter.to_query_map())
            .build();

        let summaries = self
            .client()?
            .list_containers(Some(options))
            .await
            .map_err(RuntimeError::Api)?;

        Ok(summaries
            .into_iter()
            .map(|summary| Resource {
                id: summary.id.unwrap_or_default(),
                created: summary.created.and_then(|secs| DateTime::from_timestamp(secs, 0)),
                labels: summary.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        self.client()?
            .remove_container(id, Some(options))
            .await
            .map_err(|err| removal_error(err, format!("container {id}")))
    }

    async fn list_networks(&self, filter: &Filter) -> Result<Vec<Resource>> {
        let options = ListNetworksOptionsBuilder::new()
            .filters(&filter.to_query_map())
            .build();

        let networks = self
            .client()?
            .list_networks(Some(options))
            .await
            .map_err(RuntimeError::Api)?;

        Ok(networks
            .into_iter()
            .map(|network| Resource {
                id: network.id.unwrap_or_default(),
                created: network.created,
                labels: network.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.client()?
            .remove_network(id)
            .await
            .map_err(|err| removal_error(err, format!("network {id}")))
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<Resource>> {
        let options = ListVolumesOptionsBuilder::new()
            .filters(&volume_filters(filter))
            .build();

        let response = self
            .client()?
            .list_volumes(Some(options))
            .await
            .map_err(RuntimeError::Api)?;

        let volumes = response.volumes.unwrap_or_default();
        Ok(volumes
            .into_iter()
            .filter_map(|volume| {
                let created = volume.created_at;
                Some(Resource {
                    id: volume.name,
                    created,
                    labels: volume.labels,
                })
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let options = RemoveVolumeOptionsBuilder::new().force(true).build();
        self.client()?
            .remove_volume(name, Some(options))
            .await
            .map_err(|err| removal_error(err, format!("volume {name}")))
    }

    async fn list_images(&self, filter: &Filter) -> Result<Vec<Resource>> {
        let options = ListImagesOptionsBuilder::new()
            .filters(&image_filters(filter))
            .build();

        let summaries = self
            .client()?
            .list_images(Some(options))
            .await
            .map_err(RuntimeError::Api)?;

        Ok(summaries
            .into_iter()
            .map(|summary| Resource {
                id: summary.id,
                created: DateTime::from_timestamp(summary.created, 0),
                labels: summary.labels,
            })
            .collect())
    }

    async fn remove_image(&self, id: &str) -> Result<Vec<ImageDeletion>> {
        let options = RemoveImageOptionsBuilder::new().noprune(false).build();
        let deletions = self
            .client()?
            .remove_image(id, Some(options), None)
            .await
            .map_err(|err| removal_error(err, format!("image {id}")))?;

        Ok(deletions
            .into_iter()
            .map(|item| ImageDeletion {
                deleted: item.deleted,
                untagged: item.untagged,
            })
            .collect())
    }
}

/// The engine's volume endpoints default to anonymous volumes only; named
/// volumes matching the filter must be removed as well. Applied to a clone,
/// never to the stored filter.
fn volume_filters(filter: &Filter) -> HashMap<String, Vec<String>> {
    filter.with("all", "true").to_query_map()
}

/// Without this, only untagged leftovers would be reaped; tagged images
/// matching the labels must be deleted too. Applied to a clone, never to the
/// stored filter.
fn image_filters(filter: &Filter) -> HashMap<String, Vec<String>> {
    filter.with("dangling", "false").to_query_map()
}

/// Maps engine 404s onto the not-found sentinel.
fn removal_error(err: BollardError, what: String) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(what),
        err => RuntimeError::Api(err),
    }
}
