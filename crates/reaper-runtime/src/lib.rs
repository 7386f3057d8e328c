//! # reaper-runtime
//!
//! Capability layer over the local container runtime. The [`RuntimeClient`]
//! trait captures exactly the operations the reaper needs — ping, API-version
//! negotiation, and list/remove per resource kind — so the pruner can run
//! against the real Docker engine or a test double.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod docker;
pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reaper_core::Filter;
use std::collections::HashMap;
use std::fmt;

pub use docker::DockerRuntime;
pub use error::{Result, RuntimeError};

/// The kinds of runtime resources the reaper manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A container.
    Container,
    /// A network.
    Network,
    /// A volume.
    Volume,
    /// An image.
    Image,
}

impl ResourceKind {
    /// All kinds in removal order: containers first because networks and
    /// volumes attached to running containers cannot be removed, images last.
    pub const ORDERED: [Self; 4] = [Self::Container, Self::Network, Self::Volume, Self::Image];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Network => write!(f, "network"),
            Self::Volume => write!(f, "volume"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A runtime resource as seen by the pruner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    /// Identifier passed back to the remove call: container, network, and
    /// image IDs, volume names.
    pub id: String,
    /// Creation time, when the runtime reported one that could be parsed.
    pub created: Option<DateTime<Utc>>,
    /// Resource labels.
    pub labels: HashMap<String, String>,
}

/// One entry of an image-remove response.
#[derive(Debug, Clone, Default)]
pub struct ImageDeletion {
    /// Identifier of a deleted image layer.
    pub deleted: Option<String>,
    /// A tag that was untagged.
    pub untagged: Option<String>,
}

impl ImageDeletion {
    /// Whether this entry represents a removal that should be counted.
    /// Entries with neither a deletion nor a non-empty untagged tag do not
    /// count.
    #[must_use]
    pub fn counts(&self) -> bool {
        let non_empty = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());
        non_empty(&self.deleted) || non_empty(&self.untagged)
    }
}

/// The operations the reaper requires from a container runtime.
///
/// Implementations must be safe for concurrent calls. The real engine is
/// wrapped by [`DockerRuntime`]; tests substitute a scripted double.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Verifies the runtime is reachable. Failure at startup is fatal.
    async fn ping(&self) -> Result<()>;

    /// Negotiates the API version with the runtime. Called once at startup;
    /// failures are tolerated silently.
    async fn negotiate_api_version(&self);

    /// Lists containers (including stopped ones) matching `filter`.
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<Resource>>;

    /// Removes a container, its anonymous volumes included, by force.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Lists networks matching `filter`.
    async fn list_networks(&self, filter: &Filter) -> Result<Vec<Resource>>;

    /// Removes a network.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Lists volumes matching `filter`.
    async fn list_volumes(&self, filter: &Filter) -> Result<Vec<Resource>>;

    /// Removes a volume by force.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Lists images matching `filter`.
    async fn list_images(&self, filter: &Filter) -> Result<Vec<Resource>>;

    /// Removes an image and its dangling children, returning the delete
    /// entries reported by the runtime.
    async fn remove_image(&self, id: &str) -> Result<Vec<ImageDeletion>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_ordered_for_removal() {
        assert_eq!(
            ResourceKind::ORDERED,
            [
                ResourceKind::Container,
                ResourceKind::Network,
                ResourceKind::Volume,
                ResourceKind::Image,
            ]
        );
    }

    #[test]
    fn image_deletion_counting() {
        assert!(ImageDeletion {
            deleted: Some("sha256:abc".into()),
            untagged: None,
        }
        .counts());
        assert!(ImageDeletion {
            deleted: None,
            untagged: Some("app:latest".into()),
        }
        .counts());
        assert!(!ImageDeletion {
            deleted: Some(String::new()),
            untagged: Some(String::new()),
        }
        .counts());
        assert!(!ImageDeletion::default().counts());
    }
}
