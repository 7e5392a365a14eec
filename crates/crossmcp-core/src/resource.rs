//! Resource records.

use crate::error::CoreResult;
use crate::registry::RegistryItem;
use async_trait::async_trait;
use crossmcp_protocol::types::{Resource, ResourceContents, ResourceTemplate};
use std::fmt;
use std::sync::Arc;

/// Reads the contents behind a resource URI.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    /// Read the resource at `uri`.
    async fn read(&self, uri: &str) -> CoreResult<Vec<ResourceContents>>;

    /// Whether the reader can serve `uri`; defaults to an exact match
    /// against the registered definition.
    async fn exists(&self, _uri: &str) -> bool {
        true
    }
}

/// Normalized resource registration.
#[derive(Clone)]
pub struct ResourceRecord {
    /// The listed definition
    pub definition: Resource,
    /// Template definition, when the resource is parameterized
    pub template: Option<ResourceTemplate>,
    /// Contents reader
    pub reader: Arc<dyn ResourceReader>,
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("uri", &self.definition.uri)
            .field("templated", &self.template.is_some())
            .finish()
    }
}

impl ResourceRecord {
    /// Record for a concrete resource.
    pub fn new(definition: Resource, reader: Arc<dyn ResourceReader>) -> Self {
        Self {
            definition,
            template: None,
            reader,
        }
    }

    /// Attach a template definition.
    pub fn with_template(mut self, template: ResourceTemplate) -> Self {
        self.template = Some(template);
        self
    }
}

#[async_trait]
impl RegistryItem for ResourceRecord {
    fn name(&self) -> &str {
        &self.definition.name
    }
}
