//! HTTP gateway: shared state, routes, and the serve entrypoint.

use crate::backend::ModelActivator;
use runtime::{ModelRegistry, ModelSource};
use std::sync::Arc;

pub use builder::{StaticSource, build_activator, build_sources};
pub use serve::{ServeHandle, serve, serve_gateway, serve_with_config};

mod builder;
pub mod router;
mod serve;

/// Shared state available to all request handlers.
#[derive(Clone)]
pub struct Gateway {
    /// Models currently served.
    pub registry: Arc<ModelRegistry>,
    /// Sources the registry is rebuilt from on reload.
    pub sources: Arc<[Arc<dyn ModelSource>]>,
    /// Pushes served models to the app console, when one is configured.
    pub activator: Option<Arc<ModelActivator>>,
}

impl Gateway {
    /// A gateway over `registry`, reloading from `sources`
    pub fn new(registry: Arc<ModelRegistry>, sources: Vec<Arc<dyn ModelSource>>) -> Self {
        Self {
            registry,
            sources: sources.into(),
            activator: None,
        }
    }

    /// Enable model activation in the app console
    pub fn with_activator(mut self, activator: ModelActivator) -> Self {
        self.activator = Some(Arc::new(activator));
        self
    }

    /// Rebuild the registry from the sources. Returns the model count.
    pub async fn reload(&self) -> usize {
        self.registry.reload(&self.sources).await
    }
}
