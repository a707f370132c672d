//! `ModelRegistry`: model id to invoker resolution with snapshot swapping.
//!
//! Readers clone an `Arc<Snapshot>` and resolve against it without holding
//! any lock. Writers build the next snapshot off to the side and install it
//! with a single pointer store, so a reload is never observed half-built.

use crate::{ChatInvoker, CompletionInvoker, Error, Result};
use compact_str::CompactString;
use futures_util::future::BoxFuture;
use llm::ModelInfo;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, fmt, sync::Arc};

/// A capability a request needs from a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `/v1/chat/completions`
    Chat,
    /// `/v1/completions`
    Completion,
    /// SSE streaming
    Stream,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Stream => "stream",
        })
    }
}

/// A registered model: its descriptor plus the invokers that back it.
#[derive(Clone)]
pub struct Model {
    /// The descriptor listed by `/v1/models`
    pub info: ModelInfo,
    chat: Option<Arc<dyn ChatInvoker>>,
    completion: Option<Arc<dyn CompletionInvoker>>,
}

impl Model {
    /// A model with no invokers yet
    pub fn new(info: ModelInfo) -> Self {
        Self {
            info,
            chat: None,
            completion: None,
        }
    }

    /// Attach a chat invoker
    pub fn with_chat(mut self, invoker: impl ChatInvoker + 'static) -> Self {
        self.chat = Some(Arc::new(invoker));
        self
    }

    /// Attach a completion invoker
    pub fn with_completion(mut self, invoker: impl CompletionInvoker + 'static) -> Self {
        self.completion = Some(Arc::new(invoker));
        self
    }

    /// The model id
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// The chat invoker, if the model advertises and carries one
    pub fn chat(&self) -> Result<Arc<dyn ChatInvoker>> {
        match &self.chat {
            Some(invoker) if self.info.capabilities.chat => Ok(invoker.clone()),
            _ => Err(self.unsupported(Capability::Chat)),
        }
    }

    /// The completion invoker, if the model advertises and carries one
    pub fn completion(&self) -> Result<Arc<dyn CompletionInvoker>> {
        match &self.completion {
            Some(invoker) if self.info.capabilities.completion => Ok(invoker.clone()),
            _ => Err(self.unsupported(Capability::Completion)),
        }
    }

    /// Fail unless the model can stream
    pub fn ensure_stream(&self) -> Result<()> {
        if self.info.capabilities.stream {
            Ok(())
        } else {
            Err(self.unsupported(Capability::Stream))
        }
    }

    fn unsupported(&self, capability: Capability) -> Error {
        Error::CapabilityUnsupported {
            model: self.info.id.clone(),
            capability,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("info", &self.info)
            .field("chat", &self.chat.is_some())
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

/// An immutable view of the registered models, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    models: Vec<Arc<Model>>,
    index: HashMap<CompactString, usize>,
}

impl Snapshot {
    /// An empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a model. An existing entry with the same id is replaced in
    /// place and keeps its position.
    pub fn insert(&mut self, model: Model) {
        let id = model.info.id.clone();
        let model = Arc::new(model);
        match self.index.get(&id) {
            Some(&slot) => self.models[slot] = model,
            None => {
                self.index.insert(id, self.models.len());
                self.models.push(model);
            }
        }
    }

    /// Look up a model by id
    pub fn get(&self, id: &str) -> Option<&Arc<Model>> {
        self.index.get(id).map(|&slot| &self.models[slot])
    }

    /// All descriptors in registration order
    pub fn list(&self) -> Vec<ModelInfo> {
        self.models.iter().map(|m| m.info.clone()).collect()
    }

    /// Iterate the registered models
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.iter()
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model is registered
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<Model> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Model>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for model in iter {
            snapshot.insert(model);
        }
        snapshot
    }
}

/// Something that can produce a batch of models, e.g. a backend directory.
pub trait ModelSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Discover the models this source serves
    fn load(&self) -> BoxFuture<'_, anyhow::Result<Vec<Model>>>;
}

/// The model registry.
///
/// Shared by handlers and the reload operation. In-flight requests keep the
/// invoker they resolved; only requests resolving after a swap see the new
/// entries.
#[derive(Default)]
pub struct ModelRegistry {
    current: RwLock<Arc<Snapshot>>,
    /// Serializes writers so concurrent registrations are not lost.
    writer: Mutex<()>,
}

impl ModelRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry starting from the given snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Register a model, replacing any entry with the same id
    pub fn register(&self, model: Model) {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        tracing::info!("registering model {}", model.id());
        next.insert(model);
        *self.current.write() = Arc::new(next);
    }

    /// Replace the whole registry with a new snapshot
    pub fn install(&self, snapshot: Snapshot) {
        let _writer = self.writer.lock();
        *self.current.write() = Arc::new(snapshot);
    }

    /// Resolve a model by id
    pub fn resolve(&self, id: &str) -> Result<Arc<Model>> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ModelNotFound(id.into()))
    }

    /// Resolve the chat invoker of a model
    pub fn resolve_chat(&self, id: &str) -> Result<Arc<dyn ChatInvoker>> {
        self.resolve(id)?.chat()
    }

    /// Resolve the completion invoker of a model
    pub fn resolve_completion(&self, id: &str) -> Result<Arc<dyn CompletionInvoker>> {
        self.resolve(id)?.completion()
    }

    /// All descriptors in registration order
    pub fn list(&self) -> Vec<ModelInfo> {
        self.snapshot().list()
    }

    /// Rebuild the registry from the given sources and swap it in.
    ///
    /// A failing source is logged and skipped; the others still register.
    /// Returns the number of models in the new snapshot.
    pub async fn reload(&self, sources: &[Arc<dyn ModelSource>]) -> usize {
        let mut next = Snapshot::new();
        for source in sources {
            match source.load().await {
                Ok(models) => {
                    tracing::debug!("source {} produced {} models", source.name(), models.len());
                    for model in models {
                        next.insert(model);
                    }
                }
                Err(e) => tracing::warn!("skipping model source {}: {e:#}", source.name()),
            }
        }

        let count = next.len();
        self.install(next);
        tracing::info!("registry reloaded with {count} models");
        count
    }
}
