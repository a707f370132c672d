//! Ferry serving core.
//!
//! Everything between the HTTP surface and the backends lives here: the
//! [`ModelRegistry`] resolving model ids to invokers, the [`ThreadBridge`]
//! moving blocking producers off the scheduler, the [`CancelScope`] tying
//! a generation to its client, the [`emit`]ter turning partials into SSE
//! frames, and the [`task`] continuation loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_runtime::{CancelScope, Model, ModelRegistry, emit};
//! use llm::{Capabilities, Envelope, ModelInfo, CHAT_COMPLETION_CHUNK};
//!
//! let registry = ModelRegistry::new();
//! registry.register(Model::new(ModelInfo::new("echo", "self", Capabilities::CHAT)).with_chat(echo));
//! let invoker = registry.resolve_chat("echo")?;
//! let header = Envelope::new(CHAT_COMPLETION_CHUNK, "echo");
//! let frames = emit(header, invoker.chat(request), CancelScope::detached());
//! ```

pub use bridge::{BridgeState, DEFAULT_CAPACITY, ThreadBridge, blocking_stream};
pub use cancel::{CancelScope, CancelToken, TokenState, Transport};
pub use emitter::{collect, emit, error_frame};
pub use error::{Error, Result};
pub use invoker::{ChatInvoker, ChunkStream, CompletionInvoker, boxed};
pub use registry::{Capability, Model, ModelRegistry, ModelSource, Snapshot};

mod bridge;
mod cancel;
mod emitter;
mod error;
mod invoker;
mod registry;
pub mod task;
