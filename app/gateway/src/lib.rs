//! Ferry gateway: an OpenAI-compatible HTTP surface over the model
//! registry, with the echo, redirect, app directory, and task backends.

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod utils;

pub use config::GatewayConfig;
pub use error::ApiFailure;
pub use gateway::{
    Gateway, ServeHandle, StaticSource, build_activator, build_sources, router::router, serve,
    serve_gateway, serve_with_config,
};
