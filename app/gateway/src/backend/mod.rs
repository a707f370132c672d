//! Backends served by the gateway.
//!
//! Each backend is an invoker (or a directory of them) that the builder
//! registers as models.

pub use apps::{
    AppDirectory, AppInfo, AppModel, AppsSource, HttpAppDirectory, ModelActivator,
    OPENAI_COMPATIBLE_PROVIDER, ProviderModel, parse_app_events,
};
pub use echo::{Echo, echo_text};
pub use judge::HttpJudge;
pub use redirect::Redirect;

mod apps;
mod echo;
mod judge;
mod redirect;
