//! Model source builder: turns a [`GatewayConfig`] into model sources.

use crate::{
    GatewayConfig,
    backend::{AppsSource, Echo, HttpAppDirectory, HttpJudge, ModelActivator, Redirect},
};
use anyhow::Result;
use compact_str::CompactString;
use futures_util::future::BoxFuture;
use llm::{Capabilities, ModelInfo};
use runtime::{
    ChatInvoker, Model, ModelSource,
    task::{Judge, TaskInvoker, Verdict},
};
use std::{path::Path, sync::Arc, time::Duration};

/// A source serving a fixed list of models.
pub struct StaticSource {
    name: CompactString,
    models: Vec<Model>,
}

impl StaticSource {
    /// A source named `name` serving `models`
    pub fn new(name: impl Into<CompactString>, models: Vec<Model>) -> Self {
        Self {
            name: name.into(),
            models,
        }
    }
}

impl ModelSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> BoxFuture<'_, anyhow::Result<Vec<Model>>> {
        Box::pin(async move { Ok(self.models.clone()) })
    }
}

/// Build the model sources described by `config`.
///
/// Built-in models (echo, redirect, task) come from one static source;
/// the app directory, when configured, is a second source listed on every
/// reload.
pub fn build_sources(
    config: &GatewayConfig,
    config_dir: &Path,
) -> Result<Vec<Arc<dyn ModelSource>>> {
    let echo = Echo::new(Duration::from_millis(config.echo.delay_ms));
    let redirect = match &config.redirect {
        Some(redirect) => Some(Redirect::new(reqwest::Client::new(), redirect)?),
        None => None,
    };

    let mut builtin = Vec::new();
    if config.echo.enabled {
        builtin.push(echo.model(config.echo.model.clone()));
    }
    if let (Some(redirect), Some(redirect_config)) = (&redirect, &config.redirect) {
        tracing::info!("redirecting {} to {}", redirect_config.model, redirect.endpoint());
        builtin.push(redirect.clone().model(redirect_config.model.clone()));
    }
    if config.task.enabled {
        let inner: Arc<dyn ChatInvoker> = match redirect {
            Some(redirect) => Arc::new(redirect),
            None => Arc::new(echo),
        };
        builtin.push(task_model(config, config_dir, inner));
    }

    let mut sources: Vec<Arc<dyn ModelSource>> = vec![Arc::new(StaticSource::new("builtin", builtin))];
    if let Some(apps) = &config.apps {
        tracing::info!("listing apps from {}", apps.site_url);
        sources.push(Arc::new(AppsSource::new(apps)));
    }
    Ok(sources)
}

/// The model activator, when the app console knows how to reach this
/// gateway.
pub fn build_activator(config: &GatewayConfig) -> Option<ModelActivator> {
    let apps = config.apps.as_ref()?;
    let gateway_url = apps.gateway_url.as_deref()?;
    Some(ModelActivator::new(
        Arc::new(HttpAppDirectory::new(apps)),
        gateway_url,
        apps.owner.clone(),
    ))
}

fn task_model(config: &GatewayConfig, config_dir: &Path, inner: Arc<dyn ChatInvoker>) -> Model {
    let judge: Arc<dyn Judge> = match (&config.judge, &config.redirect) {
        (Some(judge), _) => Arc::new(HttpJudge::new(&judge.base_url, &judge.api_key, judge.model.as_str())),
        (None, Some(redirect)) => Arc::new(HttpJudge::new(
            &redirect.base_url,
            &redirect.api_key,
            redirect.upstream_model.as_str(),
        )),
        (None, None) => {
            tracing::warn!("no judge endpoint configured, task rounds run to the limit");
            Arc::new(never_finished)
        }
    };

    let mut run = config.task.run.clone();
    run.log_dir = Some(config.log_dir(config_dir));
    let info = ModelInfo::new(config.task.model.clone(), "self", Capabilities::CHAT);
    Model::new(info).with_chat(TaskInvoker::new(inner, judge, run))
}

fn never_finished(_log: &str) -> anyhow::Result<Verdict> {
    Ok(Verdict {
        is_finished: false,
        reason: "no judge configured".into(),
    })
}
