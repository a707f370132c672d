//! App directory backend.
//!
//! Every app published in a console is served as a model named after the
//! app. Console and app calls use a blocking HTTP client and run on the
//! blocking pool through [`runtime::blocking_stream`].

use crate::{config::AppsConfig, utils::join_url};
use anyhow::{Context, Result};
use compact_str::CompactString;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use llm::{
    Capabilities, ChatChoice, ChatChunk, ChatRequest, CompletionChoice, CompletionChunk,
    CompletionRequest, ModelInfo,
};
use parking_lot::Mutex;
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use runtime::{
    ChatInvoker, ChunkStream, CompletionInvoker, Model, ModelSource, blocking_stream, boxed,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
    sync::Arc,
    time::Duration,
};

const PAGE_LIMIT: usize = 100;
const ANONYMOUS_USER: &str = "unknown";

/// The console's provider for OpenAI-compatible endpoints
pub const OPENAI_COMPATIBLE_PROVIDER: &str =
    "langgenius/openai_api_compatible/openai_api_compatible";

/// An app listed by the console
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    /// Console id
    pub id: String,
    /// Display name, served as the model id
    pub name: String,
}

/// A directory of apps and their API keys.
///
/// Calls block and must run off the async scheduler.
pub trait AppDirectory: Send + Sync {
    /// Every app in the directory
    fn list_apps(&self) -> Result<Vec<AppInfo>>;

    /// An API key for one app, provisioned if it has none
    fn api_key(&self, app_id: &str) -> Result<String>;

    /// Names of the models registered under the OpenAI-compatible provider
    fn provider_models(&self) -> Result<Vec<String>>;

    /// Register a model under the OpenAI-compatible provider
    fn add_provider_model(&self, model: &ProviderModel) -> Result<()>;
}

/// A model registration pushed to the console, pointing back at this
/// gateway's `/v1` API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderModel {
    /// Model id as served by the gateway
    pub model: String,
    /// Always `llm`
    pub model_type: &'static str,
    /// Provider credentials
    pub credentials: ProviderCredentials,
    /// Load balancing, always disabled
    pub load_balancing: LoadBalancing,
}

impl ProviderModel {
    /// A chat model served at `endpoint_url`
    pub fn chat(model: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            model_type: "llm",
            credentials: ProviderCredentials::new(endpoint_url.into()),
            load_balancing: LoadBalancing::default(),
        }
    }
}

/// Credentials of a [`ProviderModel`]. The console takes every value as a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCredentials {
    pub mode: &'static str,
    pub context_size: &'static str,
    pub max_tokens_to_sample: &'static str,
    pub agent_though_support: &'static str,
    pub function_calling_type: &'static str,
    pub stream_function_calling: &'static str,
    pub vision_support: &'static str,
    pub structured_output_support: &'static str,
    pub stream_mode_auth: &'static str,
    pub stream_mode_delimiter: &'static str,
    pub voices: &'static str,
    pub api_key: String,
    pub endpoint_url: String,
}

impl ProviderCredentials {
    fn new(endpoint_url: String) -> Self {
        Self {
            mode: "chat",
            context_size: "40960",
            max_tokens_to_sample: "40960",
            agent_though_support: "supported",
            function_calling_type: "function_call",
            stream_function_calling: "supported",
            vision_support: "no_support",
            structured_output_support: "not_supported",
            stream_mode_auth: "not_use",
            stream_mode_delimiter: "\n\n",
            voices: "alloy",
            api_key: String::new(),
            endpoint_url,
        }
    }
}

/// Load balancing settings of a [`ProviderModel`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadBalancing {
    /// Whether load balancing is on
    pub enabled: bool,
    /// Balanced credential sets
    pub configs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Wrapped<T> {
    data: T,
}

#[derive(Deserialize)]
struct Login {
    access_token: String,
}

#[derive(Deserialize)]
struct AppPage {
    data: Vec<AppInfo>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct ApiKey {
    token: String,
}

#[derive(Deserialize)]
struct ProviderModels {
    provider: String,
    #[serde(default)]
    models: Vec<RegisteredModel>,
}

#[derive(Deserialize)]
struct RegisteredModel {
    model: String,
}

/// A console reached over HTTP with an email and password login.
pub struct HttpAppDirectory {
    site_url: String,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
    keys: Mutex<HashMap<String, String>>,
}

impl HttpAppDirectory {
    /// A directory for the configured console
    pub fn new(config: &AppsConfig) -> Self {
        Self {
            site_url: config.site_url.clone(),
            email: config.email.clone(),
            password: config.password.clone(),
            token: Mutex::new(None),
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn login(&self, client: &Client) -> Result<String> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(token);
        }

        let login: Wrapped<Login> = client
            .post(join_url(&self.site_url, "console/api/login"))
            .json(&json!({
                "email": self.email,
                "password": self.password,
                "remember_me": true,
            }))
            .send()?
            .error_for_status()
            .context("console login failed")?
            .json()?;
        tracing::debug!("logged in to {}", self.site_url);
        *self.token.lock() = Some(login.data.access_token.clone());
        Ok(login.data.access_token)
    }

    /// Send a console request with the session token. A rejected token is
    /// dropped and the request retried once after a fresh login.
    fn send(&self, client: &Client, request: impl Fn(&Client) -> RequestBuilder) -> Result<Response> {
        let token = self.login(client)?;
        let response = request(client).bearer_auth(&token).send()?;
        if !matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(response);
        }

        tracing::info!("console session rejected ({}), logging in again", response.status());
        self.token.lock().take();
        let token = self.login(client)?;
        Ok(request(client).bearer_auth(&token).send()?)
    }

    fn provider_url(&self) -> String {
        join_url(
            &self.site_url,
            &format!("console/api/workspaces/current/model-providers/{OPENAI_COMPATIBLE_PROVIDER}/models"),
        )
    }
}

impl AppDirectory for HttpAppDirectory {
    fn list_apps(&self) -> Result<Vec<AppInfo>> {
        let client = client()?;
        let mut apps = Vec::new();
        for page in 1.. {
            let url = join_url(
                &self.site_url,
                &format!("console/api/apps?page={page}&limit={PAGE_LIMIT}"),
            );
            let listed: AppPage = self
                .send(&client, |client| client.get(&url))?
                .error_for_status()
                .context("failed to list apps")?
                .json()?;
            apps.extend(listed.data);
            if !listed.has_more {
                break;
            }
        }
        Ok(apps)
    }

    fn api_key(&self, app_id: &str) -> Result<String> {
        if let Some(key) = self.keys.lock().get(app_id) {
            return Ok(key.clone());
        }

        let client = client()?;
        let url = join_url(&self.site_url, &format!("console/api/apps/{app_id}/api-keys"));
        let existing: Wrapped<Vec<ApiKey>> = self
            .send(&client, |client| client.get(&url))?
            .error_for_status()
            .context("failed to list app keys")?
            .json()?;
        let key = match existing.data.into_iter().next() {
            Some(key) => key.token,
            None => {
                tracing::info!("provisioning an api key for app {app_id}");
                let created: ApiKey = self
                    .send(&client, |client| client.post(&url))?
                    .error_for_status()
                    .context("failed to create app key")?
                    .json()?;
                created.token
            }
        };
        self.keys.lock().insert(app_id.to_owned(), key.clone());
        Ok(key)
    }

    fn provider_models(&self) -> Result<Vec<String>> {
        let client = client()?;
        let url = join_url(&self.site_url, "console/api/workspaces/current/models/model-types/llm");
        let providers: Wrapped<Vec<ProviderModels>> = self
            .send(&client, |client| client.get(&url))?
            .error_for_status()
            .context("failed to list provider models")?
            .json()?;
        Ok(providers
            .data
            .into_iter()
            .filter(|p| p.provider == OPENAI_COMPATIBLE_PROVIDER)
            .flat_map(|p| p.models)
            .map(|m| m.model)
            .collect())
    }

    fn add_provider_model(&self, model: &ProviderModel) -> Result<()> {
        let client = client()?;
        let url = self.provider_url();
        self.send(&client, |client| client.post(&url).json(model))?
            .error_for_status()
            .with_context(|| format!("failed to register model {}", model.model))?;
        Ok(())
    }
}

/// Blocking clients own a runtime thread, so each call builds its own on
/// the worker that uses it.
fn client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("failed to build http client")
}

#[derive(Deserialize)]
struct AppEvent {
    #[serde(default)]
    event: String,
    answer: Option<String>,
    message: Option<String>,
}

/// Read the answers out of an app's streaming response.
///
/// Each `data:` line carries one JSON event. An `error` event yields an
/// error; other events yield their non-empty `answer`.
pub fn parse_app_events(reader: impl BufRead) -> impl Iterator<Item = Result<String>> {
    reader.lines().filter_map(|line| {
        let line = match line {
            Ok(line) => line,
            Err(e) => return Some(Err(e.into())),
        };
        let data = line.strip_prefix("data:")?.trim();
        let event: AppEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("failed to parse app event: {e}, data: {data}");
                return None;
            }
        };
        if event.event == "error" {
            let message = event.message.unwrap_or_default();
            return Some(Err(anyhow::anyhow!("app returned an error: {message}")));
        }
        event.answer.filter(|answer| !answer.is_empty()).map(Ok)
    })
}

/// One app served as a chat and completion model.
#[derive(Clone)]
pub struct AppModel {
    directory: Arc<dyn AppDirectory>,
    app: AppInfo,
    endpoint: String,
}

impl AppModel {
    /// Serve `app` through the app API at `base_url`
    pub fn new(directory: Arc<dyn AppDirectory>, app: AppInfo, base_url: &str) -> Self {
        Self {
            directory,
            app,
            endpoint: join_url(base_url, "chat-messages"),
        }
    }

    fn answers(
        &self,
        query: String,
        user: Option<CompactString>,
    ) -> impl futures_core::Stream<Item = runtime::Result<String>> + Send + use<> {
        let directory = self.directory.clone();
        let app_id = self.app.id.clone();
        let endpoint = self.endpoint.clone();
        let user = user.unwrap_or_else(|| ANONYMOUS_USER.into());

        blocking_stream(move || -> Box<dyn Iterator<Item = Result<String>>> {
            let opened = directory.api_key(&app_id).and_then(|key| {
                client()?
                    .post(&endpoint)
                    .bearer_auth(key)
                    .json(&json!({
                        "inputs": {},
                        "query": query,
                        "user": user,
                        "response_mode": "streaming",
                    }))
                    .send()?
                    .error_for_status()
                    .context("app request failed")
            });
            match opened {
                Ok(response) => Box::new(parse_app_events(BufReader::new(response))),
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })
    }
}

impl ChatInvoker for AppModel {
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk> {
        let query = request
            .last_message()
            .map(|message| message.text().to_owned())
            .unwrap_or_default();
        boxed(
            self.answers(query, request.user)
                .map(|answer| answer.map(|text| ChatChoice::assistant(0, text).into())),
        )
    }
}

impl CompletionInvoker for AppModel {
    fn complete(&self, request: CompletionRequest) -> ChunkStream<CompletionChunk> {
        boxed(
            self.answers(request.prompt.joined(), request.user)
                .map(|answer| answer.map(|text| CompletionChoice::new(0, text).into())),
        )
    }
}

/// Loads one model per app from a directory.
pub struct AppsSource {
    directory: Arc<dyn AppDirectory>,
    base_url: String,
    owner: CompactString,
}

impl AppsSource {
    /// A source over the configured console
    pub fn new(config: &AppsConfig) -> Self {
        Self::with_directory(
            Arc::new(HttpAppDirectory::new(config)),
            &config.base_url,
            config.owner.clone(),
        )
    }

    /// A source over any directory
    pub fn with_directory(
        directory: Arc<dyn AppDirectory>,
        base_url: &str,
        owner: impl Into<CompactString>,
    ) -> Self {
        Self {
            directory,
            base_url: base_url.to_owned(),
            owner: owner.into(),
        }
    }
}

impl ModelSource for AppsSource {
    fn name(&self) -> &str {
        "apps"
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<Model>>> {
        Box::pin(async move {
            let directory = self.directory.clone();
            let apps = tokio::task::spawn_blocking(move || directory.list_apps())
                .await
                .context("app listing worker failed")??;

            Ok(apps
                .into_iter()
                .map(|app| {
                    let info = ModelInfo::new(app.name.as_str(), self.owner.clone(), Capabilities::ALL);
                    let invoker = AppModel::new(self.directory.clone(), app, &self.base_url);
                    Model::new(info)
                        .with_chat(invoker.clone())
                        .with_completion(invoker)
                })
                .collect())
        })
    }
}

/// Registers the gateway's own models with the console so its apps can
/// call back into the gateway.
pub struct ModelActivator {
    directory: Arc<dyn AppDirectory>,
    endpoint_url: String,
    skip_owner: CompactString,
}

impl ModelActivator {
    /// Activate models served at `endpoint_url`. Models owned by
    /// `skip_owner` are the console's own apps and are never pushed back.
    pub fn new(
        directory: Arc<dyn AppDirectory>,
        endpoint_url: impl Into<String>,
        skip_owner: impl Into<CompactString>,
    ) -> Self {
        Self {
            directory,
            endpoint_url: endpoint_url.into(),
            skip_owner: skip_owner.into(),
        }
    }

    /// Register every chat model in `models` the console does not know yet.
    ///
    /// Returns the registration of every activated model, new or existing.
    pub async fn activate(&self, models: Vec<ModelInfo>) -> Result<Vec<ProviderModel>> {
        let wanted: Vec<ProviderModel> = models
            .into_iter()
            .filter(|m| m.capabilities.chat && m.owned_by.as_deref() != Some(self.skip_owner.as_str()))
            .map(|m| ProviderModel::chat(m.id.as_str(), self.endpoint_url.as_str()))
            .collect();

        let directory = self.directory.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ProviderModel>> {
            let existing = directory.provider_models()?;
            for model in wanted.iter().filter(|m| !existing.contains(&m.model)) {
                tracing::info!("activating model {} in the console", model.model);
                directory.add_provider_model(model)?;
            }
            Ok(wanted)
        })
        .await
        .context("model activation worker failed")?
    }
}
