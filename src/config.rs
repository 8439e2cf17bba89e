//! Explicit stand-ins for the application's ambient stores.
//!
//! The access store and the chat session are owned by the host application; this
//! crate only reads them. They are handed to [`crate::client::ClientApi`] through a
//! [`ClientContext`] instead of being looked up globally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::http::DynHttpTransport;

/// Credential family selected in the access store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceProvider {
    #[default]
    OpenAI,
    Azure,
    Google,
    Anthropic,
}

impl ServiceProvider {
    /// Vendors whose keys are sent verbatim instead of as a bearer token.
    pub fn uses_raw_token(self) -> bool {
        matches!(self, ServiceProvider::Google | ServiceProvider::Azure)
    }
}

/// Read-only snapshot of the user's credentials and endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessStore {
    /// Provider chosen in the settings page.
    pub provider: ServiceProvider,
    /// Whether the custom endpoint URLs below replace the same-origin proxy.
    pub use_custom_config: bool,

    pub openai_url: String,
    pub openai_api_key: String,

    pub azure_url: String,
    pub azure_api_key: String,
    pub azure_api_version: String,

    pub google_url: String,
    pub google_api_key: String,
    /// Threshold applied to every Gemini harm category.
    pub google_safety_settings: String,

    pub anthropic_url: String,
    pub anthropic_api_key: String,
    pub anthropic_api_version: String,

    /// Shared access code handed out by the deployment operator.
    pub access_code: String,
    /// Set when the server requires an access code.
    pub need_code: bool,
    /// Routes every model, Gemini and Claude included, through the OpenAI endpoint.
    pub use_openai_endpoint_for_all_models: bool,
    /// Skip the remote model listing and use the built-in catalogue.
    pub disable_list_models: bool,
}

impl Default for AccessStore {
    fn default() -> Self {
        Self {
            provider: ServiceProvider::OpenAI,
            use_custom_config: false,
            openai_url: String::new(),
            openai_api_key: String::new(),
            azure_url: String::new(),
            azure_api_key: String::new(),
            azure_api_version: "2023-08-01-preview".to_string(),
            google_url: String::new(),
            google_api_key: String::new(),
            google_safety_settings: "BLOCK_ONLY_HIGH".to_string(),
            anthropic_url: String::new(),
            anthropic_api_key: String::new(),
            anthropic_api_version: "2023-06-01".to_string(),
            access_code: String::new(),
            need_code: false,
            use_openai_endpoint_for_all_models: false,
            disable_list_models: false,
        }
    }
}

impl AccessStore {
    /// Parses a JSON snapshot exported by the host application.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_provider(mut self, provider: ServiceProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = key.into();
        self
    }

    pub fn with_google_api_key(mut self, key: impl Into<String>) -> Self {
        self.google_api_key = key.into();
        self
    }

    pub fn with_azure(
        mut self,
        url: impl Into<String>,
        key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        self.azure_url = url.into();
        self.azure_api_key = key.into();
        self.azure_api_version = api_version.into();
        self
    }

    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = key.into();
        self
    }

    /// Enables access control with the given code.
    pub fn with_access_code(mut self, code: impl Into<String>) -> Self {
        self.access_code = code.into();
        self.need_code = true;
        self
    }

    /// Points the client at custom endpoints instead of the same-origin proxy.
    pub fn with_custom_urls(
        mut self,
        openai_url: impl Into<String>,
        google_url: impl Into<String>,
        anthropic_url: impl Into<String>,
    ) -> Self {
        self.use_custom_config = true;
        self.openai_url = openai_url.into();
        self.google_url = google_url.into();
        self.anthropic_url = anthropic_url.into();
        self
    }

    pub fn enabled_access_control(&self) -> bool {
        self.need_code
    }

    /// Azure needs all three of endpoint, key and api version.
    pub fn is_valid_azure(&self) -> bool {
        !self.azure_url.is_empty()
            && !self.azure_api_key.is_empty()
            && !self.azure_api_version.is_empty()
    }
}

/// Session-level model configuration, owned by the chat session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 4000,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Gives the dispatch layer read access to the active chat session.
pub trait SessionSource: Send + Sync {
    /// Model configuration of the session currently shown to the user.
    fn model_config(&self) -> ModelConfig;
}

/// [`SessionSource`] that always reports the same configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSession(pub ModelConfig);

impl StaticSession {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self(ModelConfig::default().with_model(model))
    }
}

impl SessionSource for StaticSession {
    fn model_config(&self) -> ModelConfig {
        self.0.clone()
    }
}

/// Where the client runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Origin serving the same-origin proxy routes (`/api/openai`, `/sharegpt`, ...).
    pub app_origin: String,
    /// Set inside the packaged desktop shell, where no proxy exists and vendor
    /// endpoints are called directly.
    pub is_app: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_origin: "http://localhost:3000".to_string(),
            is_app: false,
        }
    }
}

impl RuntimeConfig {
    pub fn web(app_origin: impl Into<String>) -> Self {
        Self {
            app_origin: app_origin.into(),
            is_app: false,
        }
    }

    pub fn app() -> Self {
        Self {
            is_app: true,
            ..Self::default()
        }
    }

    /// Joins a same-origin route such as `/api/google` onto the app origin.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", self.app_origin.trim_end_matches('/'), path)
    }
}

/// Dependencies shared by the facade and every provider client.
#[derive(Clone)]
pub struct ClientContext {
    pub access: Arc<AccessStore>,
    pub runtime: RuntimeConfig,
    pub session: Arc<dyn SessionSource>,
    pub transport: DynHttpTransport,
}

impl ClientContext {
    pub fn new(
        access: AccessStore,
        runtime: RuntimeConfig,
        session: Arc<dyn SessionSource>,
        transport: DynHttpTransport,
    ) -> Self {
        Self {
            access: Arc::new(access),
            runtime,
            session,
            transport,
        }
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("provider", &self.access.provider)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_store_parses_camel_case_with_defaults() {
        let store = AccessStore::from_json(
            r#"{"provider":"Azure","azureUrl":"https://x.openai.azure.com","azureApiKey":"k","needCode":true}"#,
        )
        .expect("parse");
        assert_eq!(store.provider, ServiceProvider::Azure);
        assert!(store.enabled_access_control());
        assert_eq!(store.azure_api_version, "2023-08-01-preview");
        assert!(store.is_valid_azure());
        assert_eq!(store.google_safety_settings, "BLOCK_ONLY_HIGH");
    }

    #[test]
    fn azure_requires_every_field() {
        let store = AccessStore::default().with_azure("https://x", "", "2024-02-01");
        assert!(!store.is_valid_azure());
    }

    #[test]
    fn runtime_route_trims_trailing_slash() {
        let runtime = RuntimeConfig::web("https://chat.example.com/");
        assert_eq!(runtime.route("/sharegpt"), "https://chat.example.com/sharegpt");
    }
}
