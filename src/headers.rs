//! Authentication and content headers for outgoing provider requests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AccessStore, ServiceProvider, SessionSource};

/// Prefix turning an access code into a server-recognized credential.
pub const ACCESS_CODE_PREFIX: &str = "nk-";

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const GOOGLE_API_KEY_HEADER: &str = "x-goog-api-key";
pub const AZURE_API_KEY_HEADER: &str = "api-key";

/// Credential family a model name is routed to.
///
/// `gemini*` and `claude*` models go to their vendors unless the access store forces
/// every model through the OpenAI endpoint; everything else follows the selected
/// provider's OpenAI/Azure choice.
pub fn resolve_family(access: &AccessStore, model: &str) -> ServiceProvider {
    let by_prefix = !access.use_openai_endpoint_for_all_models;
    if by_prefix && model.starts_with("gemini") {
        ServiceProvider::Google
    } else if by_prefix && model.starts_with("claude") {
        ServiceProvider::Anthropic
    } else if access.provider == ServiceProvider::Azure {
        ServiceProvider::Azure
    } else {
        ServiceProvider::OpenAI
    }
}

fn personal_key(access: &AccessStore, family: ServiceProvider) -> &str {
    match family {
        ServiceProvider::Google => &access.google_api_key,
        ServiceProvider::Azure => &access.azure_api_key,
        ServiceProvider::Anthropic => &access.anthropic_api_key,
        ServiceProvider::OpenAI => &access.openai_api_key,
    }
}

fn format_token(family: ServiceProvider, token: &str) -> String {
    if family.uses_raw_token() {
        token.trim().to_string()
    } else {
        format!("Bearer {}", token.trim())
    }
}

/// Builds the header set for a request made on behalf of `model`.
///
/// With `ignore_headers` the JSON content headers are left out (multipart uploads set
/// their own); authentication is applied either way. When neither a personal key nor
/// an enabled access code is available, no auth header is produced.
///
/// The access-code credential is formatted for `access.provider`, not for the family
/// resolved from `model`; a Gemini model under an OpenAI selection therefore sends
/// `x-goog-api-key: Bearer nk-...`.
///
/// # Examples
///
/// ```
/// use chatlink::config::AccessStore;
/// use chatlink::headers::get_headers;
///
/// let access = AccessStore::default().with_google_api_key("g-key");
/// let headers = get_headers(&access, "gemini-pro", false);
/// assert_eq!(headers.get("x-goog-api-key").map(String::as_str), Some("g-key"));
/// ```
pub fn get_headers(
    access: &AccessStore,
    model: &str,
    ignore_headers: bool,
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if !ignore_headers {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("x-requested-with".to_string(), "XMLHttpRequest".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
    }

    let family = resolve_family(access, model);
    let auth_header = if family == ServiceProvider::Google {
        GOOGLE_API_KEY_HEADER
    } else {
        AUTHORIZATION_HEADER
    };

    let api_key = personal_key(access, family);
    if !api_key.is_empty() {
        let value = format_token(family, api_key);
        if family == ServiceProvider::Azure {
            headers.insert(AZURE_API_KEY_HEADER.to_string(), value.clone());
        }
        headers.insert(auth_header.to_string(), value);
    } else if access.enabled_access_control() && !access.access_code.is_empty() {
        let credential = format!("{ACCESS_CODE_PREFIX}{}", access.access_code);
        headers.insert(
            auth_header.to_string(),
            format_token(access.provider, &credential),
        );
    }

    headers
}

/// [`get_headers`] bound to the access store and the active chat session.
#[derive(Clone)]
pub struct HeaderBuilder {
    access: Arc<AccessStore>,
    session: Arc<dyn SessionSource>,
}

impl HeaderBuilder {
    pub fn new(access: Arc<AccessStore>, session: Arc<dyn SessionSource>) -> Self {
        Self { access, session }
    }

    /// Headers for the session's current model.
    pub fn headers(&self, ignore_headers: bool) -> HashMap<String, String> {
        let model = self.session.model_config().model;
        get_headers(&self.access, &model, ignore_headers)
    }
}
