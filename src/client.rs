use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClientContext;
use crate::file::FileApi;
use crate::http::post_json_with_headers;
use crate::provider::anthropic::ClaudeApi;
use crate::provider::google_gemini::GeminiProApi;
use crate::provider::openai::ChatGptApi;
use crate::provider::{DynLLMApi, REQUEST_TIMEOUT};
use crate::types::{ModelProvider, RequestMessage, Role};

const SHARE_PROXY_ROUTE: &str = "/sharegpt";
const SHARE_API_URL: &str = "https://sharegpt.com/api/conversations";
const SHARE_LINK_BASE: &str = "https://shareg.pt";
const SHARE_ATTRIBUTION: &str =
    "Share from [NextChat]: https://github.com/Yidadaa/ChatGPT-Next-Web";

#[derive(Debug, Serialize)]
struct ShareItem<'a> {
    from: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareRequest<'a> {
    avatar_url: Option<&'a str>,
    items: Vec<ShareItem<'a>>,
}

#[derive(Debug, Deserialize)]
struct ShareResponse {
    id: Option<String>,
}

/// Entry point used by the UI: one vendor client chosen at construction, plus the
/// file uploader and conversation sharing.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use chatlink::client::ClientApi;
/// use chatlink::config::{AccessStore, ClientContext, RuntimeConfig, StaticSession};
/// use chatlink::http::reqwest::default_dyn_transport;
/// use chatlink::types::ModelProvider;
///
/// let context = ClientContext::new(
///     AccessStore::default().with_openai_api_key("sk-..."),
///     RuntimeConfig::app(),
///     Arc::new(StaticSession::with_model("gpt-4o")),
///     default_dyn_transport()?,
/// );
/// let client = ClientApi::new(ModelProvider::from_name("GeminiPro"), context);
/// assert_eq!(client.llm().name(), "google_gemini");
/// # Ok::<(), chatlink::LLMError>(())
/// ```
#[derive(Clone)]
pub struct ClientApi {
    llm: DynLLMApi,
    file: FileApi,
    context: ClientContext,
}

impl ClientApi {
    /// Binds exactly one vendor client for `provider`.
    pub fn new(provider: ModelProvider, context: ClientContext) -> Self {
        let llm: DynLLMApi = match provider {
            ModelProvider::Gpt => Arc::new(ChatGptApi::new(context.clone())),
            ModelProvider::GeminiPro => Arc::new(GeminiProApi::new(context.clone())),
            ModelProvider::Claude => Arc::new(ClaudeApi::new(context.clone())),
        };
        debug!(?provider, client = llm.name(), "bound llm client");
        Self {
            llm,
            file: FileApi::new(context.clone()),
            context,
        }
    }

    pub fn llm(&self) -> &DynLLMApi {
        &self.llm
    }

    pub fn file(&self) -> &FileApi {
        &self.file
    }

    /// Publishes the conversation to ShareGPT and returns the public link.
    ///
    /// Sharing is best effort: any failure is logged and yields `None`.
    pub async fn share(
        &self,
        messages: &[RequestMessage],
        avatar_url: Option<&str>,
    ) -> Option<String> {
        let texts: Vec<(Role, String)> = messages
            .iter()
            .map(|message| (message.role, message.text_content()))
            .collect();
        let mut items: Vec<ShareItem<'_>> = texts
            .iter()
            .map(|(role, text)| ShareItem {
                from: if *role == Role::User { "human" } else { "gpt" },
                value: text,
            })
            .collect();
        items.push(ShareItem {
            from: "gpt",
            value: SHARE_ATTRIBUTION,
        });
        let body = ShareRequest { avatar_url, items };

        let url = if self.context.runtime.is_app {
            SHARE_API_URL.to_string()
        } else {
            self.context.runtime.route(SHARE_PROXY_ROUTE)
        };
        // credentials never leave for the share service
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);

        let response = match post_json_with_headers(
            self.context.transport.as_ref(),
            url,
            headers,
            &body,
            Some(REQUEST_TIMEOUT),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "share request failed");
                return None;
            }
        };

        let status = response.status;
        match serde_json::from_slice::<ShareResponse>(&response.body) {
            Ok(ShareResponse { id: Some(id) }) if !id.is_empty() => {
                Some(format!("{SHARE_LINK_BASE}/{id}"))
            }
            Ok(_) => {
                warn!(status, "share response carried no id");
                None
            }
            Err(err) => {
                warn!(status, error = %err, "share response is not json");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::config::{AccessStore, RuntimeConfig};
    use crate::testing::{MockReply, MockTransport, context_with};

    fn context(transport: Arc<MockTransport>, runtime: RuntimeConfig) -> ClientContext {
        context_with(
            transport,
            AccessStore::default().with_openai_api_key("sk-private"),
            runtime,
            "gpt-4",
        )
    }

    #[test]
    fn selector_binds_matching_client() {
        let cases = [
            (ModelProvider::Gpt, "openai"),
            (ModelProvider::GeminiPro, "google_gemini"),
            (ModelProvider::Claude, "anthropic"),
        ];
        for (provider, name) in cases {
            let client = ClientApi::new(
                provider,
                context(MockTransport::new(vec![]), RuntimeConfig::default()),
            );
            assert_eq!(client.llm().provider(), provider);
            assert_eq!(client.llm().name(), name);
        }
    }

    #[test]
    fn unknown_selector_falls_back_to_openai() {
        let client = ClientApi::new(
            ModelProvider::from_name("Mistral"),
            context(MockTransport::new(vec![]), RuntimeConfig::default()),
        );
        assert_eq!(client.llm().provider(), ModelProvider::Gpt);
    }

    #[tokio::test]
    async fn share_maps_roles_and_appends_attribution() {
        let transport = MockTransport::new(vec![MockReply::json(200, json!({"id": "abc123"}))]);
        let client = ClientApi::new(
            ModelProvider::Gpt,
            context(transport.clone(), RuntimeConfig::default()),
        );
        let messages = vec![
            RequestMessage::system("sys"),
            RequestMessage::user("question"),
            RequestMessage::assistant("answer"),
        ];

        let link = client.share(&messages, Some("https://a/avatar.png")).await;
        assert_eq!(link.as_deref(), Some("https://shareg.pt/abc123"));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://localhost:3000/sharegpt");
        let body: Value =
            serde_json::from_slice(request.body_bytes().expect("body")).expect("json");
        assert_eq!(body["avatarUrl"], "https://a/avatar.png");
        let froms: Vec<&str> = body["items"]
            .as_array()
            .expect("items")
            .iter()
            .filter_map(|item| item["from"].as_str())
            .collect();
        assert_eq!(froms, vec!["gpt", "human", "gpt", "gpt"]);
        assert_eq!(body["items"][3]["value"], SHARE_ATTRIBUTION);
        assert!(!request.headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn share_goes_direct_from_the_app_shell() {
        let transport = MockTransport::new(vec![MockReply::json(200, json!({"id": "x"}))]);
        let client = ClientApi::new(ModelProvider::Gpt, context(transport.clone(), RuntimeConfig::app()));
        assert!(client.share(&[RequestMessage::user("hi")], None).await.is_some());
        assert_eq!(transport.requests()[0].url, SHARE_API_URL);
    }

    #[tokio::test]
    async fn share_failures_yield_none() {
        let transport = MockTransport::new(vec![
            MockReply::json(200, json!({})),
            MockReply::bytes(502, b"<html>bad gateway</html>".to_vec()),
            MockReply::Fail("connection refused".into()),
        ]);
        let client = ClientApi::new(
            ModelProvider::Claude,
            context(transport, RuntimeConfig::default()),
        );
        let messages = [RequestMessage::user("hi")];
        for _ in 0..3 {
            assert!(client.share(&messages, None).await.is_none());
        }
    }
}
