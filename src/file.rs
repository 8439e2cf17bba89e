//! Uploads attachments to the app server so they can be referenced by path.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientContext;
use crate::error::{LLMError, classify_status};
use crate::headers::HeaderBuilder;
use crate::http::{FormPart, HttpRequest};
use crate::provider::{parse_json, read_success};

const UPLOAD_ROUTE: &str = "/api/file/upload";

/// Server-side location of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_name: String,
    pub file_path: String,
}

/// File sub-component of [`crate::client::ClientApi`].
#[derive(Clone)]
pub struct FileApi {
    context: ClientContext,
    headers: HeaderBuilder,
}

impl FileApi {
    pub fn new(context: ClientContext) -> Self {
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        Self { context, headers }
    }

    /// Uploads `bytes` as a multipart `file` field.
    ///
    /// Only the auth header is sent; the transport sets the multipart content type.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: impl Into<String>,
    ) -> Result<UploadedFile, LLMError> {
        let file_name = file_name.into();
        let url = self.context.runtime.route(UPLOAD_ROUTE);
        debug!(file_name = %file_name, size = bytes.len(), "uploading file");

        let part = FormPart::File {
            name: "file".to_string(),
            file_name,
            mime_type: None,
            bytes,
        };
        let request =
            HttpRequest::post_multipart(url, vec![part]).with_headers(self.headers.headers(true));
        let response = self.context.transport.send(request).await?;
        let text = read_success(response, |status, body, retry_after| {
            classify_status("file", status, format!("upload failed: {body}"), None, retry_after)
        })?;
        parse_json("file", &text)
    }
}
