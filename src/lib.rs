//! Client-side dispatch layer for chat apps talking to several LLM vendors.
//!
//! [`ClientApi`] binds one vendor client (OpenAI/Azure, Gemini, or Claude) behind the
//! [`LLMApi`] trait, builds authenticated requests from the caller's [`AccessStore`],
//! and adds file upload and conversation sharing.

pub mod client;
pub mod config;
pub mod error;
pub mod file;
pub mod headers;
pub mod http;
pub mod provider;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ClientApi;
pub use config::{AccessStore, ClientContext, ModelConfig, RuntimeConfig, ServiceProvider};
pub use error::LLMError;
pub use file::{FileApi, UploadedFile};
pub use headers::get_headers;
pub use provider::{DynLLMApi, LLMApi};
pub use types::*;
