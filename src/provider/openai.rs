//! OpenAI-compatible chat completions, including Azure OpenAI deployments.

mod error;
mod provider;
mod request;
mod types;

pub use provider::ChatGptApi;
