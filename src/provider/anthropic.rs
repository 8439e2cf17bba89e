mod error;
mod provider;
mod request;
mod types;

pub use provider::ClaudeApi;
