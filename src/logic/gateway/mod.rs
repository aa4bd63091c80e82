//! Model Gateway
//!
//! The only contract the core needs from a language model:
//! `send_chat(messages) -> text`. Providers plug in behind the trait.
//!
//! # Components
//! - `providers.rs`: Gemini, Mistral, Groq over blocking HTTP
//! - `retry.rs`: bounded retry with exponential backoff

pub mod providers;
pub mod retry;

use thiserror::Error;

pub use providers::HttpGateway;
pub use retry::{with_retry, RetryPolicy};

// ============================================================================
// CONTRACT
// ============================================================================

/// Chat-style model access. Implementations must bound every call with a timeout.
pub trait ModelGateway: Send + Sync {
    /// Ordered messages in, raw reply text out
    fn send_chat(&self, messages: &[String]) -> Result<String, GatewayError>;

    /// Provider label for logs
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned HTTP {status}")]
    Http { status: u16 },
    #[error("unexpected provider response: {0}")]
    Response(String),
}

/// Ask with a system prompt and a user prompt; returns raw text
pub fn ask(gateway: &dyn ModelGateway, system: &str, user: &str) -> Result<String, GatewayError> {
    gateway.send_chat(&[system.to_string(), user.to_string()])
}
