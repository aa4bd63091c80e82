//! HTTP Model Providers
//!
//! Gemini uses `generateContent`; Mistral and Groq speak the
//! OpenAI-compatible chat completions format.

use std::time::Duration;

use serde_json::{json, Value};

use super::{GatewayError, ModelGateway};
use crate::logic::config::{ModelConfig, Provider};

// ============================================================================
// CONSTANTS
// ============================================================================

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MISTRAL_URL: &str = "https://api.mistral.ai/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

// ============================================================================
// GATEWAY
// ============================================================================

pub struct HttpGateway {
    provider: Provider,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl HttpGateway {
    pub fn from_config(config: &ModelConfig, api_key: Option<String>) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| config.provider.default_model().to_string());

        let endpoint = config.endpoint.clone().unwrap_or_else(|| match config.provider {
            Provider::Gemini => format!("{}/{}:generateContent", GEMINI_BASE, model),
            Provider::Mistral => MISTRAL_URL.to_string(),
            Provider::Groq => GROQ_URL.to_string(),
        });

        if api_key.is_none() {
            log::warn!("No API key for provider {} - model calls will fail", config.provider.as_str());
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();

        Self {
            provider: config.provider,
            model,
            endpoint,
            api_key,
            agent,
        }
    }

    fn post(&self, body: Value) -> Result<Value, GatewayError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::NotConfigured(self.provider.as_str().to_string()))?;

        let request = self.agent.post(&self.endpoint).set("Content-Type", "application/json");
        let request = match self.provider {
            Provider::Gemini => request.set("x-goog-api-key", key),
            Provider::Mistral | Provider::Groq => {
                request.set("Authorization", &format!("Bearer {}", key))
            }
        };

        match request.send_json(body) {
            Ok(resp) => resp
                .into_json::<Value>()
                .map_err(|e| GatewayError::Response(e.to_string())),
            Err(ureq::Error::Status(status, _)) => Err(GatewayError::Http { status }),
            Err(e) => Err(GatewayError::Network(e.to_string())),
        }
    }
}

impl ModelGateway for HttpGateway {
    fn send_chat(&self, messages: &[String]) -> Result<String, GatewayError> {
        match self.provider {
            Provider::Gemini => {
                let reply = self.post(gemini_body(messages))?;
                gemini_text(&reply)
            }
            Provider::Mistral | Provider::Groq => {
                let reply = self.post(chat_body(&self.model, messages))?;
                chat_text(&reply)
            }
        }
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

// ============================================================================
// WIRE FORMATS
// ============================================================================

fn gemini_body(messages: &[String]) -> Value {
    let text = messages.join("\n\n");
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": text }] }]
    })
}

fn gemini_text(reply: &Value) -> Result<String, GatewayError> {
    let parts = reply
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Response("missing candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    Ok(text)
}

/// First message becomes the system turn when there is more than one
fn chat_body(model: &str, messages: &[String]) -> Value {
    let turns: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let role = if i == 0 && messages.len() > 1 { "system" } else { "user" };
            json!({ "role": role, "content": content })
        })
        .collect();

    json!({ "model": model, "messages": turns })
}

fn chat_text(reply: &Value) -> Result<String, GatewayError> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Response("missing choices".to_string()))
}
