//! Alert Notifications
//!
//! Alert-only verdicts and critical audits go to syslog through `logger`
//! and to any configured webhooks.
//!
//! Features:
//! - Slack, Discord and generic JSON payloads
//! - Per-webhook enable flag
//! - Best-effort delivery (failures are logged, never raised)

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{run_checked, ActionError};
use crate::logic::config::{NotifyConfig, WebhookConfig, WebhookPlatform};

// ============================================================================
// PAYLOAD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "ℹ️",
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Critical => "🚨",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "#3498db",
            AlertSeverity::Warning => "#f39c12",
            AlertSeverity::Critical => "#e74c3c",
        }
    }

    /// `logger -p` priority
    pub fn syslog_priority(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "security.info",
            AlertSeverity::Warning => "security.warning",
            AlertSeverity::Critical => "auth.crit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub timestamp: i64,
}

impl Alert {
    pub fn new(severity: AlertSeverity, title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            severity,
            ip: None,
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().to_string()),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct AlertDispatcher {
    syslog: bool,
    webhooks: Vec<WebhookConfig>,
    agent: ureq::Agent,
}

impl AlertDispatcher {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            syslog: config.syslog,
            webhooks: config.webhooks.clone(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        }
    }

    fn send_syslog(&self, alert: &Alert) -> Result<(), ActionError> {
        let line = format!("AI_DEFENDER: {} - {}", alert.title, alert.message);
        run_checked(
            "logger",
            &["-t", "ai_defender", "-p", alert.severity.syslog_priority(), &line],
        )
        .map(|_| ())
    }

    fn send_to_webhook(&self, webhook: &WebhookConfig, alert: &Alert) -> Result<(), ActionError> {
        let body = format_payload(webhook.platform, alert);
        self.agent
            .post(&webhook.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| ActionError::NetworkError { message: e.to_string() })?;

        log::info!("Alert sent to {} ({:?})", webhook.name, webhook.platform);
        Ok(())
    }
}

impl Notifier for AlertDispatcher {
    fn notify(&self, alert: &Alert) {
        if self.syslog {
            if let Err(e) = self.send_syslog(alert) {
                log::warn!("Syslog alert failed: {}", e);
            }
        }

        for webhook in self.webhooks.iter().filter(|w| w.enabled) {
            if let Err(e) = self.send_to_webhook(webhook, alert) {
                log::error!("Failed to send alert to {}: {}", webhook.name, e);
            }
        }
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

pub fn format_payload(platform: WebhookPlatform, alert: &Alert) -> String {
    match platform {
        WebhookPlatform::Slack => format_slack(alert),
        WebhookPlatform::Discord => format_discord(alert),
        WebhookPlatform::Generic => {
            serde_json::to_string(alert).unwrap_or_else(|_| "{}".to_string())
        }
    }
}

fn detail_fields(alert: &Alert) -> Vec<(&'static str, String)> {
    let mut fields = vec![("Severity", alert.severity.as_str().to_string())];
    if let Some(ref ip) = alert.ip {
        fields.push(("Source", ip.clone()));
    }
    if let Some(ref host) = alert.hostname {
        fields.push(("Host", host.clone()));
    }
    fields
}

fn format_slack(alert: &Alert) -> String {
    let fields: Vec<serde_json::Value> = detail_fields(alert)
        .into_iter()
        .map(|(name, value)| {
            serde_json::json!({ "type": "mrkdwn", "text": format!("*{}:* {}", name, value) })
        })
        .collect();

    serde_json::json!({
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("{} {}", alert.severity.emoji(), alert.title),
                    "emoji": true
                }
            },
            { "type": "section", "text": { "type": "mrkdwn", "text": alert.message } },
            { "type": "section", "fields": fields }
        ],
        "attachments": [{ "color": alert.severity.color() }]
    })
    .to_string()
}

fn format_discord(alert: &Alert) -> String {
    let fields: Vec<serde_json::Value> = detail_fields(alert)
        .into_iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value, "inline": true }))
        .collect();

    serde_json::json!({
        "embeds": [{
            "title": format!("{} {}", alert.severity.emoji(), alert.title),
            "description": alert.message,
            "color": u32::from_str_radix(&alert.severity.color()[1..], 16).unwrap_or(0),
            "fields": fields,
            "timestamp": Utc::now().to_rfc3339()
        }]
    })
    .to_string()
}
