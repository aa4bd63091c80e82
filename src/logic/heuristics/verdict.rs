//! Best-effort JSON extraction from model output
//!
//! Models wrap JSON in prose or markdown fences. Everything here degrades
//! to `None`; a bad reply is "no actionable verdict", never an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Span from the first `{` to the last `}`
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract and deserialize a verdict; any shape mismatch yields `None`
pub fn parse_verdict<T: DeserializeOwned>(text: &str) -> Option<T> {
    let json = extract_json(text)?;
    match serde_json::from_str::<T>(json) {
        Ok(v) => Some(v),
        Err(e) => {
            log::debug!("Unparseable verdict ({}): {}", e, truncate(json, 200));
            None
        }
    }
}

/// Accepts `0.8`, `"0.8"` or null
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) if n.is_finite() => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    })
}

/// Accepts any scalar and keeps it as a lowercase string
pub fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_lowercase()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts any scalar as free text
pub fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_label")]
        verdict: Option<String>,
        #[serde(default, deserialize_with = "lenient_f64")]
        confidence: Option<f64>,
    }

    #[test]
    fn test_extract_from_prose_and_fences() {
        let reply = "Sure! ```json\n{\"verdict\": \"real\", \"nested\": {\"a\": 1}}\n``` hope it helps";
        assert_eq!(extract_json(reply), Some("{\"verdict\": \"real\", \"nested\": {\"a\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_lenient_fields() {
        let p: Probe = parse_verdict(r#"{"verdict": " Malicious ", "confidence": "0.93"}"#).unwrap();
        assert_eq!(p.verdict.as_deref(), Some("malicious"));
        assert_eq!(p.confidence, Some(0.93));

        let p: Probe = parse_verdict(r#"{"confidence": [1, 2]}"#).unwrap();
        assert_eq!(p.confidence, None);
        assert_eq!(p.verdict, None);
    }

    #[test]
    fn test_malformed_is_none() {
        assert!(parse_verdict::<Probe>("{ this is not json }").is_none());
        assert!(parse_verdict::<Probe>("").is_none());
        assert!(parse_verdict::<Probe>("[1,2,3]").is_none());
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
