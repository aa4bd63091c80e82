//! GeoIP lookups through ip-api.com

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{map_ureq, IntelError};
use crate::logic::heuristics::GeoPoint;

const IP_API_BASE: &str = "http://ip-api.com/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub point: GeoPoint,
    #[serde(default)]
    pub country: Option<String>,
}

pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: &Ipv4Addr) -> Result<GeoFix, IntelError>;
}

pub struct IpApiLocator {
    agent: ureq::Agent,
}

impl IpApiLocator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl GeoLocator for IpApiLocator {
    fn locate(&self, ip: &Ipv4Addr) -> Result<GeoFix, IntelError> {
        let url = format!("{}/{}?fields=status,message,country,lat,lon", IP_API_BASE, ip);
        let body: Value = self
            .agent
            .get(&url)
            .call()
            .map_err(map_ureq)?
            .into_json()
            .map_err(|e| IntelError::Network(e.to_string()))?;

        parse_ip_api(&body)
    }
}

fn parse_ip_api(body: &Value) -> Result<GeoFix, IntelError> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("lookup failed");
        return Err(IntelError::NoData(message.to_string()));
    }

    let lat = body.get("lat").and_then(Value::as_f64);
    let lon = body.get("lon").and_then(Value::as_f64);
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(GeoFix {
            point: GeoPoint::new(lat, lon),
            country: body.get("country").and_then(Value::as_str).map(str::to_string),
        }),
        _ => Err(IntelError::NoData("missing coordinates".to_string())),
    }
}
