use crate::config::GeolocationConfig;
use crate::security::DeliveryPath;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// Where a relay's address is located.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub ip: IpAddr,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    pub city: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
}

/// Body returned by the lookup service (ip-api.com field names).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    status: String,
    country: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
    message: Option<String>,
}

impl LookupResponse {
    fn into_location(self, ip: IpAddr) -> Option<GeoLocation> {
        if self.status != "success" {
            log::debug!(
                "Lookup for {} failed: {}",
                ip,
                self.message.as_deref().unwrap_or("no reason given")
            );
            return None;
        }
        Some(GeoLocation {
            ip,
            country: self.country,
            country_iso: self.country_code,
            city: self.city,
            lat: self.lat?,
            lon: self.lon?,
            timezone: self.timezone,
        })
    }
}

/// Addresses worth sending to a public lookup service.
pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                // 2001:db8::/32 documentation
                || (first == 0x2001 && v6.segments()[1] == 0x0db8))
        }
    }
}

pub struct GeoLocator {
    client: Client,
    endpoint: String,
    pause: Duration,
}

impl GeoLocator {
    pub fn new(config: &GeolocationConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("hoptrace/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            pause: Duration::from_millis(config.pause_millis),
        })
    }

    fn lookup_url(&self, ip: &IpAddr) -> String {
        self.endpoint.replace("{ip}", &ip.to_string())
    }

    /// Look up one address. Network and service errors yield `None`.
    pub async fn locate(&self, ip: IpAddr) -> Option<GeoLocation> {
        let url = self.lookup_url(&ip);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Geolocation request for {} failed: {}", ip, e);
                return None;
            }
        };

        if !response.status().is_success() {
            log::warn!(
                "Geolocation service returned {} for {}",
                response.status(),
                ip
            );
            return None;
        }

        let location = match response.json::<LookupResponse>().await {
            Ok(body) => body.into_location(ip),
            Err(e) => {
                log::warn!("Unreadable geolocation response for {}: {}", ip, e);
                None
            }
        };
        if location.is_none() {
            tokio::time::sleep(self.pause).await;
        }
        location
    }

    /// Locate the sending address of every hop that has a public one.
    /// Keys are hop indices in the path.
    pub async fn locate_path(&self, path: &DeliveryPath) -> BTreeMap<usize, GeoLocation> {
        let mut cache: BTreeMap<IpAddr, Option<GeoLocation>> = BTreeMap::new();
        let mut locations = BTreeMap::new();

        for hop in &path.hops {
            let Some(ip) = hop.record.from_ip() else {
                continue;
            };
            if !is_public(&ip) {
                log::debug!("Skipping non-public address {} on hop {}", ip, hop.index);
                continue;
            }

            let location = match cache.get(&ip) {
                Some(cached) => cached.clone(),
                None => {
                    let located = self.locate(ip).await;
                    cache.insert(ip, located.clone());
                    located
                }
            };
            if let Some(location) = location {
                locations.insert(hop.index, location);
            }
        }

        log::info!(
            "Geolocated {} of {} hops",
            locations.len(),
            path.hops.len()
        );
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_is_public() {
        assert!(is_public(&ip("8.8.8.8")));
        assert!(is_public(&ip("2a00:1450:4001:82a::200e")));
        assert!(!is_public(&ip("10.1.2.3")));
        assert!(!is_public(&ip("192.168.0.1")));
        assert!(!is_public(&ip("127.0.0.1")));
        assert!(!is_public(&ip("100.64.0.1")));
        assert!(!is_public(&ip("192.0.2.1")));
        assert!(!is_public(&ip("::1")));
        assert!(!is_public(&ip("fd00::1")));
        assert!(!is_public(&ip("fe80::1")));
    }

    #[test]
    fn test_successful_response_maps_fields() {
        let body = r#"{"status":"success","country":"Germany","countryCode":"DE",
            "city":"Frankfurt am Main","lat":50.11,"lon":8.68,"timezone":"Europe/Berlin"}"#;
        let response: LookupResponse = serde_json::from_str(body).unwrap();
        let location = response.into_location(ip("8.8.8.8")).unwrap();

        assert_eq!(location.country_iso.as_deref(), Some("DE"));
        assert_eq!(location.city.as_deref(), Some("Frankfurt am Main"));
        assert_eq!(location.lat, 50.11);
    }

    #[test]
    fn test_failed_response_is_none() {
        let body = r#"{"status":"fail","message":"reserved range"}"#;
        let response: LookupResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_location(ip("8.8.8.8")).is_none());
    }

    #[test]
    fn test_lookup_url_substitutes_ip() {
        let locator = GeoLocator::new(&GeolocationConfig {
            endpoint: "http://geo.invalid/json/{ip}?fields=status".to_string(),
            ..GeolocationConfig::default()
        })
        .unwrap();
        assert_eq!(
            locator.lookup_url(&ip("203.0.113.9")),
            "http://geo.invalid/json/203.0.113.9?fields=status"
        );
    }

    #[tokio::test]
    async fn test_private_hops_are_not_looked_up() {
        use crate::analyzer::HopAnalyzer;

        let analysis = HopAnalyzer::default().analyze(
            "Received: from a (a [10.0.0.1]) by b; Mon, 1 Jan 2024 10:00:00 +0000\n\n",
        );
        let locator = GeoLocator::new(&GeolocationConfig {
            endpoint: "http://geo.invalid/{ip}".to_string(),
            ..GeolocationConfig::default()
        })
        .unwrap();
        assert!(locator.locate_path(&analysis.path).await.is_empty());
    }
}
