use crate::security::DEFAULT_TLS_TOKENS;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub geolocation: GeolocationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Case-insensitive substrings of the `with` protocol that mean TLS
    #[serde(default = "default_tls_tokens")]
    pub tls_protocol_tokens: Vec<String>,
    /// Also accept markers like `(using TLSv1.3 ...)` in hop comments
    #[serde(default = "default_true")]
    pub detect_tls_comments: bool,
    #[serde(default)]
    pub clock_skew_tolerance_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeolocationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// URL template, `{ip}` is replaced by the address
    #[serde(default = "default_geo_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_geo_timeout")]
    pub timeout_seconds: u64,
    /// Delay after a failed lookup, to stay under the service's rate limit
    #[serde(default = "default_geo_pause")]
    pub pause_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub write_json: bool,
    #[serde(default = "default_true")]
    pub write_graph: bool,
    #[serde(default = "default_true")]
    pub write_map: bool,
}

fn default_true() -> bool {
    true
}

fn default_tls_tokens() -> Vec<String> {
    DEFAULT_TLS_TOKENS.iter().map(|t| t.to_string()).collect()
}

fn default_geo_endpoint() -> String {
    "http://ip-api.com/json/{ip}?fields=status,country,countryCode,city,lat,lon,timezone,message"
        .to_string()
}

fn default_geo_timeout() -> u64 {
    5
}

fn default_geo_pause() -> u64 {
    50
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tls_protocol_tokens: default_tls_tokens(),
            detect_tls_comments: true,
            clock_skew_tolerance_seconds: 0,
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_geo_endpoint(),
            timeout_seconds: default_geo_timeout(),
            pause_millis: default_geo_pause(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_json: true,
            write_graph: true,
            write_map: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            analysis: AnalysisConfig::default(),
            geolocation: GeolocationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file {}", path))?;
        Ok(())
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            log::warn!("Configuration file '{path}' not found, using default configuration");
            Ok(Self::default())
        }
    }
}
