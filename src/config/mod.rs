use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub log_level: Option<String>,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    /// Public host the tracking script reports to
    pub domain: String,
    pub auth: AuthConfig,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Keys accepted by the stats API; empty disables authentication
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Trust CF-Connecting-IP and CF-IPCountry
    Cloudflare,
    /// Trust Forwarded / X-Forwarded-For
    Standard,
    /// Use the socket address only
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashRotation {
    /// Mix the UTC day into every fingerprint
    Daily,
    /// Stable fingerprints across days
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,
    #[serde(default, skip_serializing)]
    pub visitor_hash_secret: Option<String>,
    pub visitor_hash_rotation: HashRotation,
    /// External bot signature file; the embedded ruleset is used when unset
    #[serde(default)]
    pub bot_signatures_path: Option<String>,
    #[serde(default)]
    pub geoip_country_db_path: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::Cloudflare,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
            visitor_hash_secret: None,
            visitor_hash_rotation: HashRotation::Daily,
            bot_signatures_path: None,
            geoip_country_db_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let log_level = std::env::var("LOG_LEVEL").ok().filter(|v| !v.is_empty());

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "memory" => DatabaseBackend::Memory,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres, memory"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./tally.db".to_string());
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let domain = std::env::var("DOMAIN").unwrap_or_else(|_| "localhost".to_string());

        let api_keys = std::env::var("API_KEY")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "cloudflare".to_string())
            .to_lowercase()
            .as_str()
        {
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "standard" => TrustedProxyMode::Standard,
            "none" => TrustedProxyMode::None,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'cloudflare'. Supported values: cloudflare, standard, none"
                );
                TrustedProxyMode::Cloudflare
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .map(|v| parse_list(&v))
            .unwrap_or_default()
            .iter()
            .map(|cidr| parse_cidr(cidr))
            .collect::<anyhow::Result<Vec<IpNet>>>()?;

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?;

        let visitor_hash_secret = std::env::var("VISITOR_HASH_SECRET")
            .ok()
            .filter(|v| !v.is_empty());

        let visitor_hash_rotation = match std::env::var("VISITOR_HASH_ROTATION")
            .unwrap_or_else(|_| "daily".to_string())
            .to_lowercase()
            .as_str()
        {
            "daily" => HashRotation::Daily,
            "none" => HashRotation::None,
            other => {
                tracing::warn!(
                    "Unknown VISITOR_HASH_ROTATION '{other}', falling back to 'daily'. Supported values: daily, none"
                );
                HashRotation::Daily
            }
        };

        let bot_signatures_path = std::env::var("BOT_SIGNATURES_PATH").ok();
        let geoip_country_db_path = std::env::var("GEOIP_COUNTRY_DB_PATH").ok();

        Ok(Config {
            environment,
            log_level,
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            domain,
            auth: AuthConfig { api_keys },
            tracking: TrackingConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
                visitor_hash_secret,
                visitor_hash_rotation,
                bot_signatures_path,
                geoip_country_db_path,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Tracing filter directive: LOG_LEVEL if set, otherwise by environment
    pub fn log_directive(&self) -> String {
        match self.log_level.as_deref().map(str::to_lowercase).as_deref() {
            Some(level @ ("trace" | "debug" | "info" | "warn" | "error")) => level.to_string(),
            _ if self.is_production() => "info".to_string(),
            _ => "debug".to_string(),
        }
    }

    /// URL the tracking script posts beacons to
    pub fn track_url(&self) -> String {
        if self.domain == "localhost" {
            format!("http://localhost:{}/track", self.server.port)
        } else {
            format!("https://{}/track", self.domain)
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts CIDR notation or a bare address (treated as a host route)
fn parse_cidr(value: &str) -> anyhow::Result<IpNet> {
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net);
    }

    value
        .parse::<std::net::IpAddr>()
        .map(IpNet::from)
        .with_context(|| format!("Invalid TRUSTED_PROXIES entry '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(environment: &str, log_level: Option<&str>, domain: &str) -> Config {
        Config {
            environment: environment.to_string(),
            log_level: log_level.map(str::to_string),
            database: DatabaseConfig {
                backend: DatabaseBackend::Memory,
                url: String::new(),
                max_connections: 1,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            domain: domain.to_string(),
            auth: AuthConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }

    #[test]
    fn test_log_directive() {
        assert_eq!(config("production", None, "localhost").log_directive(), "info");
        assert_eq!(config("development", None, "localhost").log_directive(), "debug");
        assert_eq!(
            config("production", Some("WARN"), "localhost").log_directive(),
            "warn"
        );
        assert_eq!(
            config("production", Some("verbose"), "localhost").log_directive(),
            "info"
        );
    }

    #[test]
    fn test_track_url() {
        assert_eq!(
            config("development", None, "localhost").track_url(),
            "http://localhost:8080/track"
        );
        assert_eq!(
            config("production", None, "stats.example.com").track_url(),
            "https://stats.example.com/track"
        );
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("10.0.0.0/8").unwrap(),
            "10.0.0.0/8".parse::<IpNet>().unwrap()
        );
        assert_eq!(
            parse_cidr("192.0.2.1").unwrap(),
            "192.0.2.1/32".parse::<IpNet>().unwrap()
        );
        assert!(parse_cidr("not-an-ip").is_err());
    }
}
