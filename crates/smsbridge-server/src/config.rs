use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use smsbridge_api::token::DEFAULT_TOKEN_TTL_DAYS;
use smsbridge_twilio::DEFAULT_API_BASE;

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    pub cors_origin: Option<String>,
    pub production: bool,
    pub twilio_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let production = get("SMSBRIDGE_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let jwt_secret = get("SMSBRIDGE_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if production && (jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str())) {
            bail!("SMSBRIDGE_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("SMSBRIDGE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("SMSBRIDGE_PORT")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("SMSBRIDGE_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let jwt_ttl_days = match get("SMSBRIDGE_JWT_EXPIRES_DAYS") {
            Some(v) => v.parse().context("SMSBRIDGE_JWT_EXPIRES_DAYS must be a whole number")?,
            None => DEFAULT_TOKEN_TTL_DAYS,
        };
        if jwt_ttl_days <= 0 {
            bail!("SMSBRIDGE_JWT_EXPIRES_DAYS must be positive");
        }

        Ok(Self {
            addr,
            db_path: get("SMSBRIDGE_DB_PATH").unwrap_or_else(|| "smsbridge.db".into()).into(),
            jwt_secret,
            jwt_ttl_days,
            cors_origin: get("SMSBRIDGE_CORS_ORIGIN").filter(|v| !v.is_empty()),
            production,
            twilio_api_base: get("SMSBRIDGE_TWILIO_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_for_development() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.port(), 5000);
        assert_eq!(cfg.jwt_ttl_days, 7);
        assert!(!cfg.production);
        assert!(cfg.cors_origin.is_none());
        assert_eq!(cfg.twilio_api_base, "https://api.twilio.com");
    }

    #[test]
    fn production_refuses_placeholder_secret() {
        assert!(config(&[("SMSBRIDGE_ENV", "production")]).is_err());
        assert!(
            config(&[("SMSBRIDGE_ENV", "production"), ("SMSBRIDGE_JWT_SECRET", "dev-secret-change-me")])
                .is_err()
        );

        let cfg = config(&[("SMSBRIDGE_ENV", "Production"), ("SMSBRIDGE_JWT_SECRET", "s3cr3t")]).unwrap();
        assert!(cfg.production);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config(&[("SMSBRIDGE_PORT", "http")]).is_err());
        assert!(config(&[("SMSBRIDGE_JWT_EXPIRES_DAYS", "0")]).is_err());
    }
}
