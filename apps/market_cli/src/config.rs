use std::{fs, path::Path, time::Duration};

use alloy_primitives::Address;
use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rpc_url: String,
    /// Endpoint of the signing wallet; falls back to `rpc_url`.
    pub wallet_url: Option<String>,
    pub contract_address: Option<String>,
    pub database_url: String,
    pub receipt_poll_ms: u64,
    pub use_wallet: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            wallet_url: None,
            contract_address: None,
            database_url: "sqlite://./data/market.db".into(),
            receipt_poll_ms: 2_000,
            use_wallet: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    rpc_url: Option<String>,
    wallet_url: Option<String>,
    contract_address: Option<String>,
    database_url: Option<String>,
    receipt_poll_ms: Option<u64>,
    use_wallet: Option<bool>,
}

/// Endpoints checked and parsed, ready to wire into the client.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rpc_url: Url,
    pub wallet_url: Url,
    pub contract_address: Address,
    pub receipt_poll_interval: Duration,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<Endpoints> {
        let rpc_url = parse_http_url("rpc_url", &self.rpc_url)?;
        let wallet_url = match &self.wallet_url {
            Some(raw) => parse_http_url("wallet_url", raw)?,
            None => rpc_url.clone(),
        };
        let Some(raw_address) = self.contract_address.as_deref() else {
            bail!("contract_address is not configured (set it in market.toml, MARKET_CONTRACT_ADDRESS or --contract)");
        };
        let contract_address = raw_address
            .trim()
            .parse::<Address>()
            .with_context(|| format!("invalid contract_address '{raw_address}'"))?;
        if self.receipt_poll_ms == 0 {
            bail!("receipt_poll_ms must be greater than zero");
        }

        Ok(Endpoints {
            rpc_url,
            wallet_url,
            contract_address,
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_ms),
        })
    }
}

fn parse_http_url(name: &str, raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid {name} '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{name} must use http or https, got '{}'", url.scheme());
    }
    Ok(url)
}

/// Defaults, then the config file if present, then the process environment.
pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(config_path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse '{}'", config_path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", config_path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.rpc_url {
        settings.rpc_url = v;
    }
    if let Some(v) = file_cfg.wallet_url {
        settings.wallet_url = Some(v);
    }
    if let Some(v) = file_cfg.contract_address {
        settings.contract_address = Some(v);
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.receipt_poll_ms {
        settings.receipt_poll_ms = v;
    }
    if let Some(v) = file_cfg.use_wallet {
        settings.use_wallet = v;
    }
}

/// `MARKET_*` variables first, `APP__*` variables win when both are set.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("MARKET_{name}")));

    if let Some(v) = var("RPC_URL") {
        settings.rpc_url = v;
    }
    if let Some(v) = var("WALLET_URL") {
        settings.wallet_url = Some(v);
    }
    if let Some(v) = var("CONTRACT_ADDRESS") {
        settings.contract_address = Some(v);
    }
    if let Some(v) = var("DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
        settings.database_url = v;
    }
    if let Some(v) = var("RECEIPT_POLL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.receipt_poll_ms = parsed;
        }
    }
    if let Some(v) = var("USE_WALLET") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.use_wallet = parsed;
        }
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            prepare_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
        assert_eq!(prepare_database_url("sqlite:data\\m.db"), "sqlite://data/m.db");
        assert_eq!(prepare_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_database_url("  "), Settings::default().database_url);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("market.toml");
        fs::write(
            &path,
            "rpc_url = \"http://node:8545\"\ncontract_address = \"0x00000000000000000000000000000000000000cc\"\nreceipt_poll_ms = 250\n",
        )
        .expect("write config");

        let raw = fs::read_to_string(&path).expect("read");
        let mut settings = Settings::default();
        apply_file(&mut settings, toml::from_str(&raw).expect("parse"));

        assert_eq!(settings.rpc_url, "http://node:8545");
        assert_eq!(settings.receipt_poll_ms, 250);
        assert!(settings.use_wallet);
        let endpoints = settings.validate().expect("valid");
        assert_eq!(endpoints.wallet_url, endpoints.rpc_url);
        assert_eq!(endpoints.receipt_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings.receipt_poll_ms, Settings::default().receipt_poll_ms);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("market.toml");
        fs::write(&path, "receipt_poll_ms = \"soon\"").expect("write");
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn app_prefixed_env_wins_over_market_prefix() {
        let vars = env(&[
            ("MARKET_RPC_URL", "http://market:8545"),
            ("APP__RPC_URL", "http://app:8545"),
            ("MARKET_USE_WALLET", "false"),
            ("DATABASE_URL", "sqlite://./other.db"),
        ]);
        let mut settings = Settings::default();
        apply_env(&mut settings, |key| vars.get(key).cloned());

        assert_eq!(settings.rpc_url, "http://app:8545");
        assert!(!settings.use_wallet);
        assert_eq!(settings.database_url, "sqlite://./other.db");
    }

    #[test]
    fn validate_requires_contract_address_and_http_urls() {
        let settings = Settings::default();
        assert!(settings.validate().is_err());

        let settings = Settings {
            contract_address: Some("0x00000000000000000000000000000000000000cc".into()),
            wallet_url: Some("ws://127.0.0.1:8546".into()),
            ..Settings::default()
        };
        let err = settings.validate().expect_err("ws is not accepted");
        assert!(err.to_string().contains("wallet_url"));

        let settings = Settings {
            contract_address: Some("0xnot-an-address".into()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
