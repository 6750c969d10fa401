use crate::error::ConfigError;
use crate::klines::Lookback;
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;

// CONFIGURATION STRUCTS

const NIFTY_50_SYMBOLS: &[&str] = &[
    "RELIANCE.NS", "TCS.NS", "HDFCBANK.NS", "ICICIBANK.NS", "INFY.NS",
    "HINDUNILVR.NS", "ITC.NS", "KOTAKBANK.NS", "BHARTIARTL.NS", "LT.NS",
    "SBIN.NS", "BAJFINANCE.NS", "HCLTECH.NS", "ASIANPAINT.NS", "MARUTI.NS",
    "TITAN.NS", "SUNPHARMA.NS", "AXISBANK.NS", "ULTRACEMCO.NS", "NTPC.NS",
    "ONGC.NS", "NESTLEIND.NS", "POWERGRID.NS", "M&M.NS", "TECHM.NS",
    "WIPRO.NS", "ADANIPORTS.NS", "JSWSTEEL.NS", "HDFCLIFE.NS", "DRREDDY.NS",
    "BAJAJFINSV.NS", "TATASTEEL.NS", "BRITANNIA.NS", "GRASIM.NS", "SHREECEM.NS",
    "UPL.NS", "DIVISLAB.NS", "IOC.NS", "COALINDIA.NS", "BPCL.NS", "CIPLA.NS",
    "HINDALCO.NS", "INDUSINDBK.NS", "EICHERMOT.NS", "HEROMOTOCO.NS", "VEDL.NS",
    "JINDALSTEL.NS", "GAIL.NS", "TATACONSUM.NS", "HDFCAMC.NS", "APOLLOHOSP.NS",
];

// Plain tickers plus Yahoo decorations: index carets, "=X" pairs, ".NS" style suffixes.
static SYMBOL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\^?[A-Z0-9][A-Z0-9&\-_]*(=[A-Z])?(\.[A-Z]{1,3})?$").expect("valid symbol regex")
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) rsi-screener/0.1".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub market_suffix: String, // stripped for display, e.g. ".NS"
    pub rsi_period: usize,
    pub period_choices: Vec<usize>,
    pub lookback_months: u32,
    pub refresh_interval_secs: u64,
    pub max_concurrent_fetches: usize,
    pub page_size: usize,
    pub log_level: String,
    pub provider: ProviderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: NIFTY_50_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            market_suffix: ".NS".to_string(),
            rsi_period: 14,
            period_choices: (1..=10).map(|i| i * 7).collect(),
            lookback_months: 2,
            refresh_interval_secs: 300,
            max_concurrent_fetches: 8,
            page_size: 10,
            log_level: "info".to_string(),
            provider: ProviderConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn lookback(&self) -> Lookback {
        Lookback::months(self.lookback_months)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if let Some(bad) = self.symbols.iter().find(|s| !SYMBOL_PATTERN.is_match(s)) {
            return Err(ConfigError::InvalidSymbol(bad.clone()));
        }

        let positive = [
            ("rsi_period", self.rsi_period),
            ("lookback_months", self.lookback_months as usize),
            ("max_concurrent_fetches", self.max_concurrent_fetches),
            ("page_size", self.page_size),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field: *field });
        }
        if self.period_choices.contains(&0) {
            return Err(ConfigError::Zero {
                field: "period_choices",
            });
        }

        let needed = self.rsi_period.saturating_add(1);
        let covered = self.lookback().approx_trading_days();
        if covered < needed {
            // Not fatal: short histories are skipped per symbol.
            tracing::warn!(
                rsi_period = self.rsi_period,
                lookback_months = self.lookback_months,
                covered,
                needed,
                "lookback is unlikely to cover the RSI window"
            );
        }
        Ok(())
    }

    /// Selectable periods with the active one always present, sorted.
    pub fn periods(&self) -> Vec<usize> {
        let mut periods = self.period_choices.clone();
        if !periods.contains(&self.rsi_period) {
            periods.push(self.rsi_period);
        }
        periods.sort_unstable();
        periods.dedup();
        periods
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted at `base_dir`, creating the directory if needed.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("creating storage dir {:?}", base_dir))?;
        }
        Ok(Self { base_dir })
    }

    /// **Constructor: new_relative**
    /// Resolves the storage path relative to the directory of the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// **Generic Save Function**
    /// Writes pretty JSON to a .tmp file then renames it over the target, so a
    /// crash mid-write leaves the previous file intact.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    /// **Generic Load Function**
    /// Reads raw bytes (serde_json validates UTF-8 while parsing).
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        let content = fs::read(&path)
            .await
            .with_context(|| format!("reading {:?}", path))?;
        let data =
            serde_json::from_slice(&content).with_context(|| format!("parsing {:?}", path))?;
        Ok(data)
    }

    /// Loads `filename`, or writes `T::default()` there first if it does not exist.
    pub async fn load_or_init<T>(&self, filename: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let path = self.base_dir.join(format!("{}.json", filename));
        if !fs::try_exists(&path).await? {
            let data = T::default();
            self.save(filename, &data).await?;
            tracing::info!(path = ?path, "wrote default configuration");
            return Ok(data);
        }
        self.load(filename).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.symbols.len(), 51);
        assert_eq!(config.rsi_period, 14);
        assert_eq!(config.period_choices, vec![7, 14, 21, 28, 35, 42, 49, 56, 63, 70]);
        assert_eq!(config.lookback(), Lookback::months(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn symbol_pattern_accepts_yahoo_forms() {
        for s in ["TCS.NS", "M&M.NS", "BAJAJ-AUTO.NS", "^NSEI", "AAPL", "EURUSD=X", "BRK-B"] {
            assert!(SYMBOL_PATTERN.is_match(s), "{s} should be accepted");
        }
        for s in ["", "tcs.ns", "TCS NS", "TCS.NSEXX", ".NS"] {
            assert!(!SYMBOL_PATTERN.is_match(s), "{s} should be rejected");
        }
    }

    #[test]
    fn empty_universe_is_rejected() {
        let config = AppConfig {
            symbols: vec![],
            ..AppConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSymbols));
    }

    #[test]
    fn bad_symbol_is_rejected() {
        let config = AppConfig {
            symbols: vec!["TCS.NS".into(), "not a symbol".into()],
            ..AppConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidSymbol("not a symbol".into()))
        );
    }

    #[test]
    fn zero_fields_are_rejected() {
        let config = AppConfig {
            rsi_period: 0,
            ..AppConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "rsi_period"
            })
        );

        let config = AppConfig {
            max_concurrent_fetches: 0,
            ..AppConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "max_concurrent_fetches"
            })
        );
    }

    #[test]
    fn long_period_with_short_lookback_only_warns() {
        let config = AppConfig {
            rsi_period: 70,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn huge_period_only_warns() {
        let config = AppConfig {
            rsi_period: usize::MAX,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn periods_include_active_period() {
        let config = AppConfig {
            rsi_period: 10,
            ..AppConfig::default()
        };
        assert_eq!(config.periods(), vec![7, 10, 14, 21, 28, 35, 42, 49, 56, 63, 70]);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"symbols": ["AAPL"], "rsi_period": 21}"#).unwrap();
        assert_eq!(config.symbols, vec!["AAPL".to_string()]);
        assert_eq!(config.rsi_period, 21);
        assert_eq!(config.market_suffix, ".NS");
        assert_eq!(config.provider, ProviderConfig::default());
    }
}
