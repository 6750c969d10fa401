use rsi_screener::analysis::RefreshContext;
use rsi_screener::klines::Lookback;
use rsi_screener::storage_utils::{AppConfig, AsyncStorageManager};
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rsi-screener-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test]
async fn missing_config_is_written_with_defaults() {
    let dir = scratch_dir("init");
    let storage = AsyncStorageManager::new(&dir).await.unwrap();

    let config: AppConfig = storage.load_or_init("config").await.unwrap();
    assert_eq!(config, AppConfig::default());
    assert!(dir.join("config.json").exists());
    assert!(!dir.join("config.json.tmp").exists());

    let reloaded: AppConfig = storage.load("config").await.unwrap();
    assert_eq!(reloaded, config);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn existing_config_is_not_overwritten() {
    let dir = scratch_dir("existing");
    let storage = AsyncStorageManager::new(&dir).await.unwrap();

    let custom = AppConfig {
        symbols: vec!["AAPL".into(), "MSFT".into()],
        market_suffix: String::new(),
        rsi_period: 21,
        lookback_months: 3,
        ..AppConfig::default()
    };
    storage.save("config", &custom).await.unwrap();

    let loaded: AppConfig = storage.load_or_init("config").await.unwrap();
    assert_eq!(loaded, custom);
    assert!(loaded.validate().is_ok());

    let ctx = RefreshContext::from_config(&loaded);
    assert_eq!(ctx.window, 21);
    assert_eq!(ctx.lookback, Lookback::months(3));
    assert_eq!(ctx.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    assert_eq!(ctx.market_suffix, "");

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn unparsable_config_is_an_error() {
    let dir = scratch_dir("broken");
    let storage = AsyncStorageManager::new(&dir).await.unwrap();
    std::fs::write(dir.join("config.json"), b"{ not json").unwrap();

    let result: anyhow::Result<AppConfig> = storage.load("config").await;
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("parsing"));

    std::fs::remove_dir_all(&dir).unwrap();
}
