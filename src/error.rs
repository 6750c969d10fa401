use thiserror::Error;

/// Failures of a single provider call. These never abort a refresh cycle.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("no data for symbol: {0}")]
    NoData(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors that prevent a whole refresh cycle from running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no symbols configured")]
    EmptyUniverse,

    #[error("invalid RSI window {0}: must be positive")]
    InvalidWindow(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("symbol list is empty")]
    NoSymbols,

    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
