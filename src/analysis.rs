//! The refresh pipeline: fetch every symbol, compute RSI, classify, rank.
//!
//! Each symbol is processed in isolation and ends up either as a [`Row`] or
//! as a [`Skipped`] record with the reason. Nothing a single symbol does can
//! abort the cycle; only an unusable context (no symbols, zero window) is
//! fatal.

use std::time::Instant;

use chrono::Utc;
use thiserror::Error;

use crate::error::{FetchError, RefreshError};
use crate::indicators::{classify, compute_rsi};
use crate::klines::{Lookback, PriceHistory, PriceProvider};
use crate::snapshot::{Row, Snapshot, SnapshotStore};
use crate::storage_utils::AppConfig;

/// Everything one refresh cycle needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshContext {
    pub symbols: Vec<String>,
    pub window: usize,
    pub lookback: Lookback,
    pub max_concurrent_fetches: usize,
    pub market_suffix: String,
}

impl RefreshContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            window: config.rsi_period,
            lookback: config.lookback(),
            max_concurrent_fetches: config.max_concurrent_fetches,
            market_suffix: config.market_suffix.clone(),
        }
    }

    /// Same universe with a different window. Always a full re-run.
    pub fn with_window(&self, window: usize) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}

/// Why a symbol did not make it into the snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("malformed series: {0}")]
    MalformedSeries(String),

    #[error("insufficient history: {len} closes, need {required}")]
    InsufficientHistory { len: usize, required: usize },

    #[error("latest RSI is undefined")]
    UndefinedRsi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    /// Position in the configured universe.
    pub index: usize,
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Row { index: usize, row: Row },
    Skipped(Skipped),
}

/// A completed cycle: the snapshot plus the symbols left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub snapshot: Snapshot,
    pub skipped: Vec<Skipped>,
}

/// Strip the configured market suffix, e.g. "TCS.NS" -> "TCS".
pub fn display_symbol(symbol: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return symbol.to_string();
    }
    symbol.strip_suffix(suffix).unwrap_or(symbol).to_string()
}

/// Reduce provider bars to a flat chronological close series.
///
/// Bars are ordered by date (stable, so same-day bars keep provider order).
/// Bars without a close are gaps and are dropped; a close that is present but
/// not a finite number makes the whole series unusable.
pub fn normalize_closes(history: &PriceHistory) -> Result<Vec<f64>, SkipReason> {
    let mut bars: Vec<_> = history.bars.iter().collect();
    bars.sort_by_key(|bar| bar.date);

    let mut closes = Vec::with_capacity(bars.len());
    for bar in bars {
        match bar.close {
            Some(close) if close.is_finite() => closes.push(close),
            Some(close) => {
                return Err(SkipReason::MalformedSeries(format!(
                    "close {} on {}",
                    close, bar.date
                )));
            }
            None => {}
        }
    }
    Ok(closes)
}

/// Turn one symbol's fetch result into a row or a skip.
pub fn evaluate_symbol(
    index: usize,
    symbol: &str,
    fetched: Result<PriceHistory, FetchError>,
    window: usize,
    market_suffix: &str,
) -> SymbolOutcome {
    let skip = |reason| {
        SymbolOutcome::Skipped(Skipped {
            index,
            symbol: symbol.to_string(),
            reason,
        })
    };

    let history = match fetched {
        Ok(history) => history,
        Err(e) => return skip(SkipReason::FetchFailed(e.to_string())),
    };

    let closes = match normalize_closes(&history) {
        Ok(closes) => closes,
        Err(reason) => return skip(reason),
    };

    let required = window.saturating_add(1);
    if closes.len() < required {
        return skip(SkipReason::InsufficientHistory {
            len: closes.len(),
            required,
        });
    }

    let rsi = compute_rsi(&closes, window);
    let (Some(&last_rsi), Some(&last_price)) = (rsi.last(), closes.last()) else {
        return skip(SkipReason::InsufficientHistory {
            len: closes.len(),
            required,
        });
    };
    if !last_rsi.is_finite() {
        return skip(SkipReason::UndefinedRsi);
    }

    SymbolOutcome::Row {
        index,
        row: Row {
            symbol: display_symbol(symbol, market_suffix),
            price: last_price,
            rsi: last_rsi,
            regime: classify(last_rsi),
        },
    }
}

async fn fetch_and_evaluate(
    provider: &dyn PriceProvider,
    ctx: &RefreshContext,
    index: usize,
    symbol: &str,
) -> SymbolOutcome {
    let fetched = provider.fetch_daily(symbol, ctx.lookback).await;
    evaluate_symbol(index, symbol, fetched, ctx.window, &ctx.market_suffix)
}

/// Rank outcomes into a snapshot. Order of `outcomes` does not matter: rows
/// are sorted by RSI descending, ties by universe position.
pub fn assemble(window: usize, outcomes: Vec<SymbolOutcome>) -> RefreshReport {
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            SymbolOutcome::Row { index, row } => rows.push((index, row)),
            SymbolOutcome::Skipped(s) => skipped.push(s),
        }
    }

    rows.sort_by(|(ia, a), (ib, b)| b.rsi.total_cmp(&a.rsi).then(ia.cmp(ib)));
    skipped.sort_by_key(|s| s.index);

    RefreshReport {
        snapshot: Snapshot {
            generated_at: Utc::now(),
            window,
            rows: rows.into_iter().map(|(_, row)| row).collect(),
        },
        skipped,
    }
}

/// Run one full cycle over the universe.
///
/// At most `max_concurrent_fetches` fetches are in flight. Every symbol is
/// attempted before the report is returned.
pub async fn refresh(
    ctx: &RefreshContext,
    provider: &dyn PriceProvider,
) -> Result<RefreshReport, RefreshError> {
    if ctx.symbols.is_empty() {
        return Err(RefreshError::EmptyUniverse);
    }
    if ctx.window == 0 {
        return Err(RefreshError::InvalidWindow(ctx.window));
    }

    let started = Instant::now();
    let batch_size = ctx.max_concurrent_fetches.max(1);
    let indexed: Vec<(usize, &String)> = ctx.symbols.iter().enumerate().collect();

    let mut outcomes = Vec::with_capacity(ctx.symbols.len());
    for batch in indexed.chunks(batch_size) {
        let tasks: Vec<_> = batch
            .iter()
            .map(|&(index, symbol)| fetch_and_evaluate(provider, ctx, index, symbol))
            .collect();
        outcomes.extend(futures::future::join_all(tasks).await);
    }

    let report = assemble(ctx.window, outcomes);

    for s in &report.skipped {
        tracing::debug!(symbol = %s.symbol, reason = %s.reason, "skipped symbol");
    }
    if report.snapshot.is_empty() {
        tracing::warn!(
            window = ctx.window,
            symbols = ctx.symbols.len(),
            "refresh produced no rows"
        );
    }
    tracing::info!(
        window = ctx.window,
        rows = report.snapshot.rows.len(),
        skipped = report.skipped.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "refresh cycle complete"
    );

    Ok(report)
}

/// Run a cycle and publish it to `store` unless a newer cycle started
/// meanwhile. Returns `None` when the result was discarded as superseded.
/// On error nothing is published and the previous snapshot stays current.
pub async fn refresh_and_publish(
    ctx: &RefreshContext,
    provider: &dyn PriceProvider,
    store: &SnapshotStore,
) -> Result<Option<RefreshReport>, RefreshError> {
    let ticket = store.begin_cycle();
    let report = refresh(ctx, provider).await.inspect_err(|e| {
        tracing::error!(error = %e, "refresh cycle failed");
    })?;

    if store.publish(ticket, report.snapshot.clone()) {
        Ok(Some(report))
    } else {
        tracing::warn!(
            generation = ticket.generation(),
            window = ctx.window,
            "discarding superseded refresh cycle"
        );
        Ok(None)
    }
}
