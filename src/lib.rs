//! Ranks a fixed equity universe by Wilder-smoothed RSI.
//!
//! [`analysis::refresh`] fetches daily closes through a [`klines::PriceProvider`],
//! runs [`indicators::compute_rsi`] per symbol, classifies the latest value and
//! returns a sorted [`snapshot::Snapshot`].

pub mod analysis;
pub mod comfy_table;
pub mod error;
pub mod indicators;
pub mod klines;
pub mod snapshot;
pub mod storage_utils;
pub mod tui;
