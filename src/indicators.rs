//! Wilder-smoothed Relative Strength Index and the regime classifier built on it.

use serde::{Deserialize, Serialize};

/// RSI strictly above this value is overbought.
pub const OVERBOUGHT_THRESHOLD: f64 = 70.0;
/// RSI strictly below this value is oversold.
pub const OVERSOLD_THRESHOLD: f64 = 30.0;

/// Compute the RSI series for `prices` (oldest first) using a smoothing `window`.
///
/// The result is aligned index-for-index with `prices`. An empty vector means
/// there is not enough history (fewer than `window + 1` prices) and the caller
/// should skip the symbol.
///
/// The first `window` positions all report the RSI of the seed averages. From
/// index `window` onward each position applies one Wilder smoothing step using
/// the delta that ends one bar earlier, so the first step re-reads the last
/// seed delta.
///
/// When the seeded average loss is zero the whole series is 100 (some gains)
/// or 50 (no movement) and no smoothing happens.
pub fn compute_rsi(prices: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || prices.len() <= window {
        return Vec::new();
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|&d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|&d| (-d).max(0.0)).collect();

    let period = window as f64;
    let mut avg_gain = gains[..window].iter().sum::<f64>() / period;
    let mut avg_loss = losses[..window].iter().sum::<f64>() / period;

    if avg_loss == 0.0 {
        let flat = if avg_gain > 0.0 { 100.0 } else { 50.0 };
        return vec![flat; prices.len()];
    }

    let mut rsi = vec![rsi_from_averages(avg_gain, avg_loss); prices.len()];

    for i in window..prices.len() {
        avg_gain = (avg_gain * (period - 1.0) + gains[i - 1]) / period;
        avg_loss = (avg_loss * (period - 1.0) + losses[i - 1]) / period;

        rsi[i] = if avg_loss == 0.0 {
            if avg_gain > 0.0 { 100.0 } else { 50.0 }
        } else {
            rsi_from_averages(avg_gain, avg_loss)
        };
    }

    rsi
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Momentum state of a symbol derived from its latest RSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Overbought,
    Neutral,
    Oversold,
}

impl Regime {
    pub fn label(&self) -> &'static str {
        match self {
            Regime::Overbought => "Overbought",
            Regime::Neutral => "Neutral",
            Regime::Oversold => "Oversold",
        }
    }
}

/// Classify an RSI value. Both thresholds are exclusive, so 70 and 30 are
/// neutral. NaN falls through to neutral as well.
pub fn classify(rsi: f64) -> Regime {
    if rsi > OVERBOUGHT_THRESHOLD {
        Regime::Overbought
    } else if rsi < OVERSOLD_THRESHOLD {
        Regime::Oversold
    } else {
        Regime::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [f64; 15] = [
        44.0, 44.25, 44.5, 43.75, 44.65, 45.1, 45.4, 45.85, 46.3, 46.1, 46.4, 46.45, 46.3, 46.2,
        46.3,
    ];

    #[test]
    fn empty_when_history_too_short() {
        assert!(compute_rsi(&[], 14).is_empty());
        assert!(compute_rsi(&SAMPLE[..14], 14).is_empty());
        assert!(compute_rsi(&[1.0, 2.0], 2).is_empty());
    }

    #[test]
    fn zero_window_is_empty() {
        assert!(compute_rsi(&SAMPLE, 0).is_empty());
    }

    #[test]
    fn huge_window_is_empty() {
        assert!(compute_rsi(&[1.0, 2.0, 3.0], usize::MAX).is_empty());
        assert!(compute_rsi(&SAMPLE, usize::MAX - 1).is_empty());
    }

    #[test]
    fn sample_series_seed_and_one_step() {
        let rsi = compute_rsi(&SAMPLE, 14);
        assert_eq!(rsi.len(), 15);

        let seed = rsi[0];
        assert!((seed - 74.468_085_106_383).abs() < 1e-9, "seed was {seed}");
        for &v in &rsi[..14] {
            assert_eq!(v.to_bits(), seed.to_bits());
        }

        // One smoothing step re-reading delta[13] (+0.10).
        assert!((rsi[14] - 75.04).abs() < 1e-9, "last was {}", rsi[14]);
    }

    #[test]
    fn sample_series_is_bit_for_bit_reproducible() {
        let a = compute_rsi(&SAMPLE, 14);
        let b = compute_rsi(&SAMPLE, 14);
        let a_bits: Vec<u64> = a.iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u64> = b.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn flat_series_is_fifty_everywhere() {
        let rsi = compute_rsi(&[100.0; 30], 14);
        assert_eq!(rsi.len(), 30);
        assert!(rsi.iter().all(|&v| v == 50.0));
    }

    #[test]
    fn rising_series_is_hundred_everywhere() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let rsi = compute_rsi(&closes, 14);
        assert_eq!(rsi.len(), 30);
        assert!(rsi.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn falling_series_approaches_zero() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let rsi = compute_rsi(&closes, 5);
        assert_eq!(rsi.len(), 30);
        assert!(rsi.iter().all(|&v| (0.0..=100.0).contains(&v)));
        assert!(rsi[29].abs() < 1e-9);
    }

    #[test]
    fn rising_after_a_single_dip_converges_towards_hundred() {
        let mut closes = vec![10.0, 9.0];
        closes.extend((0..60).map(|x| 10.0 + x as f64));
        let rsi = compute_rsi(&closes, 7);
        assert_eq!(rsi.len(), closes.len());
        for pair in rsi[7..].windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        let last = *rsi.last().unwrap();
        assert!(last > 99.0 && last <= 100.0, "last was {last}");
    }

    #[test]
    fn smoothed_loss_reaching_zero_reports_hundred() {
        // With a window of 1 the smoothed average is just the latest delta.
        let rsi = compute_rsi(&[2.0, 1.0, 2.0, 3.0], 1);
        assert_eq!(rsi, vec![0.0, 0.0, 100.0, 100.0]);
    }

    #[test]
    fn smoothed_flat_tail_after_losses_stays_finite() {
        let closes = [10.0, 9.0, 10.0, 11.0, 12.0, 13.0];
        let rsi = compute_rsi(&closes, 2);
        assert_eq!(rsi.len(), 6);
        assert!(rsi.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn classify_boundaries_are_neutral() {
        assert_eq!(classify(70.0), Regime::Neutral);
        assert_eq!(classify(70.0001), Regime::Overbought);
        assert_eq!(classify(30.0), Regime::Neutral);
        assert_eq!(classify(29.9999), Regime::Oversold);
        assert_eq!(classify(50.0), Regime::Neutral);
        assert_eq!(classify(f64::NAN), Regime::Neutral);
    }

    #[test]
    fn regime_labels() {
        assert_eq!(Regime::Overbought.label(), "Overbought");
        assert_eq!(Regime::Oversold.label(), "Oversold");
        assert_eq!(Regime::Neutral.label(), "Neutral");
    }
}
