//! Technical indicators over close prices.
//!
//! SMA is a plain mean of the last `period` closes. EMA is seeded with the SMA
//! of the first `period` closes. RSI uses Wilder smoothing.

/// Latest simple moving average
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series. Entries before the seed are `None`.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for (i, close) in closes.iter().enumerate().skip(period) {
        prev = alpha * close + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    ema_series(closes, period).last().copied().flatten()
}

/// Wilder RSI. Flat or one-sided windows map to 100 (no losses) or 0 (no gains).
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for ch in &changes[..period] {
        if *ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let alpha = 1.0 / period as f64;
    for ch in &changes[period..] {
        let gain = ch.max(0.0);
        let loss = (-ch).max(0.0);
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
    }

    Some(if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(12, 26, 9)
pub fn macd(closes: &[f64]) -> Option<Macd> {
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    let line: Vec<f64> = fast
        .iter()
        .zip(slow.iter())
        .filter_map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema(&line, 9)?;
    let last = *line.last()?;
    Some(Macd {
        line: last,
        signal,
        histogram: last - signal,
    })
}
