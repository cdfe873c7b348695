//! Trade counters, equity curve, drawdown, and Sharpe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

/// Daily returns kept for the Sharpe window (one trading year).
pub const DAILY_RETURN_WINDOW: usize = 252;

/// Process-wide aggregate statistics. Persisted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: u64,
    pub profitable_trades: u64,
    pub total_profit_usd: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub annualized_return_pct: f64,
    #[serde(default)]
    pub daily_returns: VecDeque<f64>,
}

impl PerformanceStats {
    /// Win rate in percent; zero before the first trade.
    #[must_use]
    pub fn win_rate_pct(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.profitable_trades as f64 / self.total_trades as f64 * 100.0
    }
}

/// Maintains [`PerformanceStats`] across the engine's periodic ticks.
#[derive(Debug)]
pub struct PerformanceTracker {
    stats: PerformanceStats,
    peak_equity: f64,
    previous_equity: f64,
    started_at: Option<DateTime<Utc>>,
    last_daily_sample: Option<DateTime<Utc>>,
}

impl PerformanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::from_stats(PerformanceStats::default())
    }

    /// Resumes tracking from persisted stats.
    #[must_use]
    pub fn from_stats(stats: PerformanceStats) -> Self {
        Self {
            stats,
            peak_equity: 0.0,
            previous_equity: 0.0,
            started_at: None,
            last_daily_sample: None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    /// Counts a newly opened trade.
    pub fn record_trade_opened(&mut self) {
        self.stats.total_trades += 1;
    }

    /// Counts a closed trade and its realised PnL.
    pub fn record_trade_closed(&mut self, pnl_usd: f64) {
        if pnl_usd > 0.0 {
            self.stats.profitable_trades += 1;
        }
        self.stats.total_profit_usd += pnl_usd;
    }

    /// Appends a daily return, keeping at most one trading year of samples.
    pub fn add_daily_return(&mut self, return_pct: f64) {
        self.stats.daily_returns.push_back(return_pct);
        while self.stats.daily_returns.len() > DAILY_RETURN_WINDOW {
            self.stats.daily_returns.pop_front();
        }
    }

    /// Periodic stats tick: equity peak and drawdown, ~daily return
    /// sampling, annualised return, and Sharpe.
    pub fn update(&mut self, now: DateTime<Utc>, unrealized_pnl_usd: f64, deployed_usd: f64) {
        let equity = self.stats.total_profit_usd + unrealized_pnl_usd;

        let started_at = *self.started_at.get_or_insert(now);
        if self.last_daily_sample.is_none() {
            self.last_daily_sample = Some(now);
            self.previous_equity = equity;
            self.peak_equity = equity;
        }

        if equity > self.peak_equity {
            self.peak_equity = equity;
        } else if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - equity) / self.peak_equity * 100.0;
            if drawdown > self.stats.max_drawdown_pct {
                self.stats.max_drawdown_pct = drawdown;
            }
        }

        // Sample a daily return once a day or so.
        if let Some(last) = self.last_daily_sample {
            if now - last >= chrono::Duration::hours(24) {
                if self.previous_equity > 0.0 {
                    let daily_return =
                        (equity - self.previous_equity) / self.previous_equity * 100.0;
                    self.add_daily_return(daily_return);
                }
                self.previous_equity = equity;
                self.last_daily_sample = Some(now);
            }
        }

        let elapsed_hours = (now - started_at).num_minutes() as f64 / 60.0;
        if elapsed_hours > 0.0 && deployed_usd > 0.0 {
            let years = elapsed_hours / (24.0 * 365.0);
            self.stats.annualized_return_pct =
                (self.stats.total_profit_usd / deployed_usd) / years * 100.0;
        }

        self.stats.sharpe_ratio = self.sharpe();

        info!(
            trades = self.stats.total_trades,
            profitable = self.stats.profitable_trades,
            win_rate_pct = self.stats.win_rate_pct(),
            total_profit_usd = self.stats.total_profit_usd,
            max_drawdown_pct = self.stats.max_drawdown_pct,
            sharpe = self.stats.sharpe_ratio,
            "performance stats updated"
        );
    }

    /// Annualised Sharpe from the daily-return window; falls back to
    /// return-over-drawdown before two samples exist.
    fn sharpe(&self) -> f64 {
        let returns = &self.stats.daily_returns;
        if returns.len() >= 2 {
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
            let stdev = variance.sqrt();
            if stdev > 0.0 {
                return mean / stdev * 252.0_f64.sqrt();
            }
            return self.stats.sharpe_ratio;
        }
        if self.stats.max_drawdown_pct > 0.0 {
            return self.stats.annualized_return_pct / self.stats.max_drawdown_pct;
        }
        self.stats.sharpe_ratio
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
