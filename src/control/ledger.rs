//! Wallet performance ledger
//!
//! One snapshot per orchestrator cycle. The first recorded total is the
//! "since start" baseline; rolling horizons compare against the newest
//! snapshot at least that old.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::domain::WalletBalances;

/// Enough for 7 days of 4h cycles with room for shorter intervals
const MAX_SNAPSHOTS: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub at: DateTime<Utc>,
    pub base: Decimal,
    pub quote: Decimal,
    /// Wallet value in the quote asset at the cycle price
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HorizonChange {
    pub label: &'static str,
    /// `None` until a snapshot old enough exists
    pub change: Option<(Decimal, Decimal)>,
}

#[derive(Debug, Default)]
pub struct BalanceLedger {
    initial_total: Option<Decimal>,
    history: VecDeque<BalanceSnapshot>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: DateTime<Utc>, wallet: &WalletBalances, price: Decimal) {
        let total = wallet.total_in_quote(price);
        if self.initial_total.is_none() {
            self.initial_total = Some(total);
        }
        if self.history.len() == MAX_SNAPSHOTS {
            self.history.pop_front();
        }
        self.history.push_back(BalanceSnapshot {
            at,
            base: wallet.base,
            quote: wallet.quote,
            total,
        });
    }

    pub fn latest(&self) -> Option<&BalanceSnapshot> {
        self.history.back()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Percent and absolute change since start and over 4h/24h/3d/7d
    pub fn performance(&self, now: DateTime<Utc>) -> Vec<HorizonChange> {
        let Some(current) = self.latest().map(|s| s.total) else {
            return Vec::new();
        };

        let mut changes = vec![HorizonChange {
            label: "Since start",
            change: self
                .initial_total
                .filter(|t| !t.is_zero())
                .map(|initial| change(current, initial)),
        }];

        for (label, window) in [
            ("4 h", Duration::hours(4)),
            ("24 h", Duration::days(1)),
            ("3 d", Duration::days(3)),
            ("7 d", Duration::days(7)),
        ] {
            let cutoff = now - window;
            let past = self
                .history
                .iter()
                .rev()
                .find(|s| s.at <= cutoff)
                .map(|s| s.total);
            changes.push(HorizonChange {
                label,
                change: past.filter(|p| !p.is_zero()).map(|p| change(current, p)),
            });
        }
        changes
    }

    /// Operator-facing report
    pub fn render(&self, now: DateTime<Utc>, base_asset: &str, quote_asset: &str) -> String {
        let Some(latest) = self.latest() else {
            return "No balance snapshots recorded yet.".to_string();
        };

        let mut lines = vec![
            format!("Snapshot at {}", latest.at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!("{} = {}", base_asset, latest.base.round_dp(6)),
            format!("{} = {}", quote_asset, latest.quote.round_dp(4)),
            String::new(),
        ];
        for horizon in self.performance(now) {
            match horizon.change {
                Some((pct, abs)) => lines.push(format!(
                    "{:<12}{:>+8.2} % ; {:+} ({})",
                    horizon.label,
                    pct,
                    abs.round_dp(0),
                    quote_asset
                )),
                None => lines.push(format!("{:<12}not yet", horizon.label)),
            }
        }
        lines.join("\n")
    }
}

fn change(current: Decimal, past: Decimal) -> (Decimal, Decimal) {
    let abs = current - past;
    (abs / past * Decimal::ONE_HUNDRED, abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_since_start_and_horizons() {
        let now = Utc::now();
        let mut ledger = BalanceLedger::new();
        ledger.record(
            now - Duration::hours(25),
            &WalletBalances::new(Decimal::ZERO, dec!(1000)),
            dec!(50000),
        );
        ledger.record(
            now - Duration::hours(5),
            &WalletBalances::new(dec!(0.01), dec!(500)),
            dec!(50000),
        );
        ledger.record(
            now,
            &WalletBalances::new(dec!(0.01), dec!(600)),
            dec!(50000),
        );

        let perf = ledger.performance(now);
        assert_eq!(perf.len(), 5);
        assert_eq!(perf[0].change, Some((dec!(10), dec!(100))));
        // 4h compares against the 5h-old snapshot (total 1000)
        assert_eq!(perf[1].change, Some((dec!(10), dec!(100))));
        assert_eq!(perf[2].change, Some((dec!(10), dec!(100))));
        assert_eq!(perf[3].change, None);
        assert_eq!(perf[4].change, None);
    }

    #[test]
    fn test_render_empty_and_filled() {
        let now = Utc::now();
        let mut ledger = BalanceLedger::new();
        assert!(ledger.render(now, "BTC", "USDT").contains("No balance snapshots"));

        ledger.record(now, &WalletBalances::new(dec!(0.5), dec!(100)), dec!(40000));
        let text = ledger.render(now, "BTC", "USDT");
        assert!(text.contains("BTC = 0.5"));
        assert!(text.contains("4 h"));
        assert!(text.contains("not yet"));
        assert_eq!(ledger.latest().map(|s| s.total), Some(dec!(20100)));
    }

    #[test]
    fn test_history_is_bounded() {
        let now = Utc::now();
        let mut ledger = BalanceLedger::new();
        for i in 0..(MAX_SNAPSHOTS + 10) {
            ledger.record(
                now + Duration::seconds(i as i64),
                &WalletBalances::new(Decimal::ZERO, Decimal::from(i as u64 + 1)),
                dec!(1),
            );
        }
        assert_eq!(ledger.len(), MAX_SNAPSHOTS);
        // Baseline is the very first record, not the oldest retained
        assert_eq!(ledger.performance(now)[0].change.map(|c| c.1), Some(Decimal::from(MAX_SNAPSHOTS as u64 + 9)));
    }
}
