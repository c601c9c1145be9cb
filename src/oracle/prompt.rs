//! Prompt assembly for the decision oracle

use rust_decimal::Decimal;
use serde_json::json;

use crate::domain::{MarketSnapshot, WalletBalances};
use crate::persistence::Position;

const AVAILABLE_STRATEGIES: &str = "\
The available trading strategies are:
1. atr_stop: period (14), multiplier (2.0), consecutive_candles (2), atr_min_threshold (0.0), lock_candles (2), gap_threshold (0.03).
2. bollinger: period (20), stddev (2).
3. ichimoku: tenkan_period (9), kijun_period (26), senkou_span_b_period (52), displacement (26).
4. ma_crossover: fast (10), slow (50).
5. macd: fast (12), slow (26), signal (9).
6. range_trading: period (20), buy_threshold (10), sell_threshold (10), max_range_pct (10).
7. rsi: period (14), overbought (70), oversold (30).
8. stochastic: k_period (14), d_period (3), overbought (80), oversold (20).
Every strategy also accepts timeframe (kline interval, e.g. \"4h\") and size_pct or size.";

/// Everything the oracle sees for one cycle
#[derive(Debug, Clone)]
pub struct OracleContext {
    pub snapshot: MarketSnapshot,
    pub wallet: WalletBalances,
    pub position: Option<Position>,
    pub hours_since_last_trade: Option<f64>,
    /// Processed output of the previous cycle
    pub previous_decision: Option<String>,
    pub base_asset: String,
    pub quote_asset: String,
    pub fee_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn build(ctx: &OracleContext) -> Self {
        let price = ctx.snapshot.last_price;
        let fee_pct = ctx.fee_rate * Decimal::ONE_HUNDRED;
        let system = format!(
            "You are an expert trading advisor managing a {base}/{quote} spot wallet.\n\
             - {base} balance: {base_bal}\n\
             - {quote} balance: {quote_bal}\n\
             The current price of {base} is approximately {price} {quote}.\n\
             Every BUY or SELL pays a {fee_pct}% fee; size orders so the net position stays valid.\n\
             For a BUY, size = {quote} balance * fraction / price. For a SELL, size = {base} balance * fraction.\n\
             Orders must fit the real balances. Return ONLY a JSON array of decisions.",
            base = ctx.base_asset,
            quote = ctx.quote_asset,
            base_bal = ctx.wallet.base,
            quote_bal = ctx.wallet.quote,
            price = price,
            fee_pct = fee_pct.normalize(),
        );

        let position = match &ctx.position {
            Some(p) => json!({
                "side": p.side,
                "size": p.size,
                "entry_price": p.entry_price,
                "opened_at": p.opened_at.to_rfc3339(),
            })
            .to_string(),
            None => "None".to_string(),
        };
        let hours = ctx
            .hours_since_last_trade
            .map(|h| format!("{:.2}", h))
            .unwrap_or_else(|| "n/a".to_string());

        let user = format!(
            "Context about available strategies:\n{strategies}\n\n\
             Market data (JSON):\n{market}\n\n\
             Wallet balances: {{\"{base}\": {base_bal}, \"{quote}\": {quote_bal}}}\n\
             Current positions: {position}\n\
             Hours since last trade: {hours}\n\
             Previous decision: {previous}\n\n\
             Return ONLY a JSON array of decisions. Each item has an \"analysis\" and an \"action\" \
             of HOLD, DIRECT_ORDER (with \"side\" and \"size\" or \"size_pct\") or STRATEGY \
             (with \"strategy_name\" and \"params\"). Example:\n\
             [{{\"analysis\": \"Overbought.\", \"action\": \"DIRECT_ORDER\", \"side\": \"SELL\", \"size_pct\": 0.5}},\n \
             {{\"analysis\": \"Mean reversion.\", \"action\": \"STRATEGY\", \"strategy_name\": \"rsi\", \"params\": {{\"period\": 14, \"overbought\": 70, \"oversold\": 30}}}}]",
            strategies = AVAILABLE_STRATEGIES,
            market = ctx.snapshot.summary(30),
            base = ctx.base_asset,
            quote = ctx.quote_asset,
            base_bal = ctx.wallet.base,
            quote_bal = ctx.wallet.quote,
            position = position,
            hours = hours,
            previous = ctx.previous_decision.as_deref().unwrap_or("None"),
        );

        Self { system, user }
    }

    /// Artifact form of the prompt
    pub fn render(&self) -> String {
        format!("SYSTEM MESSAGE:\n{}\n\nUSER PROMPT:\n{}", self.system, self.user)
    }
}
