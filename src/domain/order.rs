use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Lenient parse used for untrusted input ("buy", " SELL ")
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Some(OrderSide::Buy),
            "SELL" | "CLOSE" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(OrderStatus::New),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" => Some(OrderStatus::Canceled),
            "PENDING_CANCEL" => Some(OrderStatus::PendingCancel),
            "REJECTED" => Some(OrderStatus::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Base-asset quantity, already quantized to the lot step
    pub quantity: Decimal,
    /// Stable across retries so the venue can reject duplicates
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            client_order_id: format!("cb-{}", Uuid::new_v4().simple()),
        }
    }
}

/// Venue acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    /// Quote amount spent/received by the fills
    pub cummulative_quote_qty: Decimal,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Volume-weighted fill price, if anything executed
    pub fn avg_fill_price(&self) -> Option<Decimal> {
        if self.executed_qty.is_zero() {
            None
        } else {
            Some(self.cummulative_quote_qty / self.executed_qty)
        }
    }
}

/// An order resting on the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub orig_qty: Decimal,
}

/// Exchange quantity constraints for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSize {
    pub step_size: Decimal,
    pub min_qty: Decimal,
}

impl LotSize {
    pub fn new(step_size: Decimal, min_qty: Decimal) -> Self {
        Self { step_size, min_qty }
    }

    /// Truncate down to a whole number of steps. Never rounds up, so a buy
    /// sized from the free balance cannot overspend.
    pub fn quantize(&self, quantity: Decimal) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if self.step_size <= Decimal::ZERO {
            return quantity;
        }
        let steps = (quantity / self.step_size).trunc();
        (steps * self.step_size).normalize()
    }

    pub fn is_tradable(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_truncates_never_rounds_up() {
        let lot = LotSize::new(dec!(0.00001), dec!(0.00001));
        assert_eq!(lot.quantize(dec!(0.0060099)), dec!(0.00600));
        assert_eq!(lot.quantize(dec!(0.006)), dec!(0.006));

        let coarse = LotSize::new(dec!(0.001), dec!(0.001));
        assert_eq!(coarse.quantize(dec!(0.0069999)), dec!(0.006));
        assert_eq!(coarse.quantize(dec!(0.0009)), Decimal::ZERO);
        assert!(!coarse.is_tradable(coarse.quantize(dec!(0.0009))));
    }

    #[test]
    fn test_quantize_handles_non_positive() {
        let lot = LotSize::new(dec!(0.001), dec!(0.001));
        assert_eq!(lot.quantize(dec!(-1)), Decimal::ZERO);
        assert_eq!(lot.quantize(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!(OrderStatus::parse("FILLED"), Some(OrderStatus::Filled));
        assert_eq!(
            OrderStatus::parse("partially_filled"),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(OrderStatus::parse("UNKNOWN"), None);
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
    }

    #[test]
    fn test_avg_fill_price() {
        let resp = OrderResponse {
            order_id: 1,
            client_order_id: "x".into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            status: OrderStatus::Filled,
            executed_qty: dec!(0.002),
            cummulative_quote_qty: dec!(100),
        };
        assert_eq!(resp.avg_fill_price(), Some(dec!(50000)));
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::parse(" sell "), Some(OrderSide::Sell));
    }
}
