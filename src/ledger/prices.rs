//! Share price lookup

use crate::error::SidekickError;
use crate::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

pub trait PriceSource: Send + Sync {
    /// Current price of one share. `symbol` is already normalised.
    fn price(&self, symbol: &str) -> Result<Decimal>;
}

/// Price table that never changes
#[derive(Debug, Clone)]
pub struct FixedPriceSource {
    prices: HashMap<String, Decimal>,
}

impl FixedPriceSource {
    pub fn new(prices: HashMap<String, Decimal>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(symbol, price)| (super::normalize_symbol(&symbol), price))
                .collect(),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(super::normalize_symbol(symbol), price);
        self
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.prices.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }
}

impl Default for FixedPriceSource {
    fn default() -> Self {
        Self::new(HashMap::from([
            ("AAPL".to_string(), dec!(150)),
            ("TSLA".to_string(), dec!(700)),
            ("GOOGL".to_string(), dec!(2500)),
        ]))
    }
}

impl PriceSource for FixedPriceSource {
    fn price(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| SidekickError::UnknownSymbol(symbol.to_string()))
    }
}
