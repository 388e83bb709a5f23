//! Trading account ledger
//!
//! Every operation validates before it mutates, so a rejected operation
//! leaves balance, holdings and the transaction log untouched. Each
//! accepted operation appends exactly one transaction.

pub mod prices;
pub mod report;

pub use prices::{FixedPriceSource, PriceSource};

use crate::error::SidekickError;
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Transaction {
    pub kind: TransactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Cash moved by the operation
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    fn cash(kind: TransactionKind, amount: Decimal) -> Self {
        Self {
            kind,
            symbol: None,
            quantity: None,
            price: None,
            amount,
            timestamp: Utc::now(),
        }
    }

    fn trade(kind: TransactionKind, symbol: &str, quantity: u64, price: Decimal, amount: Decimal) -> Self {
        Self {
            kind,
            symbol: Some(symbol.to_string()),
            quantity: Some(quantity),
            price: Some(price),
            amount,
            timestamp: Utc::now(),
        }
    }
}

/// Serializable view of an account, with valuations at current prices
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub balance: Decimal,
    pub initial_deposit: Decimal,
    pub holdings: BTreeMap<String, u64>,
    pub portfolio_value: Decimal,
    pub profit_loss: Decimal,
    pub transaction_count: usize,
}

pub struct Account {
    account_id: String,
    balance: Decimal,
    initial_deposit: Decimal,
    holdings: BTreeMap<String, u64>,
    transactions: Vec<Transaction>,
    prices: Arc<dyn PriceSource>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("account_id", &self.account_id)
            .field("balance", &self.balance)
            .field("initial_deposit", &self.initial_deposit)
            .field("holdings", &self.holdings)
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Account {
    pub fn create(
        account_id: &str,
        initial_deposit: Decimal,
        prices: Arc<dyn PriceSource>,
    ) -> Result<Self> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(SidekickError::InvalidAmount(
                "account id must not be blank".to_string(),
            ));
        }
        if initial_deposit < Decimal::ZERO {
            return Err(SidekickError::InvalidAmount(format!(
                "initial deposit must not be negative, got {}",
                initial_deposit
            )));
        }

        info!(account_id, %initial_deposit, "Account created");

        Ok(Self {
            account_id: account_id.to_string(),
            balance: initial_deposit,
            initial_deposit,
            holdings: BTreeMap::new(),
            transactions: vec![Transaction::cash(TransactionKind::Deposit, initial_deposit)],
            prices,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn initial_deposit(&self) -> Decimal {
        self.initial_deposit
    }

    pub fn holdings(&self) -> &BTreeMap<String, u64> {
        &self.holdings
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<()> {
        require_positive(amount)?;
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| SidekickError::InvalidAmount(format!("deposit of {} overflows", amount)))?;

        self.balance = balance;
        self.transactions
            .push(Transaction::cash(TransactionKind::Deposit, amount));
        info!(account_id = %self.account_id, %amount, balance = %self.balance, "Deposit");
        Ok(())
    }

    pub fn withdraw(&mut self, amount: Decimal) -> Result<()> {
        require_positive(amount)?;
        if amount > self.balance {
            warn!(account_id = %self.account_id, %amount, balance = %self.balance, "Withdrawal rejected");
            return Err(SidekickError::InsufficientFunds {
                requested: amount,
                available: self.balance,
            });
        }

        self.balance -= amount;
        self.transactions
            .push(Transaction::cash(TransactionKind::Withdraw, amount));
        info!(account_id = %self.account_id, %amount, balance = %self.balance, "Withdrawal");
        Ok(())
    }

    pub fn buy(&mut self, symbol: &str, quantity: i64) -> Result<()> {
        let quantity = require_quantity(quantity)?;
        let symbol = normalize_symbol(symbol);
        let price = self.prices.price(&symbol)?;
        let cost = price
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(|| SidekickError::InvalidAmount(format!("cost of {} {} overflows", quantity, symbol)))?;

        if cost > self.balance {
            warn!(account_id = %self.account_id, %symbol, quantity, %cost, balance = %self.balance, "Buy rejected");
            return Err(SidekickError::InsufficientFunds {
                requested: cost,
                available: self.balance,
            });
        }

        let held = self.holdings.get(&symbol).copied().unwrap_or(0);
        let new_held = held
            .checked_add(quantity)
            .ok_or_else(|| SidekickError::InvalidAmount(format!("holding of {} overflows", symbol)))?;

        self.balance -= cost;
        self.holdings.insert(symbol.clone(), new_held);
        self.transactions.push(Transaction::trade(
            TransactionKind::Buy,
            &symbol,
            quantity,
            price,
            cost,
        ));
        info!(account_id = %self.account_id, %symbol, quantity, %price, balance = %self.balance, "Bought shares");
        Ok(())
    }

    pub fn sell(&mut self, symbol: &str, quantity: i64) -> Result<()> {
        let quantity = require_quantity(quantity)?;
        let symbol = normalize_symbol(symbol);

        let held = self.holdings.get(&symbol).copied().unwrap_or(0);
        if held < quantity {
            warn!(account_id = %self.account_id, %symbol, quantity, held, "Sell rejected");
            return Err(SidekickError::InsufficientShares {
                symbol,
                requested: quantity,
                held,
            });
        }

        let price = self.prices.price(&symbol)?;
        let proceeds = price
            .checked_mul(Decimal::from(quantity))
            .and_then(|p| self.balance.checked_add(p).map(|balance| (p, balance)));
        let Some((proceeds, balance)) = proceeds else {
            return Err(SidekickError::InvalidAmount(format!(
                "proceeds of {} {} overflow",
                quantity, symbol
            )));
        };

        if held == quantity {
            self.holdings.remove(&symbol);
        } else {
            self.holdings.insert(symbol.clone(), held - quantity);
        }
        self.balance = balance;
        self.transactions.push(Transaction::trade(
            TransactionKind::Sell,
            &symbol,
            quantity,
            price,
            proceeds,
        ));
        info!(account_id = %self.account_id, %symbol, quantity, %price, balance = %self.balance, "Sold shares");
        Ok(())
    }

    /// Value of all holdings at current prices (cash excluded)
    pub fn portfolio_value(&self) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for (symbol, quantity) in &self.holdings {
            let price = self.prices.price(symbol)?;
            total += price * Decimal::from(*quantity);
        }
        Ok(total)
    }

    pub fn profit_loss(&self) -> Result<Decimal> {
        Ok(self.portfolio_value()? + self.balance - self.initial_deposit)
    }

    pub fn snapshot(&self) -> Result<AccountSnapshot> {
        let portfolio_value = self.portfolio_value()?;
        Ok(AccountSnapshot {
            account_id: self.account_id.clone(),
            balance: self.balance,
            initial_deposit: self.initial_deposit,
            holdings: self.holdings.clone(),
            portfolio_value,
            profit_loss: portfolio_value + self.balance - self.initial_deposit,
            transaction_count: self.transactions.len(),
        })
    }
}

/// Trimmed, upper-cased ticker
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(SidekickError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn require_quantity(quantity: i64) -> Result<u64> {
    if quantity <= 0 {
        return Err(SidekickError::InvalidAmount(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(quantity as u64)
}
