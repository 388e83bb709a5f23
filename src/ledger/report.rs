//! Plain-text renderings of an account for humans

use super::{AccountSnapshot, Transaction, TransactionKind};
use std::fmt::Write;

pub fn format_status(snapshot: &AccountSnapshot) -> String {
    let holdings = if snapshot.holdings.is_empty() {
        "none".to_string()
    } else {
        snapshot
            .holdings
            .iter()
            .map(|(symbol, quantity)| format!("{} x{}", symbol, quantity))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let direction = if snapshot.profit_loss < rust_decimal::Decimal::ZERO {
        "Loss"
    } else {
        "Profit"
    };

    format!(
        "Account ID: {}\nBalance: ${:.2}\nPortfolio Value: ${:.2}\n{}: ${:.2}\nHoldings: {}",
        snapshot.account_id,
        snapshot.balance,
        snapshot.portfolio_value,
        direction,
        snapshot.profit_loss.abs(),
        holdings,
    )
}

pub fn format_history(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions yet.".to_string();
    }

    let mut out = String::from("Transaction History:\n");
    for (i, tx) in transactions.iter().enumerate() {
        let line = match tx.kind {
            TransactionKind::Deposit => format!("Deposit: ${:.2}", tx.amount),
            TransactionKind::Withdraw => format!("Withdraw: ${:.2}", tx.amount),
            TransactionKind::Buy | TransactionKind::Sell => {
                let verb = if tx.kind == TransactionKind::Buy { "Buy" } else { "Sell" };
                format!(
                    "{} {} {} @ ${:.2}",
                    verb,
                    tx.quantity.unwrap_or(0),
                    tx.symbol.as_deref().unwrap_or("?"),
                    tx.price.unwrap_or_default(),
                )
            }
        };
        // Writing to a String cannot fail
        let _ = writeln!(out, "{}. {}", i + 1, line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Account, FixedPriceSource};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn test_status_and_history() {
        let mut account =
            Account::create("user123", dec!(1000), Arc::new(FixedPriceSource::default())).unwrap();
        account.buy("AAPL", 2).unwrap();
        account.withdraw(dec!(100)).unwrap();

        let status = format_status(&account.snapshot().unwrap());
        assert!(status.contains("Account ID: user123"));
        assert!(status.contains("Balance: $600.00"));
        assert!(status.contains("Portfolio Value: $300.00"));
        assert!(status.contains("Loss: $100.00"));
        assert!(status.contains("AAPL x2"));

        let history = format_history(account.transactions());
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines[1], "1. Deposit: $1000.00");
        assert_eq!(lines[2], "2. Buy 2 AAPL @ $150.00");
        assert_eq!(lines[3], "3. Withdraw: $100.00");
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(format_history(&[]), "No transactions yet.");
    }
}
