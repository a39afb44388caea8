// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Account (wallet) management.
//!
//! Every monetary movement flows through [`Account::credit`] or
//! [`Account::debit`], which validate amounts and re-check the balance
//! invariants after each mutation.
//!
//! # Example
//!
//! ```
//! use ledger_api_rs::{Account, AccountType, Currency, UserId};
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//!
//! let mut account = Account::new(
//!     Some(UserId::random()),
//!     "KES Wallet".to_string(),
//!     Currency::Kes,
//!     AccountType::User,
//!     Utc::now(),
//! );
//! account.credit(dec!(100.00)).unwrap();
//! assert_eq!(account.balance, dec!(100.00));
//! ```

use crate::base::{AccountId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported settlement currencies. Transfers never convert between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "KES")]
    Kes,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Kes, Currency::Usd, Currency::Eur];

    /// Upper-case ISO code, used in wallet names and responses.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Kes => "KES",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Wallet owned by a single user, at most one per (user, currency).
    User,
    /// System-owned issuance account, one per currency.
    Treasury,
    /// System-owned holding account for reserved funds.
    Escrow,
    /// System-owned settlement account for off-system withdrawals.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

/// Wallet holding funds for a user or for the system itself.
///
/// Balances are fixed-point decimals at scale 2. `version` is a monotone
/// counter bumped on every committed update; writers carrying a stale version
/// lose with [`LedgerError::Conflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub status: AccountStatus,
    pub balance: Decimal,
    pub available_balance: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        user_id: Option<UserId>,
        name: String,
        currency: Currency,
        kind: AccountType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccountId::random(),
            user_id,
            name,
            currency,
            kind,
            status: AccountStatus::Active,
            balance: zero_money(),
            available_balance: zero_money(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Increases both balance and available balance.
    pub fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance += amount;
        self.available_balance += amount;
        self.check_invariants()
    }

    /// Decreases both balance and available balance.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.available_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        self.available_balance -= amount;
        self.check_invariants()
    }

    /// Re-checks the balance invariants after a mutation.
    ///
    /// Credit/debit preserve these by construction; the check guards against
    /// any future mutation path that forgets to.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.available_balance >= Decimal::ZERO,
            "available balance went negative: {}",
            self.available_balance
        );
        if self.balance < Decimal::ZERO
            || self.available_balance < Decimal::ZERO
            || self.available_balance > self.balance
        {
            return Err(LedgerError::Internal("account balance invariant violated"));
        }
        Ok(())
    }
}

/// Zero at money scale, so fresh balances serialize as `"0.00"`.
pub(crate) fn zero_money() -> Decimal {
    Decimal::new(0, 2)
}

/// Validates a requested amount and pins it to money scale.
///
/// Amounts must be strictly positive and carry at most two fractional digits.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::InvalidAmount);
    }
    let mut amount = amount;
    amount.rescale(2);
    Ok(amount)
}
