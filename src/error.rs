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

//! Error types for ledger operations.

use thiserror::Error;

/// Ledger processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Write request arrived without an Idempotency-Key header
    #[error("Idempotency-Key header required")]
    MissingIdempotencyKey,

    /// Amount is zero, negative, or carries more than two fractional digits
    #[error("invalid amount (must be positive with at most two decimal places)")]
    InvalidAmount,

    /// Transfer source and destination are the same account
    #[error("cannot transfer to the same account")]
    SameAccount,

    /// Account currency does not match the requested currency
    #[error("currency mismatch between accounts")]
    CurrencyMismatch,

    /// Outbound movement would exceed the available balance
    #[error("insufficient available balance")]
    InsufficientFunds,

    /// Referenced user or account does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Idempotency key reused with a different payload, or the payload
    /// fingerprint already belongs to another key
    #[error("idempotency key conflict")]
    IdempotencyConflict,

    /// Unique constraint violated (email or transaction reference)
    #[error("{0} already exists")]
    UniqueViolation(&'static str),

    /// Optimistic version check lost against a concurrent writer
    #[error("write conflict, please retry")]
    Conflict,

    /// Invariant breach or other unexpected failure
    #[error("internal ledger error: {0}")]
    Internal(&'static str),
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::MissingIdempotencyKey.to_string(),
            "Idempotency-Key header required"
        );
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive with at most two decimal places)"
        );
        assert_eq!(
            LedgerError::SameAccount.to_string(),
            "cannot transfer to the same account"
        );
        assert_eq!(
            LedgerError::CurrencyMismatch.to_string(),
            "currency mismatch between accounts"
        );
        assert_eq!(
            LedgerError::InsufficientFunds.to_string(),
            "insufficient available balance"
        );
        assert_eq!(LedgerError::NotFound("account").to_string(), "account not found");
        assert_eq!(
            LedgerError::IdempotencyConflict.to_string(),
            "idempotency key conflict"
        );
        assert_eq!(
            LedgerError::UniqueViolation("email").to_string(),
            "email already exists"
        );
        assert_eq!(LedgerError::Conflict.to_string(), "write conflict, please retry");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
