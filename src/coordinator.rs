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

//! Request coordinator for the write endpoints.
//!
//! Each write runs the same algorithm: begin a transaction, pass the
//! idempotency gate (possibly replaying a cached response), invoke the
//! posting engine, serialize the result, store it behind the key, and
//! commit. Any failure rolls the whole transaction back, so a rejected
//! request persists nothing, including its idempotency row. Lost optimistic
//! races are retried a bounded number of times before surfacing as a
//! conflict.

use crate::base::UserId;
use crate::dto::{
    CreateUserRequest, DepositRequest, TransactionResponse, TransferRequest, UserResponse,
    WithdrawalRequest,
};
use crate::engine;
use crate::error::LedgerError;
use crate::idempotency::{Admission, IdempotencyGate, hash_request_payload};
use crate::registry;
use crate::store::{Store, Tx};
use crate::user::User;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts per write before a lost version race surfaces as `Conflict`.
const CONFLICT_ATTEMPTS: u32 = 3;

/// Outcome of an idempotent write: the HTTP status and the exact JSON body,
/// replayed verbatim for retries of a settled key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub status: u16,
    pub body: String,
    pub replayed: bool,
}

/// Wires the idempotency gate around the posting engine and owns the
/// transaction lifecycle. One instance serves every endpoint; the store is
/// injected, never global.
pub struct Coordinator {
    store: Arc<Store>,
    gate: IdempotencyGate,
}

impl Coordinator {
    pub fn new(store: Arc<Store>, idempotency_ttl_seconds: u64) -> Self {
        Self {
            store,
            gate: IdempotencyGate::new(idempotency_ttl_seconds),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Registers a user. Email uniqueness violations surface as 409.
    pub fn create_user(
        &self,
        idempotency_key: Option<&str>,
        request: &CreateUserRequest,
    ) -> Result<WriteReceipt, LedgerError> {
        let hash = hash_request_payload(request)?;
        self.idempotent_write(idempotency_key, "POST:/users", &hash, |tx: &mut Tx<'_>| {
            let user = User::new(request.email.clone(), request.full_name.clone(), tx.now());
            tx.insert_user(user.clone())?;
            info!(user_id = %user.id, "user created");
            serialize_body(&UserResponse::from(&user))
        })
    }

    pub fn deposit(
        &self,
        idempotency_key: Option<&str>,
        request: &DepositRequest,
    ) -> Result<WriteReceipt, LedgerError> {
        let hash = hash_request_payload(request)?;
        self.idempotent_write(idempotency_key, "POST:/deposit", &hash, |tx: &mut Tx<'_>| {
            let txn = engine::deposit(
                tx,
                request.user_id,
                request.amount,
                request.currency,
                request.description.clone(),
                request.reference.clone(),
            )?;
            serialize_body(&TransactionResponse::from(&txn))
        })
    }

    /// Transfers between two users' wallets, materializing either wallet on
    /// first use. The registry calls run in user-id order so concurrent
    /// opposite-direction transfers serialize instead of deadlocking.
    pub fn transfer(
        &self,
        idempotency_key: Option<&str>,
        request: &TransferRequest,
    ) -> Result<WriteReceipt, LedgerError> {
        let hash = hash_request_payload(request)?;
        self.idempotent_write(idempotency_key, "POST:/transfer", &hash, |tx: &mut Tx<'_>| {
            let (first, second) = ordered_pair(request.source_user_id, request.destination_user_id);
            let first_account = registry::get_or_create_user_account(tx, first, request.currency)?;
            let second_account = registry::get_or_create_user_account(tx, second, request.currency)?;
            let (source, destination) = if first == request.source_user_id {
                (first_account, second_account)
            } else {
                (second_account, first_account)
            };
            let txn = engine::transfer(
                tx,
                source.id,
                destination.id,
                request.amount,
                request.currency,
                request.description.clone(),
                request.reference.clone(),
            )?;
            serialize_body(&TransactionResponse::from(&txn))
        })
    }

    pub fn withdraw(
        &self,
        idempotency_key: Option<&str>,
        request: &WithdrawalRequest,
    ) -> Result<WriteReceipt, LedgerError> {
        let hash = hash_request_payload(request)?;
        self.idempotent_write(idempotency_key, "POST:/withdraw", &hash, |tx: &mut Tx<'_>| {
            let txn = engine::withdraw(
                tx,
                request.user_id,
                request.amount,
                request.currency,
                request.description.clone(),
                request.reference.clone(),
            )?;
            serialize_body(&TransactionResponse::from(&txn))
        })
    }

    /// The write algorithm shared by every endpoint.
    fn idempotent_write<F>(
        &self,
        idempotency_key: Option<&str>,
        owner: &str,
        request_hash: &str,
        run: F,
    ) -> Result<WriteReceipt, LedgerError>
    where
        F: Fn(&mut Tx<'_>) -> Result<String, LedgerError>,
    {
        let key = idempotency_key.ok_or(LedgerError::MissingIdempotencyKey)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.store.begin();

            let admission = match self.gate.acquire(&mut tx, key, request_hash, owner) {
                Ok(admission) => admission,
                Err(err) => {
                    tx.rollback();
                    return Err(err);
                }
            };
            if let Admission::Replay { code, body } = admission {
                tx.rollback();
                debug!(key, owner, "replaying cached response");
                return Ok(WriteReceipt {
                    status: code,
                    body,
                    replayed: true,
                });
            }

            let body = match run(&mut tx) {
                Ok(body) => body,
                Err(LedgerError::Conflict) if attempt < CONFLICT_ATTEMPTS => {
                    tx.rollback();
                    warn!(key, owner, attempt, "write conflict, retrying");
                    continue;
                }
                Err(err) => {
                    tx.rollback();
                    return Err(err);
                }
            };

            if let Err(err) = self.gate.store_response(&mut tx, key, 201, &body) {
                tx.rollback();
                return Err(err);
            }

            match tx.commit() {
                Ok(()) => {
                    return Ok(WriteReceipt {
                        status: 201,
                        body,
                        replayed: false,
                    });
                }
                Err(LedgerError::Conflict) if attempt < CONFLICT_ATTEMPTS => {
                    warn!(key, owner, attempt, "commit conflict, retrying");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b { (a, b) } else { (b, a) }
}

fn serialize_body<T: Serialize>(body: &T) -> Result<String, LedgerError> {
    serde_json::to_string(body).map_err(|_| LedgerError::Internal("response serialization failed"))
}
