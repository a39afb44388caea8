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

//! Idempotency gate for write endpoints.
//!
//! Each write request carries an `Idempotency-Key` and a canonical SHA-256
//! fingerprint of its payload. The gate persists a record per key:
//!
//! ```text
//!            ┌────────────── not present ──────────────┐
//!            ▼                                         │
//!        NEW → (acquire) → LOCKED ──(store_response)──▶ SETTLED
//!                           │
//!                           └──(expired, response null)─▶ reclaimable
//! ```
//!
//! Settled keys replay their cached response without re-entering the posting
//! engine; key reuse with a different payload is a conflict; an expired lock
//! with no response may be overtaken by any payload.

use crate::error::LedgerError;
use crate::store::Tx;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default lifetime of an in-flight idempotency lock.
pub const DEFAULT_TTL_SECONDS: u64 = 600;

/// Persisted idempotency key with the cached terminal response.
///
/// While `locked_at` is set and `response_body` is null the key is in
/// flight; once the response fields are written the key is settled and the
/// lock fields are cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub recovery_point: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn locked(
        key: &str,
        request_hash: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.to_string(),
            request_hash: request_hash.to_string(),
            response_code: None,
            response_body: None,
            recovery_point: None,
            locked_at: Some(now),
            locked_by: Some(owner.to_string()),
            expires_at: Some(expires_at),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.response_code.is_some() && self.response_body.is_some()
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Outcome of [`IdempotencyGate::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The key is locked for this request; proceed into the engine.
    Fresh,
    /// The key already settled; replay the cached response verbatim.
    Replay { code: u16, body: String },
}

/// Serializes duplicate write requests and rejects fingerprint conflicts.
#[derive(Debug, Clone)]
pub struct IdempotencyGate {
    ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    /// Creates or refreshes the lock for `key` inside the transaction.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::MissingIdempotencyKey`] - empty key.
    /// - [`LedgerError::IdempotencyConflict`] - key reuse with a different
    ///   payload, or the payload fingerprint already belongs to another key.
    pub fn acquire(
        &self,
        tx: &mut Tx<'_>,
        key: &str,
        request_hash: &str,
        owner: &str,
    ) -> Result<Admission, LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::MissingIdempotencyKey);
        }
        let now = tx.now();
        let expires_at = now + self.ttl;

        match tx.lock_idempotency_key(key) {
            Some(existing) => {
                debug!(key, "found existing idempotency record");
                if existing.request_hash != request_hash
                    && !(existing.is_expired(now) && !existing.is_settled())
                {
                    return Err(LedgerError::IdempotencyConflict);
                }
                if existing.is_settled() {
                    let (Some(code), Some(body)) =
                        (existing.response_code, existing.response_body.clone())
                    else {
                        return Err(LedgerError::Internal("settled record missing response"));
                    };
                    return Ok(Admission::Replay { code, body });
                }
                // In-flight retry by the same payload, or an expired lock
                // overtaken by a new one: refresh and re-enter.
                let mut record = existing;
                record.request_hash = request_hash.to_string();
                record.locked_at = Some(now);
                record.locked_by = Some(owner.to_string());
                record.expires_at = Some(expires_at);
                record.updated_at = now;
                tx.put_idempotency_record(record)?;
                Ok(Admission::Fresh)
            }
            None => {
                let record = IdempotencyRecord::locked(key, request_hash, owner, now, expires_at);
                tx.put_idempotency_record(record)?;
                Ok(Admission::Fresh)
            }
        }
    }

    /// Writes the terminal response and clears the lock fields.
    ///
    /// Must be called inside the same transaction, before commit.
    pub fn store_response(
        &self,
        tx: &mut Tx<'_>,
        key: &str,
        code: u16,
        body: &str,
    ) -> Result<(), LedgerError> {
        let Some(mut record) = tx.lock_idempotency_key(key) else {
            return Err(LedgerError::Internal("response stored for unknown idempotency key"));
        };
        record.response_code = Some(code);
        record.response_body = Some(body.to_string());
        record.locked_at = None;
        record.locked_by = None;
        record.updated_at = tx.now();
        tx.put_idempotency_record(record)
    }
}

impl Default for IdempotencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}

/// Deterministic SHA-256 fingerprint of a request payload.
///
/// The canonical form is JSON with lexicographically sorted keys and no
/// whitespace between tokens; decimals keep their scale as strings, UUIDs
/// are lowercase hyphenated, temporal values are ISO-8601. Sorted keys come
/// from serde_json's BTreeMap-backed object representation.
pub fn hash_request_payload<T: Serialize>(payload: &T) -> Result<String, LedgerError> {
    let value = serde_json::to_value(payload)
        .map_err(|_| LedgerError::Internal("request payload is not JSON-serializable"))?;
    let canonical = serde_json::to_string(&value)
        .map_err(|_| LedgerError::Internal("request payload is not JSON-serializable"))?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}
