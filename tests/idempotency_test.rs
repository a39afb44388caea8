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

//! Idempotency gate integration tests: replay, conflict detection, TTL
//! reclaim, and non-persistence of domain failures.

use chrono::{Duration, Utc};
use ledger_api_rs::dto::{CreateUserRequest, DepositRequest, WithdrawalRequest};
use ledger_api_rs::{
    Admission, Coordinator, Currency, IdempotencyGate, LedgerError, Store, UserId,
    hash_request_payload,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

fn setup() -> (Arc<Store>, Coordinator) {
    let store = Arc::new(Store::new());
    let coordinator = Coordinator::new(Arc::clone(&store), 600);
    (store, coordinator)
}

fn key() -> String {
    Uuid::new_v4().to_string()
}

fn create_user(coordinator: &Coordinator, email: &str) -> UserId {
    let receipt = coordinator
        .create_user(
            Some(&key()),
            &CreateUserRequest {
                email: email.to_string(),
                full_name: "Test User".to_string(),
            },
        )
        .unwrap();
    let user: ledger_api_rs::dto::UserResponse = serde_json::from_str(&receipt.body).unwrap();
    user.id
}

fn deposit_request(user_id: UserId, amount: rust_decimal::Decimal) -> DepositRequest {
    DepositRequest {
        user_id,
        amount,
        currency: Currency::Kes,
        description: None,
        reference: None,
    }
}

#[test]
fn missing_key_is_rejected() {
    let (_, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");

    let result = coordinator.deposit(None, &deposit_request(alice, dec!(10.00)));
    assert_eq!(result.unwrap_err(), LedgerError::MissingIdempotencyKey);

    let result = coordinator.deposit(Some(""), &deposit_request(alice, dec!(10.00)));
    assert_eq!(result.unwrap_err(), LedgerError::MissingIdempotencyKey);
}

#[test]
fn identical_replay_returns_cached_response_once_posted() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let request = deposit_request(alice, dec!(25.00));
    let shared_key = key();

    let first = coordinator.deposit(Some(&shared_key), &request).unwrap();
    let second = coordinator.deposit(Some(&shared_key), &request).unwrap();

    assert_eq!(first.status, 201);
    assert_eq!(second.status, 201);
    assert_eq!(first.body, second.body);
    assert!(!first.replayed);
    assert!(second.replayed);

    // Exactly one transaction exists despite two accepted requests.
    assert_eq!(store.count_transactions(), 1);
}

#[test]
fn same_key_different_payload_is_a_conflict() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();

    coordinator
        .deposit(Some(&shared_key), &deposit_request(alice, dec!(10.00)))
        .unwrap();
    let result = coordinator.deposit(Some(&shared_key), &deposit_request(alice, dec!(20.00)));
    assert_eq!(result.unwrap_err(), LedgerError::IdempotencyConflict);

    let transactions = store.transactions_newest_first();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, dec!(10.00));
}

#[test]
fn same_payload_under_another_key_is_a_conflict() {
    let (_, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let request = deposit_request(alice, dec!(10.00));

    coordinator.deposit(Some(&key()), &request).unwrap();
    // The request fingerprint is unique across records.
    let result = coordinator.deposit(Some(&key()), &request);
    assert_eq!(result.unwrap_err(), LedgerError::IdempotencyConflict);
}

#[test]
fn domain_failure_persists_no_idempotency_record() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();
    let request = WithdrawalRequest {
        user_id: alice,
        amount: dec!(50.00),
        currency: Currency::Kes,
        description: None,
        reference: None,
    };

    let result = coordinator.withdraw(Some(&shared_key), &request);
    assert_eq!(result.unwrap_err(), LedgerError::InsufficientFunds);
    assert!(store.get_idempotency_record(&shared_key).is_none());

    // Once the precondition holds, the same key is free to succeed.
    coordinator
        .deposit(Some(&key()), &deposit_request(alice, dec!(100.00)))
        .unwrap();
    let receipt = coordinator.withdraw(Some(&shared_key), &request).unwrap();
    assert_eq!(receipt.status, 201);
    assert!(!receipt.replayed);
}

#[test]
fn settled_record_replays_even_after_expiry() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();
    let request = deposit_request(alice, dec!(10.00));

    coordinator.deposit(Some(&shared_key), &request).unwrap();

    // Age the record past its TTL.
    let mut tx = store.begin();
    let mut record = tx.lock_idempotency_key(&shared_key).unwrap();
    record.expires_at = Some(Utc::now() - Duration::seconds(1));
    tx.put_idempotency_record(record).unwrap();
    tx.commit().unwrap();

    let receipt = coordinator.deposit(Some(&shared_key), &request).unwrap();
    assert!(receipt.replayed);
    assert_eq!(store.count_transactions(), 1);
}

#[test]
fn expired_inflight_lock_is_reclaimable_by_any_payload() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();
    let gate = IdempotencyGate::new(600);

    // Fabricate an in-flight lock that has already expired, as if a previous
    // owner died mid-request.
    {
        let mut tx = store.begin();
        let hash = hash_request_payload(&deposit_request(alice, dec!(99.00))).unwrap();
        let admission = gate.acquire(&mut tx, &shared_key, &hash, "POST:/deposit").unwrap();
        assert_eq!(admission, Admission::Fresh);
        let mut record = tx.lock_idempotency_key(&shared_key).unwrap();
        record.expires_at = Some(Utc::now() - Duration::seconds(1));
        tx.put_idempotency_record(record).unwrap();
        tx.commit().unwrap();
    }

    // A different payload overtakes the dead lock.
    let receipt = coordinator
        .deposit(Some(&shared_key), &deposit_request(alice, dec!(10.00)))
        .unwrap();
    assert_eq!(receipt.status, 201);
    assert!(!receipt.replayed);

    let transactions = store.transactions_newest_first();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, dec!(10.00));
}

#[test]
fn inflight_lock_with_different_payload_conflicts() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();
    let gate = IdempotencyGate::new(600);

    // A live in-flight lock held by some other owner.
    {
        let mut tx = store.begin();
        let hash = hash_request_payload(&deposit_request(alice, dec!(99.00))).unwrap();
        gate.acquire(&mut tx, &shared_key, &hash, "POST:/deposit").unwrap();
        tx.commit().unwrap();
    }

    let result = coordinator.deposit(Some(&shared_key), &deposit_request(alice, dec!(10.00)));
    assert_eq!(result.unwrap_err(), LedgerError::IdempotencyConflict);
}

#[test]
fn inflight_retry_with_same_payload_refreshes_and_reenters() {
    let (store, coordinator) = setup();
    let alice = create_user(&coordinator, "alice@example.com");
    let shared_key = key();
    let gate = IdempotencyGate::new(600);
    let request = deposit_request(alice, dec!(10.00));

    // A committed in-flight lock with the same fingerprint, as left behind by
    // an interrupted request.
    {
        let mut tx = store.begin();
        let hash = hash_request_payload(&request).unwrap();
        gate.acquire(&mut tx, &shared_key, &hash, "POST:/deposit").unwrap();
        tx.commit().unwrap();
    }

    let receipt = coordinator.deposit(Some(&shared_key), &request).unwrap();
    assert_eq!(receipt.status, 201);
    assert!(!receipt.replayed);
    assert_eq!(store.count_transactions(), 1);

    let record = store.get_idempotency_record(&shared_key).unwrap();
    assert!(record.is_settled());
    assert_eq!(record.locked_at, None);
    assert_eq!(record.locked_by, None);
}

#[test]
fn user_creation_is_idempotent_too() {
    let (store, coordinator) = setup();
    let shared_key = key();
    let request = CreateUserRequest {
        email: "carol@example.com".to_string(),
        full_name: "Carol".to_string(),
    };

    let first = coordinator.create_user(Some(&shared_key), &request).unwrap();
    let second = coordinator.create_user(Some(&shared_key), &request).unwrap();
    assert_eq!(first.body, second.body);
    assert!(second.replayed);
    assert_eq!(store.count_users(), 1);
}
