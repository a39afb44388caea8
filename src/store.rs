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

//! Transactional key-addressable store for accounts, transactions, ledger
//! entries, and idempotency records.
//!
//! Committed rows live in [`DashMap`]s; each account and idempotency slot is
//! wrapped in a `parking_lot::Mutex` whose guard IS the exclusive row lock.
//! A [`Tx`] stages every write privately and applies the whole batch under
//! its held locks on [`Tx::commit`]; dropping a `Tx` without committing
//! rolls everything back, including unique-index reservations.
//!
//! # Lock discipline
//!
//! Locks are acquired in phases, and within each phase in a deterministic
//! order, so concurrent writers serialize instead of deadlocking:
//!
//! 1. the idempotency key slot (at most one per request),
//! 2. account-key rows: user wallet keys in user-id order, then system keys,
//! 3. account rows in sorted-id order.
//!
//! Re-locking a row already held by the same `Tx` returns the held row
//! instead of self-deadlocking.

use crate::account::{Account, AccountType, Currency};
use crate::base::{AccountId, TxnId, UserId};
use crate::error::LedgerError;
use crate::idempotency::IdempotencyRecord;
use crate::transaction::{LedgerEntry, Transaction};
use crate::user::User;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type Row<T> = Arc<Mutex<T>>;
type RowGuard<T> = ArcMutexGuard<RawMutex, T>;

/// Uniqueness key for account lookup and race-safe creation.
///
/// Each key maps to a synthetic lock row; get-or-create holds that row for
/// the remainder of the transaction, so two writers materializing the same
/// wallet serialize on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountKey {
    /// At most one account per (owner, currency).
    User(UserId, Currency),
    /// At most one account per (type, currency); owner is always NULL.
    System(AccountType, Currency),
}

/// In-process transactional store.
///
/// The store is the only shared mutable resource in the service; everything
/// else borrows it. Readers see committed state only.
pub struct Store {
    users: DashMap<UserId, User>,
    user_emails: DashMap<String, UserId>,
    user_log: RwLock<Vec<UserId>>,
    accounts: DashMap<AccountId, Row<Account>>,
    account_keys: DashMap<AccountKey, Row<Option<AccountId>>>,
    account_log: RwLock<Vec<AccountId>>,
    transactions: DashMap<TxnId, Transaction>,
    txn_references: DashMap<String, TxnId>,
    txn_log: RwLock<Vec<TxnId>>,
    entries: RwLock<Vec<LedgerEntry>>,
    idempotency: DashMap<String, Row<Option<IdempotencyRecord>>>,
    request_hashes: DashMap<String, String>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            user_emails: DashMap::new(),
            user_log: RwLock::new(Vec::new()),
            accounts: DashMap::new(),
            account_keys: DashMap::new(),
            account_log: RwLock::new(Vec::new()),
            transactions: DashMap::new(),
            txn_references: DashMap::new(),
            txn_log: RwLock::new(Vec::new()),
            entries: RwLock::new(Vec::new()),
            idempotency: DashMap::new(),
            request_hashes: DashMap::new(),
        }
    }

    /// Opens a transaction. All mutations happen inside exactly one `Tx`.
    pub fn begin(&self) -> Tx<'_> {
        Tx {
            store: self,
            now: Utc::now(),
            account_guards: HashMap::new(),
            key_guards: HashMap::new(),
            idem_guards: HashMap::new(),
            staged_accounts: HashMap::new(),
            created_accounts: Vec::new(),
            staged_keys: HashMap::new(),
            staged_users: Vec::new(),
            staged_txns: Vec::new(),
            staged_entries: Vec::new(),
            staged_idem: HashMap::new(),
            reserved_emails: Vec::new(),
            reserved_references: Vec::new(),
            reserved_hashes: Vec::new(),
            dropped_hashes: Vec::new(),
            finished: false,
        }
    }

    // === Committed read paths ===

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn count_users(&self) -> usize {
        self.users.len()
    }

    /// Users in reverse insertion order (newest first).
    pub fn list_users(&self, limit: usize, offset: usize) -> Vec<User> {
        let log = self.user_log.read();
        log.iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.get_user(*id))
            .collect()
    }

    /// Reads a committed account. Blocks while a writer holds its row lock.
    pub fn get_account(&self, id: AccountId) -> Option<Account> {
        let row = self.accounts.get(&id).map(|r| Arc::clone(r.value()))?;
        let account = row.lock().clone();
        Some(account)
    }

    /// All committed accounts in insertion order.
    pub fn accounts_snapshot(&self) -> Vec<Account> {
        let ids: Vec<AccountId> = self.account_log.read().clone();
        ids.into_iter().filter_map(|id| self.get_account(id)).collect()
    }

    /// A user's wallets in creation order.
    pub fn user_accounts(&self, user_id: UserId) -> Vec<Account> {
        self.accounts_snapshot()
            .into_iter()
            .filter(|a| a.user_id == Some(user_id))
            .collect()
    }

    pub fn get_transaction(&self, id: TxnId) -> Option<Transaction> {
        self.transactions.get(&id).map(|t| t.value().clone())
    }

    /// Committed transactions, newest first.
    pub fn transactions_newest_first(&self) -> Vec<Transaction> {
        let log = self.txn_log.read();
        log.iter()
            .rev()
            .filter_map(|id| self.transactions.get(id).map(|t| t.value().clone()))
            .collect()
    }

    pub fn count_transactions(&self) -> usize {
        self.transactions.len()
    }

    pub fn entries_for_transaction(&self, id: TxnId) -> Vec<LedgerEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.transaction_id == id)
            .cloned()
            .collect()
    }

    pub fn entries_for_account(&self, id: AccountId) -> Vec<LedgerEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.account_id == id)
            .cloned()
            .collect()
    }

    pub fn get_idempotency_record(&self, key: &str) -> Option<IdempotencyRecord> {
        let row = self.idempotency.get(key).map(|r| Arc::clone(r.value()))?;
        let record = row.lock().clone();
        record
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped transaction over the [`Store`].
///
/// Holds exclusive row locks until commit or rollback and stages every write
/// privately, so concurrent readers never observe partial results and a
/// dropped `Tx` leaves no durable state.
pub struct Tx<'a> {
    store: &'a Store,
    now: DateTime<Utc>,
    account_guards: HashMap<AccountId, RowGuard<Account>>,
    key_guards: HashMap<AccountKey, RowGuard<Option<AccountId>>>,
    idem_guards: HashMap<String, RowGuard<Option<IdempotencyRecord>>>,
    staged_accounts: HashMap<AccountId, Account>,
    created_accounts: Vec<AccountId>,
    staged_keys: HashMap<AccountKey, AccountId>,
    staged_users: Vec<User>,
    staged_txns: Vec<Transaction>,
    staged_entries: Vec<LedgerEntry>,
    staged_idem: HashMap<String, IdempotencyRecord>,
    reserved_emails: Vec<String>,
    reserved_references: Vec<String>,
    reserved_hashes: Vec<String>,
    dropped_hashes: Vec<String>,
    finished: bool,
}

impl Tx<'_> {
    /// Timestamp shared by every row written in this transaction.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    // === Accounts ===

    /// Acquires an exclusive row lock and returns the locked snapshot.
    ///
    /// Two transactions locking the same id serialize here. Accounts created
    /// by this transaction are already exclusively ours and are returned
    /// as-is.
    pub fn lock_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        if let Some(staged) = self.staged_accounts.get(&id) {
            return Ok(staged.clone());
        }
        if let Some(guard) = self.account_guards.get(&id) {
            return Ok((**guard).clone());
        }
        let row = self
            .store
            .accounts
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(LedgerError::NotFound("account"))?;
        let guard = row.lock_arc();
        let snapshot = (*guard).clone();
        self.account_guards.insert(id, guard);
        Ok(snapshot)
    }

    /// Transaction-scoped account read: staged and locked rows win over
    /// committed state.
    pub fn get_account(&self, id: AccountId) -> Option<Account> {
        if let Some(staged) = self.staged_accounts.get(&id) {
            return Some(staged.clone());
        }
        if let Some(guard) = self.account_guards.get(&id) {
            return Some((**guard).clone());
        }
        self.store.get_account(id)
    }

    /// Stages an account update under the optimistic version check.
    ///
    /// The caller's snapshot must carry the current version; a stale snapshot
    /// loses with [`LedgerError::Conflict`]. Requires the row lock.
    pub fn update_account(&mut self, mut account: Account) -> Result<(), LedgerError> {
        let id = account.id;
        if self.created_accounts.contains(&id) {
            account.updated_at = self.now;
            self.staged_accounts.insert(id, account);
            return Ok(());
        }
        let Some(guard) = self.account_guards.get(&id) else {
            return Err(LedgerError::Internal("account updated without row lock"));
        };
        let current_version = self
            .staged_accounts
            .get(&id)
            .map(|a| a.version)
            .unwrap_or(guard.version);
        if account.version != current_version {
            return Err(LedgerError::Conflict);
        }
        account.version += 1;
        account.updated_at = self.now;
        self.staged_accounts.insert(id, account);
        Ok(())
    }

    /// Locks the synthetic row for an account uniqueness key and returns the
    /// id it currently maps to, if any.
    pub fn lock_account_key(&mut self, key: &AccountKey) -> Option<AccountId> {
        if let Some(id) = self.staged_keys.get(key) {
            return Some(*id);
        }
        if let Some(guard) = self.key_guards.get(key) {
            return **guard;
        }
        let row = {
            let slot = self
                .store
                .account_keys
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)));
            Arc::clone(slot.value())
        };
        let guard = row.lock_arc();
        let current = *guard;
        self.key_guards.insert(key.clone(), guard);
        current
    }

    /// Stages a new account under a held uniqueness-key lock.
    pub fn insert_account(&mut self, key: &AccountKey, account: Account) -> Result<(), LedgerError> {
        if self.staged_keys.contains_key(key) {
            return Err(LedgerError::UniqueViolation("account"));
        }
        match self.key_guards.get(key) {
            None => return Err(LedgerError::Internal("account created without key lock")),
            Some(guard) if guard.is_some() => {
                return Err(LedgerError::UniqueViolation("account"));
            }
            Some(_) => {}
        }
        self.staged_keys.insert(key.clone(), account.id);
        self.created_accounts.push(account.id);
        self.staged_accounts.insert(account.id, account);
        Ok(())
    }

    // === Users ===

    /// Stages a new user, reserving its email against concurrent writers.
    pub fn insert_user(&mut self, user: User) -> Result<(), LedgerError> {
        match self.store.user_emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(LedgerError::UniqueViolation("email")),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.reserved_emails.push(user.email.clone());
                self.staged_users.push(user);
                Ok(())
            }
        }
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        if let Some(user) = self.staged_users.iter().find(|u| u.id == id) {
            return Some(user.clone());
        }
        self.store.get_user(id)
    }

    // === Transactions and entries ===

    /// Stages a transaction, reserving its unique reference.
    pub fn insert_transaction(&mut self, txn: Transaction) -> Result<(), LedgerError> {
        match self.store.txn_references.entry(txn.reference.clone()) {
            Entry::Occupied(_) => Err(LedgerError::UniqueViolation("transaction reference")),
            Entry::Vacant(slot) => {
                slot.insert(txn.id);
                self.reserved_references.push(txn.reference.clone());
                self.staged_txns.push(txn);
                Ok(())
            }
        }
    }

    pub fn insert_entry(&mut self, entry: LedgerEntry) {
        self.staged_entries.push(entry);
    }

    // === Idempotency records ===

    /// Locks the slot for an idempotency key and returns the committed record
    /// (or the staged one, when this transaction already wrote it).
    ///
    /// Concurrent requests carrying the same key serialize here until the
    /// first one commits or rolls back.
    pub fn lock_idempotency_key(&mut self, key: &str) -> Option<IdempotencyRecord> {
        if let Some(record) = self.staged_idem.get(key) {
            return Some(record.clone());
        }
        if let Some(guard) = self.idem_guards.get(key) {
            return (**guard).clone();
        }
        let row = {
            let slot = self
                .store
                .idempotency
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)));
            Arc::clone(slot.value())
        };
        let guard = row.lock_arc();
        let current = (*guard).clone();
        self.idem_guards.insert(key.to_string(), guard);
        current
    }

    /// Stages an idempotency record write under its held slot lock.
    ///
    /// A request fingerprint new to this key is reserved globally; a
    /// fingerprint already owned by a different key is a conflict.
    pub fn put_idempotency_record(&mut self, record: IdempotencyRecord) -> Result<(), LedgerError> {
        let key = record.key.clone();
        if !self.idem_guards.contains_key(&key) {
            return Err(LedgerError::Internal("idempotency record written without slot lock"));
        }
        let prior_hash = self
            .staged_idem
            .get(&key)
            .map(|r| r.request_hash.clone())
            .or_else(|| {
                self.idem_guards
                    .get(&key)
                    .and_then(|g| (**g).as_ref().map(|r| r.request_hash.clone()))
            });
        if prior_hash.as_deref() != Some(record.request_hash.as_str()) {
            match self.store.request_hashes.entry(record.request_hash.clone()) {
                Entry::Occupied(owner) => {
                    if owner.get() != &key {
                        return Err(LedgerError::IdempotencyConflict);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(key.clone());
                    self.reserved_hashes.push(record.request_hash.clone());
                }
            }
            if let Some(old) = prior_hash {
                // reclaimed record releases its previous fingerprint at commit
                self.dropped_hashes.push(old);
            }
        }
        self.staged_idem.insert(key, record);
        Ok(())
    }

    // === Commit / rollback ===

    /// Applies all staged writes under the held locks.
    ///
    /// Account invariants are re-validated first, so a violation rolls the
    /// whole batch back.
    pub fn commit(mut self) -> Result<(), LedgerError> {
        for account in self.staged_accounts.values() {
            account.check_invariants()?;
        }

        for user in std::mem::take(&mut self.staged_users) {
            self.store.users.insert(user.id, user.clone());
            self.store.user_log.write().push(user.id);
        }

        let created: HashSet<AccountId> = self.created_accounts.iter().copied().collect();
        for (id, account) in std::mem::take(&mut self.staged_accounts) {
            if created.contains(&id) {
                self.store.accounts.insert(id, Arc::new(Mutex::new(account)));
                self.store.account_log.write().push(id);
            } else if let Some(guard) = self.account_guards.get_mut(&id) {
                **guard = account;
            }
        }

        for (key, id) in std::mem::take(&mut self.staged_keys) {
            if let Some(guard) = self.key_guards.get_mut(&key) {
                **guard = Some(id);
            }
        }

        for txn in std::mem::take(&mut self.staged_txns) {
            self.store.transactions.insert(txn.id, txn.clone());
            self.store.txn_log.write().push(txn.id);
        }

        let mut staged_entries = std::mem::take(&mut self.staged_entries);
        if !staged_entries.is_empty() {
            self.store.entries.write().append(&mut staged_entries);
        }

        for (key, record) in std::mem::take(&mut self.staged_idem) {
            if let Some(guard) = self.idem_guards.get_mut(&key) {
                **guard = Some(record);
            }
        }

        for hash in std::mem::take(&mut self.dropped_hashes) {
            self.store.request_hashes.remove(&hash);
        }

        self.finished = true;
        Ok(())
    }

    /// Discards all staged writes and releases every lock and reservation.
    pub fn rollback(self) {
        // Drop does the cleanup.
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for email in self.reserved_emails.drain(..) {
            self.store.user_emails.remove(&email);
        }
        for reference in self.reserved_references.drain(..) {
            self.store.txn_references.remove(&reference);
        }
        for hash in self.reserved_hashes.drain(..) {
            self.store.request_hashes.remove(&hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountStatus;
    use rust_decimal_macros::dec;

    fn make_user(email: &str, now: DateTime<Utc>) -> User {
        User::new(email.to_string(), "Test User".to_string(), now)
    }

    fn make_wallet(user_id: UserId, now: DateTime<Utc>) -> Account {
        Account::new(
            Some(user_id),
            "KES Wallet".to_string(),
            Currency::Kes,
            AccountType::User,
            now,
        )
    }

    #[test]
    fn committed_writes_become_visible() {
        let store = Store::new();
        let mut tx = store.begin();
        let user = make_user("a@example.com", tx.now());
        let user_id = user.id;
        tx.insert_user(user).unwrap();
        let key = AccountKey::User(user_id, Currency::Kes);
        tx.lock_account_key(&key);
        let account = make_wallet(user_id, tx.now());
        let account_id = account.id;
        tx.insert_account(&key, account).unwrap();
        tx.commit().unwrap();

        assert!(store.get_user(user_id).is_some());
        assert_eq!(store.get_account(account_id).unwrap().status, AccountStatus::Active);
        assert_eq!(store.user_accounts(user_id).len(), 1);
    }

    #[test]
    fn rollback_leaves_no_state() {
        let store = Store::new();
        let mut tx = store.begin();
        let user = make_user("gone@example.com", tx.now());
        let user_id = user.id;
        tx.insert_user(user).unwrap();
        tx.rollback();

        assert!(store.get_user(user_id).is_none());
        // The email reservation is released, so a new writer may take it.
        let mut tx = store.begin();
        tx.insert_user(make_user("gone@example.com", Utc::now())).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_users(), 1);
    }

    #[test]
    fn duplicate_email_is_unique_violation() {
        let store = Store::new();
        let mut tx = store.begin();
        tx.insert_user(make_user("dup@example.com", tx.now())).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let result = tx.insert_user(make_user("dup@example.com", tx.now()));
        assert_eq!(result, Err(LedgerError::UniqueViolation("email")));
    }

    #[test]
    fn duplicate_reference_is_unique_violation() {
        use crate::transaction::{Transaction, TransactionKind};
        let store = Store::new();
        let account_id = AccountId::random();
        let build = |now| {
            Transaction::new(
                None,
                account_id,
                TransactionKind::Deposit,
                dec!(10.00),
                Currency::Kes,
                None,
                serde_json::Map::new(),
                Some("ref-1".to_string()),
                now,
            )
        };

        let mut tx = store.begin();
        tx.insert_transaction(build(tx.now())).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let result = tx.insert_transaction(build(tx.now()));
        assert_eq!(result, Err(LedgerError::UniqueViolation("transaction reference")));
    }

    #[test]
    fn lock_account_missing_is_not_found() {
        let store = Store::new();
        let mut tx = store.begin();
        let result = tx.lock_account(AccountId::random());
        assert_eq!(result, Err(LedgerError::NotFound("account")));
    }

    #[test]
    fn stale_version_update_is_a_conflict() {
        let store = Store::new();
        let user_id = UserId::random();
        let key = AccountKey::User(user_id, Currency::Kes);

        let mut tx = store.begin();
        tx.lock_account_key(&key);
        let account = make_wallet(user_id, tx.now());
        let account_id = account.id;
        tx.insert_account(&key, account).unwrap();
        tx.commit().unwrap();

        // First writer bumps the version.
        let mut tx = store.begin();
        let mut fresh = tx.lock_account(account_id).unwrap();
        fresh.credit(dec!(5.00)).unwrap();
        tx.update_account(fresh).unwrap();
        tx.commit().unwrap();

        // A snapshot taken before that commit now carries a stale version.
        let mut stale = store.get_account(account_id).unwrap();
        stale.version -= 1;
        let mut tx = store.begin();
        tx.lock_account(account_id).unwrap();
        assert_eq!(tx.update_account(stale), Err(LedgerError::Conflict));
    }

    #[test]
    fn update_requires_row_lock() {
        let store = Store::new();
        let user_id = UserId::random();
        let key = AccountKey::User(user_id, Currency::Kes);

        let mut tx = store.begin();
        tx.lock_account_key(&key);
        let account = make_wallet(user_id, tx.now());
        tx.insert_account(&key, account.clone()).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let result = tx.update_account(account);
        assert_eq!(
            result,
            Err(LedgerError::Internal("account updated without row lock"))
        );
    }

    #[test]
    fn commit_bumps_account_version() {
        let store = Store::new();
        let user_id = UserId::random();
        let key = AccountKey::User(user_id, Currency::Kes);

        let mut tx = store.begin();
        tx.lock_account_key(&key);
        let account = make_wallet(user_id, tx.now());
        let account_id = account.id;
        tx.insert_account(&key, account).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let mut locked = tx.lock_account(account_id).unwrap();
        locked.credit(dec!(1.00)).unwrap();
        tx.update_account(locked).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.get_account(account_id).unwrap().version, 2);
    }

    #[test]
    fn account_key_lock_is_reentrant() {
        let store = Store::new();
        let user_id = UserId::random();
        let key = AccountKey::User(user_id, Currency::Kes);

        let mut tx = store.begin();
        assert_eq!(tx.lock_account_key(&key), None);
        let account = make_wallet(user_id, tx.now());
        let account_id = account.id;
        tx.insert_account(&key, account).unwrap();
        // Second lookup inside the same transaction sees the staged id.
        assert_eq!(tx.lock_account_key(&key), Some(account_id));
        tx.commit().unwrap();

        let mut tx = store.begin();
        assert_eq!(tx.lock_account_key(&key), Some(account_id));
    }
}
