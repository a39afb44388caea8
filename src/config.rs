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

//! Application configuration loaded from environment variables.

use crate::idempotency::DEFAULT_TTL_SECONDS;
use std::env;
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "memory://ledger";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported database URL '{0}' (expected a memory:// DSN)")]
    UnsupportedDatabaseUrl(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Runtime settings.
///
/// `DATABASE_URL` selects the backing store; the in-process `memory://`
/// engine is the one provided. `IDEMPOTENCY_TTL_SECONDS` overrides the
/// default lifetime of in-flight idempotency locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub idempotency_ttl_seconds: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        if !database_url.starts_with("memory://") {
            return Err(ConfigError::UnsupportedDatabaseUrl(database_url));
        }

        let idempotency_ttl_seconds = match env::var("IDEMPOTENCY_TTL_SECONDS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue("IDEMPOTENCY_TTL_SECONDS", raw))?,
            Err(_) => DEFAULT_TTL_SECONDS,
        };

        Ok(Self {
            database_url,
            idempotency_ttl_seconds,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            idempotency_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.database_url, "memory://ledger");
        assert_eq!(settings.idempotency_ttl_seconds, 600);
    }
}
