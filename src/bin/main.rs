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

use clap::Parser;
use ledger_api_rs::{AppState, Settings, Store, create_router};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Ledger API - double-entry ledger service
///
/// Serves deposits, transfers, withdrawals, balances, and reporting over
/// HTTP with idempotent write semantics.
#[derive(Parser, Debug)]
#[command(name = "ledger-api-rs")]
#[command(about = "A double-entry ledger service over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ledger_api_rs=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };
    info!(
        database_url = %settings.database_url,
        ttl = settings.idempotency_ttl_seconds,
        "ledger service starting"
    );

    let store = Arc::new(Store::new());
    let state = AppState::new(store, settings.idempotency_ttl_seconds);
    let app = create_router(state);

    let listener = match TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding to {}: {}", args.listen, e);
            process::exit(1);
        }
    };
    info!("listening on http://{}", args.listen);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
