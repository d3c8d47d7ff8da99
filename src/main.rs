// Copyright 2026 The graphite-mux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::Parser;
use log::{LevelFilter, info};

use graphite_mux::{
    app::{AppState, router},
    config::Config,
    error::AppError,
};

#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// JSON configuration file
    #[arg(short = 'c', value_name = "FILE")]
    config: PathBuf,
    /// Address to listen on, overriding the config file
    #[arg(long = "http", value_name = "ADDR")]
    http: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    init_logging(config.debug);

    let addr = config.listen_addr(args.http.as_deref())?;
    let state = AppState::bootstrap(&config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {addr}: {err}")))?;
    info!("graphite-mux listening on {addr}");
    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    Ok(())
}

fn init_logging(debug: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
    } else {
        let crate_level = if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module("graphite_mux", crate_level)
            .init();
    }
}
