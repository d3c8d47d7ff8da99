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

//! JSON configuration: the prefix-to-backend mappings plus listener and
//! backend TLS knobs.
//!
//! ```json
//! {
//!     "address": ":80",
//!     "mappings": {
//!         "dev": "https://dev-graphite.example.net/",
//!         "production": "https://graphite.example.net/",
//!         "staging": "https://stage-graphite.example.net/"
//!     }
//! }
//! ```

use std::{
    collections::BTreeMap,
    fs,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use log::warn;
use serde::Deserialize;

use crate::error::AppError;

/// Used when neither the config file nor the command line names one.
const DEFAULT_ADDRESS: &str = ":80";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address; the `":80"` shorthand binds every interface.
    #[serde(default)]
    pub address: Option<String>,
    /// Metrics prefix to backend URL.
    pub mappings: BTreeMap<String, String>,
    /// Skip TLS verification of backends.
    #[serde(rename = "insecureHTTPS", default)]
    pub insecure_https: bool,
    /// Extra CA certificates, a single PEM bundle.
    #[serde(rename = "caCert", default)]
    pub ca_cert: Option<PathBuf>,
    /// Directory of PEM files appended to the root store.
    #[serde(rename = "caCertDir", default)]
    pub ca_cert_dir: Option<PathBuf>,
    /// Log outgoing backend requests.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let data = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, AppError> {
        serde_json::from_str(data).map_err(|err| AppError::Config(format!("invalid config: {err}")))
    }

    /// Resolves the listen address, command line override first.
    pub fn listen_addr(&self, override_addr: Option<&str>) -> Result<SocketAddr, AppError> {
        let raw = override_addr
            .or(self.address.as_deref())
            .unwrap_or(DEFAULT_ADDRESS);
        let full = if raw.starts_with(':') {
            format!("0.0.0.0{raw}")
        } else {
            raw.to_string()
        };
        full.to_socket_addrs()
            .map_err(|err| AppError::Config(format!("invalid listen address `{raw}`: {err}")))?
            .next()
            .ok_or_else(|| AppError::Config(format!("cannot resolve listen address `{raw}`")))
    }

    /// Builds the shared backend client, honoring the TLS options. An
    /// explicitly named CA bundle must load and contain at least one
    /// certificate; unreadable or invalid files in the CA directory are
    /// skipped.
    pub fn build_client(&self) -> Result<reqwest::Client, AppError> {
        let mut builder = reqwest::Client::builder();
        if self.insecure_https {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &self.ca_cert {
            let pem = fs::read(path).map_err(|err| {
                AppError::Config(format!("failed to read CA file {}: {err}", path.display()))
            })?;
            let certs = read_pem_bundle(path, &pem)?;
            if certs.is_empty() {
                return Err(AppError::Config(format!(
                    "no certificates found in {}",
                    path.display()
                )));
            }
            builder = add_root_certs(builder, certs);
        }
        if let Some(dir) = &self.ca_cert_dir {
            let entries = fs::read_dir(dir).map_err(|err| {
                AppError::Config(format!("failed to read CA dir {}: {err}", dir.display()))
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let loaded = fs::read(&path)
                    .map_err(|err| err.to_string())
                    .and_then(|pem| {
                        reqwest::Certificate::from_pem_bundle(&pem).map_err(|err| err.to_string())
                    });
                match loaded {
                    Ok(certs) => builder = add_root_certs(builder, certs),
                    Err(err) => warn!("skipping CA file {}: {err}", path.display()),
                }
            }
        }
        builder
            .build()
            .map_err(|err| AppError::Config(format!("failed to build HTTP client: {err}")))
    }
}

fn read_pem_bundle(path: &Path, pem: &[u8]) -> Result<Vec<reqwest::Certificate>, AppError> {
    reqwest::Certificate::from_pem_bundle(pem)
        .map_err(|err| AppError::Config(format!("invalid PEM in {}: {err}", path.display())))
}

fn add_root_certs(
    builder: reqwest::ClientBuilder,
    certs: Vec<reqwest::Certificate>,
) -> reqwest::ClientBuilder {
    certs
        .into_iter()
        .fold(builder, |builder, cert| builder.add_root_certificate(cert))
}
