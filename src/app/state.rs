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

use std::sync::Arc;

use log::info;

use crate::{backend::Directory, config::Config, error::AppError};

/// Shared, read-only application state: the backend directory and the
/// pooled HTTP client used for every proxied call.
#[derive(Clone)]
pub struct AppState {
    directory: Arc<Directory>,
    client: reqwest::Client,
}

impl AppState {
    pub fn bootstrap(config: &Config) -> Result<Self, AppError> {
        let directory = Directory::from_mappings(&config.mappings)?;
        if directory.is_empty() {
            return Err(AppError::Config(
                "config must define at least one mapping".into(),
            ));
        }
        let client = config.build_client()?;
        for backend in directory.iter() {
            info!("routing `{}` to {}", backend.name(), backend.url());
        }
        Ok(AppState {
            directory: Arc::new(directory),
            client,
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
