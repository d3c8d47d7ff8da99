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

//! Backend directory: the immutable map from metrics prefix to upstream
//! Graphite server, per-backend request rewriting, and the prefix
//! classifier used to route parsed queries.

pub mod dispatch;

use std::collections::BTreeMap;

use axum::http::Method;
use log::warn;
use url::Url;

use crate::{
    error::AppError,
    query::{Metric, Query},
};

/// One upstream Graphite server registered under a metrics prefix.
#[derive(Debug, Clone)]
pub struct Backend {
    name: String,
    url: Url,
}

impl Backend {
    fn new(name: &str, raw_url: &str) -> Result<Self, AppError> {
        let url = Url::parse(raw_url)
            .map_err(|err| AppError::Config(format!("invalid URL for `{name}`: {err}")))?;
        if url.host_str().is_none() {
            return Err(AppError::Config(format!(
                "backend URL for `{name}` must be absolute: {raw_url}"
            )));
        }
        Ok(Backend {
            name: name.to_string(),
            url,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Builds the outgoing request for this backend: scheme and host come
    /// from the backend URL, the backend's path prefixes the incoming
    /// path, and the raw query strings are concatenated. A form body is
    /// sent urlencoded with its length.
    pub fn rewrite(
        &self,
        client: &reqwest::Client,
        method: Method,
        path: &str,
        raw_query: &str,
        form_body: Option<String>,
    ) -> Result<reqwest::Request, AppError> {
        let mut url = self.url.clone();
        url.set_path(&join_paths(self.url.path(), path));
        let query = join_queries(self.url.query().unwrap_or(""), raw_query);
        url.set_query(if query.is_empty() { None } else { Some(&query) });

        let mut builder = client.request(method, url);
        if let Some(body) = form_body {
            builder = builder
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(body);
        }
        builder.build().map_err(|err| {
            AppError::Internal(format!("failed to build request for {}: {err}", self.name))
        })
    }
}

fn join_paths(base: &str, incoming: &str) -> String {
    let base = base.trim_end_matches('/');
    if incoming.starts_with('/') {
        format!("{base}{incoming}")
    } else {
        format!("{base}/{incoming}")
    }
}

fn join_queries(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left}&{right}"),
    }
}

/// Immutable prefix-to-backend map, built once at startup and safe for
/// unsynchronised reads.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    backends: BTreeMap<String, Backend>,
}

impl Directory {
    pub fn from_mappings(mappings: &BTreeMap<String, String>) -> Result<Self, AppError> {
        let mut backends = BTreeMap::new();
        for (prefix, raw_url) in mappings {
            if prefix.is_empty() || prefix.contains('.') {
                return Err(AppError::Config(format!(
                    "prefix `{prefix}` must be a single non-empty path component"
                )));
            }
            backends.insert(prefix.clone(), Backend::new(prefix, raw_url)?);
        }
        Ok(Directory { backends })
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.values()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends whose name the candidate prefix glob-matches, so a `*`
    /// prefix fans out to every backend.
    pub fn matching(&self, prefix: &Metric) -> Vec<&Backend> {
        self.backends
            .values()
            .filter(|backend| prefix.matches(backend.name()))
            .collect()
    }
}

/// Splits the routing prefix off every metric in the query and rewrites
/// the metrics in place so the outgoing request no longer carries it.
/// When one query names more than one prefix the last one wins and a
/// warning is logged. Returns None for a query without metrics.
pub fn strip_routing_prefix(query: &mut Query) -> Option<Metric> {
    let mut prefix: Option<Metric> = None;
    for metric in query.metrics_mut() {
        let (first, rest) = metric.split();
        if let Some(previous) = &prefix {
            if previous != &first {
                warn!("multiple prefixes in one query; routing by `{first}`");
            }
        }
        prefix = Some(first);
        *metric = rest;
    }
    prefix
}
