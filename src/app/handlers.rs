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

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{Method, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use url::form_urlencoded;

use crate::{
    backend::{
        dispatch::{BackendResponse, dispatch},
        strip_routing_prefix,
    },
    error::AppError,
    query::{Expr, Query},
};

use super::{
    responses::{FindResponse, MetricNode, decode_expand, decode_find, decode_render, drain},
    state::AppState,
};

/// Largest request body buffered for replay across backends.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/render", get(render).post(render))
        .route("/metrics", get(metrics_find))
        .route("/metrics/find", get(metrics_find))
        .route("/metrics/expand", get(metrics_expand))
        .with_state(state)
}

/// `GET|POST /render?target=<expr>&...`
///
/// Every target is parsed, classified by its routing prefix, and bucketed
/// per backend; one query enters multiple buckets when its prefix is a
/// glob. Each bucket gets a copy of the request with the prefix-stripped
/// targets, remaining form parameters forwarded verbatim.
async fn render(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let mut params: Vec<(String, String)> = Vec::new();
    if parts.method == Method::POST {
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|err| AppError::BadRequest(format!("failed to read request body: {err}")))?;
        params.extend(form_urlencoded::parse(&bytes).into_owned());
    }
    if let Some(raw_query) = parts.uri.query() {
        params.extend(form_urlencoded::parse(raw_query.as_bytes()).into_owned());
    }

    let mut targets = Vec::new();
    let mut others = Vec::new();
    for (key, value) in params {
        if key == "target" {
            targets.push(value);
        } else {
            others.push((key, value));
        }
    }

    let mut queries = Vec::with_capacity(targets.len());
    for target in &targets {
        queries.push(Query::parse(target)?);
    }

    // bucket the rewritten targets per backend, preserving client order
    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for mut query in queries {
        let Some(prefix) = strip_routing_prefix(&mut query) else {
            continue;
        };
        let rewritten = query.to_string();
        for backend in state.directory().matching(&prefix) {
            buckets
                .entry(backend.name().to_string())
                .or_default()
                .push(rewritten.clone());
        }
    }
    if buckets.is_empty() {
        return Err(AppError::NoBackend);
    }

    let mut requests = Vec::with_capacity(buckets.len());
    for (name, bucket) in &buckets {
        let Some(backend) = state.directory().get(name) else {
            continue;
        };
        let mut form = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &others {
            form.append_pair(key, value);
        }
        for target in bucket {
            form.append_pair("target", target);
        }
        let encoded = form.finish();
        let request = if parts.method == Method::POST {
            backend.rewrite(state.client(), Method::POST, "/render", "", Some(encoded))?
        } else {
            backend.rewrite(state.client(), Method::GET, "/render", &encoded, None)?
        };
        requests.push((name.clone(), request));
    }

    let replies = dispatch(state.client(), requests);
    let (merged, last) = drain(replies, |backend, body| decode_render(backend, body)).await;
    merged_or_fallback(merged, last)
}

/// `GET /metrics` and `GET /metrics/find?query=<pattern>`
async fn metrics_find(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let route = classify_metrics(&state, request.uri().query().unwrap_or(""))?;
    if route.rest.is_empty() {
        // the client asked for the top level: one non-leaf node per
        // backend, no backend I/O
        let metrics = route
            .backends
            .iter()
            .map(|name| MetricNode {
                is_leaf: 0,
                name: name.clone(),
                path: format!("{name}."),
            })
            .collect();
        return Ok(Json(FindResponse { metrics }).into_response());
    }
    let requests = build_metrics_requests(&state, request.uri().path(), &route)?;
    let replies = dispatch(state.client(), requests);
    let (merged, last) = drain(replies, |backend, body| decode_find(backend, body)).await;
    if merged.is_empty() {
        forward_last(last)
    } else {
        Ok(Json(FindResponse { metrics: merged }).into_response())
    }
}

/// `GET /metrics/expand?query=<pattern>`
async fn metrics_expand(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let route = classify_metrics(&state, request.uri().query().unwrap_or(""))?;
    if route.rest.is_empty() {
        return Ok(Json(route.backends).into_response());
    }
    let requests = build_metrics_requests(&state, request.uri().path(), &route)?;
    let replies = dispatch(state.client(), requests);
    let (merged, last) = drain(replies, |backend, body| decode_expand(backend, body)).await;
    merged_or_fallback(merged, last)
}

/// The classified form of a `/metrics*` request: the matching backend
/// names, the prefix-stripped pattern (empty means top level), and the
/// remaining query parameters.
struct MetricsRoute {
    backends: Vec<String>,
    rest: String,
    others: Vec<(String, String)>,
}

fn classify_metrics(state: &AppState, raw_query: &str) -> Result<MetricsRoute, AppError> {
    let mut pattern: Option<String> = None;
    let mut others = Vec::new();
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()).into_owned() {
        if key == "query" {
            pattern = Some(value);
        } else {
            others.push((key, value));
        }
    }
    let pattern = pattern.unwrap_or_default();
    if pattern.trim().is_empty() {
        // an empty pattern enumerates the top level of every backend
        return Ok(MetricsRoute {
            backends: state
                .directory()
                .iter()
                .map(|backend| backend.name().to_string())
                .collect(),
            rest: String::new(),
            others,
        });
    }

    let mut query = Query::parse(&pattern)?;
    if !matches!(query.expr(), Expr::Metric(_)) {
        return Err(AppError::BadRequest(
            "query parameter must be a metric name".into(),
        ));
    }
    let Some(prefix) = strip_routing_prefix(&mut query) else {
        return Err(AppError::BadRequest(
            "query parameter must be a metric name".into(),
        ));
    };
    let backends: Vec<String> = state
        .directory()
        .matching(&prefix)
        .iter()
        .map(|backend| backend.name().to_string())
        .collect();
    if backends.is_empty() {
        return Err(AppError::NoBackend);
    }
    Ok(MetricsRoute {
        backends,
        rest: query.to_string(),
        others,
    })
}

fn build_metrics_requests(
    state: &AppState,
    path: &str,
    route: &MetricsRoute,
) -> Result<Vec<(String, reqwest::Request)>, AppError> {
    let mut form = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &route.others {
        form.append_pair(key, value);
    }
    form.append_pair("query", &route.rest);
    let encoded = form.finish();

    let mut requests = Vec::with_capacity(route.backends.len());
    for name in &route.backends {
        let Some(backend) = state.directory().get(name) else {
            continue;
        };
        requests.push((
            name.clone(),
            backend.rewrite(state.client(), Method::GET, path, &encoded, None)?,
        ));
    }
    Ok(requests)
}

/// The merged payload when anything was merged; otherwise the last raw
/// backend response, or 503 when no backend produced one.
fn merged_or_fallback<T: Serialize>(
    merged: Vec<T>,
    last: Option<BackendResponse>,
) -> Result<Response, AppError> {
    if merged.is_empty() {
        forward_last(last)
    } else {
        Ok(Json(merged).into_response())
    }
}

fn forward_last(last: Option<BackendResponse>) -> Result<Response, AppError> {
    let Some(last) = last else {
        return Err(AppError::Unavailable);
    };
    let mut builder = Response::builder().status(last.status);
    if let Some(content_type) = last.content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(last.body))
        .map_err(|err| AppError::Internal(format!("failed to build response: {err}")))
}
