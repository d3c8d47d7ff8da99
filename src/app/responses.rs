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

//! Graphite JSON envelopes and the merge loop that combines backend
//! replies into one response.

use bytes::Bytes;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::mpsc::Receiver;

use crate::backend::dispatch::{BackendResponse, Reply};

/// One node in a `/metrics/find` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricNode {
    pub is_leaf: u8,
    pub name: String,
    pub path: String,
}

/// `/metrics/find` output envelope.
#[derive(Debug, Serialize)]
pub struct FindResponse {
    pub metrics: Vec<MetricNode>,
}

/// Backends answer `/metrics/find` either with a bare array or wrapped in
/// a `{"metrics": [...]}` envelope depending on their version; accept
/// both and always emit the envelope form.
#[derive(Deserialize)]
#[serde(untagged)]
enum FindPayload {
    Wrapped { metrics: Vec<MetricNode> },
    Bare(Vec<MetricNode>),
}

impl FindPayload {
    fn into_nodes(self) -> Vec<MetricNode> {
        match self {
            FindPayload::Wrapped { metrics } => metrics,
            FindPayload::Bare(metrics) => metrics,
        }
    }
}

/// One series in a `/render` reply. Datapoints are opaque JSON preserved
/// byte-for-byte.
#[derive(Debug, Serialize, Deserialize)]
pub struct RenderTarget {
    pub target: String,
    pub datapoints: Box<RawValue>,
}

/// Drains the dispatcher channel, decoding every successful body and
/// remembering the last raw response as the total-failure fallback.
/// Transport errors and undecodable bodies drop that backend's
/// contribution without aborting the merge.
pub(crate) async fn drain<T>(
    mut replies: Receiver<Reply>,
    mut decode: impl FnMut(&str, &Bytes) -> Result<Vec<T>, serde_json::Error>,
) -> (Vec<T>, Option<BackendResponse>) {
    let mut merged = Vec::new();
    let mut last = None;
    while let Some(reply) = replies.recv().await {
        let response = match reply.result {
            Ok(response) => response,
            Err(err) => {
                warn!("error contacting {}: {err}", reply.backend);
                continue;
            }
        };
        if response.status.is_success() {
            match decode(&reply.backend, &response.body) {
                Ok(mut chunk) => merged.append(&mut chunk),
                Err(err) => warn!("invalid response from {}: {err}", reply.backend),
            }
        } else {
            warn!("{} answered {}", reply.backend, response.status);
        }
        last = Some(response);
    }
    (merged, last)
}

/// Decodes a find reply and re-prepends the backend name to every path.
pub(crate) fn decode_find(backend: &str, body: &Bytes) -> Result<Vec<MetricNode>, serde_json::Error> {
    let payload: FindPayload = serde_json::from_slice(body)?;
    let mut nodes = payload.into_nodes();
    for node in &mut nodes {
        node.path = format!("{backend}.{}", node.path);
    }
    Ok(nodes)
}

pub(crate) fn decode_expand(backend: &str, body: &Bytes) -> Result<Vec<String>, serde_json::Error> {
    let names: Vec<String> = serde_json::from_slice(body)?;
    Ok(names
        .into_iter()
        .map(|name| format!("{backend}.{name}"))
        .collect())
}

pub(crate) fn decode_render(
    backend: &str,
    body: &Bytes,
) -> Result<Vec<RenderTarget>, serde_json::Error> {
    let mut targets: Vec<RenderTarget> = serde_json::from_slice(body)?;
    for target in &mut targets {
        target.target = format!("{backend}.{}", target.target);
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_accepts_envelope_and_bare_forms() {
        let envelope = Bytes::from_static(
            br#"{"metrics": [{"is_leaf": 0, "name": "db01", "path": "collectd.db01."}]}"#,
        );
        let nodes = decode_find("dev", &envelope).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].path, "dev.collectd.db01.");

        let bare =
            Bytes::from_static(br#"[{"is_leaf": 1, "name": "foo", "path": "collectd.foo"}]"#);
        let nodes = decode_find("stage", &bare).unwrap();
        assert_eq!(nodes[0].path, "stage.collectd.foo");
    }

    #[test]
    fn expand_prepends_backend_name() {
        let body = Bytes::from_static(br#"["collectd.db01", "collectd.foo"]"#);
        assert_eq!(
            decode_expand("prod", &body).unwrap(),
            vec!["prod.collectd.db01", "prod.collectd.foo"]
        );
    }

    #[test]
    fn render_keeps_datapoints_verbatim() {
        let body = Bytes::from_static(
            br#"[{"target": "entries", "datapoints": [[1.0, 1311836008], [null, 1311836009]]}]"#,
        );
        let targets = decode_render("stage", &body).unwrap();
        assert_eq!(targets[0].target, "stage.entries");
        assert_eq!(
            targets[0].datapoints.get(),
            "[[1.0, 1311836008], [null, 1311836009]]"
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        let body = Bytes::from_static(b"<html>oops</html>");
        assert!(decode_find("dev", &body).is_err());
        assert!(decode_expand("dev", &body).is_err());
        assert!(decode_render("dev", &body).is_err());
    }
}
