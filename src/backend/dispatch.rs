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

//! Parallel fan-out of rewritten requests to backends.

use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use log::debug;
use reqwest::Client;
use tokio::sync::mpsc::{self, Receiver};

/// One backend's answer, or the transport error that prevented it.
#[derive(Debug)]
pub struct Reply {
    pub backend: String,
    pub result: Result<BackendResponse, reqwest::Error>,
}

/// Status, content type, and fully buffered body of a backend reply.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// Issues every request in parallel, one task per backend, and streams the
/// replies back. The channel is sized to the task count so a worker's send
/// never blocks even when the consumer stops reading early; the channel
/// closes once the last worker has dropped its sender.
pub fn dispatch(client: &Client, requests: Vec<(String, reqwest::Request)>) -> Receiver<Reply> {
    let (tx, rx) = mpsc::channel(requests.len().max(1));
    for (backend, request) in requests {
        let client = client.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            debug!("proxying to {backend}: {}", request.url());
            let result = send(&client, request).await;
            let _ = tx.send(Reply { backend, result }).await;
        });
    }
    rx
}

async fn send(client: &Client, request: reqwest::Request) -> Result<BackendResponse, reqwest::Error> {
    let response = client.execute(request).await?;
    let status = response.status();
    let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).cloned();
    let body = response.bytes().await?;
    Ok(BackendResponse {
        status,
        content_type,
        body,
    })
}
