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

//! Routing/merging reverse proxy that unifies several Graphite servers
//! behind one HTTP endpoint.
//!
//! Metric identifiers carry a leading environment prefix (`dev`, `prod`,
//! `stage`); the proxy routes each query to the backend(s) the prefix
//! matches, strips the prefix from the outgoing request, fans out in
//! parallel, and merges the JSON replies with the prefix restored.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod query;
