// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! HTTP surface of the router: the tsuru router API under `/api` and `/api/{mode}` plus ops endpoints.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router as HttpRouter,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use typed_builder::TypedBuilder;

use crate::{cluster::ClusterBinder, configuration::Credentials, metrics, router::Router, Error, Result};

mod handlers;
pub mod server;

pub const INSTANCE_HEADER: &str = "X-Router-Instance";
pub const OPTS_HEADER: &str = "X-Router-Opt";

#[derive(TypedBuilder)]
pub struct AppState {
    routers: BTreeMap<String, Arc<dyn Router>>,
    #[builder(setter(into))]
    default_mode: String,
    binder: ClusterBinder,
    #[builder(default = Duration::from_secs(10))]
    deadline: Duration,
    #[builder(default)]
    credentials: Option<Credentials>,
}

impl AppState {
    fn router(&self, mode: Option<&str>) -> Result<(&str, Arc<dyn Router>)> {
        let mode = mode.unwrap_or(&self.default_mode);
        self.routers.get_key_value(mode).map(|(mode, router)| (mode.as_str(), Arc::clone(router))).ok_or_else(|| Error::UnknownMode(mode.to_owned()))
    }

    /// Runs `operation` under the request deadline and records its outcome.
    async fn run<T>(&self, mode: &str, operation: &str, future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let result = tokio::time::timeout(self.deadline, future).await.unwrap_or_else(|_| Err(Error::ContextCancelled));
        metrics::record_operation(mode, operation, &result);
        result
    }
}

/// Compares the digests of both values, taking the same time wherever they differ.
fn same_secret(given: &str, expected: &str) -> bool {
    let (given, expected) = (Sha256::digest(given), Sha256::digest(expected));
    given.iter().zip(expected.iter()).fold(0, |diff, (a, b)| diff | (a ^ b)) == 0
}

async fn basic_auth(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Result<Response> {
    if let Some(credentials) = &state.credentials {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
            .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|decoded| {
                decoded.split_once(':').map(|(user, password)| same_secret(user, &credentials.user) & same_secret(password, &credentials.password))
            })
            .unwrap_or(false);
        if !authorized {
            return Err(Error::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let handler = request.extensions().get::<MatchedPath>().map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned());
    let method = request.method().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(&handler, &method, response.status().as_u16(), start.elapsed());
    response
}

fn api_routes() -> HttpRouter<Arc<AppState>> {
    HttpRouter::new()
        .route("/backend/{name}", get(handlers::get_backend).post(handlers::add_backend).put(handlers::update_backend).delete(handlers::remove_backend))
        .route("/backend/{name}/routes", get(handlers::get_routes).post(handlers::add_routes))
        .route("/backend/{name}/swap", post(handlers::swap))
        .route(
            "/backend/{name}/certificate/{cname}",
            put(handlers::add_certificate).get(handlers::get_certificate).delete(handlers::remove_certificate),
        )
        .route("/backend/{name}/cname", get(handlers::get_cnames))
        .route("/backend/{name}/cname/{cname}", post(handlers::set_cname).get(handlers::get_cname).delete(handlers::unset_cname))
        .route("/info", get(handlers::info))
        .route("/support/{feature}", get(handlers::support))
}

pub fn create_router(state: Arc<AppState>) -> HttpRouter {
    let api = HttpRouter::new()
        .nest("/api", api_routes())
        .nest("/api/{mode}", api_routes())
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), basic_auth));
    HttpRouter::new()
        .merge(api)
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/metrics", get(handlers::export_metrics))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests;
