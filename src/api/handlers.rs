// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{AppState, INSTANCE_HEADER, OPTS_HEADER};
use crate::{
    cluster::{
        binding::{CLUSTER_ADDRESSES_HEADER, CLUSTER_NAME_HEADER},
        ClusterClient,
    },
    metrics,
    router::{BackendPrefix, BackendTarget, CertData, EnsureOpts, InstanceId, Router, RouterCname, RouterOpts, RouterTls},
    Error, Result,
};

type Params = HashMap<String, String>;

const FEATURE_TLS: &str = "tls";
const FEATURE_CNAME: &str = "cname";
const FEATURE_INFO: &str = "info";
const FEATURE_PREFIX: &str = "prefix";

#[derive(Debug, Default, Deserialize)]
struct SwapRequest {
    #[serde(rename = "Target", default)]
    target: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutesRequest {
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    extra_data: RouteExtraData,
}

#[derive(Debug, Default, Deserialize)]
struct RouteExtraData {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    service: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
}

/// `None` for an empty body, the decoded value otherwise.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|e| Error::BadRequest(format!("invalid request body: {e}")))
}

fn param<'a>(params: &'a Params, name: &str) -> Result<&'a str> {
    params.get(name).map(String::as_str).ok_or_else(|| Error::BadRequest(format!("missing path parameter {name}")))
}

/// One API call bound to a router mode, a cluster and an app instance.
struct Call<'a> {
    state: &'a AppState,
    mode: &'a str,
    router: Arc<dyn Router>,
    cluster: ClusterClient,
    id: InstanceId,
}

impl<'a> Call<'a> {
    async fn new(state: &'a AppState, params: &'a Params, headers: &HeaderMap) -> Result<Self> {
        let (mode, router) = state.router(params.get("mode").map(String::as_str))?;
        let id = InstanceId::new(param(params, "name")?).with_instance(header(headers, INSTANCE_HEADER));
        let cluster = state.binder.bind(header(headers, CLUSTER_NAME_HEADER), header(headers, CLUSTER_ADDRESSES_HEADER)).await?;
        debug!("Router {mode} on cluster {} for {id}", cluster.name());
        Ok(Self { state, mode, router, cluster, id })
    }

    fn tls(&self) -> Result<&dyn RouterTls> {
        self.router.tls().ok_or_else(|| Error::NotFound(format!("router {} does not support TLS", self.mode)))
    }

    fn cname(&self) -> Result<&dyn RouterCname> {
        self.router.cname().ok_or_else(|| Error::NotFound(format!("router {} does not support cnames", self.mode)))
    }

    async fn current_cnames(&self) -> Result<Vec<String>> {
        match self.router.cname() {
            Some(cname) => self.state.run(self.mode, "get_cnames", cname.get_cnames(&self.cluster, &self.id)).await,
            None => Ok(vec![]),
        }
    }

    async fn ensure(&self, ensure: &EnsureOpts) -> Result<()> {
        self.state.run(self.mode, "ensure", self.router.ensure(&self.cluster, &self.id, ensure)).await?;
        info!("Ensured {} with router {}", self.id, self.mode);
        Ok(())
    }

    /// Ensure with a single base target, keeping the cnames the router already knows about.
    async fn ensure_target(&self, opts: RouterOpts, target: BackendTarget) -> Result<()> {
        let ensure = async {
            let cnames = match self.router.cname() {
                Some(cname) => cname.get_cnames(&self.cluster, &self.id).await?,
                None => vec![],
            };
            let ensure = EnsureOpts { opts, cnames, prefixes: vec![BackendPrefix { prefix: String::new(), target }], ..Default::default() };
            self.router.ensure(&self.cluster, &self.id, &ensure).await
        };
        self.state.run(self.mode, "ensure", ensure).await?;
        info!("Ensured {} with router {}", self.id, self.mode);
        Ok(())
    }

    fn web_target(&self) -> BackendTarget {
        BackendTarget { service: format!("{}-web", self.id.app_name), namespace: String::new() }
    }
}

pub async fn get_backend(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<Json<Value>> {
    let call = Call::new(&state, &params, &headers).await?;
    let addresses = state.run(call.mode, "get_addresses", call.router.get_addresses(&call.cluster, &call.id)).await?;
    Ok(Json(json!({"address": addresses.first().cloned().unwrap_or_default(), "addresses": addresses})))
}

pub async fn add_backend(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let mut opts: RouterOpts = parse_body(&body)?.unwrap_or_default();
    opts.merge_header_opts(headers.get_all(OPTS_HEADER).iter().filter_map(|value| value.to_str().ok()))?;
    call.ensure_target(opts, call.web_target()).await?;
    Ok(StatusCode::OK)
}

pub async fn update_backend(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let Some(mut ensure) = parse_body::<EnsureOpts>(&body)? else {
        debug!("Empty update for {}", call.id);
        return Ok(StatusCode::OK);
    };
    ensure.opts.merge_header_opts(headers.get_all(OPTS_HEADER).iter().filter_map(|value| value.to_str().ok()))?;
    call.ensure(&ensure).await?;
    Ok(StatusCode::OK)
}

pub async fn remove_backend(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    state.run(call.mode, "remove", call.router.remove(&call.cluster, &call.id)).await?;
    info!("Removed {} with router {}", call.id, call.mode);
    Ok(StatusCode::OK)
}

pub async fn get_routes() -> Json<Value> {
    Json(json!({"addresses": []}))
}

pub async fn add_routes(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let request: RoutesRequest = parse_body(&body)?.unwrap_or_default();
    if !request.prefix.is_empty() {
        debug!("Ignoring routes with prefix {} for {}", request.prefix, call.id);
        return Ok(StatusCode::OK);
    }
    let target = if request.extra_data.service.is_empty() {
        call.web_target()
    } else {
        BackendTarget { service: request.extra_data.service, namespace: request.extra_data.namespace }
    };
    call.ensure_target(RouterOpts::default(), target).await?;
    Ok(StatusCode::OK)
}

pub async fn swap(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let request: SwapRequest = parse_body(&body)?.unwrap_or_default();
    if request.target.is_empty() {
        return Err(Error::BadRequest("swap target is required".to_owned()));
    }
    let call = Call::new(&state, &params, &headers).await?;
    let target = InstanceId::new(&request.target);
    state.run(call.mode, "swap", call.router.swap(&call.cluster, &call.id, &target)).await?;
    info!("Swapped {} with {target} using router {}", call.id, call.mode);
    Ok(StatusCode::OK)
}

pub async fn add_certificate(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    let data: CertData = parse_body(&body)?.ok_or_else(|| Error::BadRequest("certificate data is required".to_owned()))?;
    state.run(call.mode, "add_certificate", call.tls()?.add_certificate(&call.cluster, &call.id, cname, &data)).await?;
    Ok(StatusCode::OK)
}

pub async fn get_certificate(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<Json<CertData>> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    let data = state.run(call.mode, "get_certificate", call.tls()?.get_certificate(&call.cluster, &call.id, cname)).await?;
    Ok(Json(data))
}

pub async fn remove_certificate(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    state.run(call.mode, "remove_certificate", call.tls()?.remove_certificate(&call.cluster, &call.id, cname)).await?;
    Ok(StatusCode::OK)
}

pub async fn get_cnames(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<Json<Value>> {
    let call = Call::new(&state, &params, &headers).await?;
    call.cname()?;
    Ok(Json(json!({"cnames": call.current_cnames().await?})))
}

pub async fn get_cname(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    call.cname()?;
    if call.current_cnames().await?.iter().any(|known| known == cname) {
        Ok(StatusCode::OK)
    } else {
        Err(Error::NotFound(format!("cname {cname} not found for {}", call.id)))
    }
}

pub async fn set_cname(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    state.run(call.mode, "set_cname", call.cname()?.set_cname(&call.cluster, &call.id, cname)).await?;
    Ok(StatusCode::OK)
}

pub async fn unset_cname(State(state): State<Arc<AppState>>, Path(params): Path<Params>, headers: HeaderMap) -> Result<StatusCode> {
    let call = Call::new(&state, &params, &headers).await?;
    let cname = param(&params, "cname")?;
    state.run(call.mode, "unset_cname", call.cname()?.unset_cname(&call.cluster, &call.id, cname)).await?;
    Ok(StatusCode::OK)
}

pub async fn info(State(state): State<Arc<AppState>>, params: Option<Path<Params>>) -> Result<Json<Value>> {
    let mode = params.as_ref().and_then(|Path(params)| params.get("mode"));
    let (_, router) = state.router(mode.map(String::as_str))?;
    Ok(Json(json!(router.supported_options())))
}

pub async fn support(State(state): State<Arc<AppState>>, Path(params): Path<Params>) -> Result<StatusCode> {
    let (_, router) = state.router(params.get("mode").map(String::as_str))?;
    let supported = match param(&params, "feature")? {
        FEATURE_TLS => router.tls().is_some(),
        FEATURE_CNAME => router.cname().is_some(),
        FEATURE_INFO => true,
        FEATURE_PREFIX => router.supports_prefix(),
        _ => false,
    };
    Ok(if supported { StatusCode::OK } else { StatusCode::NOT_FOUND })
}

pub async fn healthcheck(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    let cluster = state.binder.fallback().await?;
    for (mode, router) in &state.routers {
        state.run(mode, "healthcheck", router.healthcheck(&cluster)).await?;
    }
    Ok("WORKING")
}

pub async fn export_metrics() -> Result<String> {
    metrics::gather()
}
