// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use tracing::debug;

use super::ClusterClient;
use crate::{
    crds::{app::APP_CRD_NAME, App},
    Result,
};

const DEFAULT_PORT: i32 = 8888;
const WEB_PROCESS: &str = "web";

/// Namespace and process ports of an app, as far as the cluster knows about it.
#[derive(Clone, Debug)]
pub struct ResolvedApp {
    pub namespace: String,
    pub app: Option<App>,
}

impl ResolvedApp {
    /// Port of `process` when given and declared, else the web process, else any process, else 8888.
    pub fn port(&self, process: Option<&str>) -> i32 {
        let Some(groups) = self.app.as_ref().and_then(|app| app.spec.configs.as_ref()).map(|configs| &configs.groups) else {
            return DEFAULT_PORT;
        };
        let first_port = |name: &str| {
            groups.values().filter_map(|processes| processes.get(name)).flat_map(|config| config.ports.first()).map(port_number).find(|port| *port > 0)
        };
        process
            .and_then(first_port)
            .or_else(|| first_port(WEB_PROCESS))
            .or_else(|| groups.values().flat_map(|processes| processes.values()).flat_map(|config| config.ports.first()).map(port_number).find(|port| *port > 0))
            .unwrap_or(DEFAULT_PORT)
    }
}

fn port_number(port: &crate::crds::app::ProcessPort) -> i32 {
    if port.target_port > 0 {
        port.target_port
    } else {
        port.port
    }
}

pub struct AppResolver<'a> {
    cluster: &'a ClusterClient,
    default_namespace: &'a str,
}

impl<'a> AppResolver<'a> {
    pub fn new(cluster: &'a ClusterClient, default_namespace: &'a str) -> Self {
        Self { cluster, default_namespace }
    }

    pub async fn resolve(&self, app_name: &str) -> Result<ResolvedApp> {
        let fallback = || ResolvedApp { namespace: self.default_namespace.to_owned(), app: None };
        if self.cluster.custom_resource_definitions().get_opt(APP_CRD_NAME).await?.is_none() {
            debug!("No {APP_CRD_NAME} definition, using namespace {} for {app_name}", self.default_namespace);
            return Ok(fallback());
        }
        let Some(app) = self.cluster.apps(self.default_namespace).get_opt(app_name).await? else {
            debug!("App {app_name} not found, using namespace {}", self.default_namespace);
            return Ok(fallback());
        };
        let namespace = if app.spec.namespace_name.is_empty() { self.default_namespace.to_owned() } else { app.spec.namespace_name.clone() };
        Ok(ResolvedApp { namespace, app: Some(app) })
    }
}
