// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use k8s_openapi::{
    api::{
        core::v1::{Secret, Service},
        networking::v1::Ingress,
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{Api, Client};
use tracing::debug;

use crate::{
    crds::{App, ClusterIssuer, Gateway, Issuer, VirtualService},
    Result,
};

pub mod app_resolver;
pub mod binding;

pub use app_resolver::{AppResolver, ResolvedApp};
pub use binding::{ClusterBinder, ClusterConfig};

/// Typed API accessors over the client bound to one request's cluster.
#[derive(Clone)]
pub struct ClusterClient {
    name: String,
    client: Client,
}

impl ClusterClient {
    pub fn new(name: &str, client: Client) -> Self {
        Self { name: name.to_owned(), client }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn istio_gateways(&self, namespace: &str) -> Api<Gateway> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn virtual_services(&self, namespace: &str) -> Api<VirtualService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn issuers(&self, namespace: &str) -> Api<Issuer> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn cluster_issuers(&self) -> Api<ClusterIssuer> {
        Api::all(self.client.clone())
    }

    pub fn apps(&self, namespace: &str) -> Api<App> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn custom_resource_definitions(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }

    pub async fn healthcheck(&self) -> Result<()> {
        let version = self.client.apiserver_version().await?;
        debug!("Cluster {} answered healthcheck with version {}", self.name, version.git_version);
        Ok(())
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").field("name", &self.name).finish_non_exhaustive()
    }
}
