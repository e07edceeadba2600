// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! The router capability shared by the service, ingress and istio flavors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{cluster::ClusterClient, Result};

pub mod base;
pub mod ingress;
pub mod istio;
pub mod opts;
pub mod service;
pub mod swap;
pub mod targets;

pub use base::RouterBase;
pub use ingress::IngressRouter;
pub use istio::IstioGatewayRouter;
pub use opts::{EnsureOpts, RouterOpts};
pub use service::LoadBalancerRouter;
pub use targets::{BackendPrefix, BackendTarget};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub app_name: String,
    pub instance_name: String,
}

impl InstanceId {
    pub fn new(app_name: &str) -> Self {
        Self { app_name: app_name.to_owned(), instance_name: String::new() }
    }

    #[must_use]
    pub fn with_instance(mut self, instance_name: &str) -> Self {
        instance_name.clone_into(&mut self.instance_name);
        self
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance_name.is_empty() {
            write!(f, "{}", self.app_name)
        } else {
            write!(f, "{}/{}", self.app_name, self.instance_name)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertData {
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub key: String,
}

#[async_trait]
pub trait Router: Send + Sync {
    /// Converges the cluster objects of `id` to `opts`.
    async fn ensure(&self, cluster: &ClusterClient, id: &InstanceId, opts: &EnsureOpts) -> Result<()>;

    /// Deletes every object owned by `id`, absent objects are not an error.
    async fn remove(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<()>;

    async fn get_addresses(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>>;

    async fn swap(&self, cluster: &ClusterClient, src: &InstanceId, dst: &InstanceId) -> Result<()>;

    fn supported_options(&self) -> BTreeMap<String, String>;

    async fn healthcheck(&self, cluster: &ClusterClient) -> Result<()> {
        cluster.healthcheck().await
    }

    fn tls(&self) -> Option<&dyn RouterTls> {
        None
    }

    fn cname(&self) -> Option<&dyn RouterCname> {
        None
    }

    fn supports_prefix(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait RouterTls: Send + Sync {
    async fn add_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str, data: &CertData) -> Result<()>;
    async fn get_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str) -> Result<CertData>;
    async fn remove_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str) -> Result<()>;
}

/// Custom hostnames managed outside of a full ensure.
#[async_trait]
pub trait RouterCname: Send + Sync {
    async fn set_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()>;
    async fn unset_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()>;
    async fn get_cnames(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>>;
}
