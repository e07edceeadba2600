// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::{collections::HashMap, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::{
    config::{AuthProviderConfig, ExecConfig, KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::ClusterClient;
use crate::{Error, Result};

pub const CLUSTER_NAME_HEADER: &str = "X-Tsuru-Cluster-Name";
pub const CLUSTER_ADDRESSES_HEADER: &str = "X-Tsuru-Cluster-Addresses";
const FALLBACK_CLUSTER: &str = "in-cluster";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub auth_provider: Option<AuthProviderConfig>,
    #[serde(default)]
    pub exec: Option<ExecConfig>,
    /// base64 encoded PEM bundle
    #[serde(default)]
    pub ca: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClustersFile {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.auth_provider.is_some() && self.exec.is_some() {
            return Err(Error::AmbiguousAuth(self.name.clone()));
        }
        if let Some(ca) = &self.ca {
            STANDARD.decode(ca).map_err(|e| Error::InvalidClusterCa(self.name.clone(), e))?;
        }
        Ok(())
    }

    /// API server URL for this cluster, the configured `address` wins over the header address.
    pub fn server<'a>(&'a self, header_address: &'a str) -> &'a str {
        if self.address.is_empty() {
            header_address
        } else {
            &self.address
        }
    }

    /// A single context kubeconfig pointing at [`ClusterConfig::server`].
    pub fn kubeconfig(&self, header_address: &str) -> Result<Kubeconfig> {
        self.validate()?;
        let server = self.server(header_address);

        let mut cluster = json!({ "server": server });
        if let Some(ca) = &self.ca {
            cluster["certificate-authority-data"] = json!(ca);
        }
        let mut user = serde_json::Map::new();
        if let Some(token) = &self.token {
            user.insert("token".to_owned(), json!(token));
        }
        if let Some(auth_provider) = &self.auth_provider {
            user.insert("auth-provider".to_owned(), serde_json::to_value(auth_provider)?);
        }
        if let Some(exec) = &self.exec {
            user.insert("exec".to_owned(), serde_json::to_value(exec)?);
        }

        let kubeconfig = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": self.name, "cluster": cluster }],
            "users": [{ "name": self.name, "user": user }],
            "contexts": [{ "name": self.name, "context": { "cluster": self.name, "user": self.name } }],
            "current-context": self.name,
        });
        Ok(serde_json::from_value(kubeconfig)?)
    }
}

/// Resolves the cluster a request talks to and caches one client per cluster and API server.
pub struct ClusterBinder {
    clusters: Vec<ClusterConfig>,
    timeout: Duration,
    cache: Mutex<HashMap<(String, String), ClusterClient>>,
    fallback: OnceCell<ClusterClient>,
}

impl ClusterBinder {
    pub fn new(clusters: Vec<ClusterConfig>, timeout: Duration) -> Self {
        Self { clusters, timeout, cache: Mutex::new(HashMap::new()), fallback: OnceCell::new() }
    }

    #[must_use]
    pub fn with_fallback(mut self, client: Client) -> Self {
        self.fallback = OnceCell::new_with(Some(ClusterClient::new(FALLBACK_CLUSTER, client)));
        self
    }

    pub async fn bind(&self, cluster_name: &str, addresses: &str) -> Result<ClusterClient> {
        let Some(address) = addresses.split(',').map(str::trim).find(|address| !address.is_empty()) else {
            return self.fallback().await;
        };
        let cluster = self.select(cluster_name)?;

        // a default entry without address serves every header named cluster, each at its own server
        let key = (cluster.name.clone(), cluster.server(address).to_owned());
        let mut cache = self.cache.lock().await;
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }
        let mut config = Config::from_custom_kubeconfig(cluster.kubeconfig(address)?, &KubeConfigOptions::default()).await?;
        self.apply_timeouts(&mut config);
        let client = ClusterClient::new(&cluster.name, Client::try_from(config)?);
        info!("Connected to cluster {} at {}", key.0, key.1);
        cache.insert(key, client.clone());
        Ok(client)
    }

    pub async fn fallback(&self) -> Result<ClusterClient> {
        let client = self
            .fallback
            .get_or_try_init(|| async {
                let mut config = Config::infer().await?;
                self.apply_timeouts(&mut config);
                debug!("Using inferred cluster configuration {}", config.cluster_url);
                Ok::<_, Error>(ClusterClient::new(FALLBACK_CLUSTER, Client::try_from(config)?))
            })
            .await?;
        Ok(client.clone())
    }

    fn select(&self, cluster_name: &str) -> Result<&ClusterConfig> {
        self.clusters
            .iter()
            .find(|cluster| cluster.name == cluster_name)
            .or_else(|| self.clusters.iter().find(|cluster| cluster.default))
            .ok_or_else(|| Error::ClusterNotFound(cluster_name.to_owned()))
    }

    fn apply_timeouts(&self, config: &mut Config) {
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);
        config.write_timeout = Some(self.timeout);
    }
}
