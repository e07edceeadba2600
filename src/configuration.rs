// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    cluster::{binding::ClustersFile, ClusterConfig},
    router::{
        ingress::{NGINX_ANNOTATIONS_PREFIX, NGINX_INGRESS_CLASS},
        IngressRouter, IstioGatewayRouter, LoadBalancerRouter, Router, RouterBase,
    },
    Result,
};

pub const MODE_SERVICE: &str = "service";
pub const MODE_LOADBALANCER: &str = "loadbalancer";
pub const MODE_INGRESS: &str = "ingress";
pub const MODE_INGRESS_NGINX: &str = "ingress-nginx";
pub const MODE_NGINX_INGRESS: &str = "nginx-ingress";
pub const MODE_ISTIO_GATEWAY: &str = "istio-gateway";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CommandArgs {
    /// Address the router API listens on.
    #[arg(long, default_value = "0.0.0.0:8077")]
    listen_addr: SocketAddr,
    /// Namespace used for apps without a tsuru App resource.
    #[arg(long, default_value = "default")]
    k8s_namespace: String,
    /// Timeout in seconds for Kubernetes API calls.
    #[arg(long, default_value_t = 10)]
    k8s_timeout: u64,
    /// Label added to every managed object, repeatable.
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    k8s_labels: Vec<(String, String)>,
    /// Annotation added to every managed object, repeatable.
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    k8s_annotations: Vec<(String, String)>,
    /// Enabled router modes, the first one serves `/api`.
    #[arg(long, value_delimiter = ',', default_value = MODE_SERVICE)]
    controller_modes: Vec<String>,
    /// Domain suffix of generated hosts.
    #[arg(long, default_value = "local")]
    ingress_domain: String,
    #[arg(long)]
    ingress_class: Option<String>,
    /// Use `spec.ingressClassName` instead of the class annotation.
    #[arg(long)]
    ingress_use_class_name: bool,
    /// Port advertised in plain HTTP ingress addresses.
    #[arg(long)]
    ingress_http_port: Option<u16>,
    #[arg(long)]
    ingress_annotations_prefix: Option<String>,
    /// Selector of the istio ingress gateway pods, repeatable.
    #[arg(long = "istio-gateway.gateway-selector", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    istio_gateway_selector: Vec<(String, String)>,
    /// Router option copied into a label, repeatable.
    #[arg(long, value_name = "OPT=LABEL", value_parser = parse_key_value)]
    opts_to_label: Vec<(String, String)>,
    /// Help text shown for an option mapped with --opts-to-label.
    #[arg(long, value_name = "OPT=DOC", value_parser = parse_key_value)]
    opts_to_label_doc: Vec<(String, String)>,
    /// Labels added to objects of apps in a pool.
    #[arg(long, value_name = "POOL={\"KEY\":\"VALUE\"}", value_parser = parse_pool_labels)]
    pool_labels: Vec<(String, BTreeMap<String, String>)>,
    #[arg(long, requires = "key_file")]
    cert_file: Option<PathBuf>,
    #[arg(long, requires = "cert_file")]
    key_file: Option<PathBuf>,
    /// YAML file with the clusters requests may target.
    #[arg(long)]
    clusters_file: Option<PathBuf>,
    /// Export request spans over OTLP.
    #[arg(long)]
    enable_open_telemetry: bool,
    #[arg(long, default_value = "http://127.0.0.1:4317")]
    open_telemetry_endpoint: String,
    /// Upper bound in seconds for a single API call.
    #[arg(long, default_value_t = 30)]
    server_write_timeout: u64,
    #[arg(long, env = "ROUTER_API_USER", hide = true)]
    api_user: Option<String>,
    #[arg(long, env = "ROUTER_API_PASSWORD", hide = true, hide_env_values = true)]
    api_password: Option<String>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

fn parse_pool_labels(raw: &str) -> std::result::Result<(String, BTreeMap<String, String>), String> {
    let (pool, labels) = raw.split_once('=').ok_or_else(|| format!("expected POOL={{JSON}}, got {raw:?}"))?;
    let labels = serde_json::from_str(labels).map_err(|e| format!("invalid labels for pool {pool}: {e}"))?;
    Ok((pool.to_owned(), labels))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("at least one controller mode must be configured")]
    NoModes,
    #[error("unknown controller mode {0:?}")]
    UnknownMode(String),
    #[error("controller mode {0:?} configured twice")]
    DuplicateMode(String),
}

#[derive(Debug, TypedBuilder)]
pub struct Configuration {
    #[builder(default = SocketAddr::from(([0, 0, 0, 0], 8077)))]
    pub listen_addr: SocketAddr,
    #[builder(default = "default".to_owned(), setter(into))]
    pub namespace: String,
    #[builder(default = Duration::from_secs(10))]
    pub k8s_timeout: Duration,
    #[builder(default)]
    pub labels: BTreeMap<String, String>,
    #[builder(default)]
    pub annotations: BTreeMap<String, String>,
    pub modes: Vec<String>,
    #[builder(default = "local".to_owned(), setter(into))]
    pub domain: String,
    #[builder(default)]
    pub ingress_class: Option<String>,
    #[builder(default)]
    pub ingress_use_class_name: bool,
    #[builder(default)]
    pub ingress_http_port: Option<u16>,
    #[builder(default)]
    pub ingress_annotations_prefix: Option<String>,
    #[builder(default)]
    pub gateway_selector: BTreeMap<String, String>,
    #[builder(default)]
    pub opts_as_labels: BTreeMap<String, String>,
    #[builder(default)]
    pub opts_as_labels_docs: BTreeMap<String, String>,
    #[builder(default)]
    pub pool_labels: BTreeMap<String, BTreeMap<String, String>>,
    #[builder(default)]
    pub tls: Option<(PathBuf, PathBuf)>,
    #[builder(default)]
    pub clusters: Vec<ClusterConfig>,
    #[builder(default)]
    pub open_telemetry_endpoint: Option<String>,
    #[builder(default = Duration::from_secs(30))]
    pub write_timeout: Duration,
    #[builder(default)]
    pub credentials: Option<Credentials>,
}

impl Configuration {
    /// Builds the configuration from parsed flags, reading the clusters file when one is given.
    pub fn load(args: CommandArgs) -> Result<Self> {
        let clusters = match &args.clusters_file {
            Some(path) => serde_yaml::from_str::<ClustersFile>(&std::fs::read_to_string(path)?)?.clusters,
            None => vec![],
        };
        for cluster in &clusters {
            cluster.validate()?;
        }
        let credentials = args.api_user.zip(args.api_password).map(|(user, password)| Credentials { user, password });
        let configuration = Configuration::builder()
            .listen_addr(args.listen_addr)
            .namespace(args.k8s_namespace)
            .k8s_timeout(Duration::from_secs(args.k8s_timeout))
            .labels(args.k8s_labels.into_iter().collect())
            .annotations(args.k8s_annotations.into_iter().collect())
            .modes(args.controller_modes.into_iter().map(|mode| mode.trim().to_owned()).filter(|mode| !mode.is_empty()).collect())
            .domain(args.ingress_domain)
            .ingress_class(args.ingress_class)
            .ingress_use_class_name(args.ingress_use_class_name)
            .ingress_http_port(args.ingress_http_port)
            .ingress_annotations_prefix(args.ingress_annotations_prefix)
            .gateway_selector(args.istio_gateway_selector.into_iter().collect())
            .opts_as_labels(args.opts_to_label.into_iter().collect())
            .opts_as_labels_docs(args.opts_to_label_doc.into_iter().collect())
            .pool_labels(args.pool_labels.into_iter().collect())
            .tls(args.cert_file.zip(args.key_file))
            .clusters(clusters)
            .open_telemetry_endpoint(args.enable_open_telemetry.then_some(args.open_telemetry_endpoint))
            .write_timeout(Duration::from_secs(args.server_write_timeout))
            .credentials(credentials)
            .build();
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.modes.is_empty() {
            return Err(ConfigurationError::NoModes.into());
        }
        for (index, mode) in self.modes.iter().enumerate() {
            if !is_known_mode(mode) {
                return Err(ConfigurationError::UnknownMode(mode.clone()).into());
            }
            if self.modes[..index].contains(mode) {
                return Err(ConfigurationError::DuplicateMode(mode.clone()).into());
            }
        }
        Ok(())
    }

    /// A request never outlives either the server write timeout or the Kubernetes timeout.
    pub fn request_deadline(&self) -> Duration {
        self.write_timeout.min(self.k8s_timeout)
    }

    fn router_base(&self) -> RouterBase {
        RouterBase::builder()
            .namespace(self.namespace.clone())
            .domain_suffix(self.domain.clone())
            .labels(self.labels.clone())
            .annotations(self.annotations.clone())
            .opts_as_labels(self.opts_as_labels.clone())
            .opts_as_labels_docs(self.opts_as_labels_docs.clone())
            .pool_labels(self.pool_labels.clone())
            .build()
    }

    fn ingress_router(&self, class: &str, annotations_prefix: &str) -> IngressRouter {
        IngressRouter::builder()
            .base(self.router_base())
            .ingress_class(self.ingress_class.clone().unwrap_or_else(|| class.to_owned()))
            .use_ingress_class_name(self.ingress_use_class_name)
            .http_port(self.ingress_http_port)
            .annotations_prefix(self.ingress_annotations_prefix.clone().unwrap_or_else(|| annotations_prefix.to_owned()))
            .build()
    }

    pub fn build_routers(&self) -> Result<BTreeMap<String, Arc<dyn Router>>> {
        self.validate()?;
        let mut routers: BTreeMap<String, Arc<dyn Router>> = BTreeMap::new();
        for mode in &self.modes {
            let router: Arc<dyn Router> = match mode.as_str() {
                MODE_SERVICE | MODE_LOADBALANCER => Arc::new(LoadBalancerRouter::builder().base(self.router_base()).build()),
                MODE_INGRESS => Arc::new(self.ingress_router("", "")),
                MODE_INGRESS_NGINX | MODE_NGINX_INGRESS => Arc::new(self.ingress_router(NGINX_INGRESS_CLASS, NGINX_ANNOTATIONS_PREFIX)),
                MODE_ISTIO_GATEWAY => {
                    Arc::new(IstioGatewayRouter::builder().base(self.router_base()).gateway_selector(self.gateway_selector.clone()).build())
                },
                other => return Err(ConfigurationError::UnknownMode(other.to_owned()).into()),
            };
            routers.insert(mode.clone(), router);
        }
        Ok(routers)
    }
}

fn is_known_mode(mode: &str) -> bool {
    [MODE_SERVICE, MODE_LOADBALANCER, MODE_INGRESS, MODE_INGRESS_NGINX, MODE_NGINX_INGRESS, MODE_ISTIO_GATEWAY].contains(&mode)
}
