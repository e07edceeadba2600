// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use kube::{
    api::{DeleteParams, PostParams},
    Api, ResourceExt,
};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use super::{
    base::{is_frozen, merge_metadata, swapped_with, RouterBase, ROUTER_LB_LABEL},
    opts::{self, EnsureOpts},
    swap::{SwapTransaction, Swappable},
    targets, InstanceId, Router,
};
use crate::{
    cluster::ClusterClient,
    error::{is_not_found, map_write_error},
    names, Error, Result,
};

const DEFAULT_EXPOSED_PORT: i32 = 80;
const KUBECTL_ANNOTATION_PREFIX: &str = "kubectl.kubernetes.io/";

/// Exposes an app through a dedicated `LoadBalancer` service.
#[derive(Clone, Debug, TypedBuilder)]
pub struct LoadBalancerRouter {
    base: RouterBase,
}

impl Swappable for Service {
    fn exchange_targets(&mut self, other: &mut Self) {
        let this = self.spec.get_or_insert_with(Default::default);
        let that = other.spec.get_or_insert_with(Default::default);
        std::mem::swap(&mut this.selector, &mut that.selector);
    }
}

fn external_address(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|load_balancer| load_balancer.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|ingress| ingress.ip.clone().filter(|ip| !ip.is_empty()).or_else(|| ingress.hostname.clone().filter(|host| !host.is_empty())))
}

async fn swappable_service(api: &Api<Service>, id: &InstanceId) -> Result<Service> {
    let name = names::load_balancer_name(id);
    let service = api.get_opt(&name).await?.ok_or_else(|| Error::NotFound(format!("service {name} not found")))?;
    if is_frozen(&service.metadata) {
        return Err(Error::Frozen(name));
    }
    if external_address(&service).is_none() {
        return Err(Error::LoadBalancerNotReady(name));
    }
    Ok(service)
}

impl LoadBalancerRouter {
    fn desired_service(&self, id: &InstanceId, ensure: &EnsureOpts, namespace: &str, web: &Service, target_port: i32) -> (Service, BTreeSet<String>) {
        let mut labels = web.labels().clone();
        labels.extend(self.base.desired_labels(id, ensure));
        labels.insert(ROUTER_LB_LABEL.to_owned(), "true".to_owned());

        let mut annotations: BTreeMap<String, String> =
            web.annotations().iter().filter(|(key, _)| !key.starts_with(KUBECTL_ANNOTATION_PREFIX)).map(|(k, v)| (k.clone(), v.clone())).collect();
        annotations.extend(self.base.annotations.clone());
        let opts_annotations = self.base.opts_annotations(&ensure.opts, "");
        annotations.extend(opts_annotations.set);

        let port = ensure.opts.exposed_port.unwrap_or(DEFAULT_EXPOSED_PORT);
        let service = Service {
            metadata: ObjectMeta {
                name: Some(names::load_balancer_name(id)),
                namespace: Some(namespace.to_owned()),
                labels: Some(labels),
                annotations: Some(annotations).filter(|annotations| !annotations.is_empty()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_owned()),
                selector: web.spec.as_ref().and_then(|spec| spec.selector.clone()),
                ports: Some(vec![ServicePort {
                    name: Some(format!("port-{port}")),
                    protocol: Some("TCP".to_owned()),
                    port,
                    target_port: Some(IntOrString::Int(target_port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        };
        (service, opts_annotations.remove)
    }

    /// Keeps whatever the cluster allocated (cluster IPs, node ports) and the swapped selector.
    fn merge(existing: &Service, desired: Service, removals: &BTreeSet<String>) -> Service {
        let mut merged = existing.clone();
        merge_metadata(&mut merged.metadata, desired.metadata.labels.as_ref().unwrap_or(&BTreeMap::new()), desired.metadata.annotations.as_ref().unwrap_or(&BTreeMap::new()), removals);

        let desired_spec = desired.spec.unwrap_or_default();
        let existing_ports = existing.spec.as_ref().and_then(|spec| spec.ports.clone()).unwrap_or_default();
        let swapped = swapped_with(&existing.metadata).is_some();
        let spec = merged.spec.get_or_insert_with(Default::default);
        spec.type_ = desired_spec.type_;
        if !swapped {
            spec.selector = desired_spec.selector;
        }
        spec.ports = desired_spec.ports.map(|ports| {
            ports
                .into_iter()
                .map(|mut port| {
                    port.node_port = existing_ports.iter().find(|existing| existing.port == port.port).and_then(|existing| existing.node_port);
                    port
                })
                .collect()
        });
        merged
    }
}

#[async_trait]
impl Router for LoadBalancerRouter {
    async fn ensure(&self, cluster: &ClusterClient, id: &InstanceId, ensure: &EnsureOpts) -> Result<()> {
        let target = targets::default_target(&ensure.prefixes)?;
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.services(&app.namespace);
        let name = names::load_balancer_name(id);
        let existing = api.get_opt(&name).await?;
        if existing.as_ref().is_some_and(|service| is_frozen(&service.metadata)) {
            info!("Service {}/{name} is frozen, skipping ensure of {id}", app.namespace);
            return Ok(());
        }

        let web_namespace = target.namespace_or(&app.namespace);
        let web = cluster
            .services(web_namespace)
            .get_opt(&target.service)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(format!("{web_namespace}/{}", target.service)))?;
        let (desired, removals) = self.desired_service(id, ensure, &app.namespace, &web, app.port(None));

        let pp = PostParams::default();
        match existing {
            None => {
                api.create(&pp, &desired).await.map_err(|e| map_write_error(e, &name))?;
                info!("Created load balancer service {}/{name} for {id}", app.namespace);
            },
            Some(existing) => {
                let merged = Self::merge(&existing, desired, &removals);
                if merged == existing {
                    debug!("Load balancer service {}/{name} is up to date", app.namespace);
                } else {
                    api.replace(&name, &pp, &merged).await.map_err(|e| map_write_error(e, &name))?;
                    info!("Updated load balancer service {}/{name} for {id}", app.namespace);
                }
            },
        }
        Ok(())
    }

    async fn remove(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.services(&app.namespace);
        let name = names::load_balancer_name(id);
        let Some(existing) = api.get_opt(&name).await? else {
            debug!("Load balancer service {}/{name} already removed", app.namespace);
            return Ok(());
        };
        if is_frozen(&existing.metadata) {
            info!("Service {}/{name} is frozen, skipping removal of {id}", app.namespace);
            return Ok(());
        }
        if let Some(dst) = swapped_with(&existing.metadata) {
            return Err(Error::AppSwapped { app: id.app_name.clone(), dst: dst.to_owned() });
        }
        match api.delete(&name, &DeleteParams::default()).await {
            Err(e) if !is_not_found(&e) => Err(e.into()),
            _ => {
                info!("Removed load balancer service {}/{name}", app.namespace);
                Ok(())
            },
        }
    }

    async fn get_addresses(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let Some(service) = cluster.services(&app.namespace).get_opt(&names::load_balancer_name(id)).await? else {
            return Ok(vec![]);
        };
        let Some(address) = external_address(&service) else {
            return Ok(vec![]);
        };
        let port = service.spec.as_ref().and_then(|spec| spec.ports.as_ref()).and_then(|ports| ports.first()).map(|port| port.port);
        Ok(vec![match port {
            Some(port) => format!("{address}:{port}"),
            None => address,
        }])
    }

    async fn swap(&self, cluster: &ClusterClient, src: &InstanceId, dst: &InstanceId) -> Result<()> {
        let src_app = self.base.resolve_app(cluster, &src.app_name).await?;
        let dst_app = self.base.resolve_app(cluster, &dst.app_name).await?;
        if src_app.namespace != dst_app.namespace {
            return Err(Error::CrossNamespaceSwap(src_app.namespace, dst_app.namespace));
        }
        let api = cluster.services(&src_app.namespace);
        let src_service = swappable_service(&api, src).await?;
        let dst_service = swappable_service(&api, dst).await?;
        SwapTransaction::new(api).commit(src_service, &src.app_name, dst_service, &dst.app_name).await
    }

    fn supported_options(&self) -> BTreeMap<String, String> {
        self.base.supported_options(&[
            (opts::OPT_POOL, "Pool the app belongs to, used to pick pool labels."),
            (opts::OPT_EXPOSED_PORT, "Port exposed by the load balancer, defaults to 80."),
        ])
    }
}
