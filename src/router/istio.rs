// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Istio flavor: a Gateway per app and a VirtualService routing its hosts to the app service.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, PostParams},
    Api, ResourceExt,
};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use super::{
    base::{
        annotation, is_frozen, join_hosts, label, merge_metadata, split_hosts, RouterBase, ADDITIONAL_HOSTS_ANNOTATION, BASE_SERVICE_NAMESPACE_LABEL,
        BASE_SERVICE_NAME_LABEL,
    },
    opts::EnsureOpts,
    targets::{self, BackendTarget},
    InstanceId, Router, RouterCname,
};
use crate::{
    cluster::ClusterClient,
    crds::{
        istio::{Destination, GatewaySpec, HttpRoute, HttpRouteDestination, Server, ServerPort, VirtualServiceSpec},
        Gateway, VirtualService,
    },
    error::{is_not_found, map_write_error},
    names, Error, Result,
};

const MESH_GATEWAY: &str = "mesh";
const GATEWAY_PORT: u32 = 80;
const GATEWAY_PROTOCOL: &str = "HTTP2";
const EXTERNAL_HOST_ANNOTATION: &str = "router.tsuru.io/external-host";

#[derive(Clone, Debug, TypedBuilder)]
pub struct IstioGatewayRouter {
    base: RouterBase,
    #[builder(default)]
    gateway_selector: BTreeMap<String, String>,
}

fn gateway_servers() -> Vec<Server> {
    vec![Server {
        port: ServerPort { number: GATEWAY_PORT, name: GATEWAY_PROTOCOL.to_lowercase(), protocol: GATEWAY_PROTOCOL.to_owned() },
        hosts: vec!["*".to_owned()],
        other: BTreeMap::new(),
    }]
}

/// Points the first HTTP route at `target`, replacing the destination of the previous target if there is one.
fn retarget_route(spec: &mut VirtualServiceSpec, previous: Option<&str>, target: &BackendTarget) {
    if spec.http.is_empty() {
        spec.http.push(HttpRoute::default());
    }
    let Some(http) = spec.http.first_mut() else {
        return;
    };
    let previous_position = previous.and_then(|previous| http.route.iter().position(|route| route.destination.host == previous));
    if let Some(route) = previous_position.and_then(|position| http.route.get_mut(position)) {
        route.destination.host.clone_from(&target.service);
    } else if http.route.iter().all(|route| route.destination.host != target.service) {
        http.route.push(HttpRouteDestination {
            destination: Destination { host: target.service.clone(), ..Default::default() },
            ..Default::default()
        });
    }
}

/// Drops hosts that were added as cnames and are no longer wanted, then appends missing ones in sorted order.
fn sync_hosts(hosts: &mut Vec<String>, wanted: &BTreeSet<String>, previous_cnames: &BTreeSet<String>) {
    hosts.retain(|host| wanted.contains(host) || !previous_cnames.contains(host));
    let missing: BTreeSet<String> = wanted.iter().filter(|host| !hosts.contains(host)).cloned().collect();
    hosts.extend(missing);
}

async fn replace_virtual_service(api: &Api<VirtualService>, virtual_service: &VirtualService) -> Result<()> {
    let name = virtual_service.name_any();
    api.replace(&name, &PostParams::default(), virtual_service).await.map_err(|e| map_write_error(e, &name))?;
    info!("Updated virtual service {name}");
    Ok(())
}

/// Labels and option annotations shared by the Gateway and the VirtualService of an app.
struct MeshMetadata {
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    removals: BTreeSet<String>,
}

impl IstioGatewayRouter {
    fn mesh_metadata(&self, id: &InstanceId, ensure: &EnsureOpts, namespace: &str, target: &BackendTarget) -> MeshMetadata {
        let mut labels = self.base.desired_labels(id, ensure);
        labels.insert(BASE_SERVICE_NAMESPACE_LABEL.to_owned(), target.namespace_or(namespace).to_owned());
        labels.insert(BASE_SERVICE_NAME_LABEL.to_owned(), target.service.clone());
        let mut annotations = self.base.annotations.clone();
        let opts_annotations = self.base.opts_annotations(&ensure.opts, "");
        annotations.extend(opts_annotations.set);
        MeshMetadata { labels, annotations, removals: opts_annotations.remove }
    }

    async fn ensure_gateway(&self, api: &Api<Gateway>, name: &str, namespace: &str, metadata: &MeshMetadata) -> Result<()> {
        let spec = GatewaySpec { selector: self.gateway_selector.clone(), servers: gateway_servers(), other: BTreeMap::new() };
        match api.get_opt(name).await? {
            None => {
                let mut gateway = Gateway::new(name, spec);
                gateway.metadata.namespace = Some(namespace.to_owned());
                merge_metadata(&mut gateway.metadata, &metadata.labels, &metadata.annotations, &metadata.removals);
                api.create(&PostParams::default(), &gateway).await.map_err(|e| map_write_error(e, name))?;
                info!("Created gateway {namespace}/{name}");
            },
            Some(existing) => {
                let mut updated = existing.clone();
                merge_metadata(&mut updated.metadata, &metadata.labels, &metadata.annotations, &metadata.removals);
                updated.spec.selector = spec.selector;
                updated.spec.servers = spec.servers;
                if updated == existing {
                    debug!("Gateway {namespace}/{name} is up to date");
                } else {
                    api.replace(name, &PostParams::default(), &updated).await.map_err(|e| map_write_error(e, name))?;
                    info!("Updated gateway {namespace}/{name}");
                }
            },
        }
        Ok(())
    }

    async fn virtual_service(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<(Api<VirtualService>, Option<VirtualService>)> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.virtual_services(&app.namespace);
        let existing = api.get_opt(&names::mesh_name(id)).await?;
        Ok((api, existing))
    }

    async fn edit_cnames(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str, add: bool) -> Result<()> {
        let (api, existing) = self.virtual_service(cluster, id).await?;
        let existing = existing.ok_or_else(|| Error::NotFound(format!("virtual service {} not found", names::mesh_name(id))))?;
        if is_frozen(&existing.metadata) {
            info!("Virtual service {} is frozen, skipping cname change of {id}", existing.name_any());
            return Ok(());
        }
        let previous = split_hosts(annotation(&existing.metadata, ADDITIONAL_HOSTS_ANNOTATION));
        let mut cnames = previous.clone();
        let mut updated = existing.clone();
        if add {
            cnames.insert(cname.to_owned());
            if !updated.spec.hosts.iter().any(|host| host == cname) {
                updated.spec.hosts.push(cname.to_owned());
            }
        } else {
            cnames.remove(cname);
            if previous.contains(cname) {
                updated.spec.hosts.retain(|host| host != cname);
            }
        }
        let annotations = updated.annotations_mut();
        if cnames.is_empty() {
            annotations.remove(ADDITIONAL_HOSTS_ANNOTATION);
        } else {
            annotations.insert(ADDITIONAL_HOSTS_ANNOTATION.to_owned(), join_hosts(&cnames));
        }
        if updated != existing {
            replace_virtual_service(&api, &updated).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Router for IstioGatewayRouter {
    async fn ensure(&self, cluster: &ClusterClient, id: &InstanceId, ensure: &EnsureOpts) -> Result<()> {
        let target = targets::default_target(&ensure.prefixes)?;
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let name = names::mesh_name(id);
        let api = cluster.virtual_services(&app.namespace);
        let existing = api.get_opt(&name).await?;
        if existing.as_ref().is_some_and(|virtual_service| is_frozen(&virtual_service.metadata)) {
            info!("Virtual service {}/{name} is frozen, skipping ensure of {id}", app.namespace);
            return Ok(());
        }

        let metadata = self.mesh_metadata(id, ensure, &app.namespace, target);
        self.ensure_gateway(&cluster.istio_gateways(&app.namespace), &name, &app.namespace, &metadata).await?;
        let MeshMetadata { labels, mut annotations, mut removals } = metadata;

        let cnames: BTreeSet<String> = ensure.cnames.iter().filter(|cname| !cname.is_empty()).cloned().collect();
        let external_host = self.base.base_host(id, &ensure.opts);
        annotations.insert(EXTERNAL_HOST_ANNOTATION.to_owned(), external_host.clone());
        if cnames.is_empty() {
            removals.insert(ADDITIONAL_HOSTS_ANNOTATION.to_owned());
        } else {
            annotations.insert(ADDITIONAL_HOSTS_ANNOTATION.to_owned(), join_hosts(&cnames));
        }

        let mut virtual_service = existing.clone().unwrap_or_else(|| {
            let mut virtual_service = VirtualService::new(&name, VirtualServiceSpec { gateways: vec![MESH_GATEWAY.to_owned()], ..Default::default() });
            virtual_service.metadata.namespace = Some(app.namespace.clone());
            virtual_service
        });
        let previous_cnames = split_hosts(annotation(&virtual_service.metadata, ADDITIONAL_HOSTS_ANNOTATION));
        let previous_target = label(&virtual_service.metadata, BASE_SERVICE_NAME_LABEL).map(str::to_owned);
        let previous_external = annotation(&virtual_service.metadata, EXTERNAL_HOST_ANNOTATION).map(str::to_owned);
        merge_metadata(&mut virtual_service.metadata, &labels, &annotations, &removals);

        let spec = &mut virtual_service.spec;
        if !spec.gateways.contains(&name) {
            spec.gateways.push(name.clone());
        }
        let mut wanted = cnames.clone();
        wanted.insert(external_host);
        wanted.insert(target.service.clone());
        for previous in [previous_target.as_ref(), previous_external.as_ref()].into_iter().flatten().filter(|previous| !wanted.contains(*previous)) {
            spec.hosts.retain(|host| host != previous);
        }
        sync_hosts(&mut spec.hosts, &wanted, &previous_cnames);
        retarget_route(spec, previous_target.as_deref(), target);

        match existing {
            None => {
                api.create(&PostParams::default(), &virtual_service).await.map_err(|e| map_write_error(e, &name))?;
                info!("Created virtual service {}/{name}", app.namespace);
            },
            Some(existing) if existing == virtual_service => debug!("Virtual service {}/{name} is up to date", app.namespace),
            Some(_) => replace_virtual_service(&api, &virtual_service).await?,
        }
        Ok(())
    }

    async fn remove(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let name = names::mesh_name(id);
        let api = cluster.virtual_services(&app.namespace);
        if let Some(existing) = api.get_opt(&name).await? {
            if is_frozen(&existing.metadata) {
                info!("Virtual service {}/{name} is frozen, skipping removal of {id}", app.namespace);
                return Ok(());
            }
            let mut updated = existing.clone();
            updated.spec.gateways.retain(|gateway| *gateway != name);
            if updated != existing {
                replace_virtual_service(&api, &updated).await?;
            }
        }
        match cluster.istio_gateways(&app.namespace).delete(&name, &DeleteParams::default()).await {
            Err(e) if !is_not_found(&e) => Err(e.into()),
            _ => {
                info!("Removed gateway {}/{name}", app.namespace);
                Ok(())
            },
        }
    }

    /// The external host recorded by the last ensure, or for older objects every host
    /// that is neither a cname nor the in-mesh service name.
    async fn get_addresses(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>> {
        let (_, existing) = self.virtual_service(cluster, id).await?;
        let Some(virtual_service) = existing else {
            return Ok(vec![]);
        };
        if let Some(external_host) = annotation(&virtual_service.metadata, EXTERNAL_HOST_ANNOTATION) {
            return Ok(vec![external_host.to_owned()]);
        }
        let cnames = split_hosts(annotation(&virtual_service.metadata, ADDITIONAL_HOSTS_ANNOTATION));
        let service = label(&virtual_service.metadata, BASE_SERVICE_NAME_LABEL);
        Ok(virtual_service.spec.hosts.iter().filter(|host| !cnames.contains(*host) && Some(host.as_str()) != service).cloned().collect())
    }

    async fn swap(&self, _cluster: &ClusterClient, _src: &InstanceId, _dst: &InstanceId) -> Result<()> {
        Err(Error::SwapNotSupported)
    }

    fn supported_options(&self) -> BTreeMap<String, String> {
        self.base.supported_options(&[])
    }

    fn cname(&self) -> Option<&dyn RouterCname> {
        Some(self)
    }
}

#[async_trait]
impl RouterCname for IstioGatewayRouter {
    async fn set_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()> {
        self.edit_cnames(cluster, id, cname, true).await
    }

    async fn unset_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()> {
        self.edit_cnames(cluster, id, cname, false).await
    }

    async fn get_cnames(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>> {
        let (_, existing) = self.virtual_service(cluster, id).await?;
        Ok(existing.map(|existing| split_hosts(annotation(&existing.metadata, ADDITIONAL_HOSTS_ANNOTATION)).into_iter().collect()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        router::{base::FREEZE_ANNOTATION, BackendPrefix},
        test_cluster::FakeCluster,
    };

    fn router() -> IstioGatewayRouter {
        IstioGatewayRouter::builder()
            .base(RouterBase::builder().domain_suffix("my.domain").build())
            .gateway_selector([("istio".to_owned(), "ingressgateway".to_owned())].into())
            .build()
    }

    fn ensure_opts(service: &str, cnames: &[&str]) -> EnsureOpts {
        EnsureOpts {
            prefixes: vec![BackendPrefix { prefix: String::new(), target: BackendTarget { service: service.to_owned(), namespace: "default".to_owned() } }],
            cnames: cnames.iter().map(|cname| (*cname).to_owned()).collect(),
            ..Default::default()
        }
    }

    fn destinations(virtual_service: &VirtualService) -> Vec<String> {
        virtual_service.spec.http[0].route.iter().map(|route| route.destination.host.clone()).collect()
    }

    fn host_set(virtual_service: &VirtualService) -> BTreeSet<String> {
        virtual_service.spec.hosts.iter().cloned().collect()
    }

    #[tokio::test]
    async fn test_create_gateway_and_virtual_service() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        router().ensure(&cluster, &id, &ensure_opts("myapp-web", &[])).await.unwrap();

        let gateway: Gateway = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(gateway.spec.selector.get("istio").map(String::as_str), Some("ingressgateway"));
        assert_eq!(gateway.spec.servers, gateway_servers());
        assert_eq!(gateway.spec.servers[0].port.name, "http2");

        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(virtual_service.spec.gateways, vec!["mesh".to_owned(), "myapp".to_owned()]);
        assert_eq!(virtual_service.spec.hosts, vec!["myapp-web".to_owned(), "myapp.my.domain".to_owned()]);
        assert_eq!(destinations(&virtual_service), vec!["myapp-web".to_owned()]);
        assert_eq!(label(&virtual_service.metadata, BASE_SERVICE_NAME_LABEL), Some("myapp-web"));
        assert_eq!(router().get_addresses(&cluster, &id).await.unwrap(), vec!["myapp.my.domain".to_owned()]);
    }

    #[tokio::test]
    async fn test_cname_diff_keeps_foreign_hosts() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let mut existing = VirtualService::new(
            "myapp",
            VirtualServiceSpec { hosts: vec!["existing1".to_owned(), "my.other.addr".to_owned()], ..Default::default() },
        );
        existing.metadata.namespace = Some("default".to_owned());
        existing.annotations_mut().insert(ADDITIONAL_HOSTS_ANNOTATION.to_owned(), "my.other.addr,myhost.com".to_owned());
        fake.seed(&existing);

        router().ensure(&cluster, &InstanceId::new("myapp"), &ensure_opts("myapp-web", &["another.host.com", "my.other.addr", "myhost.com"])).await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        let expected: BTreeSet<String> =
            ["existing1", "my.other.addr", "myhost.com", "another.host.com", "myapp.my.domain", "myapp-web"].into_iter().map(str::to_owned).collect();
        assert_eq!(host_set(&virtual_service), expected);
        assert_eq!(virtual_service.spec.hosts.len(), expected.len());
        assert_eq!(annotation(&virtual_service.metadata, ADDITIONAL_HOSTS_ANNOTATION), Some("another.host.com,my.other.addr,myhost.com"));
        assert_eq!(virtual_service.spec.gateways, vec!["myapp".to_owned()]);

        router().ensure(&cluster, &InstanceId::new("myapp"), &ensure_opts("myapp-web", &["myhost.com"])).await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        let expected: BTreeSet<String> = ["existing1", "myhost.com", "myapp.my.domain", "myapp-web"].into_iter().map(str::to_owned).collect();
        assert_eq!(host_set(&virtual_service), expected);
        assert_eq!(annotation(&virtual_service.metadata, ADDITIONAL_HOSTS_ANNOTATION), Some("myhost.com"));
    }

    #[tokio::test]
    async fn test_retarget_keeps_foreign_destinations() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        router().ensure(&cluster, &id, &ensure_opts("myapp-web", &[])).await.unwrap();
        let mut virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        virtual_service.spec.http[0].route.push(HttpRouteDestination {
            destination: Destination { host: "canary".to_owned(), ..Default::default() },
            weight: Some(10),
            ..Default::default()
        });
        fake.seed(&virtual_service);

        router().ensure(&cluster, &id, &ensure_opts("myapp-v2", &[])).await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(destinations(&virtual_service), vec!["myapp-v2".to_owned(), "canary".to_owned()]);
        assert_eq!(virtual_service.spec.http[0].route[1].weight, Some(10));
        assert!(!virtual_service.spec.hosts.contains(&"myapp-web".to_owned()));
        assert!(virtual_service.spec.hosts.contains(&"myapp-v2".to_owned()));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        let ensure = ensure_opts("myapp-web", &["myhost.com"]);
        router().ensure(&cluster, &id, &ensure).await.unwrap();
        let writes = fake.write_attempts();
        router().ensure(&cluster, &id, &ensure).await.unwrap();
        assert_eq!(fake.write_attempts(), writes);
    }

    #[tokio::test]
    async fn test_remove_keeps_virtual_service() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        router().ensure(&cluster, &id, &ensure_opts("myapp-web", &[])).await.unwrap();
        let mut virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        virtual_service.spec.gateways.push("shared".to_owned());
        fake.seed(&virtual_service);

        router().remove(&cluster, &id).await.unwrap();
        router().remove(&cluster, &id).await.unwrap();
        assert!(fake.get::<Gateway>(Some("default"), "myapp").is_none());
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(virtual_service.spec.gateways, vec!["mesh".to_owned(), "shared".to_owned()]);
    }

    #[tokio::test]
    async fn test_swap_not_supported() {
        let fake = FakeCluster::start();
        let result = router().swap(&fake.cluster_client(), &InstanceId::new("a"), &InstanceId::new("b")).await;
        assert!(matches!(result, Err(Error::SwapNotSupported)));
    }

    #[tokio::test]
    async fn test_frozen_virtual_service() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        router().ensure(&cluster, &id, &ensure_opts("myapp-web", &[])).await.unwrap();
        let mut virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        virtual_service.annotations_mut().insert(FREEZE_ANNOTATION.to_owned(), "true".to_owned());
        fake.seed(&virtual_service);
        fake.forbid_writes();
        let writes = fake.write_attempts();

        router().ensure(&cluster, &id, &ensure_opts("other-web", &["x.io"])).await.unwrap();
        router().remove(&cluster, &id).await.unwrap();
        router().set_cname(&cluster, &id, "y.io").await.unwrap();
        assert_eq!(fake.write_attempts(), writes);
    }

    #[tokio::test]
    async fn test_additional_opts_annotations() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        let mut ensure = ensure_opts("myapp-web", &[]);
        ensure.opts.additional_opts = [("example.com/foo".to_owned(), "bar".to_owned()), ("stale".to_owned(), String::new())].into();
        router().ensure(&cluster, &id, &ensure).await.unwrap();

        let gateway: Gateway = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(annotation(&gateway.metadata, "example.com/foo"), Some("bar"));
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(annotation(&virtual_service.metadata, "example.com/foo"), Some("bar"));
        assert_eq!(annotation(&virtual_service.metadata, "stale"), Some(""));

        ensure.opts.additional_opts = [("stale-".to_owned(), String::new())].into();
        router().ensure(&cluster, &id, &ensure).await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert_eq!(annotation(&virtual_service.metadata, "stale"), None);
        assert_eq!(annotation(&virtual_service.metadata, "example.com/foo"), Some("bar"));
    }

    #[tokio::test]
    async fn test_addresses_follow_custom_domain() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        assert!(router().get_addresses(&cluster, &id).await.unwrap().is_empty());

        let mut ensure = ensure_opts("myapp-web", &["cname.io"]);
        ensure.opts.domain = "custom.io".to_owned();
        router().ensure(&cluster, &id, &ensure).await.unwrap();
        let mut virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert!(virtual_service.spec.hosts.contains(&"custom.io".to_owned()));
        virtual_service.spec.hosts.insert(0, "foreign.io".to_owned());
        fake.seed(&virtual_service);
        assert_eq!(router().get_addresses(&cluster, &id).await.unwrap(), vec!["custom.io".to_owned()]);

        router().ensure(&cluster, &id, &ensure_opts("myapp-web", &["cname.io"])).await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        let expected: BTreeSet<String> = ["foreign.io", "cname.io", "myapp.my.domain", "myapp-web"].into_iter().map(str::to_owned).collect();
        assert_eq!(host_set(&virtual_service), expected);
        assert_eq!(router().get_addresses(&cluster, &id).await.unwrap(), vec!["myapp.my.domain".to_owned()]);
    }

    #[tokio::test]
    async fn test_addresses_without_recorded_host() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let mut existing = VirtualService::new(
            "myapp",
            VirtualServiceSpec { hosts: vec!["myapp.old.domain".to_owned(), "myapp-web".to_owned(), "a.io".to_owned()], ..Default::default() },
        );
        existing.metadata.namespace = Some("default".to_owned());
        existing.labels_mut().insert(BASE_SERVICE_NAME_LABEL.to_owned(), "myapp-web".to_owned());
        existing.annotations_mut().insert(ADDITIONAL_HOSTS_ANNOTATION.to_owned(), "a.io".to_owned());
        fake.seed(&existing);
        assert_eq!(router().get_addresses(&cluster, &InstanceId::new("myapp")).await.unwrap(), vec!["myapp.old.domain".to_owned()]);
    }

    #[tokio::test]
    async fn test_legacy_cnames() {
        let fake = FakeCluster::start();
        let cluster = fake.cluster_client();
        let id = InstanceId::new("myapp");
        let router = router();
        router.ensure(&cluster, &id, &ensure_opts("myapp-web", &[])).await.unwrap();

        router.set_cname(&cluster, &id, "b.io").await.unwrap();
        router.set_cname(&cluster, &id, "a.io").await.unwrap();
        assert_eq!(router.get_cnames(&cluster, &id).await.unwrap(), vec!["a.io".to_owned(), "b.io".to_owned()]);
        router.unset_cname(&cluster, &id, "b.io").await.unwrap();
        let virtual_service: VirtualService = fake.get(Some("default"), "myapp").unwrap();
        assert!(virtual_service.spec.hosts.contains(&"a.io".to_owned()));
        assert!(!virtual_service.spec.hosts.contains(&"b.io".to_owned()));
        assert_eq!(router.get_cnames(&cluster, &id).await.unwrap(), vec!["a.io".to_owned()]);
    }
}
