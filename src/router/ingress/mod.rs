// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Ingress based router, generic and NGINX flavored.
//!
//! One main ingress per app instance carries a rule for every exposed host. Custom hostnames get a child
//! ingress each (see [`cname`]) and certificates live in per host TLS secrets (see [`tls`]).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        core::v1::Service,
        networking::v1::{HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort},
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, ResourceExt,
};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use super::{
    base::{
        annotation, is_frozen, join_hosts, merge_metadata, swapped_with, RouterBase, ACME_ANNOTATION, APP_NAME_LABEL, BASE_SERVICE_NAMESPACE_LABEL,
        BASE_SERVICE_NAME_LABEL, CNAMES_ANNOTATION, COMMON_NAME_ANNOTATION, DOMAIN_NAME_LABEL, INGRESS_CLASS_ANNOTATION,
    },
    opts::{self, EnsureOpts},
    swap::{SwapTransaction, Swappable},
    targets, InstanceId, Router, RouterCname, RouterTls,
};
use crate::{
    cluster::{ClusterClient, ResolvedApp},
    error::{is_api_status, is_not_found, map_write_error},
    names, Error, Result,
};

pub mod cname;
pub mod tls;

use cname::CnameSettings;

pub const NGINX_INGRESS_CLASS: &str = "nginx";
pub const NGINX_ANNOTATIONS_PREFIX: &str = "nginx.ingress.kubernetes.io";
const PATH_TYPE: &str = "ImplementationSpecific";

#[derive(Clone, Debug, TypedBuilder)]
pub struct IngressRouter {
    base: RouterBase,
    #[builder(default, setter(into))]
    ingress_class: String,
    #[builder(default)]
    use_ingress_class_name: bool,
    #[builder(default)]
    http_port: Option<u16>,
    #[builder(default, setter(into))]
    annotations_prefix: String,
}

impl Swappable for Ingress {
    fn exchange_targets(&mut self, other: &mut Self) {
        if let (Some(this), Some(that)) = (first_path_mut(self), first_path_mut(other)) {
            std::mem::swap(&mut this.backend, &mut that.backend);
        }
    }
}

fn first_path_mut(ingress: &mut Ingress) -> Option<&mut HTTPIngressPath> {
    ingress.spec.as_mut()?.rules.as_mut()?.first_mut()?.http.as_mut()?.paths.first_mut()
}

pub(crate) fn first_path(ingress: &Ingress) -> Option<&HTTPIngressPath> {
    ingress.spec.as_ref()?.rules.as_ref()?.first()?.http.as_ref()?.paths.first()
}

fn service_backend(service: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend { name: service.to_owned(), port: Some(ServiceBackendPort { number: Some(port), name: None }) }),
        resource: None,
    }
}

pub(crate) fn ingress_rule(host: &str, path: Option<String>, backend: IngressBackend) -> IngressRule {
    IngressRule {
        host: Some(host.to_owned()),
        http: Some(HTTPIngressRuleValue { paths: vec![HTTPIngressPath { path, path_type: PATH_TYPE.to_owned(), backend }] }),
    }
}

pub(crate) fn tls_entry(id: &InstanceId, host: &str) -> IngressTLS {
    IngressTLS { hosts: Some(vec![host.to_owned()]), secret_name: Some(names::secret_name(id, host)) }
}

pub(crate) fn acme_enabled(ingress: &Ingress) -> bool {
    annotation(&ingress.metadata, ACME_ANNOTATION).and_then(opts::parse_bool).unwrap_or(false)
}

/// Whether ACME or a per-cname certificate issuer provides the certificates of `ingress`.
fn certificates_managed(ingress: &Ingress) -> bool {
    acme_enabled(ingress) || annotation(&ingress.metadata, COMMON_NAME_ANNOTATION).is_some()
}

fn rule_hosts(ingress: &Ingress) -> Vec<String> {
    ingress.spec.iter().flat_map(|spec| spec.rules.iter().flatten()).filter_map(|rule| rule.host.clone()).collect()
}

fn tls_hosts(ingress: &Ingress) -> BTreeSet<String> {
    ingress.spec.iter().flat_map(|spec| spec.tls.iter().flatten()).flat_map(|tls| tls.hosts.iter().flatten()).cloned().collect()
}

/// Owner references of `desired` replace the existing ones with the same uid, foreign owners stay.
fn merge_owner_references(existing: Option<Vec<OwnerReference>>, desired: Option<Vec<OwnerReference>>) -> Option<Vec<OwnerReference>> {
    let Some(desired) = desired else {
        return existing;
    };
    let mut merged: Vec<OwnerReference> = existing.unwrap_or_default().into_iter().filter(|owner| desired.iter().all(|new| new.uid != owner.uid)).collect();
    merged.extend(desired);
    Some(merged)
}

/// Applies `desired` on top of `existing`: metadata is merged, rules replaced, TLS and class only when set.
pub(crate) fn merge_ingress(existing: &Ingress, desired: Ingress, removals: &BTreeSet<String>) -> Ingress {
    let mut merged = existing.clone();
    merge_metadata(&mut merged.metadata, desired.labels(), desired.annotations(), removals);
    merged.metadata.owner_references = merge_owner_references(existing.metadata.owner_references.clone(), desired.metadata.owner_references);
    let desired_spec = desired.spec.unwrap_or_default();
    let spec = merged.spec.get_or_insert_with(Default::default);
    spec.rules = desired_spec.rules;
    match desired_spec.tls {
        Some(tls) => spec.tls = Some(tls),
        None if certificates_managed(existing) => {
            let hosts: BTreeSet<String> = spec.rules.iter().flatten().filter_map(|rule| rule.host.clone()).collect();
            let kept: Vec<IngressTLS> = spec
                .tls
                .take()
                .unwrap_or_default()
                .into_iter()
                .filter(|entry| !entry.hosts.as_ref().is_some_and(|entry_hosts| entry_hosts.iter().all(|host| hosts.contains(host))))
                .collect();
            spec.tls = Some(kept).filter(|kept| !kept.is_empty());
        },
        None => {},
    }
    if desired_spec.ingress_class_name.is_some() {
        spec.ingress_class_name = desired_spec.ingress_class_name;
    }
    merged
}

/// Creates `desired` or merges it into `existing`, skipping the write when nothing changes.
pub(crate) async fn upsert_ingress(api: &Api<Ingress>, existing: Option<Ingress>, desired: Ingress, removals: &BTreeSet<String>) -> Result<Ingress> {
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();
    match existing {
        None => match api.create(&PostParams::default(), &desired).await {
            Ok(created) => {
                info!("Created ingress {namespace}/{name}");
                Ok(created)
            },
            Err(e) if is_api_status(&e, 409) => Err(Error::IngressAlreadyExists { namespace, name }),
            Err(e) => Err(e.into()),
        },
        Some(existing) => {
            let merged = merge_ingress(&existing, desired, removals);
            if merged == existing {
                debug!("Ingress {namespace}/{name} is up to date");
                return Ok(existing);
            }
            let updated = api.replace(&name, &PostParams::default(), &merged).await.map_err(|e| map_write_error(e, &name))?;
            info!("Updated ingress {namespace}/{name}");
            Ok(updated)
        },
    }
}

pub(crate) async fn delete_ingress(api: &Api<Ingress>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Err(e) if !is_not_found(&e) => Err(e.into()),
        _ => {
            debug!("Deleted ingress {name}");
            Ok(())
        },
    }
}

impl IngressRouter {
    fn ingress_class<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested.or(Some(self.ingress_class.as_str())).filter(|class| !class.is_empty())
    }

    fn desired_ingress(&self, id: &InstanceId, ensure: &EnsureOpts, app: &ResolvedApp, web: Option<&Service>, existing: Option<&Ingress>) -> Result<(Ingress, BTreeSet<String>)> {
        let target = targets::default_target(&ensure.prefixes)?;
        let base_host = self.base.base_host(id, &ensure.opts);
        let hosts = targets::exposed_hosts(&base_host, &ensure.prefixes, ensure.opts.expose_all_services)?;
        let swapped_backend = existing.filter(|ingress| swapped_with(&ingress.metadata).is_some()).and_then(first_path).map(|path| path.backend.clone());
        let path = Some(ensure.opts.route.clone()).filter(|route| !route.is_empty());
        let rules = hosts
            .iter()
            .enumerate()
            .map(|(index, (host, prefix))| {
                let backend = match &swapped_backend {
                    Some(backend) if index == 0 => backend.clone(),
                    _ => service_backend(&prefix.target.service, app.port(prefix.process())),
                };
                ingress_rule(host, path.clone(), backend)
            })
            .collect();

        let mut labels = self.base.desired_labels(id, ensure);
        labels.insert(BASE_SERVICE_NAMESPACE_LABEL.to_owned(), target.namespace_or(&app.namespace).to_owned());
        labels.insert(BASE_SERVICE_NAME_LABEL.to_owned(), target.service.clone());

        let mut annotations = self.base.annotations.clone();
        let opts_annotations = self.base.opts_annotations(&ensure.opts, &self.annotations_prefix);
        annotations.extend(opts_annotations.set);
        let mut removals = opts_annotations.remove;
        let class = self.ingress_class(opts_annotations.class.as_deref());
        if let (false, Some(class)) = (self.use_ingress_class_name, class) {
            annotations.insert(INGRESS_CLASS_ANNOTATION.to_owned(), class.to_owned());
        }

        let tls = if ensure.opts.acme {
            annotations.insert(ACME_ANNOTATION.to_owned(), "true".to_owned());
            Some(hosts.iter().map(|(host, _)| tls_entry(id, host)).collect())
        } else {
            removals.insert(ACME_ANNOTATION.to_owned());
            None
        };

        let cnames = join_hosts(&ensure.cnames);
        if cnames.is_empty() {
            removals.insert(CNAMES_ANNOTATION.to_owned());
        } else {
            annotations.insert(CNAMES_ANNOTATION.to_owned(), cnames);
        }

        let owner_references = web.filter(|web| web.namespace().as_deref() == Some(app.namespace.as_str())).and_then(|web| {
            web.uid().map(|uid| {
                vec![OwnerReference { api_version: "v1".to_owned(), kind: "Service".to_owned(), name: web.name_any(), uid, ..Default::default() }]
            })
        });

        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some(names::ingress_name(id)),
                namespace: Some(app.namespace.clone()),
                labels: Some(labels),
                annotations: Some(annotations).filter(|annotations| !annotations.is_empty()),
                owner_references,
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: class.filter(|_| self.use_ingress_class_name).map(str::to_owned),
                rules: Some(rules),
                tls,
                ..Default::default()
            }),
            status: None,
        };
        Ok((ingress, removals))
    }

    async fn owned_secrets(&self, cluster: &ClusterClient, id: &InstanceId, namespace: &str) -> Result<Vec<String>> {
        let secrets = cluster.secrets(namespace).list(&ListParams::default().labels(&format!("{APP_NAME_LABEL}={}", id.app_name))).await?;
        Ok(secrets
            .items
            .into_iter()
            .filter_map(|secret| {
                let host = secret.labels().get(DOMAIN_NAME_LABEL)?;
                let name = secret.name_any();
                (name == names::secret_name(id, host)).then_some(name)
            })
            .collect())
    }
}

#[async_trait]
impl Router for IngressRouter {
    async fn ensure(&self, cluster: &ClusterClient, id: &InstanceId, ensure: &EnsureOpts) -> Result<()> {
        let target = targets::default_target(&ensure.prefixes)?;
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.ingresses(&app.namespace);
        let name = names::ingress_name(id);
        let existing = api.get_opt(&name).await?;
        if existing.as_ref().is_some_and(|ingress| is_frozen(&ingress.metadata)) {
            info!("Ingress {}/{name} is frozen, skipping ensure of {id}", app.namespace);
            return Ok(());
        }

        let issuers = cname::resolve_issuers(cluster, &app.namespace, &ensure.cert_issuers).await?;
        let web = cluster.services(target.namespace_or(&app.namespace)).get_opt(&target.service).await?;
        let (desired, removals) = self.desired_ingress(id, ensure, &app, web.as_ref(), existing.as_ref())?;
        let main = upsert_ingress(&api, existing, desired, &removals).await?;

        let settings = CnameSettings {
            cnames: ensure.cnames.iter().filter(|cname| !cname.is_empty()).cloned().collect(),
            issuers,
            acme: ensure.opts.acme,
            acme_cname: ensure.opts.acme_cname,
        };
        cname::sync_cname_ingresses(cluster, id, &app.namespace, &main, &settings).await
    }

    async fn remove(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.ingresses(&app.namespace);
        let name = names::ingress_name(id);
        if let Some(existing) = api.get_opt(&name).await? {
            if is_frozen(&existing.metadata) {
                info!("Ingress {}/{name} is frozen, skipping removal of {id}", app.namespace);
                return Ok(());
            }
            if let Some(dst) = swapped_with(&existing.metadata) {
                return Err(Error::AppSwapped { app: id.app_name.clone(), dst: dst.to_owned() });
            }
            delete_ingress(&api, &name).await?;
        }

        for (cname, child) in cname::owned_cname_ingresses(&api, id).await? {
            if is_frozen(&child.metadata) {
                info!("Ingress for {cname} is frozen, leaving it in place");
                continue;
            }
            delete_ingress(&api, &child.name_any()).await?;
        }

        let secrets = cluster.secrets(&app.namespace);
        for secret in self.owned_secrets(cluster, id, &app.namespace).await? {
            match secrets.delete(&secret, &DeleteParams::default()).await {
                Err(e) if !is_not_found(&e) => return Err(e.into()),
                _ => debug!("Deleted secret {}/{secret}", app.namespace),
            }
        }
        info!("Removed ingresses of {id}");
        Ok(())
    }

    async fn get_addresses(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let Some(ingress) = cluster.ingresses(&app.namespace).get_opt(&names::ingress_name(id)).await? else {
            return Ok(vec![]);
        };
        let secured = tls_hosts(&ingress);
        Ok(rule_hosts(&ingress)
            .into_iter()
            .map(|host| match (secured.contains(&host), self.http_port) {
                (true, _) => format!("https://{host}"),
                (false, Some(port)) => format!("http://{host}:{port}"),
                (false, None) => format!("http://{host}"),
            })
            .collect())
    }

    async fn swap(&self, cluster: &ClusterClient, src: &InstanceId, dst: &InstanceId) -> Result<()> {
        let src_app = self.base.resolve_app(cluster, &src.app_name).await?;
        let dst_app = self.base.resolve_app(cluster, &dst.app_name).await?;
        if src_app.namespace != dst_app.namespace {
            return Err(Error::CrossNamespaceSwap(src_app.namespace, dst_app.namespace));
        }
        let api = cluster.ingresses(&src_app.namespace);
        let mut ingresses = Vec::with_capacity(2);
        for id in [src, dst] {
            let name = names::ingress_name(id);
            let ingress = api.get_opt(&name).await?.ok_or_else(|| Error::NotFound(format!("ingress {}/{name} not found", src_app.namespace)))?;
            if is_frozen(&ingress.metadata) {
                return Err(Error::Frozen(name));
            }
            ingresses.push(ingress);
        }
        let [src_ingress, dst_ingress]: [Ingress; 2] = ingresses.try_into().map_err(|_| Error::NotFound(format!("ingresses of {src} and {dst}")))?;
        SwapTransaction::new(api).commit(src_ingress, &src.app_name, dst_ingress, &dst.app_name).await
    }

    fn supported_options(&self) -> BTreeMap<String, String> {
        self.base.supported_options(&[
            (opts::OPT_DOMAIN, "Full domain of the app, replaces the generated <app>.<domain suffix> host."),
            (opts::OPT_ROUTE, "Path the app is served from."),
            (opts::OPT_ACME, "Request certificates through ACME for the app hosts (true/false)."),
            (opts::OPT_ACME_CNAME, "Also request ACME certificates for custom hostnames (true/false)."),
            (opts::OPT_DOMAIN_SUFFIX, "Domain suffix used for the generated host."),
            (opts::OPT_DOMAIN_PREFIX, "Prefix prepended to the generated host."),
            (opts::OPT_EXPOSE_ALL_SERVICES, "Expose every prefixed backend under <prefix>.<host> (true/false)."),
            (super::base::CLASS_OPT, "Ingress class handling the app ingresses."),
        ])
    }

    fn tls(&self) -> Option<&dyn RouterTls> {
        Some(self)
    }

    fn cname(&self) -> Option<&dyn RouterCname> {
        Some(self)
    }

    fn supports_prefix(&self) -> bool {
        true
    }
}
