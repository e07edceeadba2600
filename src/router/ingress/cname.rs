// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Child ingresses serving custom hostnames, one per hostname, mirroring the main ingress backend.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use kube::{
    api::{ListParams, PostParams},
    Api, ResourceExt,
};
use tracing::{debug, info};

use super::{acme_enabled, delete_ingress, first_path, ingress_rule, tls_entry, upsert_ingress, IngressRouter};
use crate::{
    cluster::ClusterClient,
    crds::cert_manager::{CLUSTER_ISSUER_KIND, ISSUER_KIND},
    error::map_write_error,
    names,
    router::{
        base::{
            annotation, is_frozen, join_hosts, split_hosts, ACME_ANNOTATION, APP_NAME_LABEL, CLUSTER_ISSUER_ANNOTATION, CNAMES_ANNOTATION,
            COMMON_NAME_ANNOTATION, FREEZE_ANNOTATION, IS_CNAME_INGRESS_LABEL, ISSUER_ANNOTATION, ISSUER_GROUP_ANNOTATION, ISSUER_KIND_ANNOTATION,
            SWAPPED_WITH_LABEL,
        },
        InstanceId, RouterCname,
    },
    Error, Result,
};

const ISSUER_ANNOTATIONS: [&str; 4] = [ISSUER_ANNOTATION, CLUSTER_ISSUER_ANNOTATION, ISSUER_KIND_ANNOTATION, ISSUER_GROUP_ANNOTATION];

/// A cert-manager issuer resolved for one hostname.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssuerRef {
    Namespaced(String),
    Cluster(String),
    External { name: String, kind: String, group: String },
}

impl IssuerRef {
    fn kind(&self) -> &str {
        match self {
            IssuerRef::Namespaced(_) => ISSUER_KIND,
            IssuerRef::Cluster(_) => CLUSTER_ISSUER_KIND,
            IssuerRef::External { kind, .. } => kind,
        }
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        match self {
            IssuerRef::Namespaced(name) => {
                annotations.insert(ISSUER_ANNOTATION.to_owned(), name.clone());
            },
            IssuerRef::Cluster(name) => {
                annotations.insert(CLUSTER_ISSUER_ANNOTATION.to_owned(), name.clone());
            },
            IssuerRef::External { name, kind, group } => {
                annotations.insert(ISSUER_ANNOTATION.to_owned(), name.clone());
                annotations.insert(ISSUER_KIND_ANNOTATION.to_owned(), kind.clone());
                annotations.insert(ISSUER_GROUP_ANNOTATION.to_owned(), group.clone());
            },
        }
        annotations
    }
}

/// `name.kind.group` names an external issuer taken as is, plain names must exist as an
/// Issuer in `namespace` or as a ClusterIssuer.
pub async fn resolve_issuer(cluster: &ClusterClient, namespace: &str, issuer: &str) -> Result<IssuerRef> {
    if let Some((name, rest)) = issuer.split_once('.') {
        if let Some((kind, group)) = rest.split_once('.') {
            return Ok(IssuerRef::External { name: name.to_owned(), kind: kind.to_owned(), group: group.to_owned() });
        }
    }
    if cluster.issuers(namespace).get_opt(issuer).await?.is_some() {
        return Ok(IssuerRef::Namespaced(issuer.to_owned()));
    }
    if cluster.cluster_issuers().get_opt(issuer).await?.is_some() {
        return Ok(IssuerRef::Cluster(issuer.to_owned()));
    }
    Err(Error::IssuerNotFound(issuer.to_owned()))
}

pub async fn resolve_issuers(cluster: &ClusterClient, namespace: &str, cert_issuers: &BTreeMap<String, String>) -> Result<BTreeMap<String, IssuerRef>> {
    let mut resolved = BTreeMap::new();
    for (host, issuer) in cert_issuers {
        let issuer = resolve_issuer(cluster, namespace, issuer).await?;
        debug!("Certificates of {host} issued by {} {issuer:?}", issuer.kind());
        resolved.insert(host.clone(), issuer);
    }
    Ok(resolved)
}

pub struct CnameSettings {
    pub cnames: BTreeSet<String>,
    pub issuers: BTreeMap<String, IssuerRef>,
    pub acme: bool,
    pub acme_cname: bool,
}

/// Child ingresses of `id` keyed by hostname. Ingresses sharing the labels but not the derived name are foreign.
pub async fn owned_cname_ingresses(api: &Api<Ingress>, id: &InstanceId) -> Result<BTreeMap<String, Ingress>> {
    let selector = format!("{IS_CNAME_INGRESS_LABEL}=true,{APP_NAME_LABEL}={}", id.app_name);
    let children = api.list(&ListParams::default().labels(&selector)).await?;
    Ok(children
        .items
        .into_iter()
        .filter_map(|child| {
            let host = child.spec.as_ref()?.rules.as_ref()?.first()?.host.clone()?;
            (child.name_any() == names::cname_ingress_name(id, &host)).then_some((host, child))
        })
        .collect())
}

/// Child ingress for `cname`, inheriting metadata and backend of `main`.
fn cname_ingress(id: &InstanceId, main: &Ingress, cname: &str, settings: &CnameSettings) -> (Ingress, BTreeSet<String>) {
    let mut labels = main.labels().clone();
    labels.remove(SWAPPED_WITH_LABEL);
    labels.insert(IS_CNAME_INGRESS_LABEL.to_owned(), "true".to_owned());

    let mut annotations = main.annotations().clone();
    annotations.remove(CNAMES_ANNOTATION);
    annotations.remove(FREEZE_ANNOTATION);
    let mut removals = BTreeSet::from([CNAMES_ANNOTATION.to_owned()]);

    let issued = settings.issuers.get(cname);
    if issued.is_none() {
        let inherited = main.annotations();
        removals.extend(ISSUER_ANNOTATIONS.iter().chain(&[COMMON_NAME_ANNOTATION]).filter(|key| !inherited.contains_key(**key)).map(|key| (*key).to_owned()));
    }
    let tls = if let Some(issuer) = issued {
        let issuer_annotations = issuer.annotations();
        for key in ISSUER_ANNOTATIONS.iter().filter(|key| !issuer_annotations.contains_key(**key)) {
            annotations.remove(*key);
            removals.insert((*key).to_owned());
        }
        annotations.remove(ACME_ANNOTATION);
        removals.insert(ACME_ANNOTATION.to_owned());
        annotations.extend(issuer_annotations);
        annotations.insert(COMMON_NAME_ANNOTATION.to_owned(), cname.to_owned());
        Some(vec![tls_entry(id, cname)])
    } else if settings.acme && settings.acme_cname {
        annotations.insert(ACME_ANNOTATION.to_owned(), "true".to_owned());
        Some(vec![tls_entry(id, cname)])
    } else {
        for key in [ACME_ANNOTATION, CLUSTER_ISSUER_ANNOTATION] {
            annotations.remove(key);
            removals.insert(key.to_owned());
        }
        None
    };

    let main_path = first_path(main);
    let backend = main_path.map(|path| path.backend.clone()).unwrap_or_default();
    let path = main_path.and_then(|path| path.path.clone());
    let mut ingress = Ingress {
        spec: Some(IngressSpec {
            ingress_class_name: main.spec.as_ref().and_then(|spec| spec.ingress_class_name.clone()),
            rules: Some(vec![ingress_rule(cname, path, backend)]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    };
    ingress.metadata.name = Some(names::cname_ingress_name(id, cname));
    ingress.metadata.namespace = main.namespace();
    ingress.metadata.labels = Some(labels);
    ingress.metadata.annotations = Some(annotations).filter(|annotations| !annotations.is_empty());
    ingress.metadata.owner_references = main.metadata.owner_references.clone();
    (ingress, removals)
}

/// Converges the child ingresses of `id` to `settings.cnames`. Frozen children are left alone.
pub async fn sync_cname_ingresses(cluster: &ClusterClient, id: &InstanceId, namespace: &str, main: &Ingress, settings: &CnameSettings) -> Result<()> {
    let api = cluster.ingresses(namespace);
    let mut existing = owned_cname_ingresses(&api, id).await?;

    for (cname, child) in &existing {
        if settings.cnames.contains(cname) {
            continue;
        }
        if is_frozen(&child.metadata) {
            info!("Ingress for {cname} is frozen, leaving it in place");
            continue;
        }
        delete_ingress(&api, &child.name_any()).await?;
        info!("Removed cname {cname} of {id}");
    }

    for cname in &settings.cnames {
        let current = existing.remove(cname);
        if current.as_ref().is_some_and(|child| is_frozen(&child.metadata)) {
            info!("Ingress for {cname} is frozen, skipping update");
            continue;
        }
        let (desired, removals) = cname_ingress(id, main, cname, settings);
        upsert_ingress(&api, current, desired, &removals).await?;
    }
    Ok(())
}

impl IngressRouter {
    /// Writes the cnames annotation of the main ingress and converges the children without touching issuers.
    async fn apply_cnames(&self, cluster: &ClusterClient, id: &InstanceId, update: impl FnOnce(&mut BTreeSet<String>) + Send) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.ingresses(&app.namespace);
        let name = names::ingress_name(id);
        let main = api.get_opt(&name).await?.ok_or_else(|| Error::NotFound(format!("ingress {}/{name} not found", app.namespace)))?;
        if is_frozen(&main.metadata) {
            info!("Ingress {}/{name} is frozen, skipping cname change of {id}", app.namespace);
            return Ok(());
        }

        let mut cnames = split_hosts(annotation(&main.metadata, CNAMES_ANNOTATION));
        update(&mut cnames);
        let mut updated = main.clone();
        let annotations = updated.annotations_mut();
        if cnames.is_empty() {
            annotations.remove(CNAMES_ANNOTATION);
        } else {
            annotations.insert(CNAMES_ANNOTATION.to_owned(), join_hosts(&cnames));
        }
        let main = if updated == main { main } else { api.replace(&name, &PostParams::default(), &updated).await.map_err(|e| map_write_error(e, &name))? };

        let children = owned_cname_ingresses(&api, id).await?;
        let settings = CnameSettings {
            cnames,
            issuers: BTreeMap::new(),
            acme: acme_enabled(&main),
            acme_cname: children.values().any(acme_enabled),
        };
        sync_cname_ingresses(cluster, id, &app.namespace, &main, &settings).await
    }
}

#[async_trait]
impl RouterCname for IngressRouter {
    async fn set_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()> {
        let cname = cname.to_owned();
        self.apply_cnames(cluster, id, |cnames| {
            cnames.insert(cname);
        })
        .await
    }

    async fn unset_cname(&self, cluster: &ClusterClient, id: &InstanceId, cname: &str) -> Result<()> {
        self.apply_cnames(cluster, id, |cnames| {
            cnames.remove(cname);
        })
        .await
    }

    async fn get_cnames(&self, cluster: &ClusterClient, id: &InstanceId) -> Result<Vec<String>> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let main = cluster.ingresses(&app.namespace).get_opt(&names::ingress_name(id)).await?;
        Ok(main.map(|main| split_hosts(annotation(&main.metadata, CNAMES_ANNOTATION)).into_iter().collect()).unwrap_or_default())
    }
}
