// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Configuration and metadata rules shared by every router flavor.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use kube_core::ObjectMeta;
use typed_builder::TypedBuilder;

use super::{
    opts::{self, EnsureOpts, RouterOpts},
    InstanceId,
};
use crate::{
    cluster::{AppResolver, ClusterClient, ResolvedApp},
    Result,
};

pub const APP_NAME_LABEL: &str = "tsuru.io/app-name";
pub const APP_TEAM_LABEL: &str = "tsuru.io/app-team";
pub const APP_POOL_LABEL: &str = "tsuru.io/app-pool";
pub const ROUTER_LB_LABEL: &str = "tsuru.io/router-lb";
pub const DOMAIN_NAME_LABEL: &str = "tsuru.io/domain-name";
pub const CUSTOM_TAG_LABEL_PREFIX: &str = "tsuru.io/custom-tag-";
pub const SWAPPED_WITH_LABEL: &str = "tsuru.io/swapped-with";
pub const IS_CNAME_INGRESS_LABEL: &str = "router.tsuru.io/is-cname-ingress";
pub const BASE_SERVICE_NAMESPACE_LABEL: &str = "router.tsuru.io/base-service-namespace";
pub const BASE_SERVICE_NAME_LABEL: &str = "router.tsuru.io/base-service-name";

pub const CNAMES_ANNOTATION: &str = "router.tsuru.io/cnames";
pub const ADDITIONAL_HOSTS_ANNOTATION: &str = "router.tsuru.io/additional-hosts";
pub const FREEZE_ANNOTATION: &str = "router.tsuru.io/freeze";
pub const ACME_ANNOTATION: &str = "kubernetes.io/tls-acme";
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const ISSUER_ANNOTATION: &str = "cert-manager.io/issuer";
pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";
pub const ISSUER_KIND_ANNOTATION: &str = "cert-manager.io/issuer-kind";
pub const ISSUER_GROUP_ANNOTATION: &str = "cert-manager.io/issuer-group";
pub const COMMON_NAME_ANNOTATION: &str = "cert-manager.io/common-name";

pub const CLASS_OPT: &str = "class";

/// Annotation edits requested through additional router options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptsAnnotations {
    pub set: BTreeMap<String, String>,
    pub remove: BTreeSet<String>,
    pub class: Option<String>,
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct RouterBase {
    #[builder(default = "default".to_owned(), setter(into))]
    pub namespace: String,
    #[builder(default, setter(into))]
    pub domain_suffix: String,
    #[builder(default)]
    pub labels: BTreeMap<String, String>,
    #[builder(default)]
    pub annotations: BTreeMap<String, String>,
    #[builder(default)]
    pub opts_as_labels: BTreeMap<String, String>,
    #[builder(default)]
    pub opts_as_labels_docs: BTreeMap<String, String>,
    #[builder(default)]
    pub pool_labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for RouterBase {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RouterBase {
    pub async fn resolve_app(&self, cluster: &ClusterClient, app_name: &str) -> Result<ResolvedApp> {
        AppResolver::new(cluster, &self.namespace).resolve(app_name).await
    }

    /// Labels every managed object of `id` carries.
    pub fn desired_labels(&self, id: &InstanceId, ensure: &EnsureOpts) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        if let Some(pool_labels) = self.pool_labels.get(&ensure.opts.pool) {
            labels.extend(pool_labels.clone());
        }
        for (opt, label) in &self.opts_as_labels {
            if let Some(value) = opt_value(&ensure.opts, opt) {
                labels.insert(label.clone(), value);
            }
        }
        for tag in &ensure.tags {
            if let Some((key, value)) = tag.split_once('=') {
                labels.insert(format!("{CUSTOM_TAG_LABEL_PREFIX}{}", key.trim()), value.trim().to_owned());
            }
        }
        labels.insert(APP_NAME_LABEL.to_owned(), id.app_name.clone());
        if !ensure.team.is_empty() {
            labels.insert(APP_TEAM_LABEL.to_owned(), ensure.team.clone());
        }
        if !ensure.opts.pool.is_empty() {
            labels.insert(APP_POOL_LABEL.to_owned(), ensure.opts.pool.clone());
        }
        labels
    }

    /// Translates additional options into annotations.
    ///
    /// `key-` removes `key`, keys with a `/` are used as they are, anything else is put under `prefix/`
    /// when a prefix is configured. Options mapped to labels and the `class` option are not annotations.
    pub fn opts_annotations(&self, opts: &RouterOpts, prefix: &str) -> OptsAnnotations {
        let mut annotations = OptsAnnotations::default();
        for (key, value) in &opts.additional_opts {
            if self.opts_as_labels.contains_key(key) {
                continue;
            }
            if key == CLASS_OPT {
                annotations.class = Some(value.clone());
                continue;
            }
            let (key, removal) = match key.strip_suffix('-') {
                Some(key) => (key, true),
                None => (key.as_str(), false),
            };
            let key = if key.contains('/') || prefix.is_empty() { key.to_owned() } else { format!("{prefix}/{key}") };
            if removal {
                annotations.remove.insert(key);
            } else {
                annotations.set.insert(key, value.clone());
            }
        }
        annotations
    }

    /// `domain` when set, otherwise `[prefix.]app.suffix` or `instance.instance.app.suffix`.
    pub fn base_host(&self, id: &InstanceId, opts: &RouterOpts) -> String {
        if !opts.domain.is_empty() {
            return opts.domain.clone();
        }
        let suffix = if opts.domain_suffix.is_empty() { &self.domain_suffix } else { &opts.domain_suffix };
        if !id.instance_name.is_empty() {
            return format!("{}.instance.{}.{suffix}", id.instance_name, id.app_name);
        }
        if opts.domain_prefix.is_empty() {
            format!("{}.{suffix}", id.app_name)
        } else {
            format!("{}.{}.{suffix}", opts.domain_prefix, id.app_name)
        }
    }

    pub fn supported_options(&self, own: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut options: BTreeMap<String, String> = own.iter().map(|(name, help)| ((*name).to_owned(), (*help).to_owned())).collect();
        options.extend(self.opts_as_labels_docs.clone());
        options
    }
}

fn opt_value(opts: &RouterOpts, key: &str) -> Option<String> {
    let known = match key {
        opts::OPT_POOL => &opts.pool,
        opts::OPT_DOMAIN => &opts.domain,
        opts::OPT_ROUTE => &opts.route,
        _ => return opts.additional_opts.get(key).cloned(),
    };
    Some(known.clone()).filter(|value| !value.is_empty())
}

pub fn is_frozen(meta: &ObjectMeta) -> bool {
    annotation(meta, FREEZE_ANNOTATION).and_then(opts::parse_bool).unwrap_or(false)
}

pub fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref().and_then(|labels| labels.get(key)).map(String::as_str)
}

pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref().and_then(|annotations| annotations.get(key)).map(String::as_str)
}

pub fn swapped_with(meta: &ObjectMeta) -> Option<&str> {
    label(meta, SWAPPED_WITH_LABEL).filter(|value| !value.is_empty())
}

/// Existing labels and annotations are kept unless overwritten by `labels`/`annotations` or listed in `removals`.
pub fn merge_metadata(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>, annotations: &BTreeMap<String, String>, removals: &BTreeSet<String>) {
    let mut merged_labels = meta.labels.take().unwrap_or_default();
    merged_labels.extend(labels.clone());
    meta.labels = Some(merged_labels).filter(|labels| !labels.is_empty());

    let mut merged_annotations = meta.annotations.take().unwrap_or_default();
    merged_annotations.extend(annotations.clone());
    merged_annotations.retain(|key, _| !removals.contains(key));
    meta.annotations = Some(merged_annotations).filter(|annotations| !annotations.is_empty());
}

/// Sorted, comma joined and free of duplicates.
pub fn join_hosts<'a>(hosts: impl IntoIterator<Item = &'a String>) -> String {
    hosts.into_iter().filter(|host| !host.is_empty()).sorted().dedup().join(",")
}

pub fn split_hosts(value: Option<&str>) -> BTreeSet<String> {
    value.unwrap_or_default().split(',').map(str::trim).filter(|host| !host.is_empty()).map(str::to_owned).collect()
}
