// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ISSUER_KIND: &str = "Issuer";
pub const CLUSTER_ISSUER_KIND: &str = "ClusterIssuer";

/// Only existence matters to the router, the spec is carried opaquely.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(group = "cert-manager.io", version = "v1", kind = "Issuer", namespaced, schema = "disabled")]
pub struct IssuerSpec {
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(group = "cert-manager.io", version = "v1", kind = "ClusterIssuer", schema = "disabled")]
pub struct ClusterIssuerSpec {
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}
