// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Deterministic, length bounded names for every object the router owns.

use sha2::{Digest, Sha256};

use crate::router::InstanceId;

const HASH_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ingress,
    CnameIngress,
    TlsSecret,
    LoadBalancer,
    Mesh,
}

impl ResourceKind {
    pub fn limit(self) -> usize {
        match self {
            ResourceKind::Ingress | ResourceKind::CnameIngress | ResourceKind::TlsSecret => 253,
            ResourceKind::LoadBalancer | ResourceKind::Mesh => 63,
        }
    }

    fn natural_name(self, app_name: &str, suffix: &str) -> String {
        match self {
            ResourceKind::Ingress => format!("kubernetes-router-{app_name}-ingress"),
            ResourceKind::CnameIngress => format!("kubernetes-router-cname-{suffix}"),
            ResourceKind::TlsSecret => format!("kr-{app_name}-{suffix}"),
            ResourceKind::LoadBalancer => format!("{app_name}-router-lb"),
            ResourceKind::Mesh => app_name.to_owned(),
        }
    }
}

pub fn resource_name(kind: ResourceKind, id: &InstanceId, suffix: &str) -> String {
    let mut name = kind.natural_name(&id.app_name, suffix);
    if !id.instance_name.is_empty() {
        name.push('-');
        name.push_str(&id.instance_name);
    }
    hashed_name(&name, kind.limit())
}

/// Keeps `name` when it fits, otherwise `<head>-<16 hex of sha256(name)>` of exactly `limit` bytes.
pub fn hashed_name(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_owned();
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let mut head_len = limit.saturating_sub(HASH_LEN + 1);
    while !name.is_char_boundary(head_len) {
        head_len -= 1;
    }
    format!("{}-{}", &name[..head_len], &digest[..HASH_LEN])
}

pub fn ingress_name(id: &InstanceId) -> String {
    resource_name(ResourceKind::Ingress, id, "")
}

pub fn cname_ingress_name(id: &InstanceId, cname: &str) -> String {
    resource_name(ResourceKind::CnameIngress, id, cname)
}

pub fn secret_name(id: &InstanceId, host: &str) -> String {
    resource_name(ResourceKind::TlsSecret, id, host)
}

pub fn load_balancer_name(id: &InstanceId) -> String {
    resource_name(ResourceKind::LoadBalancer, id, "")
}

pub fn mesh_name(id: &InstanceId) -> String {
    resource_name(ResourceKind::Mesh, id, "")
}
