// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const PROCESS_PREFIX_SUFFIX: &str = ".process";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendTarget {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub namespace: String,
}

impl BackendTarget {
    pub fn namespace_or<'a>(&'a self, app_namespace: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            app_namespace
        } else {
            &self.namespace
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendPrefix {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub target: BackendTarget,
}

impl BackendPrefix {
    /// `web.process` style prefixes name the process whose port backs them.
    pub fn process(&self) -> Option<&str> {
        self.prefix.strip_suffix(PROCESS_PREFIX_SUFFIX).filter(|process| !process.is_empty())
    }

    pub fn host_label(&self) -> String {
        self.prefix.replace('_', "-")
    }
}

pub fn default_target(prefixes: &[BackendPrefix]) -> Result<&BackendTarget> {
    prefixes.iter().find(|prefix| prefix.prefix.is_empty()).map(|prefix| &prefix.target).ok_or(Error::NoBackendTarget)
}

/// Every `(host, prefix)` exposed for an app, base host first and prefixed hosts sorted after it.
pub fn exposed_hosts<'a>(base_host: &str, prefixes: &'a [BackendPrefix], expose_all: bool) -> Result<Vec<(String, &'a BackendPrefix)>> {
    let base = prefixes.iter().find(|prefix| prefix.prefix.is_empty()).ok_or(Error::NoBackendTarget)?;
    let mut hosts = vec![(base_host.to_owned(), base)];
    if expose_all {
        let mut prefixed: Vec<_> =
            prefixes.iter().filter(|prefix| !prefix.prefix.is_empty()).map(|prefix| (format!("{}.{base_host}", prefix.host_label()), prefix)).collect();
        prefixed.sort_by(|(a, _), (b, _)| a.cmp(b));
        prefixed.dedup_by(|(a, _), (b, _)| a == b);
        hosts.extend(prefixed);
    }
    Ok(hosts)
}
