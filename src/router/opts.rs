// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use super::targets::BackendPrefix;
use crate::Error;

pub const OPT_POOL: &str = "tsuru.io/app-pool";
pub const OPT_EXPOSED_PORT: &str = "exposed-port";
pub const OPT_DOMAIN: &str = "domain";
pub const OPT_ROUTE: &str = "route";
pub const OPT_ACME: &str = "tls-acme";
pub const OPT_ACME_CNAME: &str = "tls-acme-cname";
pub const OPT_DOMAIN_SUFFIX: &str = "domain-suffix";
pub const OPT_DOMAIN_PREFIX: &str = "domain-prefix";
pub const OPT_EXPOSE_ALL_SERVICES: &str = "expose-all-services";

/// Router options as sent by the provisioner. Every call carries the complete set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct RouterOpts {
    pub pool: String,
    pub exposed_port: Option<i32>,
    pub domain: String,
    pub route: String,
    pub acme: bool,
    pub acme_cname: bool,
    pub domain_suffix: String,
    pub domain_prefix: String,
    pub expose_all_services: bool,
    pub additional_opts: BTreeMap<String, String>,
    /// Keys present in the request body, header options never override them.
    given: BTreeSet<String>,
}

impl TryFrom<BTreeMap<String, Value>> for RouterOpts {
    type Error = Error;

    fn try_from(raw: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut opts = RouterOpts { given: raw.keys().cloned().collect(), ..Default::default() };
        for (key, value) in raw {
            match key.as_str() {
                OPT_POOL => opts.pool = as_string(&key, &value)?,
                OPT_EXPOSED_PORT => opts.exposed_port = as_port(&key, &value)?,
                OPT_DOMAIN => opts.domain = as_string(&key, &value)?,
                OPT_ROUTE => opts.route = as_string(&key, &value)?,
                OPT_ACME => opts.acme = as_bool(&key, &value)?,
                OPT_ACME_CNAME => opts.acme_cname = as_bool(&key, &value)?,
                OPT_DOMAIN_SUFFIX => opts.domain_suffix = as_string(&key, &value)?,
                OPT_DOMAIN_PREFIX => opts.domain_prefix = as_string(&key, &value)?,
                OPT_EXPOSE_ALL_SERVICES => opts.expose_all_services = as_bool(&key, &value)?,
                _ => {
                    if let Value::String(value) = value {
                        opts.additional_opts.insert(key, value);
                    }
                },
            }
        }
        Ok(opts)
    }
}

impl RouterOpts {
    /// Merges `X-Router-Opt: key=value` header lines, keys already present in the body win.
    pub fn merge_header_opts<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
        let mut from_headers = BTreeMap::new();
        for line in lines {
            for pair in line.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                from_headers.insert(key.trim().to_owned(), Value::String(value.trim().to_owned()));
            }
        }
        let header_opts = RouterOpts::try_from(from_headers.clone())?;
        for key in from_headers.keys().filter(|key| !self.given.contains(*key)) {
            match key.as_str() {
                OPT_POOL => self.pool.clone_from(&header_opts.pool),
                OPT_EXPOSED_PORT => self.exposed_port = header_opts.exposed_port,
                OPT_DOMAIN => self.domain.clone_from(&header_opts.domain),
                OPT_ROUTE => self.route.clone_from(&header_opts.route),
                OPT_ACME => self.acme = header_opts.acme,
                OPT_ACME_CNAME => self.acme_cname = header_opts.acme_cname,
                OPT_DOMAIN_SUFFIX => self.domain_suffix.clone_from(&header_opts.domain_suffix),
                OPT_DOMAIN_PREFIX => self.domain_prefix.clone_from(&header_opts.domain_prefix),
                OPT_EXPOSE_ALL_SERVICES => self.expose_all_services = header_opts.expose_all_services,
                _ => {
                    if let Some(value) = header_opts.additional_opts.get(key) {
                        self.additional_opts.insert(key.clone(), value.clone());
                    }
                },
            }
        }
        Ok(())
    }
}

fn as_string(key: &str, value: &Value) -> Result<String, Error> {
    match value {
        Value::String(value) => Ok(value.clone()),
        Value::Number(value) => Ok(value.to_string()),
        Value::Bool(value) => Ok(value.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(Error::BadRequest(format!("invalid value for option {key}: {value}"))),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, Error> {
    match value {
        Value::Bool(value) => Ok(*value),
        Value::String(value) if value.is_empty() => Ok(false),
        Value::String(value) => parse_bool(value).ok_or_else(|| Error::BadRequest(format!("invalid boolean for option {key}: {value}"))),
        Value::Null => Ok(false),
        _ => Err(Error::BadRequest(format!("invalid boolean for option {key}: {value}"))),
    }
}

fn as_port(key: &str, value: &Value) -> Result<Option<i32>, Error> {
    let raw = as_string(key, value)?;
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(Some(port)),
        _ => Err(Error::BadRequest(format!("invalid port for option {key}: {raw}"))),
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Some(true),
        "0" | "f" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Full desired state of an app's exposure.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureOpts {
    #[serde(default)]
    pub opts: RouterOpts,
    #[serde(default)]
    pub cnames: Vec<String>,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub cert_issuers: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<BackendPrefix>,
}
