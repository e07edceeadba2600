// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("unknown router mode {0:?}")]
    UnknownMode(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("no default backend target found in prefixes")]
    NoBackendTarget,
    #[error("ingress {namespace}/{name} already exists")]
    IngressAlreadyExists { namespace: String, name: String },
    #[error("conflict while writing {0}, resource was modified concurrently")]
    Conflict(String),
    #[error("app {app:?} is currently swapped with {dst:?}, unswap before removing")]
    AppSwapped { app: String, dst: String },
    #[error("load balancer service {0} has no external address yet")]
    LoadBalancerNotReady(String),
    #[error("TLS for {0} is managed by ACME, certificates can not be changed manually")]
    AcmeManaged(String),
    #[error("issuer {0:?} not found")]
    IssuerNotFound(String),
    #[error("no cluster found for name {0:?} and no default cluster configured")]
    ClusterNotFound(String),
    #[error("cluster {0:?} configures both an auth provider and an exec plugin")]
    AmbiguousAuth(String),
    #[error("invalid CA for cluster {0:?}: {1}")]
    InvalidClusterCa(String, base64::DecodeError),
    #[error("swap across namespaces is not supported ({0} != {1})")]
    CrossNamespaceSwap(String, String),
    #[error("swap is not supported by the istio gateway router, edit the VirtualService manually")]
    SwapNotSupported,
    #[error("swap failed: {cause}, rollback also failed: {rollback}")]
    SwapRollback { cause: Box<Error>, rollback: Box<Error> },
    #[error("certificate for {0:?} not found")]
    CertificateNotFound(String),
    #[error("invalid certificate data: {0}")]
    InvalidCertificate(String),
    #[error("{0} is frozen and can not be changed")]
    Frozen(String),
    #[error("service {0} not found")]
    ServiceNotFound(String),
    #[error("operation cancelled: deadline exceeded")]
    ContextCancelled,
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    #[error(transparent)]
    InferConfig(#[from] kube::config::InferConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Configuration(#[from] crate::configuration::ConfigurationError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::InvalidCertificate(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::UnknownMode(_) | Error::CertificateNotFound(_) => StatusCode::NOT_FOUND,
            Error::IngressAlreadyExists { .. } | Error::Conflict(_) | Error::Frozen(_) => StatusCode::CONFLICT,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Returns true when the API server answered with the given HTTP status.
pub fn is_api_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == code)
}

pub fn is_not_found(error: &kube::Error) -> bool {
    is_api_status(error, 404)
}

/// Maps write-path API failures; stale resourceVersion answers become `Conflict`.
pub fn map_write_error(error: kube::Error, resource: &str) -> Error {
    if is_api_status(&error, 409) {
        Error::Conflict(resource.to_owned())
    } else {
        Error::Kube(error)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed {self}");
        }
        match self {
            Error::Unauthorized => {
                (status, [(header::WWW_AUTHENTICATE, "Basic realm=\"Restricted\"")], "Unauthorized\n").into_response()
            },
            other => (status, format!("{other}\n")).into_response(),
        }
    }
}
