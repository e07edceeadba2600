// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{
    api::{core::v1::Secret, networking::v1::Ingress},
    ByteString,
};
use kube::{
    api::{DeleteParams, PostParams},
    Api, ResourceExt,
};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tracing::{debug, info};

use super::{acme_enabled, tls_entry, IngressRouter};
use crate::{
    cluster::ClusterClient,
    error::{is_api_status, is_not_found, map_write_error},
    names,
    router::{
        base::{is_frozen, APP_NAME_LABEL, DOMAIN_NAME_LABEL},
        CertData, InstanceId, RouterTls,
    },
    Error, Result,
};

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
const TLS_CERT_KEY: &str = "tls.crt";
const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

fn validate_certificate(data: &CertData) -> Result<()> {
    CertificateDer::from_pem_slice(data.certificate.as_bytes()).map_err(|e| Error::InvalidCertificate(format!("certificate: {e:?}")))?;
    PrivateKeyDer::from_pem_slice(data.key.as_bytes()).map_err(|e| Error::InvalidCertificate(format!("key: {e:?}")))?;
    Ok(())
}

fn tls_secret(id: &InstanceId, namespace: &str, host: &str, data: &CertData) -> Secret {
    let mut secret = Secret {
        type_: Some(TLS_SECRET_TYPE.to_owned()),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_owned(), ByteString(data.certificate.as_bytes().to_vec())),
            (TLS_PRIVATE_KEY_KEY.to_owned(), ByteString(data.key.as_bytes().to_vec())),
        ])),
        ..Default::default()
    };
    secret.metadata.name = Some(names::secret_name(id, host));
    secret.metadata.namespace = Some(namespace.to_owned());
    secret.metadata.labels = Some(BTreeMap::from([(APP_NAME_LABEL.to_owned(), id.app_name.clone()), (DOMAIN_NAME_LABEL.to_owned(), host.to_owned())]));
    secret
}

async fn upsert_secret(api: &Api<Secret>, secret: Secret) -> Result<()> {
    let name = secret.name_any();
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => {
            info!("Created TLS secret {name}");
            Ok(())
        },
        Err(e) if is_api_status(&e, 409) => {
            let mut existing = api.get(&name).await?;
            existing.labels_mut().extend(secret.labels().clone());
            existing.type_ = secret.type_;
            existing.data = secret.data;
            api.replace(&name, &PostParams::default(), &existing).await.map_err(|e| map_write_error(e, &name))?;
            info!("Updated TLS secret {name}");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

fn decode(secret: &Secret, key: &str) -> String {
    secret.data.as_ref().and_then(|data| data.get(key)).map(|value| String::from_utf8_lossy(&value.0).into_owned()).unwrap_or_default()
}

impl IngressRouter {
    /// The ingress serving `host`: its child ingress when `host` is a cname, the main ingress otherwise.
    async fn certificate_target(&self, api: &Api<Ingress>, id: &InstanceId, host: &str) -> Result<Option<Ingress>> {
        let name = names::ingress_name(id);
        let Some(main) = api.get_opt(&name).await? else {
            return Ok(None);
        };
        if acme_enabled(&main) {
            return Err(Error::AcmeManaged(host.to_owned()));
        }
        let child_name = names::cname_ingress_name(id, host);
        let target = api.get_opt(&child_name).await?.unwrap_or(main);
        if acme_enabled(&target) {
            return Err(Error::AcmeManaged(host.to_owned()));
        }
        Ok(Some(target))
    }
}

async fn replace_ingress(api: &Api<Ingress>, ingress: &Ingress) -> Result<()> {
    let name = ingress.name_any();
    api.replace(&name, &PostParams::default(), ingress).await.map_err(|e| map_write_error(e, &name))?;
    Ok(())
}

#[async_trait]
impl RouterTls for IngressRouter {
    async fn add_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str, data: &CertData) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.ingresses(&app.namespace);
        let target = self
            .certificate_target(&api, id, host)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ingress {}/{} not found", app.namespace, names::ingress_name(id))))?;
        validate_certificate(data)?;
        if is_frozen(&target.metadata) {
            info!("Ingress {} is frozen, skipping certificate of {host}", target.name_any());
            return Ok(());
        }

        upsert_secret(&cluster.secrets(&app.namespace), tls_secret(id, &app.namespace, host, data)).await?;

        let entry = tls_entry(id, host);
        let mut updated = target.clone();
        let tls = updated.spec.get_or_insert_with(Default::default).tls.get_or_insert_with(Vec::new);
        if tls.contains(&entry) {
            debug!("Ingress {} already serves {host} over TLS", target.name_any());
            return Ok(());
        }
        tls.push(entry);
        replace_ingress(&api, &updated).await
    }

    async fn get_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str) -> Result<CertData> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let secret = cluster.secrets(&app.namespace).get_opt(&names::secret_name(id, host)).await?.ok_or_else(|| Error::CertificateNotFound(host.to_owned()))?;
        Ok(CertData { certificate: decode(&secret, TLS_CERT_KEY), key: decode(&secret, TLS_PRIVATE_KEY_KEY) })
    }

    async fn remove_certificate(&self, cluster: &ClusterClient, id: &InstanceId, host: &str) -> Result<()> {
        let app = self.base.resolve_app(cluster, &id.app_name).await?;
        let api = cluster.ingresses(&app.namespace);
        if let Some(target) = self.certificate_target(&api, id, host).await? {
            if is_frozen(&target.metadata) {
                info!("Ingress {} is frozen, skipping certificate removal of {host}", target.name_any());
                return Ok(());
            }
            let mut updated = target.clone();
            if let Some(tls) = updated.spec.as_mut().and_then(|spec| spec.tls.as_mut()) {
                for entry in tls.iter_mut() {
                    if let Some(hosts) = entry.hosts.as_mut() {
                        hosts.retain(|entry_host| entry_host != host);
                    }
                }
                tls.retain(|entry| entry.hosts.as_ref().is_some_and(|hosts| !hosts.is_empty()));
            }
            if updated != target {
                replace_ingress(&api, &updated).await?;
            }
        }

        let secret = names::secret_name(id, host);
        match cluster.secrets(&app.namespace).delete(&secret, &DeleteParams::default()).await {
            Err(e) if !is_not_found(&e) => Err(e.into()),
            _ => {
                info!("Removed certificate of {host} for {id}");
                Ok(())
            },
        }
    }
}
