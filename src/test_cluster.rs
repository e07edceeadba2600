// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! In-memory API server behind a `tower_test` mock, enough of the Kubernetes REST semantics for the routers.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use http::{Method, Request, Response, StatusCode};
use kube::{client::Body, Client, CustomResourceExt, Resource};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tower_test::mock;

use crate::{cluster::ClusterClient, crds::App};

#[derive(Default)]
struct Store {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    next_version: u64,
    forbid_writes: bool,
    write_attempts: usize,
    requests: usize,
    delay: Duration,
    failing_updates: BTreeMap<String, usize>,
}

#[derive(Clone)]
pub struct FakeCluster {
    store: Arc<Mutex<Store>>,
    client: Client,
}

struct Location {
    collection: String,
    namespace: Option<String>,
    name: Option<String>,
}

impl FakeCluster {
    pub fn start() -> Self {
        let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let store = Arc::new(Mutex::new(Store { next_version: 1, ..Default::default() }));
        let served = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let delay = served.lock().unwrap().delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let (parts, body) = request.into_parts();
                let body = body.collect_bytes().await.unwrap();
                let (status, value) = serve(&served, &parts.method, &parts.uri, &body);
                let response = Response::builder().status(status).body(Body::from(serde_json::to_vec(&value).unwrap())).unwrap();
                send.send_response(response);
            }
        });
        let client = Client::new(mock_service, "default");
        Self { store, client }
    }

    pub fn cluster_client(&self) -> ClusterClient {
        ClusterClient::new("fake", self.client.clone())
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn seed<K: Resource<DynamicType = ()> + Serialize>(&self, object: &K) {
        let namespace = object.meta().namespace.clone();
        let name = object.meta().name.clone().unwrap();
        let location = locate(&K::url_path(&(), namespace.as_deref())).unwrap();
        let mut value = serde_json::to_value(object).unwrap();
        let mut store = self.store.lock().unwrap();
        stamp(&mut store, &mut value, namespace.as_deref(), true);
        store.collections.entry(location.collection).or_default().insert(name, value);
    }

    pub fn install_app_crd(&self) {
        self.seed(&App::crd());
    }

    pub fn get<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let location = locate(&K::url_path(&(), namespace)).unwrap();
        let store = self.store.lock().unwrap();
        store.collections.get(&location.collection).and_then(|objects| objects.get(name)).map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub fn list<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: Option<&str>) -> Vec<K> {
        let location = locate(&K::url_path(&(), namespace)).unwrap();
        let store = self.store.lock().unwrap();
        store
            .collections
            .get(&location.collection)
            .map(|objects| objects.values().map(|value| serde_json::from_value(value.clone()).unwrap()).collect())
            .unwrap_or_default()
    }

    /// Every later create/replace/delete is answered with 403 and counted.
    pub fn forbid_writes(&self) {
        self.store.lock().unwrap().forbid_writes = true;
    }

    pub fn write_attempts(&self) -> usize {
        self.store.lock().unwrap().write_attempts
    }

    /// Every later answer is held back for `delay`.
    pub fn delay_responses(&self, delay: Duration) {
        self.store.lock().unwrap().delay = delay;
    }

    pub fn requests(&self) -> usize {
        self.store.lock().unwrap().requests
    }

    /// Lets `successes` replaces of `name` through, then fails every following one.
    pub fn fail_updates(&self, name: &str, successes: usize) {
        self.store.lock().unwrap().failing_updates.insert(name.to_owned(), successes);
    }
}

fn serve(store: &Mutex<Store>, method: &Method, uri: &http::Uri, body: &[u8]) -> (StatusCode, Value) {
    if uri.path() == "/version" {
        return (
            StatusCode::OK,
            json!({
                "major": "1", "minor": "29", "gitVersion": "v1.29.0", "gitCommit": "fake", "gitTreeState": "clean",
                "buildDate": "2024-01-01T00:00:00Z", "goVersion": "go1.21", "compiler": "gc", "platform": "linux/amd64"
            }),
        );
    }
    let Some(location) = locate(uri.path()) else {
        return status(StatusCode::NOT_FOUND, "NotFound", uri.path());
    };
    let mut store = store.lock().unwrap();
    store.requests += 1;
    if *method != Method::GET {
        store.write_attempts += 1;
        if store.forbid_writes {
            return status(StatusCode::FORBIDDEN, "Forbidden", "writes are forbidden");
        }
    }

    match (method.clone(), location.name.clone()) {
        (Method::GET, Some(name)) => match store.collections.get(&location.collection).and_then(|objects| objects.get(&name)) {
            Some(object) => (StatusCode::OK, object.clone()),
            None => status(StatusCode::NOT_FOUND, "NotFound", &format!("{name} not found")),
        },
        (Method::GET, None) => {
            let selector = uri.query().and_then(|query| query_value(query, "labelSelector")).unwrap_or_default();
            let items: Vec<Value> = store
                .collections
                .get(&location.collection)
                .map(|objects| objects.values().filter(|object| matches_selector(object, &selector)).cloned().collect())
                .unwrap_or_default();
            (StatusCode::OK, json!({"apiVersion": "v1", "kind": "List", "metadata": {"resourceVersion": ""}, "items": items}))
        },
        (Method::POST, None) => {
            let mut object: Value = serde_json::from_slice(body).unwrap();
            let name = object["metadata"]["name"].as_str().unwrap().to_owned();
            if store.collections.get(&location.collection).is_some_and(|objects| objects.contains_key(&name)) {
                return status(StatusCode::CONFLICT, "AlreadyExists", &format!("{name} already exists"));
            }
            stamp(&mut store, &mut object, location.namespace.as_deref(), true);
            store.collections.entry(location.collection).or_default().insert(name, object.clone());
            (StatusCode::CREATED, object)
        },
        (Method::PUT, Some(name)) => {
            if let Some(successes) = store.failing_updates.get_mut(&name) {
                if *successes == 0 {
                    return status(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", &format!("update of {name} failed"));
                }
                *successes -= 1;
            }
            let mut object: Value = serde_json::from_slice(body).unwrap();
            let Some(current) = store.collections.get(&location.collection).and_then(|objects| objects.get(&name)) else {
                return status(StatusCode::NOT_FOUND, "NotFound", &format!("{name} not found"));
            };
            let sent_version = object["metadata"]["resourceVersion"].as_str().unwrap_or_default();
            if !sent_version.is_empty() && sent_version != current["metadata"]["resourceVersion"].as_str().unwrap_or_default() {
                return status(StatusCode::CONFLICT, "Conflict", &format!("the object {name} has been modified"));
            }
            object["metadata"]["uid"] = current["metadata"]["uid"].clone();
            stamp(&mut store, &mut object, location.namespace.as_deref(), false);
            store.collections.entry(location.collection).or_default().insert(name, object.clone());
            (StatusCode::OK, object)
        },
        (Method::DELETE, Some(name)) => match store.collections.get_mut(&location.collection).and_then(|objects| objects.remove(&name)) {
            Some(object) => (StatusCode::OK, object),
            None => status(StatusCode::NOT_FOUND, "NotFound", &format!("{name} not found")),
        },
        _ => status(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", uri.path()),
    }
}

fn stamp(store: &mut Store, object: &mut Value, namespace: Option<&str>, created: bool) {
    let version = store.next_version;
    store.next_version += 1;
    let metadata = &mut object["metadata"];
    if let Some(namespace) = namespace {
        metadata["namespace"] = json!(namespace);
    }
    if created {
        metadata["uid"] = json!(format!("uid-{version}"));
    }
    metadata["resourceVersion"] = json!(version.to_string());
}

fn status(code: StatusCode, reason: &str, message: &str) -> (StatusCode, Value) {
    (
        code,
        json!({
            "kind": "Status", "apiVersion": "v1", "metadata": {}, "status": "Failure",
            "message": message, "reason": reason, "code": code.as_u16()
        }),
    )
}

/// `/api/v1/namespaces/ns/services/name` or `/apis/group/version/...`, namespace and name optional.
fn locate(path: &str) -> Option<Location> {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    let prefix_len = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return None,
    };
    let prefix = segments.get(..prefix_len)?.join("/");
    let rest = &segments[prefix_len..];
    let (namespace, plural, name) = match rest {
        ["namespaces", namespace, plural, tail @ ..] => (Some((*namespace).to_owned()), *plural, tail.first()),
        [plural, tail @ ..] => (None, *plural, tail.first()),
        [] => return None,
    };
    Some(Location {
        collection: format!("{prefix}/{}/{plural}", namespace.as_deref().unwrap_or("")),
        namespace,
        name: name.map(|name| (*name).to_owned()),
    })
}

fn query_value(query: &str, key: &str) -> Option<String> {
    query.split('&').filter_map(|pair| pair.split_once('=')).find(|(name, _)| *name == key).map(|(_, value)| percent_decode(value))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' if index + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[index + 1..index + 3]).unwrap();
                decoded.push(u8::from_str_radix(hex, 16).unwrap());
                index += 3;
            },
            b'+' => {
                decoded.push(b' ');
                index += 1;
            },
            byte => {
                decoded.push(byte);
                index += 1;
            },
        }
    }
    String::from_utf8(decoded).unwrap()
}

fn matches_selector(object: &Value, selector: &str) -> bool {
    selector.split(',').map(str::trim).filter(|term| !term.is_empty()).all(|term| {
        let labels = &object["metadata"]["labels"];
        match term.split_once('=') {
            Some((key, value)) => labels[key].as_str() == Some(value),
            None => !labels[term].is_null(),
        }
    })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Service;
    use kube::{api::PostParams, Api};

    use super::*;

    #[tokio::test]
    async fn test_fake_cluster_semantics() {
        let fake = FakeCluster::start();
        let api: Api<Service> = Api::namespaced(fake.client(), "default");
        let mut service = Service::default();
        service.metadata.name = Some("web".to_owned());
        service.metadata.labels = Some([("app".to_owned(), "a b".to_owned())].into());
        let created = api.create(&PostParams::default(), &service).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert!(api.create(&PostParams::default(), &service).await.is_err());

        let mut stale = created.clone();
        api.replace("web", &PostParams::default(), &created).await.unwrap();
        stale.metadata.labels = None;
        assert!(matches!(api.replace("web", &PostParams::default(), &stale).await, Err(kube::Error::Api(e)) if e.code == 409));

        let listed = api.list(&kube::api::ListParams::default().labels("app=a b")).await.unwrap();
        assert_eq!(listed.items.len(), 1);
        let listed = api.list(&kube::api::ListParams::default().labels("app=other")).await.unwrap();
        assert!(listed.items.is_empty());

        api.delete("web", &kube::api::DeleteParams::default()).await.unwrap();
        assert!(api.get_opt("web").await.unwrap().is_none());
    }
}
