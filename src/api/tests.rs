// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
};
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;
use crate::{configuration::Configuration, test_cluster::FakeCluster};

fn app(fake: &FakeCluster, credentials: Option<Credentials>) -> HttpRouter {
    app_with_deadline(fake, credentials, Duration::from_secs(10))
}

fn app_with_deadline(fake: &FakeCluster, credentials: Option<Credentials>, deadline: Duration) -> HttpRouter {
    let configuration =
        Configuration::builder().modes(vec!["ingress".to_owned(), "service".to_owned(), "istio-gateway".to_owned()]).domain("mycloud.com").build();
    let state = AppState::builder()
        .routers(configuration.build_routers().unwrap())
        .default_mode("ingress")
        .binder(ClusterBinder::new(vec![], Duration::from_secs(10)).with_fallback(fake.client()))
        .credentials(credentials)
        .deadline(deadline)
        .build();
    create_router(Arc::new(state))
}

async fn send(app: &HttpRouter, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned())))
}

async fn call(app: &HttpRouter, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map_or_else(Body::empty, |body| Body::from(body.to_string()));
    send(app, Request::builder().method(method).uri(uri).body(body).unwrap()).await
}

#[tokio::test]
async fn test_backend_lifecycle() {
    let fake = FakeCluster::start();
    let app = app(&fake, None);

    let (status, _) = call(&app, Method::POST, "/api/backend/myapp", Some(json!({"route": "/"}))).await;
    assert_eq!(status, StatusCode::OK);
    let ingress: Ingress = fake.get(Some("default"), "kubernetes-router-myapp-ingress").unwrap();
    let backend = ingress.spec.unwrap().rules.unwrap()[0].http.as_ref().unwrap().paths[0].backend.service.clone().unwrap();
    assert_eq!(backend.name, "myapp-web");

    let (status, body) = call(&app, Method::GET, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"address": "http://myapp.mycloud.com", "addresses": ["http://myapp.mycloud.com"]}));

    let (status, _) = call(&app, Method::PUT, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, Method::DELETE, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, Method::GET, "/api/backend/myapp", None).await;
    assert_eq!(body["addresses"], json!([]));
}

#[tokio::test]
async fn test_update_with_ensure_opts() {
    let fake = FakeCluster::start();
    let app = app(&fake, None);
    let body = json!({
        "opts": {"domain": "myapp.io", "tls-acme": "true"},
        "cnames": ["www.myapp.io"],
        "team": "team-a",
        "prefixes": [{"prefix": "", "target": {"service": "myapp-web", "namespace": "default"}}]
    });
    let (status, _) = call(&app, Method::PUT, "/api/ingress/backend/myapp", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fake.get::<Ingress>(Some("default"), "kubernetes-router-cname-www.myapp.io").is_some());

    let (_, body) = call(&app, Method::GET, "/api/ingress/backend/myapp", None).await;
    assert_eq!(body["address"], "https://myapp.io");
    let (_, body) = call(&app, Method::GET, "/api/ingress/backend/myapp/cname", None).await;
    assert_eq!(body, json!({"cnames": ["www.myapp.io"]}));

    let (status, _) = call(&app, Method::PUT, "/api/backend/myapp", Some(json!({"prefixes": []}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, _) = call(&app, Method::PUT, "/api/backend/myapp", Some(json!({"opts": {"tls-acme": "maybe"}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_instance_header_and_legacy_cnames() {
    let fake = FakeCluster::start();
    let app = app(&fake, None);
    let request = Request::builder().method(Method::POST).uri("/api/backend/myapp").header(INSTANCE_HEADER, "blue").body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);
    let ingress: Ingress = fake.get(Some("default"), "kubernetes-router-myapp-ingress-blue").unwrap();
    assert_eq!(ingress.spec.unwrap().rules.unwrap()[0].host.as_deref(), Some("blue.instance.myapp.mycloud.com"));

    call(&app, Method::POST, "/api/backend/other", None).await;
    assert_eq!(call(&app, Method::POST, "/api/backend/other/cname/other.io", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, Method::GET, "/api/backend/other/cname/other.io", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, Method::GET, "/api/backend/other/cname/missing.io", None).await.0, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/backend/other")
        .header(OPTS_HEADER, "route=/v2")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);
    assert!(fake.get::<Ingress>(Some("default"), "kubernetes-router-cname-other.io").is_some());

    assert_eq!(call(&app, Method::DELETE, "/api/backend/other/cname/other.io", None).await.0, StatusCode::OK);
    assert!(fake.get::<Ingress>(Some("default"), "kubernetes-router-cname-other.io").is_none());
}

#[tokio::test]
async fn test_modes_and_support() {
    let fake = FakeCluster::start();
    let app = app(&fake, None);
    assert_eq!(call(&app, Method::GET, "/api/unknown/info", None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&app, Method::GET, "/api/support/tls", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, Method::GET, "/api/support/prefix", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, Method::GET, "/api/service/support/cname", None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&app, Method::GET, "/api/istio-gateway/support/cname", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, Method::GET, "/api/istio-gateway/support/tls", None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&app, Method::GET, "/api/service/support/info", None).await.0, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/api/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("tls-acme").is_some());

    let (status, _) = call(&app, Method::PUT, "/api/service/backend/myapp/certificate/myapp.io", Some(json!({"certificate": "x", "key": "y"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call(&app, Method::GET, "/api/backend/myapp/routes", None).await;
    assert_eq!((status, body), (StatusCode::OK, json!({"addresses": []})));
}

#[tokio::test]
async fn test_swap_requires_target() {
    let fake = FakeCluster::start();
    let app = app(&fake, None);
    assert_eq!(call(&app, Method::POST, "/api/backend/myapp/swap", Some(json!({"Target": ""}))).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(&app, Method::POST, "/api/backend/myapp/swap", None).await.0, StatusCode::BAD_REQUEST);
    let (status, body) = call(&app, Method::POST, "/api/istio-gateway/backend/myapp/swap", Some(json!({"Target": "other"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("swap is not supported"));
}

#[tokio::test]
async fn test_basic_auth_and_ops_endpoints() {
    let fake = FakeCluster::start();
    let app = app(&fake, Some(Credentials { user: "admin".to_owned(), password: "secret".to_owned() }));

    let response = app.clone().oneshot(Request::builder().uri("/api/info").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"Restricted\"");

    let wrong = format!("Basic {}", STANDARD.encode("admin:nope"));
    let request = Request::builder().uri("/api/info").header(header::AUTHORIZATION, wrong).body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::UNAUTHORIZED);

    let prefix = format!("Basic {}", STANDARD.encode("admin:secre"));
    let request = Request::builder().uri("/api/info").header(header::AUTHORIZATION, prefix).body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::UNAUTHORIZED);

    let right = format!("Basic {}", STANDARD.encode("admin:secret"));
    let request = Request::builder().uri("/api/info").header(header::AUTHORIZATION, right).body(Body::empty()).unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/healthcheck", None).await;
    assert_eq!((status, body), (StatusCode::OK, Value::String("WORKING".to_owned())));
    let (status, body) = call(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("http_requests_total"));
}

#[tokio::test]
async fn test_stalled_cluster_hits_deadline() {
    let fake = FakeCluster::start();
    fake.delay_responses(Duration::from_secs(3600));
    let app = app_with_deadline(&fake, None, Duration::from_millis(50));

    let (status, body) = call(&app, Method::POST, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("deadline exceeded"));
    let (status, body) = call(&app, Method::GET, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("deadline exceeded"));
}

#[tokio::test]
async fn test_one_deadline_covers_cname_lookup_and_ensure() {
    let delay = Duration::from_millis(50);
    let counting = FakeCluster::start();
    counting.delay_responses(delay);
    let app = app(&counting, None);
    assert_eq!(call(&app, Method::GET, "/api/backend/myapp/cname", None).await.0, StatusCode::OK);
    let lookup = counting.requests();
    assert_eq!(call(&app, Method::POST, "/api/backend/myapp", None).await.0, StatusCode::OK);
    let total = counting.requests() - lookup;
    assert!(lookup >= 1 && total > lookup);

    // each half fits the deadline on its own, both together do not
    let deadline = delay * u32::try_from(total).unwrap() - delay / 2;
    let fake = FakeCluster::start();
    fake.delay_responses(delay);
    let app = app_with_deadline(&fake, None, deadline);
    let (status, body) = call(&app, Method::POST, "/api/backend/myapp", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("deadline exceeded"));
}

#[test]
fn test_same_secret() {
    assert!(same_secret("secret", "secret"));
    assert!(same_secret("", ""));
    assert!(!same_secret("secret", "secreT"));
    assert!(!same_secret("secre", "secret"));
    assert!(!same_secret("secret", ""));
}
