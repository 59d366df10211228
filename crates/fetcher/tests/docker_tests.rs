//! Image layer fetch tests against a fake registry.

mod common;

use axum::http::StatusCode;
use common::*;
use httpmock::Method::GET;
use httpmock::MockServer;
use parcel_core::BuildStatus;
use parcel_fetcher::{DockerBlobFetcher, FetchError};
use serde_json::json;
use std::fs;

#[tokio::test]
async fn test_final_layer_with_bearer_challenge() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let base = tar_gz(&[("bin/sh", b"base")]);
    let top = tar_gz(&[("app/handler.py", b"def handler(): pass"), ("app/VERSION", b"3")]);
    let top_digest = format!("sha256:{}", sha256_hash(&top));

    let registry = MockServer::start_async().await;
    let challenge = format!(
        r#"Bearer realm="{}",service="test-registry",scope="repository:acme/app:pull""#,
        registry.url("/token")
    );
    registry
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v2/acme/app/manifests/v1")
                .header_missing("authorization");
            then.status(401).header("www-authenticate", &challenge);
        })
        .await;
    let token = registry
        .mock_async(|when, then| {
            when.method(GET)
                .path("/token")
                .query_param("service", "test-registry")
                .query_param("scope", "repository:acme/app:pull");
            then.status(200).json_body(json!({"token": "pull-token"}));
        })
        .await;
    let manifest = registry
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v2/acme/app/manifests/v1")
                .header("authorization", "Bearer pull-token");
            then.status(200)
                .json_body(image_manifest(&[base.as_slice(), top.as_slice()]));
        })
        .await;
    let blob = registry
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/v2/acme/app/blobs/{top_digest}"))
                .header("authorization", "Bearer pull-token");
            then.status(200).body(&top);
        })
        .await;

    let fetcher = DockerBlobFetcher::new(reqwest::Client::new(), registry.base_url());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("layer");
    fetcher
        .download_final_layer("acme/app:v1", &dest)
        .await
        .unwrap();

    token.assert_async().await;
    manifest.assert_async().await;
    blob.assert_async().await;
    assert_eq!(
        fs::read(dest.join("app/handler.py")).unwrap(),
        b"def handler(): pass"
    );
    assert!(!dest.join("bin/sh").exists());
}

#[tokio::test]
async fn test_basic_credentials_are_sent() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let layer = tar_gz(&[("index.js", b"module.exports = {}")]);
    let digest = format!("sha256:{}", sha256_hash(&layer));

    let registry = MockServer::start_async().await;
    // base64("bot:s3cret")
    let basic = "Basic Ym90OnMzY3JldA==";
    let manifest = registry
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v2/library/node/manifests/latest")
                .header("authorization", basic);
            then.status(200).json_body(image_manifest(&[layer.as_slice()]));
        })
        .await;
    registry
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/v2/library/node/blobs/{digest}"))
                .header("authorization", basic);
            then.status(200).body(&layer);
        })
        .await;

    let fetcher = DockerBlobFetcher::new(reqwest::Client::new(), registry.base_url());
    fetcher.set_basic_auth_for_domain("docker.io", "bot", "s3cret");

    let dir = tempfile::tempdir().unwrap();
    fetcher
        .download_final_layer("node", &dir.path().join("out"))
        .await
        .unwrap();

    manifest.assert_async().await;
    assert!(dir.path().join("out/index.js").exists());
}

#[tokio::test]
async fn test_digest_mismatch_is_reported() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let advertised = tar_gz(&[("a.txt", b"advertised")]);
    let served = tar_gz(&[("a.txt", b"tampered")]);
    let digest = format!("sha256:{}", sha256_hash(&advertised));

    let registry = MockServer::start_async().await;
    registry
        .mock_async(|when, then| {
            when.method(GET).path("/v2/acme/app/manifests/latest");
            then.status(200)
                .json_body(image_manifest(&[advertised.as_slice()]));
        })
        .await;
    registry
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/v2/acme/app/blobs/{digest}"));
            then.status(200).body(&served);
        })
        .await;

    let fetcher = DockerBlobFetcher::new(reqwest::Client::new(), registry.base_url());
    let dir = tempfile::tempdir().unwrap();
    let err = fetcher
        .download_final_layer("acme/app", &dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::ImageDigestMismatch(ref d) if *d == digest), "{err}");
}

#[tokio::test]
async fn test_image_package_fetch() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let layer = tar_gz(&[("main.go", b"package main")]);
    let digest = format!("sha256:{}", sha256_hash(&layer));

    let peer = MockServer::start_async().await;
    peer.mock_async(|when, then| {
        when.method(GET)
            .path("/v1/namespaces/default/packages/imaged");
        then.status(200).json_body(package_json(
            "imaged",
            image_archive("acme/fn:2"),
            BuildStatus::Succeeded,
        ));
    })
    .await;
    peer.mock_async(|when, then| {
        when.method(GET).path("/v2/acme/fn/manifests/2");
        then.status(200).json_body(image_manifest(&[layer.as_slice()]));
    })
    .await;
    peer.mock_async(|when, then| {
        when.method(GET).path(format!("/v2/acme/fn/blobs/{digest}"));
        then.status(200).body(&layer);
    })
    .await;

    let agent = TestAgent::with_config(|c| {
        c.resource_api_url = peer.base_url();
        c.default_registry_url = peer.base_url();
    })
    .await;
    let (status, _) = agent
        .post_json(
            "/fetch",
            &json!({
                "fetchType": "deployment",
                "package": {"namespace": "default", "name": "imaged"},
                "filename": "user",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        fs::read(agent.shared().join("user/main.go")).unwrap(),
        b"package main"
    );
}

#[tokio::test]
async fn test_registry_failure_is_image_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let registry = MockServer::start_async().await;
    registry
        .mock_async(|when, then| {
            when.method(GET).path("/v2/acme/gone/manifests/latest");
            then.status(404);
        })
        .await;

    let fetcher = DockerBlobFetcher::new(reqwest::Client::new(), registry.base_url());
    let dir = tempfile::tempdir().unwrap();
    let err = fetcher
        .download_final_layer("acme/gone", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Image(_)), "{err}");
}
