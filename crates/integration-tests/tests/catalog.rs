//! Catalog, cart and shipping endpoints.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;
use simone_integration_tests::{PERFUME, TestApp};

#[tokio::test]
async fn health_and_readiness() {
    let app = TestApp::new();

    let live = app.get("/health").await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.text(), "ok");

    let ready = app.get("/health/ready").await;
    assert_eq!(ready.status, StatusCode::OK);
    assert!(ready.header("x-request-id").is_some());
    assert_eq!(ready.header("x-content-type-options"), Some("nosniff"));
}

#[tokio::test]
async fn products_filtered_by_category() {
    let app = TestApp::new();

    let all = app.get("/api/products").await.json();
    assert_eq!(all["count"], 4);

    let perfumes = app.get("/api/products?collection=parfums").await.json();
    assert_eq!(perfumes["count"], 1);
    assert_eq!(perfumes["products"][0]["id"], "parfum-30-ml");

    let clothes = app.get("/api/products?level1=vestiaire").await.json();
    assert_eq!(clothes["count"], 3);
}

#[tokio::test]
async fn unknown_documents_are_not_found() {
    let app = TestApp::new();

    let product = app.get("/api/products/chemise-soie-noir").await;
    assert_eq!(product.status, StatusCode::OK);
    assert_eq!(product.json()["name"], "Chemise soie noir");

    for uri in [
        "/api/products/robe-inconnue",
        "/api/articles/inconnu",
        "/api/lookbooks/fw99",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(response.json()["ok"], false);
    }
}

#[tokio::test]
async fn articles_and_lookbooks() {
    let app = TestApp::new();

    let articles = app.get("/api/articles?limit=1").await.json();
    assert_eq!(articles["count"], 1);
    assert_eq!(articles["articles"][0]["id"], "premiere-collection");

    let lookbooks = app.get("/api/lookbooks").await.json();
    assert_eq!(lookbooks["count"], 2);

    let ss26 = app.get("/api/lookbooks/ss26").await;
    assert_eq!(ss26.status, StatusCode::OK);
}

#[tokio::test]
async fn cart_summary_reaches_free_shipping() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/api/cart/summary",
            &json!({
                "items": [
                    {"name": "Parfum 30 ml", "format": "30 ml", "price": 95, "stripePriceId": PERFUME}
                ],
                "country": "FR",
                "shipping_method": "home"
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let summary = response.json();
    assert_eq!(summary["count"], 1);
    assert_eq!(summary["subtotal_cents"], 9500);
    assert_eq!(summary["weight_grams"], 350);
    assert_eq!(summary["shipping_cents"], 0);
    assert_eq!(summary["free_shipping"], true);
    assert_eq!(summary["total_cents"], 9500);
}

#[tokio::test]
async fn cart_summary_with_oversized_price() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/api/cart/summary",
            &json!({
                "items": [{"name": "x", "price": "79228162514264337593543950335"}],
                "country": "FR",
                "shipping_method": "home"
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["subtotal_cents"], 0);
}

#[tokio::test]
async fn shipping_quotes() {
    let app = TestApp::new();

    let relay = app
        .get("/api/shipping/quote?weight_grams=350&country=FR&method=mondial_relay")
        .await;
    assert_eq!(relay.status, StatusCode::OK);
    let relay = relay.json();
    assert_eq!(relay["amount"], 495);
    assert_eq!(relay["method"], "mondial_relay");
    assert_eq!(relay["configured"], true);

    let belgium = app
        .get("/api/shipping/quote?weight_grams=800&country=BE&method=home")
        .await
        .json();
    assert_eq!(belgium["amount"], 1590);
    assert_eq!(belgium["zone"], "europe-1");

    let relay_abroad = app
        .get("/api/shipping/quote?weight_grams=350&country=BE&method=mondial_relay")
        .await;
    assert_eq!(relay_abroad.status, StatusCode::BAD_REQUEST);

    let overseas = app
        .get("/api/shipping/quote?weight_grams=350&country=US&method=home")
        .await;
    assert_eq!(overseas.status, StatusCode::BAD_REQUEST);
}
