mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use common::{response_json, TestApp};

#[tokio::test]
async fn products_are_public_and_only_active_ones_are_listed() {
    let app = TestApp::new().await;
    app.seed_product("Visible Mug", dec!(150.00), 10).await;

    // An inactive listing stays hidden.
    let now = chrono::Utc::now();
    let hidden = souq_api::entities::product::ActiveModel {
        id: Set(Uuid::new_v4()),
        slug: Set("hidden-mug".to_string()),
        name: Set("Hidden Mug".to_string()),
        name_ar: Set("Hidden Mug (ar)".to_string()),
        description: Set(None),
        price: Set(dec!(1.00)),
        stock: Set(3),
        image_url: Set(None),
        is_active: Set(false),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };
    let hidden = hidden.insert(&*app.state.db).await.unwrap();

    let response = app
        .request(Method::GET, "/api/v1/products", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["products"][0]["name"], "Visible Mug");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", hidden.id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_detail_includes_both_names() {
    let app = TestApp::new().await;
    let product = app.seed_product("Clay Pot", dec!(75.00), 4).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", product.id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["data"]["name"], "Clay Pot");
    assert_eq!(json["data"]["name_ar"], "Clay Pot (ar)");
    assert_eq!(json["data"]["stock"], 4);
}

#[tokio::test]
async fn health_endpoint_reports_database_status() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["data"]["database"], "healthy");
}
