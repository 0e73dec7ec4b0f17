use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, ListQuery};

// GET /api/v1/products
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .catalog_service
        .list_products(query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.catalog_service.get_product(product_id).await?;
    Ok(Json(ApiResponse::success(product)))
}
