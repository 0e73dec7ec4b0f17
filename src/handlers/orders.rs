use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::orders::PlaceOrderRequest;
use crate::{ApiResponse, AppState, ListQuery};

// POST /api/v1/orders
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state.order_service.place_order(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(placed))))
}

// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .order_service
        .list_orders(user.user_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.order_service.get_order(user.user_id, order_id).await?;
    Ok(Json(ApiResponse::success(details)))
}
