use crate::handlers::common::{map_service_error, success_response, PaginatedResponse};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

/// Creates the router for catalog endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id_or_slug", get(get_product))
        .route("/categories", get(list_categories))
}

// Pagination fields are inlined: serde_urlencoded cannot deserialize
// numeric fields through #[serde(flatten)].
#[derive(Debug, Deserialize)]
struct ProductListQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
    category: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// List active products, optionally filtered by category slug
async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Response, ApiError> {
    let page = state
        .services
        .catalog
        .list_products(query.page, query.per_page, query.category.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        page.products,
        page.page,
        page.per_page,
        page.total,
    )))
}

/// Get a single product by id or slug
async fn get_product(
    State(state): State<AppState>,
    Path(id_or_slug): Path<String>,
) -> Result<Response, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(&id_or_slug)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

/// List all categories
async fn list_categories(State(state): State<AppState>) -> Result<Response, ApiError> {
    let categories = state
        .services
        .catalog
        .list_categories()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(categories))
}
