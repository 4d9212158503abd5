use crate::{
    entities::{category, product, Category, CategoryModel, Product, ProductModel},
    errors::ServiceError,
};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const MAX_PAGE_SIZE: u64 = 100;

/// Read-only product catalog service.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone)]
pub struct ProductPage {
    pub products: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists active products, newest first, optionally scoped to a category.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
        category_slug: Option<&str>,
    ) -> Result<ProductPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let mut query = Product::find()
            .filter(product::Column::Active.eq(true))
            .order_by_desc(product::Column::CreatedAt);

        if let Some(slug) = category_slug {
            let category = Category::find()
                .filter(category::Column::Slug.eq(slug))
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("category {}", slug)))?;
            query = query.filter(product::Column::CategoryId.eq(category.id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;

        Ok(ProductPage {
            products,
            total,
            page,
            per_page,
        })
    }

    /// Fetches a single active product by id or slug.
    #[instrument(skip(self))]
    pub async fn get_product(&self, id_or_slug: &str) -> Result<ProductModel, ServiceError> {
        let product = match Uuid::parse_str(id_or_slug) {
            Ok(id) => Product::find_by_id(id).one(&*self.db).await?,
            Err(_) => {
                Product::find()
                    .filter(product::Column::Slug.eq(id_or_slug))
                    .one(&*self.db)
                    .await?
            }
        };

        product
            .filter(|p| p.active)
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", id_or_slug)))
    }

    /// Lists every category, alphabetically.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<CategoryModel>, ServiceError> {
        Category::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }
}
