//! Products, categories and the links between them.

use common::{CategoryId, Decimal, ProductCategoryId, ProductId};
use store::{
    Category, NewProduct, Page, Product, ProductCategory, ProductChanges, ProductQuery, Store,
};

use crate::access::{self, Actor};
use crate::validation::{
    CATEGORY_NAME_MAX_LEN, DESCRIPTION_MAX_LEN, PRODUCT_NAME_MAX_LEN, validate_max_len,
    validate_price, validate_required,
};
use crate::DomainError;

/// Fields of a new product. The price is validated before it becomes money.
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub name: String,
    pub price: Decimal,
    pub description: String,
    pub count: u32,
    pub category_ids: Vec<CategoryId>,
}

/// Changes to a product. `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub count: Option<u32>,
    pub category_ids: Option<Vec<CategoryId>>,
}

fn validate_product_name(name: &str) -> Result<(), DomainError> {
    validate_required("name", name)?;
    validate_max_len("name", name, PRODUCT_NAME_MAX_LEN)
}

fn validate_category_name(name: &str) -> Result<(), DomainError> {
    validate_required("name", name)?;
    validate_max_len("name", name, CATEGORY_NAME_MAX_LEN)
}

/// Service for the product catalog. Reads need an authenticated caller,
/// writes need an admin.
pub struct CatalogService<S: Store> {
    store: S,
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, actor, draft), fields(name = %draft.name))]
    pub async fn create_product(
        &self,
        actor: &Actor,
        draft: ProductDraft,
    ) -> Result<Product, DomainError> {
        access::require_admin(actor)?;
        validate_product_name(&draft.name)?;
        validate_required("description", &draft.description)?;
        validate_max_len("description", &draft.description, DESCRIPTION_MAX_LEN)?;
        let price = validate_price(draft.price)?;

        let product = self
            .store
            .create_product(NewProduct {
                name: draft.name,
                price,
                description: draft.description,
                count: draft.count,
                category_ids: draft.category_ids,
            })
            .await?;
        tracing::info!(product_id = %product.id, price = %product.price, "product created");
        Ok(product)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get_product(
        &self,
        actor: &Actor,
        product_id: ProductId,
    ) -> Result<Product, DomainError> {
        access::require_authenticated(actor)?;
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn list_products(
        &self,
        actor: &Actor,
        query: &ProductQuery,
    ) -> Result<Page<Product>, DomainError> {
        access::require_authenticated(actor)?;
        Ok(self.store.list_products(query).await?)
    }

    /// Updates a product. A price change re-prices every cart holding it.
    #[tracing::instrument(skip(self, actor, update))]
    pub async fn update_product(
        &self,
        actor: &Actor,
        product_id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, DomainError> {
        access::require_admin(actor)?;
        if let Some(ref name) = update.name {
            validate_product_name(name)?;
        }
        if let Some(ref description) = update.description {
            validate_required("description", description)?;
            validate_max_len("description", description, DESCRIPTION_MAX_LEN)?;
        }
        let price = update.price.map(validate_price).transpose()?;

        let product = self
            .store
            .update_product(
                product_id,
                ProductChanges {
                    name: update.name,
                    price,
                    description: update.description,
                    count: update.count,
                    category_ids: update.category_ids,
                },
            )
            .await?;
        tracing::info!(product_id = %product.id, price = %product.price, "product updated");
        Ok(product)
    }

    /// Deletes a product with its cart lines, order lines and category links.
    #[tracing::instrument(skip(self, actor))]
    pub async fn delete_product(
        &self,
        actor: &Actor,
        product_id: ProductId,
    ) -> Result<(), DomainError> {
        access::require_admin(actor)?;
        if !self.store.delete_product(product_id).await? {
            return Err(DomainError::not_found("product", product_id));
        }
        tracing::info!(%product_id, "product deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn create_category(&self, actor: &Actor, name: &str) -> Result<Category, DomainError> {
        access::require_admin(actor)?;
        validate_category_name(name)?;
        Ok(self.store.create_category(name.trim()).await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get_category(
        &self,
        actor: &Actor,
        category_id: CategoryId,
    ) -> Result<Category, DomainError> {
        access::require_authenticated(actor)?;
        self.store
            .get_category(category_id)
            .await?
            .ok_or_else(|| DomainError::not_found("category", category_id))
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn list_categories(&self, actor: &Actor) -> Result<Vec<Category>, DomainError> {
        access::require_authenticated(actor)?;
        Ok(self.store.list_categories().await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn rename_category(
        &self,
        actor: &Actor,
        category_id: CategoryId,
        name: &str,
    ) -> Result<Category, DomainError> {
        access::require_admin(actor)?;
        validate_category_name(name)?;
        Ok(self.store.update_category(category_id, name.trim()).await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn delete_category(
        &self,
        actor: &Actor,
        category_id: CategoryId,
    ) -> Result<(), DomainError> {
        access::require_admin(actor)?;
        if !self.store.delete_category(category_id).await? {
            return Err(DomainError::not_found("category", category_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn link(
        &self,
        actor: &Actor,
        product_id: ProductId,
        category_id: CategoryId,
    ) -> Result<ProductCategory, DomainError> {
        access::require_admin(actor)?;
        Ok(self
            .store
            .link_product_category(product_id, category_id)
            .await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get_link(
        &self,
        actor: &Actor,
        id: ProductCategoryId,
    ) -> Result<ProductCategory, DomainError> {
        access::require_authenticated(actor)?;
        self.store
            .get_product_category(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product category", id))
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn list_links(&self, actor: &Actor) -> Result<Vec<ProductCategory>, DomainError> {
        access::require_authenticated(actor)?;
        Ok(self.store.list_product_categories().await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn unlink(&self, actor: &Actor, id: ProductCategoryId) -> Result<(), DomainError> {
        access::require_admin(actor)?;
        if !self.store.delete_product_category(id).await? {
            return Err(DomainError::not_found("product category", id));
        }
        Ok(())
    }
}
