use crate::{
    entities::catalog::{
        attribute_choice_value, product, product_attribute, product_type, product_variant,
        AttributeChoiceValue, Product, ProductAttribute, ProductType, ProductVariant,
    },
    errors::ServiceError,
    models::AttributeMap,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Catalog administration and read models.
///
/// Stock moves only through [`allocate_stock`] and [`release_stock`]; both
/// are conditional updates so concurrent orders cannot allocate more than
/// `quantity`.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_product_type(
        &self,
        input: CreateProductTypeInput,
    ) -> Result<product_type::Model, ServiceError> {
        input.validate()?;
        let model = product_type::ActiveModel {
            name: Set(input.name),
            has_variants: Set(input.has_variants),
            is_shipping_required: Set(input.is_shipping_required),
            is_file_required: Set(input.is_file_required),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;
        info!(product_type_id = model.id, "created product type");
        Ok(model)
    }

    /// Creates an attribute together with its choice values.
    #[instrument(skip(self))]
    pub async fn create_attribute(
        &self,
        input: CreateAttributeInput,
    ) -> Result<AttributeWithValues, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let attribute = product_attribute::ActiveModel {
            name: Set(input.name),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut values = Vec::with_capacity(input.values.len());
        for name in input.values {
            let value = attribute_choice_value::ActiveModel {
                attribute_id: Set(attribute.id),
                name: Set(name),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            values.push(value);
        }

        txn.commit().await?;
        Ok(AttributeWithValues { attribute, values })
    }

    /// Creates a product. Types without variants get their single synthetic
    /// variant here, stocked with `input.quantity`.
    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductWithVariants, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let product_type = ProductType::find_by_id(input.product_type_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product type", input.product_type_id))?;
        ensure_attribute_choices(&txn, &input.attributes).await?;

        let product = product::ActiveModel {
            name: Set(input.name.clone()),
            description: Set(input.description),
            price: Set(input.price),
            weight: Set(input.weight),
            is_published: Set(input.is_published),
            is_featured: Set(input.is_featured),
            attributes: Set(input.attributes),
            product_type_id: Set(product_type.id),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut variants = Vec::new();
        if !product_type.has_variants {
            let variant = product_variant::ActiveModel {
                product_id: Set(product.id),
                sku: Set(input.sku),
                name: Set(input.name),
                price_override: Set(None),
                attributes: Set(AttributeMap::new()),
                quantity: Set(input.quantity),
                quantity_allocated: Set(0),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            variants.push(variant);
        }

        txn.commit().await?;
        info!(product_id = product.id, "created product");
        Ok(ProductWithVariants {
            product,
            product_type,
            variants,
        })
    }

    /// Adds a variant to a product whose type supports variants.
    ///
    /// Without an explicit name the variant is named after its choice values.
    #[instrument(skip(self))]
    pub async fn add_variant(
        &self,
        product_id: i32,
        input: CreateVariantInput,
    ) -> Result<product_variant::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        let product_type = ProductType::find_by_id(product.product_type_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product type", product.product_type_id))?;

        if !product_type.has_variants {
            return Err(ServiceError::Conflict(format!(
                "Products of type '{}' have a single variant",
                product_type.name
            )));
        }

        let choice_names = ensure_attribute_choices(&txn, &input.attributes).await?;
        let name = match input.name {
            Some(name) => name,
            None if !choice_names.is_empty() => choice_names.join(" / "),
            None => product.name.clone(),
        };

        let variant = product_variant::ActiveModel {
            product_id: Set(product.id),
            sku: Set(input.sku),
            name: Set(name),
            price_override: Set(input.price_override),
            attributes: Set(input.attributes),
            quantity: Set(input.quantity),
            quantity_allocated: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(variant)
    }

    /// Changes a product's base price. Existing orders keep their frozen prices.
    #[instrument(skip(self))]
    pub async fn update_product_price(
        &self,
        product_id: i32,
        price: i64,
    ) -> Result<product::Model, ServiceError> {
        if price < 0 {
            return Err(ServiceError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        let mut active: product::ActiveModel = product.into();
        active.price = Set(price);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Adds `quantity` units of stock to a variant.
    #[instrument(skip(self))]
    pub async fn restock(
        &self,
        variant_id: i32,
        quantity: i32,
    ) -> Result<product_variant::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Restock quantity must be positive".to_string(),
            ));
        }
        let result = ProductVariant::update_many()
            .col_expr(
                product_variant::Column::Quantity,
                Expr::col(product_variant::Column::Quantity).add(quantity),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Variant", variant_id));
        }

        Ok(load_variant(&*self.db, variant_id).await?.variant)
    }

    pub async fn get_variant(&self, variant_id: i32) -> Result<VariantDetails, ServiceError> {
        load_variant(&*self.db, variant_id).await
    }

    /// Published products, one page at a time.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        query: ProductQuery,
    ) -> Result<(Vec<ProductSummary>, u64), ServiceError> {
        let per_page = query.per_page.clamp(1, 100);
        let mut select = Product::find().filter(product::Column::IsPublished.eq(true));
        select = match query.order {
            ProductOrder::CheapFirst => select.order_by_asc(product::Column::Price),
            ProductOrder::ExpensiveFirst => select.order_by_desc(product::Column::Price),
            ProductOrder::Newest => select.order_by_desc(product::Column::Id),
        };
        if query.featured_only {
            select = select.filter(product::Column::IsFeatured.eq(true));
        }

        let paginator = select.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(query.page.max(1) - 1).await?;

        let ids: Vec<i32> = products.iter().map(|p| p.id).collect();
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.is_in(ids))
            .all(&*self.db)
            .await?;

        let summaries = products
            .into_iter()
            .map(|product| {
                let is_available = variants
                    .iter()
                    .any(|v| v.product_id == product.id && v.quantity_available() > 0);
                ProductSummary {
                    id: product.id,
                    name: product.name,
                    price: product.price,
                    is_featured: product.is_featured,
                    is_available,
                }
            })
            .collect();

        Ok((summaries, total))
    }

    /// Product page: variants with live availability and resolved attribute names.
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i32) -> Result<ProductDetail, ServiceError> {
        let product = Product::find_by_id(product_id)
            .filter(product::Column::IsPublished.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        let product_type = ProductType::find_by_id(product.product_type_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product type", product.product_type_id))?;
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .order_by_asc(product_variant::Column::Id)
            .all(&*self.db)
            .await?;

        let attributes = describe_attributes(&*self.db, &product.attributes).await?;
        let variants = variants
            .into_iter()
            .map(|variant| VariantView::new(&variant, &product))
            .collect();

        Ok(ProductDetail {
            id: product.id,
            name: product.name,
            description: product.description,
            price: product.price,
            weight: product.weight,
            is_featured: product.is_featured,
            is_shipping_required: product_type.is_shipping_required,
            is_file_required: product_type.is_file_required,
            attributes,
            variants,
        })
    }
}

/// Loads a variant with the product and type it prices and ships from.
pub async fn load_variant(
    conn: &impl ConnectionTrait,
    variant_id: i32,
) -> Result<VariantDetails, ServiceError> {
    let variant = ProductVariant::find_by_id(variant_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Variant", variant_id))?;
    let product = Product::find_by_id(variant.product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", variant.product_id))?;
    let product_type = ProductType::find_by_id(product.product_type_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product type", product.product_type_id))?;

    Ok(VariantDetails {
        variant,
        product,
        product_type,
    })
}

/// Moves `quantity` units from available to allocated, or fails without
/// touching the row when fewer than `quantity` are available.
pub async fn allocate_stock(
    conn: &impl ConnectionTrait,
    variant_id: i32,
    quantity: i32,
) -> Result<(), ServiceError> {
    let available = Expr::col(product_variant::Column::Quantity)
        .sub(Expr::col(product_variant::Column::QuantityAllocated));
    let result = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::QuantityAllocated,
            Expr::col(product_variant::Column::QuantityAllocated).add(quantity),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(Expr::expr(available).gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Not enough stock of variant {variant_id} to allocate {quantity} units"
        )));
    }
    Ok(())
}

/// Returns previously allocated units. Never drives the allocation negative.
pub async fn release_stock(
    conn: &impl ConnectionTrait,
    variant_id: i32,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::QuantityAllocated,
            Expr::col(product_variant::Column::QuantityAllocated).sub(quantity),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::QuantityAllocated.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(variant_id, quantity, "allocation smaller than release; clamping to zero");
        ProductVariant::update_many()
            .col_expr(product_variant::Column::QuantityAllocated, Expr::val(0).into())
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

/// Checks every (attribute, choice) pair and returns the choice names in
/// attribute order.
async fn ensure_attribute_choices(
    conn: &impl ConnectionTrait,
    attributes: &AttributeMap,
) -> Result<Vec<String>, ServiceError> {
    if attributes.is_empty() {
        return Ok(Vec::new());
    }
    let choices: HashMap<i32, attribute_choice_value::Model> = AttributeChoiceValue::find()
        .filter(attribute_choice_value::Column::Id.is_in(attributes.choice_ids().collect::<Vec<_>>()))
        .all(conn)
        .await?
        .into_iter()
        .map(|choice| (choice.id, choice))
        .collect();

    attributes
        .iter()
        .map(|(attribute_id, choice_id)| match choices.get(&choice_id) {
            Some(choice) if choice.attribute_id == attribute_id => Ok(choice.name.clone()),
            _ => Err(ServiceError::ValidationError(format!(
                "Choice {choice_id} is not a value of attribute {attribute_id}"
            ))),
        })
        .collect()
}

async fn describe_attributes(
    conn: &impl ConnectionTrait,
    attributes: &AttributeMap,
) -> Result<Vec<AttributeDescription>, ServiceError> {
    if attributes.is_empty() {
        return Ok(Vec::new());
    }
    let names: HashMap<i32, String> = ProductAttribute::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect();
    let values: HashMap<i32, String> = AttributeChoiceValue::find()
        .filter(attribute_choice_value::Column::Id.is_in(attributes.choice_ids().collect::<Vec<_>>()))
        .all(conn)
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    Ok(attributes
        .iter()
        .filter_map(|(attribute_id, choice_id)| {
            Some(AttributeDescription {
                name: names.get(&attribute_id)?.clone(),
                value: values.get(&choice_id)?.clone(),
            })
        })
        .collect())
}

/// A variant joined with everything needed to price and ship it.
#[derive(Debug, Clone)]
pub struct VariantDetails {
    pub variant: product_variant::Model,
    pub product: product::Model,
    pub product_type: product_type::Model,
}

impl VariantDetails {
    pub fn unit_price(&self) -> i64 {
        self.variant.unit_price(&self.product)
    }

    pub fn view(&self) -> VariantView {
        VariantView::new(&self.variant, &self.product)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductRef {
    pub id: i32,
    pub name: String,
    pub price: i64,
}

/// Wire shape of a variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantView {
    pub id: i32,
    pub sku: Option<String>,
    pub name: String,
    pub price: i64,
    pub attributes: AttributeMap,
    pub quantity_available: i32,
    pub product: ProductRef,
}

impl VariantView {
    pub fn new(variant: &product_variant::Model, product: &product::Model) -> Self {
        Self {
            id: variant.id,
            sku: variant.sku.clone(),
            name: variant.name.clone(),
            price: variant.unit_price(product),
            attributes: variant.attributes.clone(),
            quantity_available: variant.quantity_available(),
            product: ProductRef {
                id: product.id,
                name: product.name.clone(),
                price: product.price,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductTypeInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub has_variants: bool,
    pub is_shipping_required: bool,
    pub is_file_required: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAttributeInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeWithValues {
    pub attribute: product_attribute::Model,
    pub values: Vec<attribute_choice_value::Model>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub weight: i32,
    pub is_published: bool,
    pub is_featured: bool,
    #[serde(default)]
    pub attributes: AttributeMap,
    pub product_type_id: i32,
    /// SKU of the synthetic variant of single-variant types
    #[validate(length(max = 32))]
    pub sku: Option<String>,
    /// Stock of the synthetic variant of single-variant types
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateVariantInput {
    #[validate(length(max = 32))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(range(min = 0))]
    pub price_override: Option<i64>,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductWithVariants {
    pub product: product::Model,
    pub product_type: product_type::Model,
    pub variants: Vec<product_variant::Model>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductOrder {
    CheapFirst,
    ExpensiveFirst,
    #[default]
    Newest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    #[serde(default)]
    pub order: ProductOrder,
    #[serde(default)]
    pub featured_only: bool,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
            order: ProductOrder::default(),
            featured_only: false,
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: i32,
    pub name: String,
    pub price: i64,
    pub is_featured: bool,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDescription {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDetail {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub weight: i32,
    pub is_featured: bool,
    pub is_shipping_required: bool,
    pub is_file_required: bool,
    pub attributes: Vec<AttributeDescription>,
    pub variants: Vec<VariantView>,
}
