use crate::{
    auth::UserId,
    entities::catalog::{product, product_type, product_variant, Product, ProductType, ProductVariant},
    entities::commerce::{cart, cart_line, Cart, CartLine, CartModel, CartStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    models::LineData,
    services::catalog::{load_variant, VariantDetails, VariantView},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Shopping cart service.
///
/// Every public operation takes the caller's identity (`actor`) and the
/// optional cart token explicitly. Carts are resolved as follows:
///
/// * an open, unowned cart named by the token is returned, and claimed when
///   the caller is signed in (the caller's other open carts are canceled);
/// * an open cart owned by the caller is returned;
/// * a cart owned by someone else is treated as if the token were unknown;
/// * without a usable token a signed-in caller gets their own open cart.
///
/// Reads never create carts; only [`CartService::add`] does.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Current cart of the caller, or `None`.
    #[instrument(skip(self))]
    pub async fn get_cart(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
    ) -> Result<Option<CartView>, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(resolved) = resolve_cart(&txn, actor, token).await? else {
            return Ok(None);
        };
        let view = recalculate_cart_totals(&txn, resolved.cart).await?;
        txn.commit().await?;

        self.publish_claim(&view, actor, resolved.canceled);
        Ok(Some(view))
    }

    /// Adds `quantity` units of a variant, merging into an existing line with
    /// the same data. Creates the cart if the caller has none.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let details = load_variant(&txn, input.variant_id).await?;
        if details.product_type.is_file_required && input.data.file().is_none() {
            return Err(ServiceError::ValidationError(format!(
                "'{}' requires an uploaded file",
                details.product.name
            )));
        }

        let (cart, canceled, created) = match resolve_cart(&txn, actor, token).await? {
            Some(resolved) => (resolved.cart, resolved.canceled, false),
            None => (create_cart(&txn, actor).await?, None, true),
        };

        let data = input.data.canonical();
        let existing = find_line(&txn, cart.token, input.variant_id, &data).await?;
        let new_quantity = existing
            .as_ref()
            .map_or(0, |line| line.quantity)
            .checked_add(input.quantity)
            .ok_or_else(|| insufficient_stock(&details))?;
        ensure_available(&details, new_quantity)?;

        match existing {
            Some(line) => {
                let mut line: cart_line::ActiveModel = line.into();
                line.quantity = Set(new_quantity);
                line.update(&txn).await?;
            }
            None => {
                cart_line::ActiveModel {
                    cart_token: Set(cart.token),
                    variant_id: Set(input.variant_id),
                    quantity: Set(new_quantity),
                    data: Set(data),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let view = recalculate_cart_totals(&txn, cart).await?;
        txn.commit().await?;

        if created {
            self.event_sender.send_or_log(Event::CartCreated {
                token: view.token,
                user_id: actor,
            });
        }
        self.publish_claim(&view, actor, canceled);
        self.event_sender.send_or_log(Event::CartLineChanged {
            token: view.token,
            variant_id: input.variant_id,
            quantity: new_quantity,
        });
        counter!("storefront_cart.lines_added", 1);

        info!(
            "Added variant {} x{} to cart {}",
            input.variant_id, input.quantity, view.token
        );
        Ok(view)
    }

    /// Sets the absolute quantity of the (variant, data) line. Zero removes it.
    #[instrument(skip(self))]
    pub async fn set_line(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
        variant_id: i32,
        quantity: i32,
        data: LineData,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let resolved = require_cart(&txn, actor, token).await?;
        let line = find_line(&txn, resolved.cart.token, variant_id, &data.canonical())
            .await?
            .ok_or_else(|| line_not_found(variant_id))?;

        let view = self
            .apply_quantity(&txn, resolved.cart, line, quantity)
            .await?;
        txn.commit().await?;

        self.publish_claim(&view, actor, resolved.canceled);
        Ok(view)
    }

    /// Same as [`CartService::set_line`], addressing the line by id.
    #[instrument(skip(self))]
    pub async fn update_line(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
        line_id: i32,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let resolved = require_cart(&txn, actor, token).await?;
        let line = CartLine::find_by_id(line_id)
            .filter(cart_line::Column::CartToken.eq(resolved.cart.token))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart line", line_id))?;

        let view = self
            .apply_quantity(&txn, resolved.cart, line, quantity)
            .await?;
        txn.commit().await?;

        self.publish_claim(&view, actor, resolved.canceled);
        Ok(view)
    }

    /// Removes the (variant, data) line.
    #[instrument(skip(self))]
    pub async fn delete_line(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
        variant_id: i32,
        data: LineData,
    ) -> Result<CartView, ServiceError> {
        self.set_line(actor, token, variant_id, 0, data).await
    }

    /// Deletes the caller's cart and all of its lines.
    #[instrument(skip(self))]
    pub async fn clear(
        &self,
        actor: Option<UserId>,
        token: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let resolved = require_cart(&txn, actor, token).await?;
        let cart_token = resolved.cart.token;

        CartLine::delete_many()
            .filter(cart_line::Column::CartToken.eq(cart_token))
            .exec(&txn)
            .await?;
        resolved.cart.delete(&txn).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_token));
        info!("Cleared cart {}", cart_token);
        Ok(())
    }

    /// Hard-deletes canceled carts. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn purge_canceled_carts(&self) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await?;
        let tokens: Vec<Uuid> = Cart::find()
            .filter(cart::Column::Status.eq(CartStatus::Canceled))
            .all(&txn)
            .await?
            .into_iter()
            .map(|cart| cart.token)
            .collect();

        if tokens.is_empty() {
            return Ok(0);
        }

        CartLine::delete_many()
            .filter(cart_line::Column::CartToken.is_in(tokens.clone()))
            .exec(&txn)
            .await?;
        let deleted = Cart::delete_many()
            .filter(cart::Column::Token.is_in(tokens))
            .exec(&txn)
            .await?
            .rows_affected;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartsPurged(deleted));
        info!("Purged {} canceled carts", deleted);
        Ok(deleted)
    }

    async fn apply_quantity(
        &self,
        conn: &impl ConnectionTrait,
        cart: CartModel,
        line: cart_line::Model,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }

        if quantity == 0 {
            line.delete(conn).await?;
        } else {
            let details = load_variant(conn, line.variant_id).await?;
            ensure_available(&details, quantity)?;
            let mut line: cart_line::ActiveModel = line.into();
            line.quantity = Set(quantity);
            line.update(conn).await?;
        }

        recalculate_cart_totals(conn, cart).await
    }

    fn publish_claim(&self, view: &CartView, actor: Option<UserId>, canceled: Option<Vec<Uuid>>) {
        if let (Some(canceled), Some(user_id)) = (canceled, actor) {
            self.event_sender.send_or_log(Event::CartClaimed {
                token: view.token,
                user_id,
                canceled,
            });
        }
    }
}

/// Outcome of cart resolution. `canceled` is set when the cart was just
/// claimed and lists the caller's carts that were canceled in its favor.
#[derive(Debug)]
pub struct ResolvedCart {
    pub cart: CartModel,
    pub canceled: Option<Vec<Uuid>>,
}

/// Finds the cart the caller is working with, claiming an anonymous cart for
/// a signed-in caller. See [`CartService`] for the rules.
pub async fn resolve_cart(
    conn: &impl ConnectionTrait,
    actor: Option<UserId>,
    token: Option<Uuid>,
) -> Result<Option<ResolvedCart>, ServiceError> {
    if let Some(token) = token {
        let cart = Cart::find_by_id(token)
            .filter(cart::Column::Status.eq(CartStatus::Open))
            .one(conn)
            .await?;

        if let Some(cart) = cart {
            match (cart.user_id, actor) {
                (None, None) => {
                    return Ok(Some(ResolvedCart {
                        cart,
                        canceled: None,
                    }))
                }
                (None, Some(user_id)) => return claim_cart(conn, cart, user_id).await.map(Some),
                (Some(owner), Some(user_id)) if owner == user_id => {
                    return Ok(Some(ResolvedCart {
                        cart,
                        canceled: None,
                    }))
                }
                _ => debug!(%token, "cart token belongs to another user"),
            }
        }
    }

    let Some(user_id) = actor else {
        return Ok(None);
    };

    let cart = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::Status.eq(CartStatus::Open))
        .order_by_desc(cart::Column::CreateTime)
        .one(conn)
        .await?;

    Ok(cart.map(|cart| ResolvedCart {
        cart,
        canceled: None,
    }))
}

async fn require_cart(
    conn: &impl ConnectionTrait,
    actor: Option<UserId>,
    token: Option<Uuid>,
) -> Result<ResolvedCart, ServiceError> {
    resolve_cart(conn, actor, token)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))
}

/// Gives an anonymous cart to `user_id` and cancels the user's other open carts.
async fn claim_cart(
    conn: &impl ConnectionTrait,
    cart: CartModel,
    user_id: UserId,
) -> Result<ResolvedCart, ServiceError> {
    let now = Utc::now();
    let others: Vec<Uuid> = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::Status.eq(CartStatus::Open))
        .filter(cart::Column::Token.ne(cart.token))
        .all(conn)
        .await?
        .into_iter()
        .map(|other| other.token)
        .collect();

    if !others.is_empty() {
        Cart::update_many()
            .set(cart::ActiveModel {
                status: Set(CartStatus::Canceled),
                last_status_change: Set(now),
                ..Default::default()
            })
            .filter(cart::Column::Token.is_in(others.clone()))
            .filter(cart::Column::Status.eq(CartStatus::Open))
            .exec(conn)
            .await?;
    }

    let token = cart.token;
    let mut active: cart::ActiveModel = cart.into();
    active.user_id = Set(Some(user_id));
    let cart = active.update(conn).await?;

    info!(%token, user_id, canceled = others.len(), "claimed anonymous cart");
    Ok(ResolvedCart {
        cart,
        canceled: Some(others),
    })
}

async fn create_cart(
    conn: &impl ConnectionTrait,
    actor: Option<UserId>,
) -> Result<CartModel, ServiceError> {
    let now = Utc::now();
    let cart = cart::ActiveModel {
        token: Set(Uuid::new_v4()),
        status: Set(CartStatus::Open),
        user_id: Set(actor),
        checkout_data: Set(serde_json::json!({})),
        total: Set(0),
        quantity: Set(0),
        create_time: Set(now),
        last_status_change: Set(now),
    }
    .insert(conn)
    .await?;
    debug!(token = %cart.token, "created cart");
    Ok(cart)
}

async fn find_line(
    conn: &impl ConnectionTrait,
    cart_token: Uuid,
    variant_id: i32,
    canonical_data: &str,
) -> Result<Option<cart_line::Model>, ServiceError> {
    Ok(CartLine::find()
        .filter(cart_line::Column::CartToken.eq(cart_token))
        .filter(cart_line::Column::VariantId.eq(variant_id))
        .filter(cart_line::Column::Data.eq(canonical_data))
        .one(conn)
        .await?)
}

fn cart_too_large() -> ServiceError {
    ServiceError::ValidationError("Cart total is out of range".to_string())
}

fn line_not_found(variant_id: i32) -> ServiceError {
    ServiceError::NotFound(format!("Variant {variant_id} is not in the cart"))
}

fn ensure_available(details: &VariantDetails, quantity: i32) -> Result<(), ServiceError> {
    if details.variant.check_quantity(quantity) {
        Ok(())
    } else {
        Err(insufficient_stock(details))
    }
}

fn insufficient_stock(details: &VariantDetails) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "Only {} of '{}' available",
        details.variant.quantity_available(),
        details.variant.name
    ))
}

/// Loads variants, products and types for a set of lines in three queries.
pub async fn load_line_details(
    conn: &impl ConnectionTrait,
    variant_ids: Vec<i32>,
) -> Result<HashMap<i32, VariantDetails>, ServiceError> {
    if variant_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let variants = ProductVariant::find()
        .filter(product_variant::Column::Id.is_in(variant_ids))
        .all(conn)
        .await?;
    let products: HashMap<i32, product::Model> = Product::find()
        .filter(product::Column::Id.is_in(variants.iter().map(|v| v.product_id).collect::<Vec<_>>()))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    let types: HashMap<i32, product_type::Model> = ProductType::find()
        .filter(
            product_type::Column::Id
                .is_in(products.values().map(|p| p.product_type_id).collect::<Vec<_>>()),
        )
        .all(conn)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    variants
        .into_iter()
        .map(|variant| {
            let product = products
                .get(&variant.product_id)
                .cloned()
                .ok_or_else(|| ServiceError::not_found("Product", variant.product_id))?;
            let product_type = types
                .get(&product.product_type_id)
                .cloned()
                .ok_or_else(|| ServiceError::not_found("Product type", product.product_type_id))?;
            Ok((
                variant.id,
                VariantDetails {
                    variant,
                    product,
                    product_type,
                },
            ))
        })
        .collect()
}

/// Recomputes `total` and `quantity` from the current lines and prices,
/// persists them, and returns the cart as presented to clients.
///
/// This is the only place cart totals are written.
pub async fn recalculate_cart_totals(
    conn: &impl ConnectionTrait,
    cart: CartModel,
) -> Result<CartView, ServiceError> {
    let lines = CartLine::find()
        .filter(cart_line::Column::CartToken.eq(cart.token))
        .order_by_asc(cart_line::Column::Id)
        .all(conn)
        .await?;
    let details = load_line_details(conn, lines.iter().map(|l| l.variant_id).collect()).await?;

    let mut views = Vec::with_capacity(lines.len());
    for line in lines {
        let detail = details
            .get(&line.variant_id)
            .ok_or_else(|| ServiceError::not_found("Variant", line.variant_id))?;
        views.push(CartLineView::new(&line, detail));
    }

    let total = views
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.total))
        .ok_or_else(cart_too_large)?;
    let quantity = views
        .iter()
        .try_fold(0i32, |acc, line| acc.checked_add(line.quantity))
        .ok_or_else(cart_too_large)?;

    let cart = if cart.total != total || cart.quantity != quantity {
        debug!(token = %cart.token, total, quantity, "recalculated cart totals");
        let mut active: cart::ActiveModel = cart.into();
        active.total = Set(total);
        active.quantity = Set(quantity);
        active.update(conn).await?
    } else {
        cart
    };

    Ok(CartView {
        token: cart.token,
        user_id: cart.user_id,
        total: cart.total,
        quantity: cart.quantity,
        is_shipping_required: views.iter().any(|line| line.is_shipping_required),
        lines: views,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCartInput {
    pub variant_id: i32,
    pub quantity: i32,
    #[serde(default)]
    pub data: LineData,
}

/// Wire shape of a cart line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLineView {
    pub id: i32,
    pub variant: VariantView,
    pub quantity: i32,
    pub data: LineData,
    pub total: i64,
    pub item_price: i64,
    pub is_shipping_required: bool,
}

impl CartLineView {
    fn new(line: &cart_line::Model, details: &VariantDetails) -> Self {
        let item_price = details.unit_price();
        Self {
            id: line.id,
            variant: details.view(),
            quantity: line.quantity,
            data: line.line_data(),
            total: item_price.saturating_mul(i64::from(line.quantity)),
            item_price,
            is_shipping_required: details.product_type.is_shipping_required,
        }
    }
}

/// Wire shape of a cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartView {
    pub token: Uuid,
    #[serde(skip)]
    pub user_id: Option<UserId>,
    pub total: i64,
    pub quantity: i32,
    pub lines: Vec<CartLineView>,
    pub is_shipping_required: bool,
}
