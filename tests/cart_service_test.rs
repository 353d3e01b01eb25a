mod common;

use assert_matches::assert_matches;
use common::TestApp;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_api::{
    entities::commerce::{cart, cart_line, Cart, CartLine, CartStatus},
    errors::ServiceError,
    models::LineData,
    services::commerce::AddToCartInput,
};
use uuid::Uuid;

fn add(variant_id: i32, quantity: i32) -> AddToCartInput {
    AddToCartInput {
        variant_id,
        quantity,
        data: LineData::new(),
    }
}

#[tokio::test]
async fn adding_twice_merges_into_one_line() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Mug", 1_500, 10).await;

    let cart = carts.add(None, None, add(variant.id, 3)).await.unwrap();
    let cart = carts
        .add(None, Some(cart.token), add(variant.id, 2))
        .await
        .unwrap();

    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, 5);
    assert_eq!(cart.quantity, 5);
    assert_eq!(cart.total, 7_500);
    assert!(cart.is_shipping_required);

    let stored = CartLine::find()
        .filter(cart_line::Column::CartToken.eq(cart.token))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn different_line_data_makes_a_separate_line() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Poster", 900, 10).await;

    let cart = carts.add(None, None, add(variant.id, 1)).await.unwrap();
    let mut engraved = LineData::new();
    engraved.insert("engraving", "A.B.");
    let cart = carts
        .add(
            None,
            Some(cart.token),
            AddToCartInput {
                variant_id: variant.id,
                quantity: 1,
                data: engraved.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(cart.lines.len(), 2);
    assert!(cart.lines.iter().any(|line| line.data == engraved));
    assert_eq!(cart.total, 1_800);
}

#[tokio::test]
async fn adding_to_cart_does_not_allocate_stock() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("Lamp", 4_000, 5).await;

    app.state
        .services
        .carts
        .add(None, None, add(variant.id, 3))
        .await
        .unwrap();

    let after = app.variant(variant.id).await;
    assert_eq!(after.quantity_allocated, 0);
    assert_eq!(after.quantity_available(), 5);
}

#[tokio::test]
async fn resulting_quantity_is_checked_against_stock() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Vase", 2_000, 4).await;

    let cart = carts.add(None, None, add(variant.id, 3)).await.unwrap();
    let err = carts
        .add(None, Some(cart.token), add(variant.id, 2))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let cart = carts.get_cart(None, Some(cart.token)).await.unwrap().unwrap();
    assert_eq!(cart.lines[0].quantity, 3);
}

#[tokio::test]
async fn merged_quantity_that_overflows_is_rejected() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Jar", 500, 10).await;

    let cart = carts.add(None, None, add(variant.id, 1)).await.unwrap();
    let err = carts
        .add(None, Some(cart.token), add(variant.id, i32::MAX))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let cart = carts.get_cart(None, Some(cart.token)).await.unwrap().unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, 1);
    assert_eq!(cart.quantity, 1);
    assert_eq!(cart.total, 500);
}

#[tokio::test]
async fn invalid_additions_are_rejected_without_creating_a_cart() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Pen", 100, 10).await;
    let printable = app.seed_variant_with("Print", 500, 10, true).await;

    assert_matches!(
        carts.add(None, None, add(variant.id, 0)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add(None, None, add(9_999, 1)).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        carts.add(None, None, add(printable.id, 1)).await,
        Err(ServiceError::ValidationError(_))
    );

    let carts_count = Cart::find().count(&*app.state.db).await.unwrap();
    assert_eq!(carts_count, 0);

    let cart = carts
        .add(
            None,
            None,
            AddToCartInput {
                variant_id: printable.id,
                quantity: 1,
                data: LineData::with_file("/media/upload/proof.png"),
            },
        )
        .await
        .unwrap();
    assert_eq!(cart.lines[0].data.file(), Some("/media/upload/proof.png"));
}

#[tokio::test]
async fn reads_never_create_carts() {
    let app = TestApp::new().await;
    let user = app.seed_user("reader@example.com").await;
    let carts = &app.state.services.carts;

    assert!(carts.get_cart(None, None).await.unwrap().is_none());
    assert!(carts
        .get_cart(Some(user.id), Some(Uuid::new_v4()))
        .await
        .unwrap()
        .is_none());
    assert_eq!(Cart::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn signing_in_claims_the_anonymous_cart_and_cancels_the_old_one() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let user = app.seed_user("claimer@example.com").await;
    let variant = app.seed_variant("Cup", 700, 10).await;

    let owned = carts.add(Some(user.id), None, add(variant.id, 1)).await.unwrap();
    let anonymous = carts.add(None, None, add(variant.id, 2)).await.unwrap();
    assert_ne!(owned.token, anonymous.token);

    let claimed = carts
        .get_cart(Some(user.id), Some(anonymous.token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.token, anonymous.token);
    assert_eq!(claimed.quantity, 2);

    let open: Vec<cart::Model> = Cart::find()
        .filter(cart::Column::UserId.eq(user.id))
        .filter(cart::Column::Status.eq(CartStatus::Open))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].token, anonymous.token);

    let old = Cart::find_by_id(owned.token)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, CartStatus::Canceled);

    // Without a token the user now gets the claimed cart.
    let current = carts.get_cart(Some(user.id), None).await.unwrap().unwrap();
    assert_eq!(current.token, anonymous.token);
}

#[tokio::test]
async fn another_users_cart_is_invisible() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let owner = app.seed_user("owner@example.com").await;
    let intruder = app.seed_user("intruder@example.com").await;
    let variant = app.seed_variant("Bowl", 1_200, 10).await;

    let cart = carts.add(Some(owner.id), None, add(variant.id, 1)).await.unwrap();

    assert!(carts
        .get_cart(Some(intruder.id), Some(cart.token))
        .await
        .unwrap()
        .is_none());
    assert!(carts.get_cart(None, Some(cart.token)).await.unwrap().is_none());
    assert_matches!(
        carts.clear(Some(intruder.id), Some(cart.token)).await,
        Err(ServiceError::NotFound(_))
    );

    // Adding with the foreign token starts the intruder's own cart.
    let own = carts
        .add(Some(intruder.id), Some(cart.token), add(variant.id, 1))
        .await
        .unwrap();
    assert_ne!(own.token, cart.token);
}

#[tokio::test]
async fn anonymous_token_access_is_open() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Tray", 300, 10).await;

    let cart = carts.add(None, None, add(variant.id, 1)).await.unwrap();

    // Whoever holds an unowned token can read and change the cart.
    let seen = carts.get_cart(None, Some(cart.token)).await.unwrap().unwrap();
    assert_eq!(seen.token, cart.token);
    let line_id = seen.lines[0].id;
    let updated = carts
        .update_line(None, Some(cart.token), line_id, 4)
        .await
        .unwrap();
    assert_eq!(updated.quantity, 4);
}

#[tokio::test]
async fn set_update_and_delete_lines_keep_totals_current() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let mug = app.seed_variant("Big Mug", 1_000, 10).await;
    let plate = app.seed_variant("Plate", 250, 10).await;

    let cart = carts.add(None, None, add(mug.id, 1)).await.unwrap();
    let token = Some(cart.token);
    carts.add(None, token, add(plate.id, 2)).await.unwrap();

    let cart = carts
        .set_line(None, token, mug.id, 3, LineData::new())
        .await
        .unwrap();
    assert_eq!(cart.total, 3 * 1_000 + 2 * 250);

    assert_matches!(
        carts.set_line(None, token, mug.id, 11, LineData::new()).await,
        Err(ServiceError::InsufficientStock(_))
    );

    let plate_line = cart
        .lines
        .iter()
        .find(|line| line.variant.id == plate.id)
        .unwrap()
        .id;
    let cart = carts.update_line(None, token, plate_line, 0).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.total, 3_000);

    let cart = carts
        .delete_line(None, token, mug.id, LineData::new())
        .await
        .unwrap();
    assert!(cart.lines.is_empty());
    assert_eq!(cart.total, 0);
    assert_eq!(cart.quantity, 0);

    assert_matches!(
        carts.delete_line(None, token, mug.id, LineData::new()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        carts.update_line(None, token, 424_242, 1).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn price_changes_show_up_on_the_next_read() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Clock", 2_000, 10).await;

    let cart = carts.add(None, None, add(variant.id, 2)).await.unwrap();
    app.state
        .services
        .catalog
        .update_product_price(variant.product_id, 2_500)
        .await
        .unwrap();

    let cart = carts.get_cart(None, Some(cart.token)).await.unwrap().unwrap();
    assert_eq!(cart.total, 5_000);
    let stored = Cart::find_by_id(cart.token)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total, 5_000);
}

#[tokio::test]
async fn clear_removes_cart_and_lines() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let variant = app.seed_variant("Spoon", 50, 10).await;

    let cart = carts.add(None, None, add(variant.id, 2)).await.unwrap();
    carts.clear(None, Some(cart.token)).await.unwrap();

    assert!(Cart::find_by_id(cart.token)
        .one(&*app.state.db)
        .await
        .unwrap()
        .is_none());
    assert_eq!(CartLine::find().count(&*app.state.db).await.unwrap(), 0);
    assert_matches!(
        carts.clear(None, Some(cart.token)).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn purge_deletes_only_canceled_carts() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let user = app.seed_user("purge@example.com").await;
    let variant = app.seed_variant("Fork", 60, 10).await;

    let old = carts.add(Some(user.id), None, add(variant.id, 1)).await.unwrap();
    let anonymous = carts.add(None, None, add(variant.id, 1)).await.unwrap();
    carts
        .get_cart(Some(user.id), Some(anonymous.token))
        .await
        .unwrap();
    let bystander = carts.add(None, None, add(variant.id, 1)).await.unwrap();

    assert_eq!(carts.purge_canceled_carts().await.unwrap(), 1);
    assert_eq!(carts.purge_canceled_carts().await.unwrap(), 0);

    let remaining: Vec<uuid::Uuid> = Cart::find()
        .all(&*app.state.db)
        .await
        .unwrap()
        .into_iter()
        .map(|cart| cart.token)
        .collect();
    assert!(!remaining.contains(&old.token));
    assert!(remaining.contains(&anonymous.token));
    assert!(remaining.contains(&bystander.token));
    let orphan_lines = CartLine::find()
        .filter(cart_line::Column::CartToken.eq(old.token))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(orphan_lines, 0);
}
