mod common;

use assert_matches::assert_matches;
use common::TestApp;
use sea_orm::{EntityTrait, PaginatorTrait};
use storefront_api::{
    entities::{
        commerce::{Cart, CartLine},
        order::Entity as Order,
        order_line::Entity as OrderLine,
        OrderStatus,
    },
    errors::ServiceError,
    models::LineData,
    services::{
        commerce::{checkout_service::MISSING_ADDRESS_MESSAGE, AddToCartInput},
        orders::transition_order,
    },
};

fn add(variant_id: i32, quantity: i32) -> AddToCartInput {
    AddToCartInput {
        variant_id,
        quantity,
        data: LineData::new(),
    }
}

#[tokio::test]
async fn conversion_freezes_lines_and_allocates_stock() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("buyer@example.com").await;
    let address = app.seed_address(user.id).await;
    let variant = app.seed_variant("Kettle", 3_000, 5).await;

    let cart = services
        .carts
        .add(Some(user.id), None, add(variant.id, 3))
        .await
        .unwrap();

    let order = services
        .checkout
        .create_from_cart(user.id, Some(cart.token), Some(address.id))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Unfulfiled);
    assert_eq!(order.total, 9_000);
    assert_eq!(order.quantity, 3);
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].unit_price, 3_000);
    assert_eq!(order.lines[0].product_name, "Kettle");
    assert_eq!(order.address.as_ref().map(|a| a.id), Some(address.id));

    let after = app.variant(variant.id).await;
    assert_eq!(after.quantity_allocated, 3);
    assert_eq!(after.quantity_available(), 2);

    assert!(Cart::find_by_id(cart.token)
        .one(&*app.state.db)
        .await
        .unwrap()
        .is_none());
    assert_eq!(CartLine::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn order_lines_ignore_later_price_changes() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("frozen@example.com").await;
    let address = app.seed_address(user.id).await;
    let variant = app.seed_variant("Toaster", 4_500, 5).await;

    let cart = services
        .carts
        .add(Some(user.id), None, add(variant.id, 2))
        .await
        .unwrap();
    let order = services
        .checkout
        .create_from_cart(user.id, Some(cart.token), Some(address.id))
        .await
        .unwrap();

    services
        .catalog
        .update_product_price(variant.product_id, 9_999)
        .await
        .unwrap();

    let reloaded = services.orders.get_order(user.id, order.id).await.unwrap();
    assert_eq!(reloaded.total, 9_000);
    assert_eq!(reloaded.lines[0].unit_price, 4_500);
    assert_eq!(reloaded.lines[0].total, 9_000);
}

#[tokio::test]
async fn missing_address_is_rejected_before_anything_happens() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("noaddr@example.com").await;
    let variant = app.seed_variant("Jar", 800, 5).await;
    let cart = services
        .carts
        .add(Some(user.id), None, add(variant.id, 1))
        .await
        .unwrap();

    let err = services
        .checkout
        .create_from_cart(user.id, Some(cart.token), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(ref msg) if msg == MISSING_ADDRESS_MESSAGE);
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn converting_someone_elses_cart_is_a_no_op() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let owner = app.seed_user("cart-owner@example.com").await;
    let thief = app.seed_user("thief@example.com").await;
    let thief_address = app.seed_address(thief.id).await;
    let variant = app.seed_variant("Teapot", 2_200, 5).await;

    let cart = services
        .carts
        .add(Some(owner.id), None, add(variant.id, 2))
        .await
        .unwrap();

    let err = services
        .checkout
        .create_from_cart(thief.id, Some(cart.token), Some(thief_address.id))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
    assert_eq!(OrderLine::find().count(&*app.state.db).await.unwrap(), 0);
    assert!(Cart::find_by_id(cart.token)
        .one(&*app.state.db)
        .await
        .unwrap()
        .is_some());
    assert_eq!(app.variant(variant.id).await.quantity_allocated, 0);
}

#[tokio::test]
async fn someone_elses_address_is_not_found() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let buyer = app.seed_user("addr-buyer@example.com").await;
    let other = app.seed_user("addr-other@example.com").await;
    let foreign = app.seed_address(other.id).await;
    let variant = app.seed_variant("Ladle", 300, 5).await;
    let cart = services
        .carts
        .add(Some(buyer.id), None, add(variant.id, 1))
        .await
        .unwrap();

    assert_matches!(
        services
            .checkout
            .create_from_cart(buyer.id, Some(cart.token), Some(foreign.id))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn empty_cart_cannot_be_converted() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("empty@example.com").await;
    let address = app.seed_address(user.id).await;
    let variant = app.seed_variant("Sieve", 400, 5).await;

    let cart = services
        .carts
        .add(Some(user.id), None, add(variant.id, 1))
        .await
        .unwrap();
    services
        .carts
        .delete_line(Some(user.id), Some(cart.token), variant.id, LineData::new())
        .await
        .unwrap();

    assert_matches!(
        services
            .checkout
            .create_from_cart(user.id, Some(cart.token), Some(address.id))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn allocation_never_exceeds_stock() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let variant = app.seed_variant("Rare Print", 10_000, 3).await;

    // Both carts pass the add-time check; only one conversion can allocate.
    let first = app.seed_user("first@example.com").await;
    let second = app.seed_user("second@example.com").await;
    let first_address = app.seed_address(first.id).await;
    let second_address = app.seed_address(second.id).await;
    services
        .carts
        .add(Some(first.id), None, add(variant.id, 2))
        .await
        .unwrap();
    services
        .carts
        .add(Some(second.id), None, add(variant.id, 2))
        .await
        .unwrap();

    let (a, b) = futures::join!(
        services
            .checkout
            .create_from_cart(first.id, None, Some(first_address.id)),
        services
            .checkout
            .create_from_cart(second.id, None, Some(second_address.id)),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(ServiceError::InsufficientStock(_)))));

    let after = app.variant(variant.id).await;
    assert_eq!(after.quantity_allocated, 2);
    assert_eq!(after.quantity_available(), 1);
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 1);
    assert_eq!(OrderLine::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_allocation_rolls_back_earlier_lines() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let plentiful = app.seed_variant("Tea Towel", 1_200, 5).await;
    let scarce = app.seed_variant("Teapot", 4_500, 2).await;

    let rival = app.seed_user("rival@example.com").await;
    let rival_address = app.seed_address(rival.id).await;
    let buyer = app.seed_user("late@example.com").await;
    let buyer_address = app.seed_address(buyer.id).await;

    services
        .carts
        .add(Some(rival.id), None, add(scarce.id, 2))
        .await
        .unwrap();
    let cart = services
        .carts
        .add(Some(buyer.id), None, add(plentiful.id, 2))
        .await
        .unwrap();
    services
        .carts
        .add(Some(buyer.id), Some(cart.token), add(scarce.id, 2))
        .await
        .unwrap();

    services
        .checkout
        .create_from_cart(rival.id, None, Some(rival_address.id))
        .await
        .unwrap();

    let result = services
        .checkout
        .create_from_cart(buyer.id, Some(cart.token), Some(buyer_address.id))
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    assert_eq!(app.variant(plentiful.id).await.quantity_allocated, 0);
    assert_eq!(app.variant(scarce.id).await.quantity_allocated, 2);
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 1);
    assert_eq!(OrderLine::find().count(&*app.state.db).await.unwrap(), 1);

    let kept = services
        .carts
        .get_cart(Some(buyer.id), Some(cart.token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.lines.len(), 2);
}

#[tokio::test]
async fn canceling_an_order_releases_its_stock() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("cancel@example.com").await;
    let address = app.seed_address(user.id).await;
    let variant = app.seed_variant("Blender", 7_000, 4).await;

    services
        .carts
        .add(Some(user.id), None, add(variant.id, 3))
        .await
        .unwrap();
    let order = services
        .checkout
        .create_from_cart(user.id, None, Some(address.id))
        .await
        .unwrap();
    assert_eq!(app.variant(variant.id).await.quantity_allocated, 3);

    let canceled = services.orders.cancel_order(user.id, order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(app.variant(variant.id).await.quantity_allocated, 0);

    assert_matches!(
        services.orders.cancel_order(user.id, order.id).await,
        Err(ServiceError::InvalidTransition(_))
    );

    let stored = Order::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let err = transition_order(&*app.state.db, stored, OrderStatus::Fulfiled)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Invalid status transition: Order {} is already Canceled", order.id)
    );
}

#[tokio::test]
async fn orders_are_private_and_paginated() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = app.seed_user("lister@example.com").await;
    let other = app.seed_user("other-lister@example.com").await;
    let address = app.seed_address(user.id).await;
    let variant = app.seed_variant("Napkin", 100, 50).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        services
            .carts
            .add(Some(user.id), None, add(variant.id, 1))
            .await
            .unwrap();
        let order = services
            .checkout
            .create_from_cart(user.id, None, Some(address.id))
            .await
            .unwrap();
        ids.push(order.id);
    }

    let page = services.orders.list_orders(user.id, 1, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 2);
    assert_eq!(page.orders[0].id, ids[2]);

    let page = services.orders.list_orders(user.id, 2, 2).await.unwrap();
    assert_eq!(page.orders.len(), 1);
    assert_eq!(page.orders[0].id, ids[0]);

    let none = services.orders.list_orders(other.id, 1, 16).await.unwrap();
    assert_eq!(none.total, 0);
    assert_matches!(
        services.orders.get_order(other.id, ids[0]).await,
        Err(ServiceError::NotFound(_))
    );
}
