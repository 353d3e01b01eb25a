mod common;

use assert_matches::assert_matches;
use common::TestApp;
use storefront_api::{
    errors::ServiceError,
    models::AttributeMap,
    services::catalog::{
        allocate_stock, release_stock, CreateAttributeInput, CreateProductInput,
        CreateProductTypeInput, CreateVariantInput,
    },
};

fn product(name: &str, product_type_id: i32) -> CreateProductInput {
    CreateProductInput {
        name: name.to_string(),
        description: None,
        price: 2_000,
        weight: 250,
        is_published: true,
        is_featured: false,
        attributes: AttributeMap::new(),
        product_type_id,
        sku: None,
        quantity: 0,
    }
}

#[tokio::test]
async fn single_variant_types_get_a_synthetic_variant() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("Notebook", 750, 12).await;

    assert_eq!(variant.name, "Notebook");
    assert_eq!(variant.sku.as_deref(), Some("SKU-NOTEBOOK"));
    assert_eq!(variant.quantity, 12);
    assert_eq!(variant.quantity_allocated, 0);

    let details = app.state.services.catalog.get_variant(variant.id).await.unwrap();
    assert_eq!(details.unit_price(), 750);

    let err = app
        .state
        .services
        .catalog
        .add_variant(
            variant.product_id,
            CreateVariantInput {
                sku: None,
                name: Some("Second".into()),
                price_override: None,
                attributes: AttributeMap::new(),
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn variants_are_named_after_their_choices_and_can_override_price() {
    let app = TestApp::new().await;
    let catalog = &app.state.services.catalog;

    let shirt = catalog
        .create_product_type(CreateProductTypeInput {
            name: "Shirt".into(),
            has_variants: true,
            is_shipping_required: true,
            is_file_required: false,
        })
        .await
        .unwrap();
    let size = catalog
        .create_attribute(CreateAttributeInput {
            name: "Size".into(),
            values: vec!["S".into(), "XL".into()],
        })
        .await
        .unwrap();
    let created = catalog.create_product(product("Tee", shirt.id)).await.unwrap();
    assert!(created.variants.is_empty());

    let xl = size.values.iter().find(|v| v.name == "XL").unwrap();
    let variant = catalog
        .add_variant(
            created.product.id,
            CreateVariantInput {
                sku: Some("TEE-XL".into()),
                name: None,
                price_override: Some(2_400),
                attributes: AttributeMap::new().with(size.attribute.id, xl.id),
                quantity: 3,
            },
        )
        .await
        .unwrap();
    assert_eq!(variant.name, "XL");

    let details = catalog.get_variant(variant.id).await.unwrap();
    assert_eq!(details.unit_price(), 2_400);

    let detail = catalog.get_product(created.product.id).await.unwrap();
    assert_eq!(detail.variants.len(), 1);
    assert_eq!(detail.variants[0].price, 2_400);
    assert_eq!(detail.variants[0].quantity_available, 3);
}

#[tokio::test]
async fn unknown_attribute_choice_is_rejected() {
    let app = TestApp::new().await;
    let catalog = &app.state.services.catalog;
    let kind = catalog
        .create_product_type(CreateProductTypeInput {
            name: "Poster".into(),
            has_variants: true,
            is_shipping_required: true,
            is_file_required: false,
        })
        .await
        .unwrap();
    let created = catalog.create_product(product("Wave", kind.id)).await.unwrap();

    let result = catalog
        .add_variant(
            created.product.id,
            CreateVariantInput {
                sku: None,
                name: None,
                price_override: None,
                attributes: AttributeMap::new().with(999, 1_000),
                quantity: 1,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn stock_allocation_is_bounded_and_release_never_goes_negative() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("Candle", 600, 4).await;
    let db = &*app.state.db;

    allocate_stock(db, variant.id, 3).await.unwrap();
    assert_matches!(
        allocate_stock(db, variant.id, 2).await,
        Err(ServiceError::InsufficientStock(_))
    );
    assert_eq!(app.variant(variant.id).await.quantity_allocated, 3);

    release_stock(db, variant.id, 5).await.unwrap();
    assert_eq!(app.variant(variant.id).await.quantity_allocated, 0);

    let restocked = app
        .state
        .services
        .catalog
        .restock(variant.id, 6)
        .await
        .unwrap();
    assert_eq!(restocked.quantity, 10);
    assert_matches!(
        app.state.services.catalog.restock(variant.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn unpublished_products_are_hidden() {
    let app = TestApp::new().await;
    let catalog = &app.state.services.catalog;
    let kind = catalog
        .create_product_type(CreateProductTypeInput {
            name: "Draft".into(),
            has_variants: false,
            is_shipping_required: false,
            is_file_required: false,
        })
        .await
        .unwrap();
    let mut input = product("Secret", kind.id);
    input.is_published = false;
    let created = catalog.create_product(input).await.unwrap();

    assert_matches!(
        catalog.get_product(created.product.id).await,
        Err(ServiceError::NotFound(_))
    );
    let (listed, total) = catalog.list_products(Default::default()).await.unwrap();
    assert!(listed.is_empty());
    assert_eq!(total, 0);
}
