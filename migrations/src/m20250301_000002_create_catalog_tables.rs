use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProductTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductTypes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductTypes::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(ProductTypes::HasVariants)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ProductTypes::IsShippingRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ProductTypes::IsFileRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProductAttributes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductAttributes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProductAttributes::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AttributeChoiceValues::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AttributeChoiceValues::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AttributeChoiceValues::AttributeId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AttributeChoiceValues::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_attribute_choice_values_attribute")
                            .from(
                                AttributeChoiceValues::Table,
                                AttributeChoiceValues::AttributeId,
                            )
                            .to(ProductAttributes::Table, ProductAttributes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Products::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Products::Description).text().null())
                    .col(ColumnDef::new(Products::Price).big_integer().not_null())
                    .col(
                        ColumnDef::new(Products::Weight)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Products::IsPublished)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Products::IsFeatured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Products::Attributes).json().not_null())
                    .col(ColumnDef::new(Products::ProductTypeId).integer().not_null())
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_products_product_type")
                            .from(Products::Table, Products::ProductTypeId)
                            .to(ProductTypes::Table, ProductTypes::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProductVariants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductVariants::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductVariants::ProductId).integer().not_null())
                    .col(
                        ColumnDef::new(ProductVariants::Sku)
                            .string_len(32)
                            .null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ProductVariants::Name).string_len(255).not_null())
                    .col(ColumnDef::new(ProductVariants::PriceOverride).big_integer().null())
                    .col(ColumnDef::new(ProductVariants::Attributes).json().not_null())
                    .col(
                        ColumnDef::new(ProductVariants::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(ProductVariants::QuantityAllocated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_product_variants_product")
                            .from(ProductVariants::Table, ProductVariants::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_variants_product_id")
                    .table(ProductVariants::Table)
                    .col(ProductVariants::ProductId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AttributeChoiceValues::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProductAttributes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProductTypes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ProductTypes {
    Table,
    Id,
    Name,
    HasVariants,
    IsShippingRequired,
    IsFileRequired,
}

#[derive(DeriveIden)]
pub enum ProductAttributes {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
pub enum AttributeChoiceValues {
    Table,
    Id,
    AttributeId,
    Name,
}

#[derive(DeriveIden)]
pub enum Products {
    Table,
    Id,
    Name,
    Description,
    Price,
    Weight,
    IsPublished,
    IsFeatured,
    Attributes,
    ProductTypeId,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ProductVariants {
    Table,
    Id,
    ProductId,
    Sku,
    Name,
    PriceOverride,
    Attributes,
    Quantity,
    QuantityAllocated,
}
