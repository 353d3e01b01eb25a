use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Carts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Carts::Token).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Carts::Status)
                            .string_len(32)
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(Carts::UserId).integer().null())
                    .col(ColumnDef::new(Carts::CheckoutData).json().not_null())
                    .col(
                        ColumnDef::new(Carts::Total)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Carts::Quantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Carts::CreateTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Carts::LastStatusChange)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_carts_user")
                            .from(Carts::Table, Carts::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_carts_user_status")
                    .table(Carts::Table)
                    .col(Carts::UserId)
                    .col(Carts::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CartLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CartLines::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CartLines::CartToken).uuid().not_null())
                    .col(ColumnDef::new(CartLines::VariantId).integer().not_null())
                    .col(ColumnDef::new(CartLines::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(CartLines::Data)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cart_lines_cart")
                            .from(CartLines::Table, CartLines::CartToken)
                            .to(Carts::Table, Carts::Token)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cart_lines_variant")
                            .from(CartLines::Table, CartLines::VariantId)
                            .to(ProductVariants::Table, ProductVariants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One line per (cart, variant, data); adds merge into it.
        manager
            .create_index(
                Index::create()
                    .name("uq_cart_lines_cart_variant_data")
                    .table(CartLines::Table)
                    .col(CartLines::CartToken)
                    .col(CartLines::VariantId)
                    .col(CartLines::Data)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CartLines::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Carts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Carts {
    Table,
    Token,
    Status,
    UserId,
    CheckoutData,
    Total,
    Quantity,
    CreateTime,
    LastStatusChange,
}

#[derive(DeriveIden)]
pub enum CartLines {
    Table,
    Id,
    CartToken,
    VariantId,
    Quantity,
    Data,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ProductVariants {
    Table,
    Id,
}
