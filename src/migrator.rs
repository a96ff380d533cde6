use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_offers_table::Migration),
            Box::new(m20250301_000002_create_product_variants_table::Migration),
            Box::new(m20250301_000003_create_short_links_table::Migration),
            Box::new(m20250301_000004_create_checkout_sessions_table::Migration),
            Box::new(m20250301_000005_create_inventory_reservations_table::Migration),
            Box::new(m20250301_000006_create_orders_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_offers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_offers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Offers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Offers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Offers::CreatorId).uuid().not_null())
                        .col(ColumnDef::new(Offers::Name).string().not_null())
                        .col(ColumnDef::new(Offers::Description).string().null())
                        .col(ColumnDef::new(Offers::DiscountKind).string().not_null())
                        .col(ColumnDef::new(Offers::DiscountValue).decimal().not_null())
                        .col(ColumnDef::new(Offers::Status).string().not_null())
                        .col(
                            ColumnDef::new(Offers::StartsAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Offers::EndsAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Offers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Offers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Useful indexes
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_offers_creator_id")
                        .table(Offers::Table)
                        .col(Offers::CreatorId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_offers_status")
                        .table(Offers::Table)
                        .col(Offers::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Offers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Offers {
        Table,
        Id,
        CreatorId,
        Name,
        Description,
        DiscountKind,
        DiscountValue,
        Status,
        StartsAt,
        EndsAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_product_variants_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::OfferId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::ExternalId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::Sku).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Name).string().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::UnitPrice)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Currency)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::InventoryQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Position)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_offer_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::OfferId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductVariants {
        Table,
        Id,
        OfferId,
        ExternalId,
        Sku,
        Name,
        UnitPrice,
        Currency,
        InventoryQuantity,
        Position,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_short_links_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_short_links_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ShortLinks::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShortLinks::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShortLinks::Code).string().not_null())
                        .col(ColumnDef::new(ShortLinks::OfferId).uuid().not_null())
                        .col(ColumnDef::new(ShortLinks::CreatorId).uuid().not_null())
                        .col(
                            ColumnDef::new(ShortLinks::Revoked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ShortLinks::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ShortLinks::MaxClicks).integer().null())
                        .col(
                            ColumnDef::new(ShortLinks::ClickCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ShortLinks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShortLinks::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Codes are the public addressing surface, one row per code.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uniq_short_links_code")
                        .table(ShortLinks::Table)
                        .col(ShortLinks::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_short_links_offer_id")
                        .table(ShortLinks::Table)
                        .col(ShortLinks::OfferId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShortLinks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ShortLinks {
        Table,
        Id,
        Code,
        OfferId,
        CreatorId,
        Revoked,
        ExpiresAt,
        MaxClicks,
        ClickCount,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000004_create_checkout_sessions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_checkout_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutSessions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::IdempotencyKey)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::ShortLinkId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::OfferId).uuid().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::VariantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::VisitorId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::Status).string().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UnitPrice)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::DiscountedUnitPrice)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::Subtotal)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::DiscountTotal)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::Total)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::Currency)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::ExternalCheckoutUrl)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Uniqueness covers live sessions only: once a session reaches a
            // terminal status its key frees up for a brand-new attempt.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uniq_checkout_sessions_live_idempotency_key")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::IdempotencyKey)
                        .unique()
                        .and_where(
                            Expr::col(CheckoutSessions::Status).is_in(["pending", "redirected"]),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_sessions_short_link_id")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::ShortLinkId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum CheckoutSessions {
        Table,
        Id,
        IdempotencyKey,
        ShortLinkId,
        OfferId,
        VariantId,
        VisitorId,
        Status,
        Quantity,
        UnitPrice,
        DiscountedUnitPrice,
        Subtotal,
        DiscountTotal,
        Total,
        Currency,
        ExternalCheckoutUrl,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
    }
}

mod m20250301_000005_create_inventory_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000005_create_inventory_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::CheckoutSessionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::VariantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The sweeper scans by (status, expires_at) every tick.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_reservations_status_expires_at")
                        .table(InventoryReservations::Table)
                        .col(InventoryReservations::Status)
                        .col(InventoryReservations::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_reservations_session_id")
                        .table(InventoryReservations::Table)
                        .col(InventoryReservations::CheckoutSessionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_reservations_variant_id")
                        .table(InventoryReservations::Table)
                        .col(InventoryReservations::VariantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryReservations {
        Table,
        Id,
        CheckoutSessionId,
        VariantId,
        Quantity,
        Status,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000006_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000006_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::ConnectionId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ExternalOrderId).string().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::Total).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Currency).string().not_null())
                        .col(ColumnDef::new(Orders::CheckoutSessionId).uuid().null())
                        .col(ColumnDef::new(Orders::ShortLinkId).uuid().null())
                        .col(ColumnDef::new(Orders::Note).string().null())
                        .col(ColumnDef::new(Orders::LineItems).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Natural key of an external order notification. Redelivered
            // webhooks collapse onto the row the first delivery created.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uniq_orders_connection_external_order")
                        .table(Orders::Table)
                        .col(Orders::ConnectionId)
                        .col(Orders::ExternalOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_checkout_session_id")
                        .table(Orders::Table)
                        .col(Orders::CheckoutSessionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_short_link_id")
                        .table(Orders::Table)
                        .col(Orders::ShortLinkId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        ConnectionId,
        ExternalOrderId,
        OrderNumber,
        Total,
        Currency,
        CheckoutSessionId,
        ShortLinkId,
        Note,
        LineItems,
        CreatedAt,
        UpdatedAt,
    }
}
