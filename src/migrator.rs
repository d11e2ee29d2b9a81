use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_material_tables::Migration),
            Box::new(m20240101_000002_create_request_tables::Migration),
            Box::new(m20240101_000003_create_stock_movements_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_material_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_material_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Four parallel stock stores, one per material category. Each
            // carries its own stock column name; ledger code dispatches
            // through MaterialCategory rather than repeating per table.
            for (table, stock_column) in [
                ("liquid_materials", "available_milliliters"),
                ("solid_materials", "available_grams"),
                ("equipment", "units_on_hand"),
                ("lab_items", "stock_count"),
            ] {
                manager
                    .create_table(
                        Table::create()
                            .table(Alias::new(table))
                            .if_not_exists()
                            .col(
                                ColumnDef::new(Alias::new("id"))
                                    .big_integer()
                                    .not_null()
                                    .auto_increment()
                                    .primary_key(),
                            )
                            .col(ColumnDef::new(Alias::new("name")).string().not_null())
                            .col(
                                ColumnDef::new(Alias::new(stock_column))
                                    .integer()
                                    .not_null()
                                    .default(0),
                            )
                            .col(ColumnDef::new(Alias::new("unit")).string().not_null())
                            .to_owned(),
                    )
                    .await?;
            }
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for table in ["liquid_materials", "solid_materials", "equipment", "lab_items"] {
                manager
                    .drop_table(Table::drop().table(Alias::new(table)).to_owned())
                    .await?;
            }
            Ok(())
        }
    }
}

mod m20240101_000002_create_request_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_request_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LoanRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LoanRequests::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(LoanRequests::Folio)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(LoanRequests::RequesterId).uuid().not_null())
                        .col(ColumnDef::new(LoanRequests::ApproverId).uuid())
                        .col(ColumnDef::new(LoanRequests::Status).string().not_null())
                        .col(
                            ColumnDef::new(LoanRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LoanRequests::PickupDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LoanRequests::ReturnDueDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LoanRequests::DeliveredAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_loan_requests_status")
                        .table(LoanRequests::Table)
                        .col(LoanRequests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RequestLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequestLines::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RequestLines::RequestId).uuid().not_null())
                        .col(
                            ColumnDef::new(RequestLines::MaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestLines::Category).string().not_null())
                        .col(
                            ColumnDef::new(RequestLines::RequestedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestLines::DeliveredQuantity).integer())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_request_lines_request")
                                .from(RequestLines::Table, RequestLines::RequestId)
                                .to(LoanRequests::Table, LoanRequests::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DebtEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DebtEntries::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(DebtEntries::RequestId).uuid().not_null())
                        .col(ColumnDef::new(DebtEntries::RequestLineId).uuid().not_null())
                        .col(ColumnDef::new(DebtEntries::RequesterId).uuid().not_null())
                        .col(
                            ColumnDef::new(DebtEntries::MaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DebtEntries::Category).string().not_null())
                        .col(
                            ColumnDef::new(DebtEntries::PendingQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DebtEntries::DueDate).timestamp_with_time_zone().not_null())
                        .col(
                            ColumnDef::new(DebtEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_debt_entries_requester")
                        .table(DebtEntries::Table)
                        .col(DebtEntries::RequesterId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DebtEntries::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RequestLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(LoanRequests::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum LoanRequests {
        Table,
        Id,
        Folio,
        RequesterId,
        ApproverId,
        Status,
        CreatedAt,
        PickupDate,
        ReturnDueDate,
        DeliveredAt,
    }

    #[derive(Iden)]
    enum RequestLines {
        Table,
        Id,
        RequestId,
        MaterialId,
        Category,
        RequestedQuantity,
        DeliveredQuantity,
    }

    #[derive(Iden)]
    enum DebtEntries {
        Table,
        Id,
        RequestId,
        RequestLineId,
        RequesterId,
        MaterialId,
        Category,
        PendingQuantity,
        DueDate,
        CreatedAt,
    }
}

mod m20240101_000003_create_stock_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Category).string().not_null())
                        .col(ColumnDef::new(StockMovements::Delta).integer().not_null())
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ActorId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_movements_material")
                        .table(StockMovements::Table)
                        .col(StockMovements::Category)
                        .col(StockMovements::MaterialId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await?;
            Ok(())
        }
    }

    #[derive(Iden)]
    enum StockMovements {
        Table,
        Id,
        MaterialId,
        Category,
        Delta,
        MovementType,
        ActorId,
        OccurredAt,
    }
}
