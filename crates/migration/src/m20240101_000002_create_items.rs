use crate::exec_all;
use crate::rls::{check_in_sql, enable_rls_sql, references_auth_user_sql, PolicyCommand, PolicyRole, RlsPolicy};
use lostfound::models::{Category, ItemType, Location};
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
    Title,
    Description,
    Category,
    Type,
    Location,
    Date,
    ImageUrl,
    ContactName,
    ContactPhone,
    ContactEmail,
    UserId,
    CreatedAt,
}

fn policies() -> Vec<RlsPolicy> {
    vec![
        RlsPolicy::new("Items are viewable by everyone", "items", PolicyCommand::Select, PolicyRole::Public)
            .using("true"),
        RlsPolicy::new("Authenticated users can report items", "items", PolicyCommand::Insert, PolicyRole::Authenticated)
            .with_check("auth.uid() = user_id"),
        RlsPolicy::new("Owners and admins can update items", "items", PolicyCommand::Update, PolicyRole::Authenticated)
            .using("auth.uid() = user_id OR public.is_admin()")
            .with_check("auth.uid() = user_id OR public.is_admin()"),
        RlsPolicy::new("Admins can delete items", "items", PolicyCommand::Delete, PolicyRole::Authenticated)
            .using("public.is_admin()"),
    ]
}

fn not_null_text(column: Items) -> ColumnDef {
    ColumnDef::new(column).text().not_null().to_owned()
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Items::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(not_null_text(Items::Title))
                    .col(not_null_text(Items::Description))
                    .col(not_null_text(Items::Category))
                    .col(not_null_text(Items::Type))
                    .col(not_null_text(Items::Location))
                    .col(ColumnDef::new(Items::Date).date().not_null())
                    .col(ColumnDef::new(Items::ImageUrl).text())
                    .col(not_null_text(Items::ContactName))
                    .col(not_null_text(Items::ContactPhone))
                    .col(ColumnDef::new(Items::ContactEmail).text())
                    .col(ColumnDef::new(Items::UserId).uuid())
                    .col(
                        ColumnDef::new(Items::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("items_type_created_at_idx")
                    .table(Items::Table)
                    .col(Items::Type)
                    .col((Items::CreatedAt, IndexOrder::Desc))
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let kinds: Vec<&str> = ItemType::ALL.iter().map(|k| k.as_str()).collect();
        let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        let locations: Vec<&str> = Location::ALL.iter().map(|l| l.as_str()).collect();
        let mut statements = vec![
            references_auth_user_sql("items", "user_id", "SET NULL"),
            check_in_sql("items", "type", &kinds),
            check_in_sql("items", "category", &categories),
            check_in_sql("items", "location", &locations),
            enable_rls_sql("items"),
        ];
        statements.extend(policies().iter().map(RlsPolicy::create_sql));
        exec_all(manager, statements).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        exec_all(manager, policies().iter().map(RlsPolicy::drop_sql)).await?;
        manager
            .drop_table(Table::drop().table(Items::Table).if_exists().to_owned())
            .await
    }
}
