use crate::exec_all;
use crate::rls::{check_in_sql, enable_rls_sql, PolicyCommand, PolicyRole, RlsPolicy};
use lostfound::models::Role;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    ItemId,
    Sender,
    Text,
    ClientId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
}

fn policies() -> Vec<RlsPolicy> {
    vec![
        RlsPolicy::new("Signed-in users can read messages", "messages", PolicyCommand::Select, PolicyRole::Authenticated)
            .using("true"),
        // only admins may speak as admin
        RlsPolicy::new("Signed-in users can send messages", "messages", PolicyCommand::Insert, PolicyRole::Authenticated)
            .with_check("sender = 'user' OR public.is_admin()"),
    ]
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(ColumnDef::new(Messages::ItemId).uuid().not_null())
                    .col(ColumnDef::new(Messages::Sender).text().not_null())
                    .col(ColumnDef::new(Messages::Text).text().not_null())
                    .col(ColumnDef::new(Messages::ClientId).uuid().unique_key())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("messages_item_id_fkey")
                            .from(Messages::Table, Messages::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("messages_item_id_created_at_idx")
                    .table(Messages::Table)
                    .col(Messages::ItemId)
                    .col(Messages::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let roles: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
        let mut statements = vec![
            check_in_sql("messages", "sender", &roles),
            enable_rls_sql("messages"),
        ];
        statements.extend(policies().iter().map(RlsPolicy::create_sql));
        exec_all(manager, statements).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        exec_all(manager, policies().iter().map(RlsPolicy::drop_sql)).await?;
        manager
            .drop_table(Table::drop().table(Messages::Table).if_exists().to_owned())
            .await
    }
}
