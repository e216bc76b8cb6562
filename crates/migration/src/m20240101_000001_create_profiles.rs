use crate::exec_all;
use crate::rls::{check_in_sql, enable_rls_sql, references_auth_user_sql, PolicyCommand, PolicyRole, RlsPolicy};
use lostfound::models::Role;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Profiles {
    Table,
    Id,
    Email,
    FullName,
    Role,
    CreatedAt,
}

const IS_ADMIN_FN: &str = "CREATE OR REPLACE FUNCTION public.is_admin() RETURNS boolean \
    LANGUAGE sql STABLE SECURITY DEFINER SET search_path = public AS $$ \
    SELECT EXISTS (SELECT 1 FROM public.profiles WHERE id = auth.uid() AND role = 'admin') $$;";

fn policies() -> Vec<RlsPolicy> {
    vec![
        RlsPolicy::new("Profiles are readable by self or admin", "profiles", PolicyCommand::Select, PolicyRole::Authenticated)
            .using("auth.uid() = id OR public.is_admin()"),
        RlsPolicy::new("Users can create their own profile", "profiles", PolicyCommand::Insert, PolicyRole::Authenticated)
            .with_check("auth.uid() = id AND role = 'user'"),
        RlsPolicy::new("Admins can change roles", "profiles", PolicyCommand::Update, PolicyRole::Authenticated)
            .using("public.is_admin()")
            .with_check("public.is_admin()"),
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
                    .table(Profiles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Profiles::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Profiles::Email).text())
                    .col(ColumnDef::new(Profiles::FullName).text())
                    .col(
                        ColumnDef::new(Profiles::Role)
                            .text()
                            .not_null()
                            .default(Role::User.as_str()),
                    )
                    .col(
                        ColumnDef::new(Profiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        let roles: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
        let mut statements = vec![
            references_auth_user_sql("profiles", "id", "CASCADE"),
            check_in_sql("profiles", "role", &roles),
            IS_ADMIN_FN.to_string(),
            enable_rls_sql("profiles"),
        ];
        statements.extend(policies().iter().map(RlsPolicy::create_sql));
        exec_all(manager, statements).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        exec_all(manager, policies().iter().map(RlsPolicy::drop_sql)).await?;
        manager
            .drop_table(Table::drop().table(Profiles::Table).if_exists().to_owned())
            .await?;
        exec_all(manager, ["DROP FUNCTION IF EXISTS public.is_admin();"]).await
    }
}
