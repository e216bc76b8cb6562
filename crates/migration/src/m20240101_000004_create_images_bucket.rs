use crate::exec_all;
use crate::rls::{PolicyCommand, PolicyRole, RlsPolicy};
use lostfound::config::DEFAULT_IMAGE_BUCKET;
use lostfound::validation::MAX_IMAGE_BYTES;
use sea_orm_migration::prelude::*;

fn policies() -> Vec<RlsPolicy> {
    let in_bucket = format!("bucket_id = '{}'", DEFAULT_IMAGE_BUCKET);
    vec![
        RlsPolicy::new("Item images are public", "objects", PolicyCommand::Select, PolicyRole::Public)
            .in_schema("storage")
            .using(in_bucket.clone()),
        RlsPolicy::new("Signed-in users can upload item images", "objects", PolicyCommand::Insert, PolicyRole::Authenticated)
            .in_schema("storage")
            .with_check(in_bucket.clone()),
        RlsPolicy::new("Uploaders can remove their item images", "objects", PolicyCommand::Delete, PolicyRole::Authenticated)
            .in_schema("storage")
            .using(format!("{} AND owner = auth.uid()", in_bucket)),
    ]
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut statements = vec![format!(
            "INSERT INTO storage.buckets (id, name, public, file_size_limit) \
             VALUES ('{bucket}', '{bucket}', true, {limit}) ON CONFLICT (id) DO NOTHING;",
            bucket = DEFAULT_IMAGE_BUCKET,
            limit = MAX_IMAGE_BYTES
        )];
        statements.extend(policies().iter().map(RlsPolicy::create_sql));
        exec_all(manager, statements).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut statements: Vec<String> = policies().iter().map(RlsPolicy::drop_sql).collect();
        statements.push(format!(
            "DELETE FROM storage.buckets WHERE id = '{}';",
            DEFAULT_IMAGE_BUCKET
        ));
        exec_all(manager, statements).await
    }
}
