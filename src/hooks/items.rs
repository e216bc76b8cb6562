use crate::cache::{CachePolicy, QueryCache, QueryKey};
use crate::error::{Error, Result};
use crate::models::{Item, ItemChanges, ItemType, NewItem};
use crate::remote::{session_user_id, Backend};
use crate::scope::MutationPolicy;
use crate::validation::{Form, ImageUpload, ReportForm};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Object name for an uploaded image: `<unix-millis>-<8 hex>.<ext>`.
pub fn image_file_name(extension: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}.{}", now.timestamp_millis(), &suffix[..8], extension)
}

/// Item queries and mutations
#[derive(Clone)]
pub struct Items {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
}

impl Items {
    pub fn new(backend: Arc<dyn Backend>, cache: QueryCache) -> Self {
        Self { backend, cache }
    }

    /// Items of one type, newest first.
    pub async fn list_by_type(&self, kind: ItemType) -> Result<Vec<Item>> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::items(kind), CachePolicy::UntilInvalidated, || async move {
                backend.list_items(kind).await
            })
            .await
    }

    /// Every item, newest first.
    pub async fn list_all(&self) -> Result<Vec<Item>> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::all_items(), CachePolicy::UntilInvalidated, || async move {
                backend.list_all_items().await
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Item> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::item(id), CachePolicy::UntilInvalidated, || async move {
                backend
                    .get_item(id)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("item {}", id)))
            })
            .await
    }

    /// Inserts as the signed-in user. Never retried.
    #[instrument(skip(self, item), fields(title = %item.title))]
    pub async fn insert(&self, item: NewItem) -> Result<Item> {
        let user_id = self.require_user().await?;
        self.insert_as(user_id, item).await
    }

    async fn require_user(&self) -> Result<Uuid> {
        match self.backend.current_session().await? {
            Some(session) => session_user_id(&session),
            None => Err(Error::auth("You must be signed in to report an item")),
        }
    }

    async fn insert_as(&self, user_id: Uuid, mut item: NewItem) -> Result<Item> {
        item.user_id = Some(user_id);
        let backend = self.backend.clone();
        let inserted = MutationPolicy::INSERT_ITEM
            .run("insert_item", || {
                let backend = backend.clone();
                let item = item.clone();
                async move { backend.insert_item(&item).await }
            })
            .await?;
        info!(id = %inserted.id, kind = %inserted.kind, "item reported");
        // the lost and found lists both go stale, whatever the type
        self.cache.invalidate(&QueryKey::items_tag());
        self.cache.invalidate(&QueryKey::chats());
        Ok(inserted)
    }

    pub async fn update(&self, id: Uuid, changes: ItemChanges) -> Result<Item> {
        let backend = self.backend.clone();
        let updated = MutationPolicy::UPDATE_ITEM
            .run("update_item", || {
                let backend = backend.clone();
                let changes = changes.clone();
                async move { backend.update_item(id, &changes).await }
            })
            .await?;
        self.cache.invalidate(&QueryKey::items_tag());
        self.cache.invalidate(&QueryKey::item(id));
        Ok(updated)
    }

    /// Flips lost and found, reading the current type from the backend.
    pub async fn toggle_type(&self, id: Uuid) -> Result<Item> {
        let current = self
            .backend
            .get_item(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("item {}", id)))?;
        let kind = current.kind.toggled();
        debug!(%id, from = %current.kind, to = %kind, "toggling item type");
        self.update(id, ItemChanges::kind(kind)).await
    }

    /// Removes an item. Only admins pass the row policy.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let backend = self.backend.clone();
        MutationPolicy::DELETE_ITEM
            .run("delete_item", || {
                let backend = backend.clone();
                async move { backend.delete_item(id).await }
            })
            .await?;
        info!(%id, "item deleted");
        self.cache.invalidate(&QueryKey::items_tag());
        self.cache.invalidate(&QueryKey::item(id));
        self.cache.invalidate(&QueryKey::chats());
        Ok(())
    }

    /// Uploads an item photo and returns its public URL. Oversized files are
    /// rejected before anything is sent.
    pub async fn upload_image(&self, image: &ImageUpload) -> Result<String> {
        Ok(self.upload(image).await?.1)
    }

    async fn upload(&self, image: &ImageUpload) -> Result<(String, String)> {
        image.check_size()?;
        let name = image_file_name(&image.extension(), Utc::now());
        let url = self
            .backend
            .upload_object(&name, image.bytes.clone(), &image.content_type)
            .await?;
        debug!(%name, size = image.size(), "image uploaded");
        Ok((name, url))
    }

    /// Validates and files a report, uploading the photo first.
    pub async fn submit_report(
        &self,
        form: &ReportForm,
        image: Option<&ImageUpload>,
    ) -> Result<Item> {
        self.submit_report_on(Local::now().date_naive(), form, image)
            .await
    }

    /// [`Items::submit_report`] with an explicit "today" for the date check.
    pub async fn submit_report_on(
        &self,
        today: NaiveDate,
        form: &ReportForm,
        image: Option<&ImageUpload>,
    ) -> Result<Item> {
        form.validate(today).into_result()?;
        if let Some(image) = image {
            image.check_size()?;
        }

        let user_id = self.require_user().await?;

        let uploaded = match image {
            Some(image) => Some(self.upload(image).await?),
            None => None,
        };
        let image_url = uploaded.as_ref().map(|(_, url)| url.clone());
        let item = form.to_new_item(today, image_url, Some(user_id))?;

        match self.insert_as(user_id, item).await {
            Ok(item) => Ok(item),
            Err(e) => {
                if let Some((name, _)) = uploaded {
                    if let Err(cleanup) = self.backend.remove_object(&name).await {
                        warn!(%name, error = %cleanup, "failed to remove orphaned image");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_file_name_shape() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = image_file_name("jpg", now);
        let (stem, ext) = name.rsplit_once('.').unwrap();
        let (millis, hex) = stem.split_once('-').unwrap();
        assert_eq!(ext, "jpg");
        assert_eq!(millis, "1714557600000");
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_image_file_names_do_not_collide() {
        let now = Utc::now();
        assert_ne!(image_file_name("png", now), image_file_name("png", now));
    }
}
