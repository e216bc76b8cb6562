//! Configuration for the Lost & Found client

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Number the contact actions open a chat with when none is configured.
pub const DEFAULT_ADMIN_WHATSAPP: &str = "6285828237071";

pub const DEFAULT_IMAGE_BUCKET: &str = "images";

/// Tunables shared by every sub-client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Refresh an expired session before verifying it
    pub auto_refresh_token: bool,

    /// Keep the session in the local store across restarts
    pub persist_session: bool,

    pub request_timeout: Option<Duration>,

    /// Bucket item photos are uploaded to
    pub image_bucket: String,

    /// Phone number (international form, no `+`) behind "chat with admin"
    pub admin_whatsapp: String,

    /// JSON file backing the local store; in-memory when `None`
    pub storage_path: Option<PathBuf>,

    pub heartbeat_interval: Duration,

    /// How long a channel join may wait for the server's acknowledgment
    pub join_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            request_timeout: Some(Duration::from_secs(30)),
            image_bucket: DEFAULT_IMAGE_BUCKET.to_string(),
            admin_whatsapp: DEFAULT_ADMIN_WHATSAPP.to_string(),
            storage_path: None,
            heartbeat_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    pub fn with_image_bucket(mut self, value: &str) -> Self {
        self.image_bucket = value.to_string();
        self
    }

    pub fn with_admin_whatsapp(mut self, value: &str) -> Self {
        self.admin_whatsapp = value.to_string();
        self
    }

    pub fn with_storage_path(mut self, value: Option<PathBuf>) -> Self {
        self.storage_path = value;
        self
    }

    pub fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    pub fn with_join_timeout(mut self, value: Duration) -> Self {
        self.join_timeout = value;
        self
    }
}

/// Project endpoint and key plus client options.
#[derive(Debug, Clone)]
pub struct LostFoundConfig {
    pub url: Url,
    pub anon_key: String,
    pub options: ClientOptions,
}

impl LostFoundConfig {
    /// Validates the project URL and key.
    pub fn new(url_str: &str, anon_key: &str) -> Result<Self> {
        let url = Url::parse(url_str)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "project URL must be http or https, got {}",
                url.scheme()
            )));
        }
        if anon_key.trim().is_empty() {
            return Err(Error::Config("anon_key cannot be empty".to_string()));
        }
        Ok(Self {
            url,
            anon_key: anon_key.trim().to_string(),
            options: ClientOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY` (a `.env` file is loaded
    /// first when present) plus the optional `LOSTFOUND_*` overrides.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let url_str = std::env::var("SUPABASE_URL").map_err(|_| {
            Error::Config("SUPABASE_URL environment variable not found".to_string())
        })?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").map_err(|_| {
            Error::Config("SUPABASE_ANON_KEY environment variable not found".to_string())
        })?;

        let mut options = ClientOptions::default();
        if let Ok(number) = std::env::var("LOSTFOUND_ADMIN_WHATSAPP") {
            options = options.with_admin_whatsapp(&number);
        }
        if let Ok(path) = std::env::var("LOSTFOUND_STORAGE_PATH") {
            options = options.with_storage_path(Some(PathBuf::from(path)));
        }
        if let Ok(bucket) = std::env::var("LOSTFOUND_IMAGE_BUCKET") {
            options = options.with_image_bucket(&bucket);
        }

        Ok(Self::new(&url_str, &anon_key)?.with_options(options))
    }

    /// Project ref, i.e. the first label of `<ref>.supabase.co`.
    pub fn project_ref(&self) -> String {
        self.url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or("local")
            .to_string()
    }

    /// Key the session is persisted under, matching the JS client.
    pub fn session_storage_key(&self) -> String {
        format!("sb-{}-auth-token", self.project_ref())
    }

    /// Base URL without a trailing slash, as the sub-clients expect it.
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_valid() {
        let config = LostFoundConfig::new("https://abcdefgh.supabase.co", "anon").unwrap();
        assert_eq!(config.base_url(), "https://abcdefgh.supabase.co");
        assert_eq!(config.project_ref(), "abcdefgh");
        assert_eq!(config.session_storage_key(), "sb-abcdefgh-auth-token");
    }

    #[test]
    fn test_config_rejects_bad_url() {
        assert!(matches!(
            LostFoundConfig::new("not a url", "anon"),
            Err(Error::Url(_))
        ));
        assert!(matches!(
            LostFoundConfig::new("ftp://files.example.com", "anon"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_config_rejects_empty_key() {
        assert!(matches!(
            LostFoundConfig::new("https://abcdefgh.supabase.co", "  "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_options_builder() {
        let options = ClientOptions::default()
            .with_persist_session(false)
            .with_image_bucket("photos")
            .with_join_timeout(Duration::from_secs(2));
        assert!(!options.persist_session);
        assert_eq!(options.image_bucket, "photos");
        assert_eq!(options.join_timeout, Duration::from_secs(2));
        assert_eq!(options.admin_whatsapp, DEFAULT_ADMIN_WHATSAPP);
    }
}
