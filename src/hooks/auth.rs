use crate::cache::{CachePolicy, QueryCache, QueryKey};
use crate::error::{Error, Result};
use crate::models::{NewProfile, Profile, Role};
use crate::remote::{session_user_id, Backend};
use crate::scope::MutationPolicy;
use crate::validation::{Form, LoginForm, RegisterForm};
use chrono::Local;
use lostfound_auth::Session;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Who is looking at the app right now.
///
/// `is_admin` only decides what the UI shows; the row policies are what
/// actually keep non-admins out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Viewer {
    pub session: Option<Session>,
    pub profile: Option<Profile>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.profile.as_ref().map_or(false, Profile::is_admin)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.session
            .as_ref()
            .and_then(|s| Uuid::parse_str(&s.user.id).ok())
    }

    /// Role chat messages are sent under.
    pub fn role(&self) -> Role {
        if self.is_admin() {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.user.email.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user_id: Uuid,
    /// `None` while the profile waits for the first sign-in, as when the
    /// provider holds the account until the email is confirmed
    pub profile: Option<Profile>,
    /// Whether the follow-up sign-in produced a session
    pub signed_in: bool,
}

/// Session, sign-in/up/out and profile hooks
#[derive(Clone)]
pub struct AuthHooks {
    backend: Arc<dyn Backend>,
    cache: QueryCache,
}

impl AuthHooks {
    pub fn new(backend: Arc<dyn Backend>, cache: QueryCache) -> Self {
        Self { backend, cache }
    }

    /// Current session, re-verified with the provider on every call.
    pub async fn session(&self) -> Result<Option<Session>> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::session(), CachePolicy::AlwaysRefetch, || async move {
                backend.current_session().await
            })
            .await
    }

    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn sign_in(&self, form: &LoginForm) -> Result<Session> {
        form.validate(Local::now().date_naive()).into_result()?;
        let session = self
            .backend
            .sign_in(form.email.trim(), &form.password)
            .await?;
        if let Err(e) = self.ensure_profile(&session).await {
            warn!(error = %e, "could not create the missing profile");
        }
        self.cache.invalidate(&QueryKey::session());
        self.cache.invalidate(&QueryKey::new(["profile"]));
        Ok(session)
    }

    /// Creates the identity and its profile, then signs in with the same
    /// credentials. Once the identity exists the call succeeds: a failed
    /// sign-in is tolerated, and a profile the row policy refused before any
    /// session existed is left to the next [`AuthHooks::sign_in`].
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn sign_up(&self, form: &RegisterForm) -> Result<SignUpOutcome> {
        form.validate(Local::now().date_naive()).into_result()?;
        let email = form.email.trim();
        let full_name = form.full_name.trim();

        let response = self
            .backend
            .sign_up(email, &form.password, full_name)
            .await?;
        let user_id = Uuid::parse_str(&response.user.id)
            .map_err(|e| Error::remote(format!("provider returned an invalid user id: {}", e)))?;

        let new_profile = NewProfile {
            id: user_id,
            email: email.to_string(),
            full_name: full_name.to_string(),
            role: Role::User,
        };
        let first_attempt = self.backend.insert_profile(&new_profile).await;

        let signed_in = match self.backend.sign_in(email, &form.password).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "automatic sign-in after sign-up failed");
                false
            }
        };

        let profile = match first_attempt {
            Ok(profile) => Some(profile),
            // without a session yet the row policy rejects the insert
            Err(Error::Forbidden(_)) | Err(Error::Auth(_)) if signed_in => {
                Some(self.backend.insert_profile(&new_profile).await?)
            }
            Err(e) => {
                warn!(%user_id, error = %e, "profile deferred until first sign-in");
                None
            }
        };

        info!(%user_id, signed_in, profile_pending = profile.is_none(), "account created");
        self.cache.invalidate(&QueryKey::session());
        self.cache.invalidate(&QueryKey::profiles());
        Ok(SignUpOutcome {
            user_id,
            profile,
            signed_in,
        })
    }

    /// Inserts the signed-in user's profile when sign-up could not.
    async fn ensure_profile(&self, session: &Session) -> Result<()> {
        let user_id = session_user_id(session)?;
        if self.backend.get_profile(user_id).await?.is_some() {
            return Ok(());
        }
        let email = session.user.email.clone().unwrap_or_default();
        let full_name = session
            .user
            .user_metadata
            .get("full_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let new_profile = NewProfile {
            id: user_id,
            email,
            full_name,
            role: Role::User,
        };
        self.backend.insert_profile(&new_profile).await?;
        info!(%user_id, "pending profile created");
        self.cache.invalidate(&QueryKey::profiles());
        Ok(())
    }

    /// Signs out and purges every cached query. The local session is gone
    /// even when the provider call fails; that failure is returned after.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.backend.sign_out().await;
        self.cache.clear();
        if let Err(e) = &result {
            warn!(error = %e, "provider sign-out failed, local session cleared anyway");
        }
        result
    }

    pub async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::profile(id), CachePolicy::UntilInvalidated, || async move {
                backend.get_profile(id).await
            })
            .await
    }

    /// Session plus the profile behind it.
    pub async fn viewer(&self) -> Result<Viewer> {
        let session = match self.session().await? {
            Some(session) => session,
            None => return Ok(Viewer::anonymous()),
        };
        let user_id = session_user_id(&session)?;
        let profile = self.profile(user_id).await?;
        Ok(Viewer {
            session: Some(session),
            profile,
        })
    }

    /// Every profile; readable by admins only.
    pub async fn profiles(&self) -> Result<Vec<Profile>> {
        let backend = self.backend.clone();
        self.cache
            .fetch(QueryKey::profiles(), CachePolicy::UntilInvalidated, || async move {
                backend.list_profiles().await
            })
            .await
    }

    /// Admin action: changes a user's role.
    pub async fn set_role(&self, id: Uuid, role: Role) -> Result<Profile> {
        if !self.viewer().await?.is_admin() {
            return Err(Error::forbidden("Only admins can change roles"));
        }
        let backend = self.backend.clone();
        let profile = MutationPolicy::UPDATE_PROFILE
            .run("update_profile_role", || {
                let backend = backend.clone();
                async move { backend.update_profile_role(id, role).await }
            })
            .await?;
        info!(%id, %role, "role changed");
        self.cache.invalidate(&QueryKey::profiles());
        self.cache.invalidate(&QueryKey::profile(id));
        Ok(profile)
    }
}
