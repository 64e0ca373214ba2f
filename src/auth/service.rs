//! Credential issuance and session lifecycle orchestration.
//!
//! Every operation runs as an independent unit of work against the
//! shared [`UserStore`]; the service itself holds no mutable state
//! beyond injected configuration. Counter and lock mutations are
//! delegated to the store's conditional updates so concurrent attempts
//! against one account cannot both act on a stale snapshot.

use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::auth::dto::UserSummary;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo_types::{LockState, SessionState, User};
use crate::auth::store::{FailedLogin, NewUser, UserStore};
use crate::auth::tokens::generate_opaque_token;
use crate::config::SecurityConfig;
use crate::error::{AuthError, AuthResult};
use crate::events::{AuditRecord, AuthEvent, EventSender, MailJob, MailTemplate};
use crate::state::AppState;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Input for registration.
#[derive(Debug)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Input for the login flow.
#[derive(Debug)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Successful login result.
#[derive(Debug)]
pub struct LoginOutput {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserSummary,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    keys: JwtKeys,
    security: SecurityConfig,
    events: EventSender,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        keys: JwtKeys,
        security: SecurityConfig,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            keys,
            security,
            events,
        }
    }

    fn audit(&self, event: AuthEvent, email: Option<&str>, success: bool) {
        self.events.audit(AuditRecord {
            event,
            email: email.map(str::to_string),
            success,
            ip: None,
            user_agent: None,
        });
    }

    fn audit_login(&self, event: AuthEvent, email: &str, success: bool, input: &LoginInput) {
        self.events.audit(AuditRecord {
            event,
            email: Some(email.to_string()),
            success,
            ip: input.ip.clone(),
            user_agent: input.user_agent.clone(),
        });
    }

    /// Create a user record with a hashed password and queue the
    /// verification mail. The caller gets a summary, never tokens;
    /// a fresh account still has to log in.
    pub async fn register(&self, input: RegisterInput) -> AuthResult<UserSummary> {
        if self
            .store
            .find_by_email(&input.email)
            .await
            .map_err(AuthError::Store)?
            .is_some()
        {
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = hash_password(&input.password)?;
        let verification_token = generate_opaque_token();
        let user = self
            .store
            .create(NewUser {
                email: input.email,
                name: input.name,
                password_hash,
                verification_token: verification_token.clone(),
            })
            .await
            .map_err(AuthError::Store)?;

        self.events.mail(MailJob {
            to: user.email.clone(),
            template: MailTemplate::VerifyEmail,
            token: verification_token,
        });
        self.audit(AuthEvent::Registered, Some(&user.email), true);
        Ok((&user).into())
    }

    /// Login state machine. Unknown email and wrong password surface
    /// as the same `InvalidCredentials`; only the audit trail keeps
    /// the distinction.
    pub async fn login(&self, input: LoginInput) -> AuthResult<LoginOutput> {
        let Some(user) = self
            .store
            .find_by_email(&input.email)
            .await
            .map_err(AuthError::Store)?
        else {
            self.audit_login(AuthEvent::LoginUnknownEmail, &input.email, false, &input);
            return Err(AuthError::InvalidCredentials);
        };

        let now = OffsetDateTime::now_utc();
        match user.lock_state(now) {
            LockState::LockedUntil(locked_until) => {
                self.audit_login(AuthEvent::LoginLockedOut, &user.email, false, &input);
                return Err(AuthError::AccountLocked { locked_until });
            }
            LockState::Unlocked => {}
        }

        if !verify_password(&input.password, &user.password_hash) {
            let outcome = self
                .store
                .record_failed_login(
                    user.id,
                    self.security.max_failed_logins,
                    self.security.lockout_duration(),
                )
                .await
                .map_err(AuthError::Store)?;
            if let Some(FailedLogin {
                attempts,
                locked_until: Some(_),
            }) = outcome
            {
                warn!(user_id = %user.id, attempts, "account locked after repeated failures");
            }
            self.audit_login(AuthEvent::LoginWrongPassword, &user.email, false, &input);
            return Err(AuthError::InvalidCredentials);
        }

        let (access_token, refresh_token) = self.issue_pair(&user).await?;
        self.audit_login(AuthEvent::LoginSucceeded, &user.email, true, &input);
        Ok(LoginOutput {
            access_token,
            refresh_token,
            user: (&user).into(),
        })
    }

    /// Issue an access/refresh pair and persist the refresh token,
    /// overwriting any prior one: at most one refresh token per user
    /// is ever valid.
    async fn issue_pair(&self, user: &User) -> AuthResult<(String, String)> {
        let access_token = self.keys.sign_access(user.id)?;
        let refresh_token = self.keys.sign_refresh(user.id)?;
        let expires_at = OffsetDateTime::now_utc()
            + TimeDuration::seconds(self.keys.refresh_ttl.as_secs() as i64);

        let updated = self
            .store
            .record_login(user.id, &refresh_token, expires_at)
            .await
            .map_err(AuthError::Store)?;
        if !updated {
            // Lost the race against a concurrent lock transition.
            let locked_until = self
                .store
                .find_by_id(user.id)
                .await
                .map_err(AuthError::Store)?
                .and_then(|u| u.locked_until)
                .unwrap_or_else(OffsetDateTime::now_utc);
            return Err(AuthError::AccountLocked { locked_until });
        }
        Ok((access_token, refresh_token))
    }

    /// Exchange a refresh token for a new access token. The refresh
    /// token itself is not rotated; it stays valid until its own
    /// expiry, the next login, or a logout. Codec rejection, a stored
    /// mismatch and an expired session all collapse into
    /// `InvalidRefresh`.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let Ok(claims) = self.keys.verify_refresh(refresh_token) else {
            self.audit(AuthEvent::RefreshRejected, None, false);
            return Err(AuthError::InvalidRefresh);
        };

        let Some(user) = self
            .store
            .find_by_refresh_token(refresh_token)
            .await
            .map_err(AuthError::Store)?
        else {
            self.audit(AuthEvent::RefreshRejected, None, false);
            return Err(AuthError::InvalidRefresh);
        };

        let now = OffsetDateTime::now_utc();
        let session_ok = user.id == claims.sub
            && matches!(
                user.session_state(),
                SessionState::Active { expires_at, .. } if expires_at > now
            );
        if !session_ok {
            self.audit(AuthEvent::RefreshRejected, Some(&user.email), false);
            return Err(AuthError::InvalidRefresh);
        }

        let access_token = self.keys.sign_access(user.id)?;
        self.audit(AuthEvent::TokenRefreshed, Some(&user.email), true);
        Ok(access_token)
    }

    /// Drop the stored refresh-token pair. A no-op for an already
    /// logged-out (or unknown) user.
    pub async fn logout(&self, user_id: Uuid) -> AuthResult<()> {
        let email = self
            .store
            .find_by_id(user_id)
            .await
            .map_err(AuthError::Store)?
            .map(|u| u.email);
        self.store
            .clear_session(user_id)
            .await
            .map_err(AuthError::Store)?;
        self.audit(AuthEvent::LoggedOut, email.as_deref(), true);
        Ok(())
    }

    /// Generate and queue a fresh verification token. No-op for an
    /// already verified (or missing) account.
    pub async fn request_verification(&self, user_id: Uuid) -> AuthResult<()> {
        let Some(user) = self
            .store
            .find_by_id(user_id)
            .await
            .map_err(AuthError::Store)?
        else {
            return Ok(());
        };
        if user.is_email_verified {
            return Ok(());
        }

        let token = generate_opaque_token();
        self.store
            .set_verification_token(user.id, &token)
            .await
            .map_err(AuthError::Store)?;
        self.events.mail(MailJob {
            to: user.email.clone(),
            template: MailTemplate::VerifyEmail,
            token,
        });
        self.audit(AuthEvent::VerificationSent, Some(&user.email), true);
        Ok(())
    }

    /// Consume a verification token; the consumed token can never be
    /// replayed.
    pub async fn verify_email(&self, token: &str) -> AuthResult<()> {
        match self
            .store
            .consume_verification_token(token)
            .await
            .map_err(AuthError::Store)?
        {
            Some(user) => {
                self.audit(AuthEvent::EmailVerified, Some(&user.email), true);
                Ok(())
            }
            None => {
                self.audit(AuthEvent::VerificationRejected, None, false);
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Always reports success; only mutates (and mails) when the
    /// account exists.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let Some(user) = self
            .store
            .find_by_email(email)
            .await
            .map_err(AuthError::Store)?
        else {
            self.audit(AuthEvent::ResetRequestUnknownEmail, Some(email), false);
            return Ok(());
        };

        let token = generate_opaque_token();
        let expires_at = OffsetDateTime::now_utc() + self.security.reset_token_ttl();
        self.store
            .set_reset_token(user.id, &token, expires_at)
            .await
            .map_err(AuthError::Store)?;
        self.events.mail(MailJob {
            to: user.email.clone(),
            template: MailTemplate::ResetPassword,
            token,
        });
        self.audit(AuthEvent::ResetRequested, Some(&user.email), true);
        Ok(())
    }

    /// Complete a password reset. A successful reset replaces the
    /// hash, consumes the token, zeroes the failed-login counter and
    /// unlocks the account. Unknown and expired tokens get the same
    /// answer.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        match self
            .store
            .find_by_reset_token(token)
            .await
            .map_err(AuthError::Store)?
        {
            None => {
                self.audit(AuthEvent::ResetRejected, None, false);
                return Err(AuthError::InvalidToken);
            }
            Some(user) => {
                let expired = user.reset_token_expires_at.map_or(true, |exp| exp <= now);
                if expired {
                    self.audit(AuthEvent::ResetRejected, Some(&user.email), false);
                    return Err(AuthError::InvalidToken);
                }
            }
        }

        let new_hash = hash_password(new_password)?;
        match self
            .store
            .consume_reset_token(token, &new_hash)
            .await
            .map_err(AuthError::Store)?
        {
            Some(user) => {
                self.audit(AuthEvent::PasswordReset, Some(&user.email), true);
                Ok(())
            }
            // The token expired or was consumed between the read and
            // the conditional update.
            None => {
                self.audit(AuthEvent::ResetRejected, None, false);
                Err(AuthError::InvalidToken)
            }
        }
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            keys: JwtKeys::from_config(&state.config.jwt),
            security: state.config.security.clone(),
            events: state.events.clone(),
        }
    }
}
