use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// User record in the database, the aggregate root of the credential
/// subsystem. Never hard-deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub failed_login_attempts: i32,
    pub locked_until: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub is_email_verified: bool,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Lock state as the login state machine sees it. A `locked_until` in
/// the past is never cleared in storage; it is reinterpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockedUntil(OffsetDateTime),
}

/// Session state derived from the refresh-token pair. A half-written
/// pair counts as logged out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState<'a> {
    NoSession,
    Active {
        token: &'a str,
        expires_at: OffsetDateTime,
    },
}

impl User {
    pub fn lock_state(&self, now: OffsetDateTime) -> LockState {
        match self.locked_until {
            Some(until) if until > now => LockState::LockedUntil(until),
            _ => LockState::Unlocked,
        }
    }

    pub fn session_state(&self) -> SessionState<'_> {
        match (self.refresh_token.as_deref(), self.refresh_token_expires_at) {
            (Some(token), Some(expires_at)) => SessionState::Active { token, expires_at },
            _ => SessionState::NoSession,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            name: "A".into(),
            password_hash: "hash".into(),
            role: Role::User,
            failed_login_attempts: 0,
            locked_until: None,
            refresh_token: None,
            refresh_token_expires_at: None,
            verification_token: None,
            is_email_verified: false,
            reset_password_token: None,
            reset_token_expires_at: None,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn stale_lock_reads_as_unlocked() {
        let now = OffsetDateTime::now_utc();
        let mut u = user();
        u.locked_until = Some(now - Duration::seconds(1));
        assert_eq!(u.lock_state(now), LockState::Unlocked);

        u.locked_until = Some(now + Duration::minutes(5));
        assert!(matches!(u.lock_state(now), LockState::LockedUntil(_)));
    }

    #[test]
    fn half_written_session_is_no_session() {
        let mut u = user();
        u.refresh_token = Some("tok".into());
        assert_eq!(u.session_state(), SessionState::NoSession);

        u.refresh_token_expires_at = Some(OffsetDateTime::now_utc());
        assert!(matches!(u.session_state(), SessionState::Active { .. }));
    }
}
