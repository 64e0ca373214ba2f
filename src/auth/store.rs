//! User record store.
//!
//! [`UserStore`] is the persistence contract of the credential
//! subsystem. [`PgUserStore`] is the Postgres implementation;
//! [`MemoryStore`] backs `AppState::fake()` and the service-level
//! tests.
//!
//! Every mutation that participates in the lockout state machine is a
//! single conditional statement, so concurrent operations on the same
//! user id cannot both act on a pre-update snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sqlx::postgres::types::PgInterval;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::repo_types::{LockState, Role, User};

/// Fields required to create a user record.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub verification_token: String,
}

/// Result of a failed-login increment: the post-increment counter and
/// the lock timestamp, if this attempt tripped the threshold.
#[derive(Debug, Clone, Copy)]
pub struct FailedLogin {
    pub attempts: i32,
    pub locked_until: Option<OffsetDateTime>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_refresh_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>>;

    async fn create(&self, new: NewUser) -> anyhow::Result<User>;

    /// Atomically increment the failed-login counter of a non-locked
    /// record, locking it for `lock_for` when the counter reaches
    /// `max_attempts`. Returns `None` when the record is absent or
    /// already locked; in that case nothing was mutated.
    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_for: Duration,
    ) -> anyhow::Result<Option<FailedLogin>>;

    /// Atomically apply a successful login to a non-locked record:
    /// reset the counter, stamp `last_login_at`, and overwrite the
    /// refresh-token pair. Returns `false` when the record is absent
    /// or was locked concurrently.
    async fn record_login(
        &self,
        id: Uuid,
        refresh_token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    /// Clear the refresh-token pair. Idempotent.
    async fn clear_session(&self, id: Uuid) -> anyhow::Result<()>;

    async fn set_verification_token(&self, id: Uuid, token: &str) -> anyhow::Result<()>;

    /// Mark the email verified and clear the token in one statement.
    /// Returns the updated record, or `None` when no record carries
    /// this token.
    async fn consume_verification_token(&self, token: &str) -> anyhow::Result<Option<User>>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Apply a password reset in one statement: replace the hash, clear
    /// both reset fields, zero the failed-login counter and clear the
    /// lock. Only matches an unexpired token; returns the updated
    /// record, or `None` for unknown/expired tokens.
    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str = "id, email, name, password_hash, role, failed_login_attempts, \
     locked_until, refresh_token, refresh_token_expires_at, verification_token, \
     is_email_verified, reset_password_token, reset_token_expires_at, last_login_at, created_at";

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_by_column(&self, column: &str, value: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.find_by_column("email", email).await
    }

    async fn find_by_refresh_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.find_by_column("refresh_token", token).await
    }

    async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.find_by_column("reset_password_token", token).await
    }

    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.find_by_column("verification_token", token).await
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            "INSERT INTO users (email, name, password_hash, verification_token) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .bind(&new.verification_token)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_for: Duration,
    ) -> anyhow::Result<Option<FailedLogin>> {
        let interval = PgInterval {
            months: 0,
            days: 0,
            microseconds: lock_for.whole_microseconds() as i64,
        };
        let row = sqlx::query_as::<_, (i32, Option<OffsetDateTime>)>(
            r#"
            UPDATE users
               SET failed_login_attempts = failed_login_attempts + 1,
                   locked_until = CASE
                       WHEN failed_login_attempts + 1 >= $2 THEN now() + $3
                       ELSE locked_until
                   END
             WHERE id = $1
               AND (locked_until IS NULL OR locked_until <= now())
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .bind(interval)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(attempts, locked_until)| FailedLogin {
            attempts,
            locked_until,
        }))
    }

    async fn record_login(
        &self,
        id: Uuid,
        refresh_token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
               SET failed_login_attempts = 0,
                   last_login_at = now(),
                   refresh_token = $2,
                   refresh_token_expires_at = $3
             WHERE id = $1
               AND (locked_until IS NULL OR locked_until <= now())
            "#,
        )
        .bind(id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_session(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_verification_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET verification_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
                SET is_email_verified = TRUE, verification_token = NULL \
              WHERE verification_token = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET reset_password_token = $2, reset_token_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
                SET password_hash = $2, \
                    reset_password_token = NULL, \
                    reset_token_expires_at = NULL, \
                    failed_login_attempts = 0, \
                    locked_until = NULL \
              WHERE reset_password_token = $1 \
                AND reset_token_expires_at > now() \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .bind(new_password_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

/// In-memory store with the same per-record atomicity guarantees as
/// [`PgUserStore`] (one mutex acquisition per mutation). Used by
/// `AppState::fake()` and by tests that exercise the service without a
/// database.
#[derive(Default, Clone)]
pub struct MemoryStore {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().expect("user store mutex poisoned")
    }

    /// Directly edit a record. Test support: simulating elapsed time
    /// means rewinding `locked_until` or `reset_token_expires_at` here.
    pub fn modify<F: FnOnce(&mut User)>(&self, id: Uuid, f: F) {
        if let Some(user) = self.guard().get_mut(&id) {
            f(user);
        }
    }

    fn find_where<F: Fn(&User) -> bool>(&self, f: F) -> Option<User> {
        self.guard().values().find(|u| f(u)).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.guard().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.find_where(|u| u.email == email))
    }

    async fn find_by_refresh_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.find_where(|u| u.refresh_token.as_deref() == Some(token)))
    }

    async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.find_where(|u| u.reset_password_token.as_deref() == Some(token)))
    }

    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.find_where(|u| u.verification_token.as_deref() == Some(token)))
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let mut users = self.guard();
        if users.values().any(|u| u.email == new.email) {
            anyhow::bail!("duplicate email: {}", new.email);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            role: Role::User,
            failed_login_attempts: 0,
            locked_until: None,
            refresh_token: None,
            refresh_token_expires_at: None,
            verification_token: Some(new.verification_token),
            is_email_verified: false,
            reset_password_token: None,
            reset_token_expires_at: None,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_for: Duration,
    ) -> anyhow::Result<Option<FailedLogin>> {
        let now = OffsetDateTime::now_utc();
        let mut users = self.guard();
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let LockState::LockedUntil(_) = user.lock_state(now) {
            return Ok(None);
        }
        user.failed_login_attempts += 1;
        if user.failed_login_attempts >= max_attempts {
            user.locked_until = Some(now + lock_for);
        }
        Ok(Some(FailedLogin {
            attempts: user.failed_login_attempts,
            locked_until: user.locked_until,
        }))
    }

    async fn record_login(
        &self,
        id: Uuid,
        refresh_token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut users = self.guard();
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        if let LockState::LockedUntil(_) = user.lock_state(now) {
            return Ok(false);
        }
        user.failed_login_attempts = 0;
        user.last_login_at = Some(now);
        user.refresh_token = Some(refresh_token.to_string());
        user.refresh_token_expires_at = Some(expires_at);
        Ok(true)
    }

    async fn clear_session(&self, id: Uuid) -> anyhow::Result<()> {
        if let Some(user) = self.guard().get_mut(&id) {
            user.refresh_token = None;
            user.refresh_token_expires_at = None;
        }
        Ok(())
    }

    async fn set_verification_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
        if let Some(user) = self.guard().get_mut(&id) {
            user.verification_token = Some(token.to_string());
        }
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let mut users = self.guard();
        let user = users
            .values_mut()
            .find(|u| u.verification_token.as_deref() == Some(token));
        Ok(user.map(|u| {
            u.is_email_verified = true;
            u.verification_token = None;
            u.clone()
        }))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(user) = self.guard().get_mut(&id) {
            user.reset_password_token = Some(token.to_string());
            user.reset_token_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let now = OffsetDateTime::now_utc();
        let mut users = self.guard();
        let user = users.values_mut().find(|u| {
            u.reset_password_token.as_deref() == Some(token)
                && u.reset_token_expires_at.map_or(false, |exp| exp > now)
        });
        Ok(user.map(|u| {
            u.password_hash = new_password_hash.to_string();
            u.reset_password_token = None;
            u.reset_token_expires_at = None;
            u.failed_login_attempts = 0;
            u.locked_until = None;
            u.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(store: &MemoryStore) -> User {
        store
            .create(NewUser {
                email: "a@x.com".into(),
                name: "A".into(),
                password_hash: "hash".into(),
                verification_token: "vtok".into(),
            })
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn failed_login_locks_at_threshold_and_then_stops_counting() {
        let store = MemoryStore::new();
        let user = seeded(&store).await;

        let first = store
            .record_failed_login(user.id, 2, Duration::minutes(15))
            .await
            .expect("store")
            .expect("not locked yet");
        assert_eq!(first.attempts, 1);
        assert!(first.locked_until.is_none());

        let second = store
            .record_failed_login(user.id, 2, Duration::minutes(15))
            .await
            .expect("store")
            .expect("not locked yet");
        assert_eq!(second.attempts, 2);
        assert!(second.locked_until.is_some());

        // Locked record: no further mutation.
        let third = store
            .record_failed_login(user.id, 2, Duration::minutes(15))
            .await
            .expect("store");
        assert!(third.is_none());
        let current = store.find_by_id(user.id).await.expect("store").expect("found");
        assert_eq!(current.failed_login_attempts, 2);
    }

    #[tokio::test]
    async fn record_login_refuses_locked_record() {
        let store = MemoryStore::new();
        let user = seeded(&store).await;
        store.modify(user.id, |u| {
            u.locked_until = Some(OffsetDateTime::now_utc() + Duration::minutes(5));
        });
        let updated = store
            .record_login(user.id, "tok", OffsetDateTime::now_utc() + Duration::days(7))
            .await
            .expect("store");
        assert!(!updated);
    }

    #[tokio::test]
    async fn consume_reset_token_requires_unexpired_token() {
        let store = MemoryStore::new();
        let user = seeded(&store).await;
        store
            .set_reset_token(
                user.id,
                "rtok",
                OffsetDateTime::now_utc() - Duration::minutes(1),
            )
            .await
            .expect("store");
        let consumed = store
            .consume_reset_token("rtok", "newhash")
            .await
            .expect("store");
        assert!(consumed.is_none());
        // The token value still matches a record; only the expiry failed.
        assert!(store
            .find_by_reset_token("rtok")
            .await
            .expect("store")
            .is_some());
    }

    #[tokio::test]
    async fn consume_verification_token_is_single_use() {
        let store = MemoryStore::new();
        let _user = seeded(&store).await;
        let consumed = store
            .consume_verification_token("vtok")
            .await
            .expect("store")
            .expect("first use succeeds");
        assert!(consumed.is_email_verified);
        assert!(consumed.verification_token.is_none());
        assert!(store
            .consume_verification_token("vtok")
            .await
            .expect("store")
            .is_none());
    }
}
