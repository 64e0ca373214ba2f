use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub stage: String,
    pub education: Option<serde_json::Value>,
    pub experience: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct NewCandidate {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub education: Option<serde_json::Value>,
    pub experience: Option<serde_json::Value>,
    pub notes: Option<String>,
}

const COLUMNS: &str = "id, owner_id, full_name, email, phone, headline, stage, \
     education, experience, notes, created_at, updated_at";

pub async fn list_by_owner(
    db: &PgPool,
    owner_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Candidate>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM candidates \
          WHERE owner_id = $1 \
          ORDER BY created_at DESC \
          LIMIT $2 OFFSET $3"
    );
    let rows = sqlx::query_as::<_, Candidate>(&sql)
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn get(db: &PgPool, owner_id: Uuid, id: Uuid) -> anyhow::Result<Option<Candidate>> {
    let sql = format!("SELECT {COLUMNS} FROM candidates WHERE id = $1 AND owner_id = $2");
    let candidate = sqlx::query_as::<_, Candidate>(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(db)
        .await?;
    Ok(candidate)
}

pub async fn create(db: &PgPool, owner_id: Uuid, new: NewCandidate) -> anyhow::Result<Candidate> {
    let sql = format!(
        "INSERT INTO candidates \
             (owner_id, full_name, email, phone, headline, education, experience, notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {COLUMNS}"
    );
    let candidate = sqlx::query_as::<_, Candidate>(&sql)
        .bind(owner_id)
        .bind(&new.full_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.headline)
        .bind(&new.education)
        .bind(&new.experience)
        .bind(&new.notes)
        .fetch_one(db)
        .await?;
    Ok(candidate)
}

/// Field-wise patch; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct CandidateChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub stage: Option<String>,
    pub education: Option<serde_json::Value>,
    pub experience: Option<serde_json::Value>,
    pub notes: Option<String>,
}

pub async fn update(
    db: &PgPool,
    owner_id: Uuid,
    id: Uuid,
    changes: CandidateChanges,
) -> anyhow::Result<Option<Candidate>> {
    let sql = format!(
        "UPDATE candidates SET \
             full_name = COALESCE($3, full_name), \
             email = COALESCE($4, email), \
             phone = COALESCE($5, phone), \
             headline = COALESCE($6, headline), \
             stage = COALESCE($7, stage), \
             education = COALESCE($8, education), \
             experience = COALESCE($9, experience), \
             notes = COALESCE($10, notes), \
             updated_at = now() \
          WHERE id = $1 AND owner_id = $2 \
          RETURNING {COLUMNS}"
    );
    let candidate = sqlx::query_as::<_, Candidate>(&sql)
        .bind(id)
        .bind(owner_id)
        .bind(&changes.full_name)
        .bind(&changes.email)
        .bind(&changes.phone)
        .bind(&changes.headline)
        .bind(&changes.stage)
        .bind(&changes.education)
        .bind(&changes.experience)
        .bind(&changes.notes)
        .fetch_optional(db)
        .await?;
    Ok(candidate)
}

pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM candidates WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() == 1)
}
