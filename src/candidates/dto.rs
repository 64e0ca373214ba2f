use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const VALID_STAGES: &[&str] = &[
    "applied",
    "screening",
    "interview",
    "offer",
    "hired",
    "rejected",
];

#[derive(Debug, Deserialize)]
pub struct CreateCandidateRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    #[serde(default)]
    pub education: Option<serde_json::Value>,
    #[serde(default)]
    pub experience: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCandidateRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub stage: Option<String>,
    pub education: Option<serde_json::Value>,
    pub experience: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CandidateListItem {
    pub id: Uuid,
    pub full_name: String,
    pub headline: Option<String>,
    pub stage: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct CandidateDetails {
    pub id: Uuid,
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

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    20
}
