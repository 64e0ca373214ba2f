use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    auth::{extractors::AuthUser, repo_types::Role},
    state::AppState,
};

use super::dto::{
    CandidateDetails, CandidateListItem, CreateCandidateRequest, Pagination,
    UpdateCandidateRequest, VALID_STAGES,
};
use super::repo::{self, Candidate, CandidateChanges, NewCandidate};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/candidates", get(list_candidates))
        .route("/candidates/:id", get(get_candidate))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/candidates", post(create_candidate))
        .route("/candidates/:id", put(update_candidate))
        .route("/candidates/:id", delete(delete_candidate))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    error!(error = %e, "candidates handler error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}

fn details(c: Candidate) -> CandidateDetails {
    CandidateDetails {
        id: c.id,
        full_name: c.full_name,
        email: c.email,
        phone: c.phone,
        headline: c.headline,
        stage: c.stage,
        education: c.education,
        experience: c.experience,
        notes: c.notes,
        created_at: c.created_at,
        updated_at: c.updated_at,
    }
}

#[instrument(skip(state))]
pub async fn list_candidates(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<CandidateListItem>>, (StatusCode, String)> {
    let candidates = repo::list_by_owner(&state.db, user_id, p.limit, p.offset)
        .await
        .map_err(internal)?;
    let items = candidates
        .into_iter()
        .map(|c| CandidateListItem {
            id: c.id,
            full_name: c.full_name,
            headline: c.headline,
            stage: c.stage,
            created_at: c.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_candidate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateDetails>, (StatusCode, String)> {
    let candidate = repo::get(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Candidate not found".into()))?;
    Ok(Json(details(candidate)))
}

#[instrument(skip(state, payload))]
pub async fn create_candidate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateCandidateRequest>,
) -> Result<(StatusCode, Json<CandidateDetails>), (StatusCode, String)> {
    if payload.full_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "full_name is required".into()));
    }

    let candidate = repo::create(
        &state.db,
        user_id,
        NewCandidate {
            full_name: payload.full_name.trim().to_string(),
            email: payload.email,
            phone: payload.phone,
            headline: payload.headline,
            education: payload.education,
            experience: payload.experience,
            notes: payload.notes,
        },
    )
    .await
    .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(details(candidate))))
}

#[instrument(skip(state, payload))]
pub async fn update_candidate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCandidateRequest>,
) -> Result<Json<CandidateDetails>, (StatusCode, String)> {
    if let Some(stage) = payload.stage.as_deref() {
        if !VALID_STAGES.contains(&stage) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown stage: {stage}"),
            ));
        }
    }

    let candidate = repo::update(
        &state.db,
        user_id,
        id,
        CandidateChanges {
            full_name: payload.full_name,
            email: payload.email,
            phone: payload.phone,
            headline: payload.headline,
            stage: payload.stage,
            education: payload.education,
            experience: payload.experience,
            notes: payload.notes,
        },
    )
    .await
    .map_err(internal)?
    .ok_or((StatusCode::NOT_FOUND, "Candidate not found".into()))?;

    Ok(Json(details(candidate)))
}

/// Deleting candidate records is reserved for admins.
#[instrument(skip(state))]
pub async fn delete_candidate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let user = state
        .store
        .find_by_id(user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".into()))?;
    if user.role != Role::Admin {
        return Err((StatusCode::FORBIDDEN, "Admin role required".into()));
    }

    let deleted = repo::delete(&state.db, id).await.map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Candidate not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_allowlist_covers_pipeline() {
        assert!(VALID_STAGES.contains(&"applied"));
        assert!(VALID_STAGES.contains(&"hired"));
        assert!(!VALID_STAGES.contains(&"limbo"));
    }
}
