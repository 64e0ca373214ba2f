use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, RefreshRequest, RefreshResponse,
            RegisterRequest, ResetPasswordRequest, StatusResponse, UserSummary,
            VerifyEmailRequest,
        },
        extractors::{AuthUser, ClientMeta},
        service::{is_valid_email, AuthService, LoginInput, RegisterInput},
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/verify/request", post(request_verification))
        .route("/auth/verify", post(verify_email))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn check_password(password: &str) -> AuthResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }
    Ok(())
}

fn check_email(email: &str) -> AuthResult<()> {
    if !is_valid_email(email) {
        warn!(%email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<UserSummary>)> {
    payload.email = payload.email.trim().to_lowercase();
    check_email(&payload.email)?;
    check_password(&payload.password)?;
    if payload.name.trim().is_empty() {
        return Err(AuthError::Validation("Name is required".into()));
    }

    let service = AuthService::from_ref(&state);
    let user = service
        .register(RegisterInput {
            email: payload.email,
            password: payload.password,
            name: payload.name.trim().to_string(),
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(mut payload): Json<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    payload.email = payload.email.trim().to_lowercase();
    check_email(&payload.email)?;

    let service = AuthService::from_ref(&state);
    let out = service
        .login(LoginInput {
            email: payload.email,
            password: payload.password,
            ip: meta.ip,
            user_agent: meta.user_agent,
        })
        .await?;

    info!(user_id = %out.user.id, email = %out.user.email, "user logged in");
    Ok(Json(AuthResponse {
        access_token: out.access_token,
        refresh_token: out.refresh_token,
        user: out.user,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AuthResult<Json<RefreshResponse>> {
    let service = AuthService::from_ref(&state);
    let access_token = service.refresh(&payload.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<StatusCode> {
    let service = AuthService::from_ref(&state);
    service.logout(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn request_verification(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<(StatusCode, Json<StatusResponse>)> {
    let service = AuthService::from_ref(&state);
    service.request_verification(user_id).await?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::ok())))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AuthResult<Json<StatusResponse>> {
    let service = AuthService::from_ref(&state);
    service.verify_email(&payload.token).await?;
    Ok(Json(StatusResponse::ok()))
}

/// Always answers 202 with the same body, whether or not the email
/// exists.
#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> AuthResult<(StatusCode, Json<StatusResponse>)> {
    payload.email = payload.email.trim().to_lowercase();
    check_email(&payload.email)?;

    let service = AuthService::from_ref(&state);
    service.request_password_reset(&payload.email).await?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::ok())))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AuthResult<Json<StatusResponse>> {
    check_password(&payload.new_password)?;

    let service = AuthService::from_ref(&state);
    service
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(StatusResponse::ok()))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserSummary>, (StatusCode, String)> {
    let user = state
        .store
        .find_by_id(user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %user_id, "find_by_id failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".into()))?;

    Ok(Json(UserSummary::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_serializes_flat() {
        let response = StatusResponse::ok();
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }

    #[test]
    fn password_rule_rejects_short_passwords() {
        assert!(check_password("short").is_err());
        assert!(check_password("long-enough-password").is_ok());
    }

    #[test]
    fn email_rule_rejects_garbage() {
        assert!(check_email("not-an-email").is_err());
        assert!(check_email("a@x.com").is_ok());
    }
}
