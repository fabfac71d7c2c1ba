use crate::auth::{hash_password, verify_password, AuthUser};
use crate::database::{self, NewUser};
use crate::error::AppError;
use crate::http::AppState;
use crate::models::{LoginRequest, RegisterRequest, Role, TokenResponse, User, UserResponse};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

fn token_response(state: &AppState, user: &User) -> Result<TokenResponse, AppError> {
    Ok(TokenResponse {
        access_token: state.jwt.issue(user)?,
        token_type: "bearer".to_string(),
        user: UserResponse::from(user),
    })
}

/// Creates an account after checking the email is free. Shared with the admin routes.
pub(crate) async fn create_account(
    state: &AppState,
    req: &RegisterRequest,
    role: Role,
) -> Result<User, AppError> {
    req.validate()?;
    if database::get_user_by_email(&state.db, &req.email)
        .await?
        .is_some()
    {
        return Err(AppError::Validation("Email already registered".to_string()));
    }

    let password_hash = hash_password(&req.password).await?;
    let user = database::create_user(
        &state.db,
        NewUser {
            name: req.name.trim(),
            email: req.email.trim(),
            roll: req.roll.as_deref(),
            password_hash: &password_hash,
            role,
        },
    )
    .await?;
    info!(user_id = %user.id, role = %user.role, "Account created");
    Ok(user)
}

/// Open registration. An admin account can only be self-registered while none exists.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if req.role == Role::Admin
        && !database::list_users_by_role(&state.db, Role::Admin, 1)
            .await?
            .is_empty()
    {
        return Err(AppError::Forbidden(
            "An admin account already exists".to_string(),
        ));
    }

    let user = create_account(&state, &req, req.role).await?;
    Ok(Json(token_response(&state, &user)?))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    req.validate()?;
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = database::get_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&req.password, &user.password_hash).await {
        return Err(invalid());
    }

    Ok(Json(token_response(&state, &user)?))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}
