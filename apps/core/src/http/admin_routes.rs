use crate::auth::AuthUser;
use crate::database;
use crate::error::AppError;
use crate::http::auth_routes::create_account;
use crate::http::course_routes::create_course_for;
use crate::http::AppState;
use crate::models::{
    CourseResponse, CreateCourseRequest, MessageResponse, RegisterRequest, Role, TeacherSummary,
    UserResponse,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/teachers", get(list_teachers).post(create_teacher))
        .route("/admin/teachers/:id", delete(delete_teacher))
        .route("/admin/subjects", get(list_subjects).post(create_subject))
        .route("/admin/subjects/:id", delete(delete_subject))
}

pub async fn list_teachers(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<Vec<TeacherSummary>>, AppError> {
    caller.require(&[Role::Admin])?;
    let teachers = database::list_users_by_role(&state.db, Role::Teacher, 200).await?;
    Ok(Json(teachers.iter().map(TeacherSummary::from).collect()))
}

/// The role in the body is ignored; the account is always a teacher.
pub async fn create_teacher(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    caller.require(&[Role::Admin])?;
    let teacher = create_account(&state, &req, Role::Teacher).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&teacher))))
}

/// Deletes the teacher and every course assigned to them.
pub async fn delete_teacher(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(teacher_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    caller.require(&[Role::Admin])?;
    if !database::delete_teacher(&state.db, &teacher_id).await? {
        return Err(AppError::NotFound("Teacher not found".to_string()));
    }
    info!(teacher_id = %teacher_id, "Teacher deleted");
    Ok(Json(MessageResponse::new(
        "Teacher and assigned subjects deleted",
    )))
}

pub async fn list_subjects(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<Vec<CourseResponse>>, AppError> {
    caller.require(&[Role::Admin])?;
    let courses = database::list_courses(&state.db, 200).await?;
    Ok(Json(courses.iter().map(CourseResponse::from).collect()))
}

pub async fn create_subject(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<CourseResponse>), AppError> {
    caller.require(&[Role::Admin])?;
    req.validate()?;
    let teacher_id = req
        .teacher_id
        .as_deref()
        .ok_or_else(|| AppError::Validation("teacher_id is required".to_string()))?;

    let course = create_course_for(&state, &req.name, teacher_id).await?;
    Ok((StatusCode::CREATED, Json(CourseResponse::from(&course))))
}

pub async fn delete_subject(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(subject_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    caller.require(&[Role::Admin])?;
    if !database::delete_course(&state.db, &subject_id).await? {
        return Err(AppError::NotFound("Subject not found".to_string()));
    }
    Ok(Json(MessageResponse::new("Subject deleted")))
}
