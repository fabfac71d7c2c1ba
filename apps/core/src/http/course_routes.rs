use crate::auth::AuthUser;
use crate::database;
use crate::error::AppError;
use crate::http::AppState;
use crate::models::{Course, CourseResponse, CreateCourseRequest, Role};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courses", get(list_courses).post(create_course))
        .route("/courses/teaching", get(teaching_courses))
}

/// Creates a course assigned to `teacher_id`, which must be a teacher account.
pub(crate) async fn create_course_for(
    state: &AppState,
    name: &str,
    teacher_id: &str,
) -> Result<Course, AppError> {
    let teacher = database::get_user(&state.db, teacher_id)
        .await?
        .filter(|u| u.role == Role::Teacher)
        .ok_or_else(|| AppError::NotFound("Teacher not found".to_string()))?;

    let course = database::create_course(&state.db, name.trim(), &teacher).await?;
    info!(course_id = %course.id, teacher_id = %teacher.id, "Course created");
    Ok(course)
}

pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
) -> Result<Json<Vec<CourseResponse>>, AppError> {
    let courses = database::list_courses(&state.db, 100).await?;
    Ok(Json(courses.iter().map(CourseResponse::from).collect()))
}

/// Admins must name the teacher; a teacher always creates a course for themselves.
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<CourseResponse>), AppError> {
    let user = caller.require(&[Role::Admin, Role::Teacher])?;
    req.validate()?;

    let teacher_id = match user.role {
        Role::Teacher => user.id.clone(),
        _ => req
            .teacher_id
            .clone()
            .ok_or_else(|| AppError::Validation("teacher_id is required".to_string()))?,
    };

    let course = create_course_for(&state, &req.name, &teacher_id).await?;
    Ok((StatusCode::CREATED, Json(CourseResponse::from(&course))))
}

pub async fn teaching_courses(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<Vec<CourseResponse>>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let courses = database::list_courses_for_teacher(&state.db, &teacher.id).await?;
    Ok(Json(courses.iter().map(CourseResponse::from).collect()))
}
