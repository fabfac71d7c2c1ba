use crate::auth::AuthUser;
use crate::database;
use crate::error::AppError;
use crate::faq::FaqMatch;
use crate::http::AppState;
use crate::lifecycle::SubmitOutcome;
use crate::models::{
    AnswerQueryRequest, CourseStudentSummary, CreateQueryRequest, FaqEntryResponse,
    MessageResponse, NotificationResponse, Query, QueryRatingResponse, QueryResponse,
    RateTeacherRequest, Role, TeacherRatingResponse,
};
use crate::moderation::{Emotion, TopicCluster};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

/// Pending questions sent to the classifier for insights.
const INSIGHT_SAMPLE: i64 = 20;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queries", post(create_query))
        .route("/queries/mine", get(my_queries))
        .route("/queries/:id/answer", patch(answer_query))
        .route("/queries/:id/rating", get(query_rating))
        .route("/queries/rate", post(rate_teacher))
        .route("/queries/course/:id", get(course_queries))
        .route("/queries/course/:id/answered", get(course_answered))
        .route("/queries/course/:id/faq", get(course_faq))
        .route("/queries/course/:id/faq-index", get(course_faq_index))
        .route("/queries/faq/all", get(all_faq))
        .route("/queries/teacher", get(teacher_queries))
        .route("/queries/teacher/pending", get(teacher_pending))
        .route("/queries/teacher/:id/rating", get(teacher_rating))
        .route(
            "/queries/teacher/course/:id/students",
            get(course_students),
        )
        .route(
            "/queries/teacher/course/:id/student/:student_id",
            get(student_queries),
        )
        .route(
            "/queries/teacher/course/:id/insights",
            get(course_insights),
        )
        .route("/queries/notifications", get(notifications))
        .route("/queries/notifications/:id/read", patch(mark_read))
}

fn responses(queries: &[Query]) -> Json<Vec<QueryResponse>> {
    Json(queries.iter().map(QueryResponse::from).collect())
}

#[derive(Debug, Serialize)]
struct MatchedResponse {
    matched: bool,
    #[serde(flatten)]
    found: FaqMatch,
}

/// 201 with the new query, or 200 with the reused answer when a near-duplicate exists.
pub async fn create_query(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<CreateQueryRequest>,
) -> Result<Response, AppError> {
    let student = caller.require(&[Role::Student])?;
    req.validate()?;
    if !state.rate_limiter.check(&student.id) {
        return Err(AppError::RateLimited);
    }

    match state
        .lifecycle
        .submit(student, &req.course_id, &req.question)
        .await?
    {
        SubmitOutcome::Created(query) => {
            Ok((StatusCode::CREATED, Json(QueryResponse::from(&query))).into_response())
        }
        SubmitOutcome::Matched(found) => Ok(Json(MatchedResponse {
            matched: true,
            found,
        })
        .into_response()),
    }
}

pub async fn answer_query(
    State(state): State<Arc<AppState>>,
    AuthUser(teacher): AuthUser,
    Path(query_id): Path<String>,
    Json(req): Json<AnswerQueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    req.validate()?;
    let query = state.lifecycle.answer(&teacher, &query_id, &req.answer).await?;
    Ok(Json(QueryResponse::from(&query)))
}

pub async fn my_queries(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let queries = database::list_student_queries(&state.db, &user.id, None, false).await?;
    Ok(responses(&queries))
}

pub async fn course_queries(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let queries =
        database::list_student_queries(&state.db, &user.id, Some(&course_id), false).await?;
    Ok(responses(&queries))
}

pub async fn course_answered(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let queries =
        database::list_student_queries(&state.db, &user.id, Some(&course_id), true).await?;
    Ok(responses(&queries))
}

/// Answered questions of a course, visible to every signed-in user.
pub async fn course_faq(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let queries = database::list_answered_queries(&state.db, Some(&course_id), 50).await?;
    Ok(responses(&queries))
}

pub async fn all_faq(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let queries = database::list_answered_queries(&state.db, None, 200).await?;
    Ok(responses(&queries))
}

/// Deduplicated FAQ entries of a course, most asked first.
pub async fn course_faq_index(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<FaqEntryResponse>>, AppError> {
    let entries = database::list_faq_entries(&state.db, &course_id, 100).await?;
    Ok(Json(entries.iter().map(FaqEntryResponse::from).collect()))
}

pub async fn teacher_queries(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let queries = database::list_teacher_queries(&state.db, &teacher.id, false).await?;
    Ok(responses(&queries))
}

pub async fn teacher_pending(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let queries = database::list_teacher_queries(&state.db, &teacher.id, true).await?;
    Ok(responses(&queries))
}

/// Students who asked in one of the caller's courses, in order of their latest question.
pub async fn course_students(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<CourseStudentSummary>>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let queries =
        database::list_course_queries_for_teacher(&state.db, &teacher.id, &course_id, None, 500)
            .await?;

    let mut students: Vec<CourseStudentSummary> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for query in &queries {
        let position = *positions.entry(query.student_id.clone()).or_insert_with(|| {
            students.push(CourseStudentSummary {
                student_id: query.student_id.clone(),
                student_name: query.student_name.clone(),
                student_roll: query.student_roll.clone(),
                has_pending: false,
            });
            students.len() - 1
        });
        if !query.answered {
            students[position].has_pending = true;
        }
    }

    Ok(Json(students))
}

pub async fn student_queries(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path((course_id, student_id)): Path<(String, String)>,
) -> Result<Json<Vec<QueryResponse>>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let queries = database::list_course_queries_for_teacher(
        &state.db,
        &teacher.id,
        &course_id,
        Some(&student_id),
        100,
    )
    .await?;
    Ok(responses(&queries))
}

#[derive(Debug, Serialize)]
pub struct EmotionCount {
    pub emotion: Emotion,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub course_id: String,
    pub pending_questions: usize,
    pub clusters: Vec<TopicCluster>,
    pub emotions: Vec<EmotionCount>,
}

/// Topic clusters and an emotion tally over the course's pending questions.
///
/// Classifier failures leave the clusters empty and count questions as NEUTRAL.
pub async fn course_insights(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<InsightsResponse>, AppError> {
    let teacher = caller.require(&[Role::Teacher])?;
    let course = database::get_course(&state.db, &course_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
    if course.teacher_id != teacher.id {
        return Err(AppError::Forbidden(
            "You are not the teacher for this course".to_string(),
        ));
    }

    let pending =
        database::pending_course_questions(&state.db, &course.id, INSIGHT_SAMPLE).await?;

    let clusters = state.classifier.clusters(&pending).await;
    let verdicts = join_all(pending.iter().map(|q| state.classifier.emotion(q))).await;

    let mut tally: Vec<EmotionCount> = Vec::new();
    for verdict in verdicts {
        match tally.iter_mut().find(|c| c.emotion == verdict.emotion) {
            Some(entry) => entry.count += 1,
            None => tally.push(EmotionCount {
                emotion: verdict.emotion,
                count: 1,
            }),
        }
    }
    tally.sort_by(|a, b| b.count.cmp(&a.count));

    info!(course_id = %course.id, pending = pending.len(), "Insights computed");
    Ok(Json(InsightsResponse {
        course_id: course.id,
        pending_questions: pending.len(),
        clusters,
        emotions: tally,
    }))
}

/// A student rates the teacher who answered one of their questions, once per question.
pub async fn rate_teacher(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<RateTeacherRequest>,
) -> Result<Json<TeacherRatingResponse>, AppError> {
    let student = caller.require(&[Role::Student])?;
    req.validate()?;

    let query = database::get_query(&state.db, &req.query_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Query not found".to_string()))?;
    if query.student_id != student.id {
        return Err(AppError::Forbidden(
            "You can only rate answers to your own questions".to_string(),
        ));
    }
    if !query.answered {
        return Err(AppError::Validation(
            "Only answered questions can be rated".to_string(),
        ));
    }
    if query.teacher_id != req.teacher_id {
        return Err(AppError::Validation(
            "This teacher did not answer the question".to_string(),
        ));
    }

    let teacher = database::record_rating(
        &state.db,
        &query.id,
        &student.id,
        &query.teacher_id,
        req.rating,
    )
    .await?;

    info!(teacher_id = %teacher.id, rating = req.rating, "Teacher rated");
    Ok(Json(TeacherRatingResponse {
        teacher_id: teacher.id,
        average_rating: teacher.average_rating,
        total_ratings: teacher.total_ratings,
    }))
}

pub async fn query_rating(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(query_id): Path<String>,
) -> Result<Json<QueryRatingResponse>, AppError> {
    let rating = database::get_rating(&state.db, &query_id, &user.id).await?;
    Ok(Json(QueryRatingResponse {
        query_id,
        rating: rating.map(|r| r.rating),
    }))
}

pub async fn teacher_rating(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(teacher_id): Path<String>,
) -> Result<Json<TeacherRatingResponse>, AppError> {
    let teacher = database::get_user(&state.db, &teacher_id)
        .await?
        .filter(|u| u.role == Role::Teacher)
        .ok_or_else(|| AppError::NotFound("Teacher not found".to_string()))?;
    Ok(Json(TeacherRatingResponse {
        teacher_id: teacher.id,
        average_rating: teacher.average_rating,
        total_ratings: teacher.total_ratings,
    }))
}

pub async fn notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<NotificationResponse>>, AppError> {
    let notifications = database::list_notifications(&state.db, &user.id, 50).await?;
    Ok(Json(
        notifications
            .iter()
            .map(NotificationResponse::from)
            .collect(),
    ))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(notification_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    if !database::mark_notification_read(&state.db, &notification_id, &user.id).await? {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(Json(MessageResponse::new("Marked as read")))
}
