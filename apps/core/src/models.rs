use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use validator::Validate;

/// Renders a unix timestamp (seconds) as RFC 3339.
pub fn to_rfc3339(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// The role of an account. Decides which routes a caller may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
    Teacher,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Student => "student",
            Role::Teacher => "teacher",
        };
        f.write_str(name)
    }
}

// --- Stored records ---

/// A registered account.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roll: Option<String>,
    /// Argon2 hash in PHC string format.
    pub password_hash: String,
    pub role: Role,
    /// Mean of all ratings students gave this user (teachers only).
    pub average_rating: f64,
    pub total_ratings: i64,
    pub created_at: i64,
}

/// A course (subject). Its `name` is the subject the relevance gate checks against.
#[derive(Debug, Clone, FromRow)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub created_at: i64,
}

/// A student's question, persisted when it did not match an existing answer.
#[derive(Debug, Clone, FromRow)]
pub struct Query {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub student_id: String,
    pub student_name: String,
    pub student_roll: Option<String>,
    /// Teacher of the owning course at submission time; the only user allowed to answer.
    pub teacher_id: String,
    pub question: String,
    /// Set at creation; `None` when the embedding provider was unavailable.
    pub embedding: Option<Json<Vec<f32>>>,
    /// The FAQ stub created alongside this query.
    pub embedded_question_id: Option<String>,
    pub answer: Option<String>,
    pub answered: bool,
    pub created_at: i64,
    pub answered_at: Option<i64>,
}

/// A deduplicated FAQ entry (the "FAQ stub").
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddedQuestion {
    pub id: String,
    pub course_id: String,
    /// Canonical phrasing: the question that created the stub.
    pub question: String,
    pub embedding: Json<Vec<f32>>,
    /// How many submissions resolved to this entry, including the first.
    pub frequency: i64,
    pub answer: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub query_id: String,
    pub course_id: String,
    pub read: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Rating {
    pub id: String,
    pub query_id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub rating: i64,
    pub created_at: i64,
}

// --- Requests ---

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub roll: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Required when an admin creates the course; teachers default to themselves.
    #[serde(default)]
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQueryRequest {
    #[validate(length(min = 1))]
    pub course_id: String,
    #[validate(length(min = 1, max = 4000))]
    pub question: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnswerQueryRequest {
    #[validate(length(min = 1, max = 20000))]
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RateTeacherRequest {
    #[validate(length(min = 1))]
    pub query_id: String,
    #[validate(length(min = 1))]
    pub teacher_id: String,
    #[validate(range(min = 1, max = 5))]
    pub rating: i64,
}

// --- Responses ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roll: Option<String>,
    pub role: Role,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            roll: user.roll.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roll: Option<String>,
    pub role: Role,
    pub average_rating: f64,
    pub total_ratings: i64,
}

impl From<&User> for TeacherSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            roll: user.roll.clone(),
            role: user.role,
            average_rating: user.average_rating,
            total_ratings: user.total_ratings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseResponse {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub teacher_name: String,
}

impl From<&Course> for CourseResponse {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id.clone(),
            name: course.name.clone(),
            teacher_id: course.teacher_id.clone(),
            teacher_name: course.teacher_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub student_id: String,
    pub student_name: String,
    pub student_roll: Option<String>,
    pub teacher_id: String,
    pub question: String,
    pub answer: Option<String>,
    pub answered: bool,
    pub created_at: String,
    pub answered_at: Option<String>,
}

impl From<&Query> for QueryResponse {
    fn from(query: &Query) -> Self {
        Self {
            id: query.id.clone(),
            course_id: query.course_id.clone(),
            course_name: query.course_name.clone(),
            student_id: query.student_id.clone(),
            student_name: query.student_name.clone(),
            student_roll: query.student_roll.clone(),
            teacher_id: query.teacher_id.clone(),
            question: query.question.clone(),
            answer: query.answer.clone(),
            answered: query.answered,
            created_at: to_rfc3339(query.created_at),
            answered_at: query.answered_at.map(to_rfc3339),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqEntryResponse {
    pub id: String,
    pub course_id: String,
    pub question: String,
    pub answer: Option<String>,
    pub frequency: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&EmbeddedQuestion> for FaqEntryResponse {
    fn from(entry: &EmbeddedQuestion) -> Self {
        Self {
            id: entry.id.clone(),
            course_id: entry.course_id.clone(),
            question: entry.question.clone(),
            answer: entry.answer.clone(),
            frequency: entry.frequency,
            created_at: to_rfc3339(entry.created_at),
            updated_at: to_rfc3339(entry.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub query_id: String,
    pub course_id: String,
    pub read: bool,
    pub created_at: String,
}

impl From<&Notification> for NotificationResponse {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            user_id: n.user_id.clone(),
            message: n.message.clone(),
            query_id: n.query_id.clone(),
            course_id: n.course_id.clone(),
            read: n.read,
            created_at: to_rfc3339(n.created_at),
        }
    }
}

/// A student who asked at least one question in a teacher's course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub student_roll: Option<String>,
    pub has_pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRatingResponse {
    pub query_id: String,
    pub rating: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherRatingResponse {
    pub teacher_id: String,
    pub average_rating: f64,
    pub total_ratings: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
