use crate::error::AppError;
use crate::models::{Course, EmbeddedQuestion, Notification, Query, Rating, Role, User};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, email, roll, password_hash, role, average_rating, total_ratings, created_at";
const COURSE_COLUMNS: &str = "id, name, teacher_id, teacher_name, created_at";
const QUERY_COLUMNS: &str = "id, course_id, course_name, student_id, student_name, student_roll, \
     teacher_id, question, embedding, embedded_question_id, answer, answered, created_at, answered_at";
const EMBEDDED_COLUMNS: &str =
    "id, course_id, question, embedding, frequency, answer, created_at, updated_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, message, query_id, course_id, read, created_at";

pub fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Opens (creating if needed) the SQLite database and applies the embedded migrations.
pub async fn init_db(database_url: &str) -> Result<SqlitePool, AppError> {
    info!("Initializing database at: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized and migrations applied.");
    Ok(pool)
}

fn map_unique(err: sqlx::Error, what: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{} already exists", what))
        }
        _ => AppError::Database(err),
    }
}

// --- Users ---

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub roll: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: Role,
}

pub async fn create_user(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<User, AppError> {
    let sql = format!(
        "INSERT INTO users (id, name, email, roll, password_hash, role, average_rating, total_ratings, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?) RETURNING {}",
        USER_COLUMNS
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(new_id())
        .bind(new_user.name)
        .bind(new_user.email.to_lowercase())
        .bind(new_user.roll)
        .bind(new_user.password_hash)
        .bind(new_user.role)
        .bind(now())
        .fetch_one(pool)
        .await
        .map_err(|e| map_unique(e, "Email"))
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<User>, AppError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, AppError> {
    let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?)
}

pub async fn list_users_by_role(
    pool: &SqlitePool,
    role: Role,
    limit: i64,
) -> Result<Vec<User>, AppError> {
    let sql = format!(
        "SELECT {} FROM users WHERE role = ? ORDER BY name ASC LIMIT ?",
        USER_COLUMNS
    );
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(role)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

/// Deletes a teacher account together with its courses and everything filed under them:
/// queries, FAQ stubs, notifications and the ratings the teacher received.
pub async fn delete_teacher(pool: &SqlitePool, teacher_id: &str) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = ? AND role = 'teacher'")
        .bind(teacher_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Ok(false);
    }
    for table in ["notifications", "queries", "embedded_questions"] {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE course_id IN (SELECT id FROM courses WHERE teacher_id = ?)",
            table
        ))
        .bind(teacher_id)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("DELETE FROM ratings WHERE teacher_id = ?")
        .bind(teacher_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM courses WHERE teacher_id = ?")
        .bind(teacher_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

// --- Courses ---

pub async fn create_course(
    pool: &SqlitePool,
    name: &str,
    teacher: &User,
) -> Result<Course, AppError> {
    let sql = format!(
        "INSERT INTO courses (id, name, teacher_id, teacher_name, created_at) VALUES (?, ?, ?, ?, ?) RETURNING {}",
        COURSE_COLUMNS
    );
    Ok(sqlx::query_as::<_, Course>(&sql)
        .bind(new_id())
        .bind(name)
        .bind(&teacher.id)
        .bind(&teacher.name)
        .bind(now())
        .fetch_one(pool)
        .await?)
}

pub async fn get_course(pool: &SqlitePool, id: &str) -> Result<Option<Course>, AppError> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    Ok(sqlx::query_as::<_, Course>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn list_courses(pool: &SqlitePool, limit: i64) -> Result<Vec<Course>, AppError> {
    let sql = format!(
        "SELECT {} FROM courses ORDER BY name ASC LIMIT ?",
        COURSE_COLUMNS
    );
    Ok(sqlx::query_as::<_, Course>(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

pub async fn list_courses_for_teacher(
    pool: &SqlitePool,
    teacher_id: &str,
) -> Result<Vec<Course>, AppError> {
    let sql = format!(
        "SELECT {} FROM courses WHERE teacher_id = ? ORDER BY name ASC",
        COURSE_COLUMNS
    );
    Ok(sqlx::query_as::<_, Course>(&sql)
        .bind(teacher_id)
        .fetch_all(pool)
        .await?)
}

pub async fn delete_course(pool: &SqlitePool, id: &str) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// --- Queries ---

pub async fn insert_query(conn: &mut SqliteConnection, query: &Query) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO queries (id, course_id, course_name, student_id, student_name, student_roll,
                             teacher_id, question, embedding, embedded_question_id, answer, answered,
                             created_at, answered_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&query.id)
    .bind(&query.course_id)
    .bind(&query.course_name)
    .bind(&query.student_id)
    .bind(&query.student_name)
    .bind(&query.student_roll)
    .bind(&query.teacher_id)
    .bind(&query.question)
    .bind(&query.embedding)
    .bind(&query.embedded_question_id)
    .bind(&query.answer)
    .bind(query.answered)
    .bind(query.created_at)
    .bind(query.answered_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_query(pool: &SqlitePool, id: &str) -> Result<Option<Query>, AppError> {
    let sql = format!("SELECT {} FROM queries WHERE id = ?", QUERY_COLUMNS);
    Ok(sqlx::query_as::<_, Query>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Marks a query answered. Returns `false` when no such query exists.
pub async fn set_query_answer(
    conn: &mut SqliteConnection,
    id: &str,
    answer: &str,
    answered_at: i64,
) -> Result<bool, AppError> {
    let result =
        sqlx::query("UPDATE queries SET answer = ?, answered = 1, answered_at = ? WHERE id = ?")
            .bind(answer)
            .bind(answered_at)
            .bind(id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// A student's own queries, newest first, optionally narrowed to one course or to answered ones.
pub async fn list_student_queries(
    pool: &SqlitePool,
    student_id: &str,
    course_id: Option<&str>,
    answered_only: bool,
) -> Result<Vec<Query>, AppError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM queries WHERE student_id = ",
        QUERY_COLUMNS
    ));
    builder.push_bind(student_id);
    if let Some(course_id) = course_id {
        builder.push(" AND course_id = ").push_bind(course_id);
    }
    if answered_only {
        builder.push(" AND answered = 1 ORDER BY answered_at DESC");
    } else {
        builder.push(" ORDER BY created_at DESC");
    }
    builder.push(" LIMIT 100");
    Ok(builder.build_query_as::<Query>().fetch_all(pool).await?)
}

/// Answered queries, most recently answered first; all courses when `course_id` is `None`.
pub async fn list_answered_queries(
    pool: &SqlitePool,
    course_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Query>, AppError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM queries WHERE answered = 1",
        QUERY_COLUMNS
    ));
    if let Some(course_id) = course_id {
        builder.push(" AND course_id = ").push_bind(course_id);
    }
    builder
        .push(" ORDER BY answered_at DESC LIMIT ")
        .push_bind(limit);
    Ok(builder.build_query_as::<Query>().fetch_all(pool).await?)
}

/// Queries assigned to a teacher, newest first.
pub async fn list_teacher_queries(
    pool: &SqlitePool,
    teacher_id: &str,
    pending_only: bool,
) -> Result<Vec<Query>, AppError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM queries WHERE teacher_id = ",
        QUERY_COLUMNS
    ));
    builder.push_bind(teacher_id);
    if pending_only {
        builder.push(" AND answered = 0");
    }
    builder.push(" ORDER BY created_at DESC LIMIT 100");
    Ok(builder.build_query_as::<Query>().fetch_all(pool).await?)
}

/// Queries in one of a teacher's courses, optionally for a single student.
pub async fn list_course_queries_for_teacher(
    pool: &SqlitePool,
    teacher_id: &str,
    course_id: &str,
    student_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Query>, AppError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM queries WHERE teacher_id = ",
        QUERY_COLUMNS
    ));
    builder.push_bind(teacher_id);
    builder.push(" AND course_id = ").push_bind(course_id);
    if let Some(student_id) = student_id {
        builder.push(" AND student_id = ").push_bind(student_id);
    }
    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit);
    Ok(builder.build_query_as::<Query>().fetch_all(pool).await?)
}

/// Texts of a course's unanswered questions, newest first.
pub async fn pending_course_questions(
    pool: &SqlitePool,
    course_id: &str,
    limit: i64,
) -> Result<Vec<String>, AppError> {
    Ok(sqlx::query_scalar(
        "SELECT question FROM queries WHERE course_id = ? AND answered = 0 \
         ORDER BY created_at DESC LIMIT ?",
    )
    .bind(course_id)
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Answered queries of a course that carry an embedding, for the local similarity scan.
pub async fn answered_queries_with_embeddings(
    pool: &SqlitePool,
    course_id: &str,
    limit: i64,
) -> Result<Vec<Query>, AppError> {
    let sql = format!(
        "SELECT {} FROM queries \
         WHERE course_id = ? AND answered = 1 AND embedding IS NOT NULL \
         ORDER BY answered_at DESC LIMIT ?",
        QUERY_COLUMNS
    );
    Ok(sqlx::query_as::<_, Query>(&sql)
        .bind(course_id)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

/// Loads the given queries, keeping only answered ones in `course_id`.
pub async fn answered_queries_by_ids(
    pool: &SqlitePool,
    course_id: &str,
    ids: &[String],
) -> Result<Vec<Query>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM queries WHERE answered = 1 AND embedding IS NOT NULL AND course_id = ",
        QUERY_COLUMNS
    ));
    builder.push_bind(course_id).push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    Ok(builder.build_query_as::<Query>().fetch_all(pool).await?)
}

// --- Embedded questions (FAQ stubs) ---

pub async fn insert_embedded_question(
    conn: &mut SqliteConnection,
    entry: &EmbeddedQuestion,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO embedded_questions (id, course_id, question, embedding, frequency, answer, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.course_id)
    .bind(&entry.question)
    .bind(&entry.embedding)
    .bind(entry.frequency)
    .bind(&entry.answer)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_embedded_question(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<EmbeddedQuestion>, AppError> {
    let sql = format!(
        "SELECT {} FROM embedded_questions WHERE id = ?",
        EMBEDDED_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmbeddedQuestion>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Atomically bumps a stub's frequency by one and returns the updated row.
pub async fn increment_frequency(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<EmbeddedQuestion>, AppError> {
    let sql = format!(
        "UPDATE embedded_questions SET frequency = frequency + 1, updated_at = ? WHERE id = ? RETURNING {}",
        EMBEDDED_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmbeddedQuestion>(&sql)
        .bind(now())
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn set_embedded_answer(
    conn: &mut SqliteConnection,
    id: &str,
    answer: &str,
    updated_at: i64,
) -> Result<bool, AppError> {
    let result =
        sqlx::query("UPDATE embedded_questions SET answer = ?, updated_at = ? WHERE id = ?")
            .bind(answer)
            .bind(updated_at)
            .bind(id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Answered FAQ stubs of a course, most asked first, for the local similarity scan.
pub async fn answered_faq_with_embeddings(
    pool: &SqlitePool,
    course_id: &str,
    limit: i64,
) -> Result<Vec<EmbeddedQuestion>, AppError> {
    let sql = format!(
        "SELECT {} FROM embedded_questions \
         WHERE course_id = ? AND answer IS NOT NULL \
         ORDER BY frequency DESC, updated_at DESC LIMIT ?",
        EMBEDDED_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmbeddedQuestion>(&sql)
        .bind(course_id)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

/// Loads the given stubs, keeping only answered ones in `course_id`.
pub async fn answered_faq_by_ids(
    pool: &SqlitePool,
    course_id: &str,
    ids: &[String],
) -> Result<Vec<EmbeddedQuestion>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM embedded_questions WHERE answer IS NOT NULL AND course_id = ",
        EMBEDDED_COLUMNS
    ));
    builder.push_bind(course_id).push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    Ok(builder
        .build_query_as::<EmbeddedQuestion>()
        .fetch_all(pool)
        .await?)
}

/// All FAQ stubs of a course, most asked first.
pub async fn list_faq_entries(
    pool: &SqlitePool,
    course_id: &str,
    limit: i64,
) -> Result<Vec<EmbeddedQuestion>, AppError> {
    let sql = format!(
        "SELECT {} FROM embedded_questions WHERE course_id = ? \
         ORDER BY frequency DESC, updated_at DESC LIMIT ?",
        EMBEDDED_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmbeddedQuestion>(&sql)
        .bind(course_id)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

// --- Notifications ---

pub async fn create_notification(
    pool: &SqlitePool,
    user_id: &str,
    message: &str,
    query_id: &str,
    course_id: &str,
) -> Result<Notification, AppError> {
    let sql = format!(
        "INSERT INTO notifications (id, user_id, message, query_id, course_id, read, created_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?) RETURNING {}",
        NOTIFICATION_COLUMNS
    );
    Ok(sqlx::query_as::<_, Notification>(&sql)
        .bind(new_id())
        .bind(user_id)
        .bind(message)
        .bind(query_id)
        .bind(course_id)
        .bind(now())
        .fetch_one(pool)
        .await?)
}

pub async fn list_notifications(
    pool: &SqlitePool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Notification>, AppError> {
    let sql = format!(
        "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        NOTIFICATION_COLUMNS
    );
    Ok(sqlx::query_as::<_, Notification>(&sql)
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}

/// Marks one of the user's notifications read. Returns `false` when it is not theirs or missing.
pub async fn mark_notification_read(
    pool: &SqlitePool,
    id: &str,
    user_id: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// --- Ratings ---

pub async fn get_rating(
    pool: &SqlitePool,
    query_id: &str,
    student_id: &str,
) -> Result<Option<Rating>, AppError> {
    Ok(sqlx::query_as::<_, Rating>(
        "SELECT id, query_id, student_id, teacher_id, rating, created_at \
         FROM ratings WHERE query_id = ? AND student_id = ?",
    )
    .bind(query_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?)
}

/// Stores a rating and folds it into the teacher's running average in one transaction.
pub async fn record_rating(
    pool: &SqlitePool,
    query_id: &str,
    student_id: &str,
    teacher_id: &str,
    rating: i64,
) -> Result<User, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO ratings (id, query_id, student_id, teacher_id, rating, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(new_id())
    .bind(query_id)
    .bind(student_id)
    .bind(teacher_id)
    .bind(rating)
    .bind(now())
    .execute(&mut *tx)
    .await
    .map_err(|e| map_unique(e, "Rating for this query"))?;

    let sql = format!(
        "UPDATE users SET \
             average_rating = (average_rating * total_ratings + ?) / (total_ratings + 1), \
             total_ratings = total_ratings + 1 \
         WHERE id = ? AND role = 'teacher' RETURNING {}",
        USER_COLUMNS
    );
    let teacher = sqlx::query_as::<_, User>(&sql)
        .bind(rating as f64)
        .bind(teacher_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher not found".to_string()))?;

    tx.commit().await?;
    Ok(teacher)
}
