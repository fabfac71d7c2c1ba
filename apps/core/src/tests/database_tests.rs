//! Database Tests
//!
//! CRUD and aggregate behaviour of the SQLite store.

use super::{create_course, create_test_db, create_user};
use crate::database::{self, NewUser};
use crate::error::AppError;
use crate::models::{EmbeddedQuestion, Query, Role};
use sqlx::types::Json;

fn stub(id: &str, course_id: &str, answer: Option<&str>) -> EmbeddedQuestion {
    EmbeddedQuestion {
        id: id.to_string(),
        course_id: course_id.to_string(),
        question: "What is a derivative?".to_string(),
        embedding: Json(vec![1.0, 0.0, 0.0]),
        frequency: 1,
        answer: answer.map(str::to_string),
        created_at: database::now(),
        updated_at: database::now(),
    }
}

fn query(id: &str, course_id: &str, student_id: &str, teacher_id: &str) -> Query {
    Query {
        id: id.to_string(),
        course_id: course_id.to_string(),
        course_name: "Calculus".to_string(),
        student_id: student_id.to_string(),
        student_name: "Sita".to_string(),
        student_roll: Some("R-001".to_string()),
        teacher_id: teacher_id.to_string(),
        question: "What is a derivative?".to_string(),
        embedding: Some(Json(vec![1.0, 0.0, 0.0])),
        embedded_question_id: None,
        answer: None,
        answered: false,
        created_at: database::now(),
        answered_at: None,
    }
}

#[tokio::test]
async fn test_user_email_is_case_insensitive_and_unique() {
    let db = create_test_db().await;
    let user = create_user(&db.pool, "Ram", Role::Student).await;

    let found = database::get_user_by_email(&db.pool, "RAM@School.Test")
        .await
        .unwrap()
        .expect("user found by email");
    assert_eq!(found.id, user.id);
    assert_eq!(found.role, Role::Student);
    assert_eq!(found.total_ratings, 0);

    let duplicate = database::create_user(
        &db.pool,
        NewUser {
            name: "Other Ram",
            email: "ram@school.test",
            roll: None,
            password_hash: "x",
            role: Role::Teacher,
        },
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_course_listing_and_teacher_deletion() {
    let db = create_test_db().await;
    let teacher = create_user(&db.pool, "Hari", Role::Teacher).await;
    let other = create_user(&db.pool, "Gita", Role::Teacher).await;
    create_course(&db.pool, "Physics", &teacher).await;
    let calculus = create_course(&db.pool, "Calculus", &teacher).await;
    let kept = create_course(&db.pool, "Biology", &other).await;
    let student = create_user(&db.pool, "Sita", Role::Student).await;

    let mut tx = db.pool.begin().await.unwrap();
    database::insert_embedded_question(&mut tx, &stub("gone", &calculus.id, None))
        .await
        .unwrap();
    database::insert_embedded_question(&mut tx, &stub("stays", &kept.id, None))
        .await
        .unwrap();
    database::insert_query(&mut tx, &query("q-gone", &calculus.id, &student.id, &teacher.id))
        .await
        .unwrap();
    database::insert_query(&mut tx, &query("q-stays", &kept.id, &student.id, &other.id))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    database::create_notification(&db.pool, &student.id, "answered", "q-gone", &calculus.id)
        .await
        .unwrap();

    let teaching = database::list_courses_for_teacher(&db.pool, &teacher.id)
        .await
        .unwrap();
    let names: Vec<_> = teaching.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Calculus", "Physics"]);
    assert_eq!(teaching[0].teacher_name, "Hari");

    assert!(database::delete_teacher(&db.pool, &teacher.id).await.unwrap());
    assert!(database::get_user(&db.pool, &teacher.id).await.unwrap().is_none());

    let remaining = database::list_courses(&db.pool, 100).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept.id);

    // Nothing filed under the deleted courses survives.
    assert!(database::get_query(&db.pool, "q-gone").await.unwrap().is_none());
    assert!(database::get_query(&db.pool, "q-stays").await.unwrap().is_some());
    assert!(database::get_embedded_question(&db.pool, "gone")
        .await
        .unwrap()
        .is_none());
    assert!(database::get_embedded_question(&db.pool, "stays")
        .await
        .unwrap()
        .is_some());
    assert!(database::list_notifications(&db.pool, &student.id, 10)
        .await
        .unwrap()
        .is_empty());

    // Second delete and deleting a non-teacher both report nothing deleted.
    assert!(!database::delete_teacher(&db.pool, &teacher.id).await.unwrap());
    assert!(!database::delete_teacher(&db.pool, &student.id).await.unwrap());
}

#[tokio::test]
async fn test_query_answer_and_listings() {
    let db = create_test_db().await;
    let teacher = create_user(&db.pool, "Hari", Role::Teacher).await;
    let student = create_user(&db.pool, "Sita", Role::Student).await;
    let course = create_course(&db.pool, "Calculus", &teacher).await;

    let mut tx = db.pool.begin().await.unwrap();
    database::insert_query(&mut tx, &query("q1", &course.id, &student.id, &teacher.id))
        .await
        .unwrap();
    database::insert_query(&mut tx, &query("q2", &course.id, &student.id, &teacher.id))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let pending = database::list_teacher_queries(&db.pool, &teacher.id, true)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let mut conn = db.pool.acquire().await.unwrap();
    assert!(database::set_query_answer(&mut conn, "q1", "Rate of change", 42)
        .await
        .unwrap());
    assert!(!database::set_query_answer(&mut conn, "missing", "x", 42)
        .await
        .unwrap());
    drop(conn);

    let answered = database::get_query(&db.pool, "q1").await.unwrap().unwrap();
    assert!(answered.answered);
    assert_eq!(answered.answer.as_deref(), Some("Rate of change"));
    assert_eq!(answered.answered_at, Some(42));

    let pending = database::list_teacher_queries(&db.pool, &teacher.id, true)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "q2");

    let student_answered =
        database::list_student_queries(&db.pool, &student.id, Some(&course.id), true)
            .await
            .unwrap();
    assert_eq!(student_answered.len(), 1);

    let with_embeddings =
        database::answered_queries_with_embeddings(&db.pool, &course.id, 10)
            .await
            .unwrap();
    assert_eq!(with_embeddings.len(), 1);
    assert_eq!(with_embeddings[0].embedding.as_ref().unwrap().0, vec![1.0, 0.0, 0.0]);

    let by_ids = database::answered_queries_by_ids(
        &db.pool,
        &course.id,
        &["q1".to_string(), "q2".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(by_ids.len(), 1, "unanswered queries are filtered out");
    assert!(database::answered_queries_by_ids(&db.pool, &course.id, &[])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pending_questions_skip_newer_answered_ones() {
    let db = create_test_db().await;
    let teacher = create_user(&db.pool, "Hari", Role::Teacher).await;
    let student = create_user(&db.pool, "Sita", Role::Student).await;
    let course = create_course(&db.pool, "Calculus", &teacher).await;

    let mut tx = db.pool.begin().await.unwrap();
    let mut old = query("old", &course.id, &student.id, &teacher.id);
    old.question = "Why does the chain rule work?".to_string();
    old.created_at = 1;
    database::insert_query(&mut tx, &old).await.unwrap();
    for i in 0..3 {
        let mut recent = query(&format!("recent-{}", i), &course.id, &student.id, &teacher.id);
        recent.created_at = 10 + i;
        recent.answer = Some("done".to_string());
        recent.answered = true;
        database::insert_query(&mut tx, &recent).await.unwrap();
    }
    tx.commit().await.unwrap();

    let pending = database::pending_course_questions(&db.pool, &course.id, 2)
        .await
        .unwrap();
    assert_eq!(pending, vec!["Why does the chain rule work?".to_string()]);
}

#[tokio::test]
async fn test_faq_stub_frequency_and_answer() {
    let db = create_test_db().await;
    let mut conn = db.pool.acquire().await.unwrap();
    database::insert_embedded_question(&mut conn, &stub("e1", "c1", None))
        .await
        .unwrap();
    database::insert_embedded_question(&mut conn, &stub("e2", "c2", Some("elsewhere")))
        .await
        .unwrap();

    // Unanswered stubs never take part in matching.
    assert!(database::answered_faq_with_embeddings(&db.pool, "c1", 10)
        .await
        .unwrap()
        .is_empty());

    assert!(database::set_embedded_answer(&mut conn, "e1", "Rate of change", 7)
        .await
        .unwrap());
    drop(conn);

    let updated = database::increment_frequency(&db.pool, "e1")
        .await
        .unwrap()
        .expect("stub exists");
    assert_eq!(updated.frequency, 2);
    assert_eq!(updated.answer.as_deref(), Some("Rate of change"));
    assert!(database::increment_frequency(&db.pool, "missing")
        .await
        .unwrap()
        .is_none());

    let answered = database::answered_faq_with_embeddings(&db.pool, "c1", 10)
        .await
        .unwrap();
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].embedding.0, vec![1.0, 0.0, 0.0]);

    let scoped = database::answered_faq_by_ids(
        &db.pool,
        "c1",
        &["e1".to_string(), "e2".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(scoped.len(), 1, "stubs from other courses are filtered out");
    assert_eq!(scoped[0].id, "e1");
}

#[tokio::test]
async fn test_notifications_are_per_user() {
    let db = create_test_db().await;
    let first = database::create_notification(&db.pool, "u1", "New question", "q1", "c1")
        .await
        .unwrap();
    database::create_notification(&db.pool, "u2", "Other", "q2", "c1")
        .await
        .unwrap();

    let mine = database::list_notifications(&db.pool, "u1", 50).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(!mine[0].read);

    assert!(!database::mark_notification_read(&db.pool, &first.id, "u2")
        .await
        .unwrap());
    assert!(database::mark_notification_read(&db.pool, &first.id, "u1")
        .await
        .unwrap());
    let mine = database::list_notifications(&db.pool, "u1", 50).await.unwrap();
    assert!(mine[0].read);
}

#[tokio::test]
async fn test_rating_updates_running_average_once_per_query() {
    let db = create_test_db().await;
    let teacher = create_user(&db.pool, "Hari", Role::Teacher).await;

    let after_first = database::record_rating(&db.pool, "q1", "s1", &teacher.id, 5)
        .await
        .unwrap();
    assert_eq!(after_first.total_ratings, 1);
    assert!((after_first.average_rating - 5.0).abs() < 1e-9);

    let after_second = database::record_rating(&db.pool, "q2", "s1", &teacher.id, 2)
        .await
        .unwrap();
    assert_eq!(after_second.total_ratings, 2);
    assert!((after_second.average_rating - 3.5).abs() < 1e-9);

    let again = database::record_rating(&db.pool, "q1", "s1", &teacher.id, 1).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    // The failed insert must not have touched the aggregate.
    let stored = database::get_user(&db.pool, &teacher.id).await.unwrap().unwrap();
    assert_eq!(stored.total_ratings, 2);

    let rating = database::get_rating(&db.pool, "q2", "s1").await.unwrap().unwrap();
    assert_eq!(rating.rating, 2);
    assert!(database::get_rating(&db.pool, "q3", "s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rating_unknown_teacher_is_rolled_back() {
    let db = create_test_db().await;
    let result = database::record_rating(&db.pool, "q1", "s1", "ghost", 4).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(database::get_rating(&db.pool, "q1", "s1").await.unwrap().is_none());
}
