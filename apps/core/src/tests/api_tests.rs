//! API Tests
//!
//! The HTTP surface through an in-process `axum-test` server.

use super::{create_test_db, test_config, vectors_with_similarity, MockEmbedder, MockLlm, TestDb};
use crate::config::AppConfig;
use crate::http::{router, AppState};
use crate::models::{
    CourseResponse, NotificationResponse, QueryResponse, TeacherRatingResponse, TeacherSummary,
    TokenResponse, UserResponse,
};
use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const FIRST: &str = "What is a derivative?";
const SECOND: &str = "What's a derivative?";

struct TestApp {
    server: TestServer,
    _db: TestDb,
}

async fn spawn_app(config: AppConfig) -> TestApp {
    let db = create_test_db().await;
    let (e1, e2) = vectors_with_similarity(0.9);
    let embedder = MockEmbedder::new()
        .with(FIRST, e1)
        .with(SECOND, e2)
        .with("What is a limit?", vec![0.0, 1.0, 0.0])
        .with("Why is the chain rule true?", vec![0.0, 0.0, 1.0]);
    let state = Arc::new(AppState::new(
        db.pool.clone(),
        &config,
        Arc::new(MockLlm::classroom()),
        Arc::new(embedder),
        None,
    ));
    TestApp {
        server: TestServer::new(router(state)).unwrap(),
        _db: db,
    }
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

impl TestApp {
    async fn register(&self, name: &str, role: &str) -> TokenResponse {
        let response = self
            .server
            .post("/auth/register")
            .json(&json!({
                "name": name,
                "email": format!("{}@school.test", name.to_lowercase()),
                "password": "secret-password",
                "role": role,
            }))
            .await;
        response.assert_status_ok();
        response.json::<TokenResponse>()
    }

    async fn get(&self, path: &str, token: &str) -> TestResponse {
        self.server
            .get(path)
            .add_header(AUTHORIZATION, bearer(token))
            .await
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> TestResponse {
        self.server
            .post(path)
            .add_header(AUTHORIZATION, bearer(token))
            .json(&body)
            .await
    }

    async fn patch(&self, path: &str, token: &str, body: Value) -> TestResponse {
        self.server
            .patch(path)
            .add_header(AUTHORIZATION, bearer(token))
            .json(&body)
            .await
    }

    async fn course(&self, teacher_token: &str, name: &str) -> CourseResponse {
        let response = self
            .post("/courses", teacher_token, json!({ "name": name }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<CourseResponse>()
    }

    async fn ask(&self, student_token: &str, course_id: &str, question: &str) -> TestResponse {
        self.post(
            "/queries",
            student_token,
            json!({ "course_id": course_id, "question": question }),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_and_root() {
    let app = spawn_app(test_config()).await;
    app.server.get("/health").await.assert_text("OK");
    let root = app.server.get("/").await.json::<Value>();
    assert!(root["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app(test_config()).await;
    let registered = app.register("Sita", "student").await;
    assert_eq!(registered.token_type, "bearer");
    assert_eq!(registered.user.email, "sita@school.test");

    let me = app.get("/auth/me", &registered.access_token).await;
    me.assert_status_ok();
    assert_eq!(me.json::<UserResponse>().id, registered.user.id);

    let login = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": "SITA@school.test", "password": "secret-password" }))
        .await;
    login.assert_status_ok();

    let wrong = app
        .server
        .post("/auth/login")
        .json(&json!({ "email": "sita@school.test", "password": "nope-nope" }))
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json::<Value>()["code"], "UNAUTHORIZED");

    let duplicate = app
        .server
        .post("/auth/register")
        .json(&json!({
            "name": "Sita Again",
            "email": "sita@school.test",
            "password": "secret-password",
            "role": "student",
        }))
        .await;
    duplicate.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(duplicate.json::<Value>()["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthorized() {
    let app = spawn_app(test_config()).await;
    app.server
        .get("/auth/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.get("/auth/me", "not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .post("/queries")
        .json(&json!({ "course_id": "c", "question": "q" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_only_the_first_admin_can_self_register() {
    let app = spawn_app(test_config()).await;
    app.register("Principal", "admin").await;

    let second = app
        .server
        .post("/auth/register")
        .json(&json!({
            "name": "Intruder",
            "email": "intruder@school.test",
            "password": "secret-password",
            "role": "admin",
        }))
        .await;
    second.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_question_lifecycle_over_http() {
    let app = spawn_app(test_config()).await;
    let teacher = app.register("Hari", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let ram = app.register("Ram", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;
    assert_eq!(course.teacher_id, teacher.user.id);

    // Students cannot create courses and teachers cannot ask.
    app.post("/courses", &sita.access_token, json!({ "name": "Art" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.ask(&teacher.access_token, &course.id, FIRST)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let created = app.ask(&sita.access_token, &course.id, FIRST).await;
    created.assert_status(StatusCode::CREATED);
    let query = created.json::<QueryResponse>();
    assert!(!query.answered);
    assert_eq!(query.teacher_id, teacher.user.id);

    let pending = app
        .get("/queries/teacher/pending", &teacher.access_token)
        .await
        .json::<Vec<QueryResponse>>();
    assert_eq!(pending.len(), 1);

    let faq = app
        .get(&format!("/queries/course/{}/faq-index", course.id), &sita.access_token)
        .await
        .json::<Vec<Value>>();
    assert_eq!(faq.len(), 1);
    assert_eq!(faq[0]["frequency"], 1);
    assert!(faq[0]["answer"].is_null());

    app.patch(
        &format!("/queries/{}/answer", query.id),
        &ram.access_token,
        json!({ "answer": "I think it is a slope" }),
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);

    let answered = app
        .patch(
            &format!("/queries/{}/answer", query.id),
            &teacher.access_token,
            json!({ "answer": "Rate of change of a function" }),
        )
        .await;
    answered.assert_status_ok();
    assert!(answered.json::<QueryResponse>().answered);

    let matched = app.ask(&ram.access_token, &course.id, SECOND).await;
    matched.assert_status_ok();
    let body = matched.json::<Value>();
    assert_eq!(body["matched"], true);
    assert_eq!(body["answer"], "Rate of change of a function");
    assert_eq!(body["source"], "answered_query");

    let ram_queries = app
        .get("/queries/mine", &ram.access_token)
        .await
        .json::<Vec<QueryResponse>>();
    assert!(ram_queries.is_empty(), "a matched question is not stored");

    let course_faq = app
        .get(&format!("/queries/course/{}/faq", course.id), &ram.access_token)
        .await
        .json::<Vec<QueryResponse>>();
    assert_eq!(course_faq.len(), 1);
}

#[tokio::test]
async fn test_rejections_carry_machine_readable_codes() {
    let app = spawn_app(test_config()).await;
    let teacher = app.register("Hari", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;

    let blocked = app
        .ask(&sita.access_token, &course.id, "you stupid teacher explain this")
        .await;
    blocked.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(blocked.json::<Value>()["code"], "MODERATION_BLOCKED");

    let empty = app.ask(&sita.access_token, &course.id, "").await;
    empty.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(empty.json::<Value>()["code"], "VALIDATION_ERROR");

    app.ask(&sita.access_token, "missing-course", FIRST)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_question_rate_limit() {
    let config = AppConfig {
        question_rate_limit: 2,
        question_rate_window: Duration::from_secs(60),
        ..test_config()
    };
    let app = spawn_app(config).await;
    let teacher = app.register("Hari", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let ram = app.register("Ram", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;

    app.ask(&sita.access_token, &course.id, FIRST)
        .await
        .assert_status(StatusCode::CREATED);
    app.ask(&sita.access_token, &course.id, "What is a limit?")
        .await
        .assert_status(StatusCode::CREATED);

    let limited = app
        .ask(&sita.access_token, &course.id, "Why is the chain rule true?")
        .await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.json::<Value>()["code"], "RATE_LIMITED");

    // Limits are per student.
    app.ask(&ram.access_token, &course.id, "Why is the chain rule true?")
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_rating_flow() {
    let app = spawn_app(test_config()).await;
    let teacher = app.register("Hari", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let ram = app.register("Ram", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;

    let query = app
        .ask(&sita.access_token, &course.id, FIRST)
        .await
        .json::<QueryResponse>();
    let rate = json!({ "query_id": query.id, "teacher_id": teacher.user.id, "rating": 4 });

    // Not answered yet.
    app.post("/queries/rate", &sita.access_token, rate.clone())
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.patch(
        &format!("/queries/{}/answer", query.id),
        &teacher.access_token,
        json!({ "answer": "Rate of change of a function" }),
    )
    .await
    .assert_status_ok();

    app.post("/queries/rate", &ram.access_token, rate.clone())
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.post(
        "/queries/rate",
        &sita.access_token,
        json!({ "query_id": query.id, "teacher_id": teacher.user.id, "rating": 9 }),
    )
    .await
    .assert_status(StatusCode::BAD_REQUEST);

    let rated = app.post("/queries/rate", &sita.access_token, rate.clone()).await;
    rated.assert_status_ok();
    let summary = rated.json::<TeacherRatingResponse>();
    assert_eq!(summary.total_ratings, 1);
    assert!((summary.average_rating - 4.0).abs() < 1e-9);

    app.post("/queries/rate", &sita.access_token, rate)
        .await
        .assert_status(StatusCode::CONFLICT);

    let mine = app
        .get(&format!("/queries/{}/rating", query.id), &sita.access_token)
        .await
        .json::<Value>();
    assert_eq!(mine["rating"], 4);

    let public = app
        .get(
            &format!("/queries/teacher/{}/rating", teacher.user.id),
            &ram.access_token,
        )
        .await
        .json::<TeacherRatingResponse>();
    assert_eq!(public.total_ratings, 1);
}

#[tokio::test]
async fn test_notifications_over_http() {
    let app = spawn_app(test_config()).await;
    let teacher = app.register("Hari", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;

    let query = app
        .ask(&sita.access_token, &course.id, FIRST)
        .await
        .json::<QueryResponse>();

    let mut notifications = Vec::new();
    for _ in 0..50 {
        notifications = app
            .get("/queries/notifications", &teacher.access_token)
            .await
            .json::<Vec<NotificationResponse>>();
        if !notifications.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].query_id, query.id);
    assert!(!notifications[0].read);

    let path = format!("/queries/notifications/{}/read", notifications[0].id);
    app.patch(&path, &sita.access_token, json!({}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.patch(&path, &teacher.access_token, json!({}))
        .await
        .assert_status_ok();

    let after = app
        .get("/queries/notifications", &teacher.access_token)
        .await
        .json::<Vec<NotificationResponse>>();
    assert!(after[0].read);
}

#[tokio::test]
async fn test_teacher_course_views_and_insights() {
    let app = spawn_app(test_config()).await;
    let teacher = app.register("Hari", "teacher").await;
    let other = app.register("Gita", "teacher").await;
    let sita = app.register("Sita", "student").await;
    let course = app.course(&teacher.access_token, "Calculus").await;

    app.ask(&sita.access_token, &course.id, FIRST)
        .await
        .assert_status(StatusCode::CREATED);
    app.ask(&sita.access_token, &course.id, "What is a limit?")
        .await
        .assert_status(StatusCode::CREATED);

    let students = app
        .get(
            &format!("/queries/teacher/course/{}/students", course.id),
            &teacher.access_token,
        )
        .await
        .json::<Vec<Value>>();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["student_id"], sita.user.id.as_str());
    assert_eq!(students[0]["has_pending"], true);

    let history = app
        .get(
            &format!("/queries/teacher/course/{}/student/{}", course.id, sita.user.id),
            &teacher.access_token,
        )
        .await
        .json::<Vec<QueryResponse>>();
    assert_eq!(history.len(), 2);

    let insights = app
        .get(
            &format!("/queries/teacher/course/{}/insights", course.id),
            &teacher.access_token,
        )
        .await;
    insights.assert_status_ok();
    let insights = insights.json::<Value>();
    assert_eq!(insights["pending_questions"], 2);
    assert_eq!(insights["clusters"][0]["topic"], "Calculus");
    assert_eq!(insights["emotions"][0]["emotion"], "CURIOUS");
    assert_eq!(insights["emotions"][0]["count"], 2);

    app.get(
        &format!("/queries/teacher/course/{}/insights", course.id),
        &other.access_token,
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);

    let teaching = app
        .get("/courses/teaching", &teacher.access_token)
        .await
        .json::<Vec<CourseResponse>>();
    assert_eq!(teaching.len(), 1);
}

#[tokio::test]
async fn test_admin_manages_teachers_and_subjects() {
    let app = spawn_app(test_config()).await;
    let admin = app.register("Principal", "admin").await;
    let student = app.register("Sita", "student").await;

    app.get("/admin/teachers", &student.access_token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let created = app
        .post(
            "/admin/teachers",
            &admin.access_token,
            json!({
                "name": "Hari",
                "email": "hari@school.test",
                "password": "secret-password",
                "role": "student",
            }),
        )
        .await;
    created.assert_status(StatusCode::CREATED);
    let teacher = created.json::<UserResponse>();
    assert_eq!(teacher.role, crate::models::Role::Teacher);

    let teachers = app
        .get("/admin/teachers", &admin.access_token)
        .await
        .json::<Vec<TeacherSummary>>();
    assert_eq!(teachers.len(), 1);
    assert_eq!(teachers[0].total_ratings, 0);

    app.post("/admin/subjects", &admin.access_token, json!({ "name": "Calculus" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.post(
        "/admin/subjects",
        &admin.access_token,
        json!({ "name": "Calculus", "teacher_id": student.user.id }),
    )
    .await
    .assert_status(StatusCode::NOT_FOUND);
    app.post(
        "/admin/subjects",
        &admin.access_token,
        json!({ "name": "Calculus", "teacher_id": teacher.id }),
    )
    .await
    .assert_status(StatusCode::CREATED);

    let subjects = app
        .get("/admin/subjects", &admin.access_token)
        .await
        .json::<Vec<CourseResponse>>();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].teacher_name, "Hari");

    app.server
        .delete(&format!("/admin/teachers/{}", teacher.id))
        .add_header(AUTHORIZATION, bearer(&admin.access_token))
        .await
        .assert_status_ok();

    let subjects = app
        .get("/admin/subjects", &admin.access_token)
        .await
        .json::<Vec<CourseResponse>>();
    assert!(subjects.is_empty(), "subjects go with their teacher");

    app.server
        .delete(&format!("/admin/teachers/{}", teacher.id))
        .add_header(AUTHORIZATION, bearer(&admin.access_token))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
