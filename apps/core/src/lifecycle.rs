//! Question submission and answering.
//!
//! `submit` runs a question through moderation, the subject check, embedding and the
//! FAQ matcher. A match is returned without persisting anything; otherwise the query
//! and a fresh FAQ stub are written in one transaction. `answer` copies the teacher's
//! answer into the query and its stub, again in one transaction, then flags both as
//! answered in the native index.

use crate::actors::traits::EmbeddingProvider;
use crate::database;
use crate::error::{AppError, RejectionCode};
use crate::faq::{Collection, FaqMatch, FaqMatcher};
use crate::models::{EmbeddedQuestion, Query, Role, User};
use crate::moderation::{ModerationGate, SubjectRelevanceGate};
use sqlx::types::Json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The question was persisted and awaits a teacher.
    Created(Query),
    /// An existing answer was reused.
    Matched(FaqMatch),
}

#[derive(Clone)]
pub struct QueryLifecycle {
    pool: SqlitePool,
    moderation: ModerationGate,
    relevance: SubjectRelevanceGate,
    embedder: Arc<dyn EmbeddingProvider>,
    matcher: FaqMatcher,
}

impl QueryLifecycle {
    pub fn new(
        pool: SqlitePool,
        moderation: ModerationGate,
        relevance: SubjectRelevanceGate,
        embedder: Arc<dyn EmbeddingProvider>,
        matcher: FaqMatcher,
    ) -> Self {
        Self {
            pool,
            moderation,
            relevance,
            embedder,
            matcher,
        }
    }

    #[instrument(skip(self, student, question), fields(student_id = %student.id))]
    pub async fn submit(
        &self,
        student: &User,
        course_id: &str,
        question: &str,
    ) -> Result<SubmitOutcome, AppError> {
        if student.role != Role::Student {
            return Err(AppError::Forbidden(
                "Only students can ask questions".to_string(),
            ));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("Question cannot be empty".to_string()));
        }

        let course = database::get_course(&self.pool, course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

        let moderation = self.moderation.check(question).await;
        if moderation.rejects() {
            info!(label = %moderation.label, confidence = moderation.confidence, "Question rejected by moderation");
            return Err(AppError::Rejected {
                code: RejectionCode::ModerationBlocked,
                detail: format!(
                    "Your question was blocked by content moderation ({})",
                    moderation.label
                ),
            });
        }

        let relevance = self.relevance.check(question, &course.name).await;
        if self.relevance.rejects(&relevance) {
            info!(confidence = relevance.confidence, "Question rejected as off-subject");
            return Err(AppError::Rejected {
                code: RejectionCode::SubjectMismatch,
                detail: relevance.reason,
            });
        }

        let embedding = self.embedder.embed(question).await;
        match &embedding {
            Some(vector) => {
                if let Some(found) = self.matcher.find_match(&course.id, vector).await {
                    return Ok(SubmitOutcome::Matched(found));
                }
            }
            None => warn!("Embedding unavailable, skipping FAQ matching"),
        }

        let now = database::now();
        let stub = embedding.as_ref().map(|vector| EmbeddedQuestion {
            id: database::new_id(),
            course_id: course.id.clone(),
            question: question.to_string(),
            embedding: Json(vector.clone()),
            frequency: 1,
            answer: None,
            created_at: now,
            updated_at: now,
        });
        let query = Query {
            id: database::new_id(),
            course_id: course.id.clone(),
            course_name: course.name.clone(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            student_roll: student.roll.clone(),
            teacher_id: course.teacher_id.clone(),
            question: question.to_string(),
            embedding: embedding.clone().map(Json),
            embedded_question_id: stub.as_ref().map(|s| s.id.clone()),
            answer: None,
            answered: false,
            created_at: now,
            answered_at: None,
        };

        let mut tx = self.pool.begin().await?;
        if let Some(stub) = &stub {
            database::insert_embedded_question(&mut tx, stub).await?;
        }
        database::insert_query(&mut tx, &query).await?;
        tx.commit().await?;

        info!(query_id = %query.id, course_id = %course.id, "Question created");

        if let Some(vector) = &embedding {
            let search = self.matcher.search();
            if let Some(stub) = &stub {
                search
                    .index(Collection::Faq, &stub.id, &course.id, vector, false)
                    .await;
            }
            search
                .index(Collection::Queries, &query.id, &course.id, vector, false)
                .await;
        }

        self.notify(
            course.teacher_id.clone(),
            format!(
                "New question from {} in {}",
                student.name, course.name
            ),
            query.id.clone(),
            course.id.clone(),
        );

        Ok(SubmitOutcome::Created(query))
    }

    #[instrument(skip(self, teacher, answer), fields(teacher_id = %teacher.id))]
    pub async fn answer(
        &self,
        teacher: &User,
        query_id: &str,
        answer: &str,
    ) -> Result<Query, AppError> {
        if teacher.role != Role::Teacher {
            return Err(AppError::Forbidden(
                "Only teachers can answer questions".to_string(),
            ));
        }
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AppError::Validation("Answer cannot be empty".to_string()));
        }

        let query = database::get_query(&self.pool, query_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Query not found".to_string()))?;
        if query.teacher_id != teacher.id {
            return Err(AppError::Forbidden(
                "You are not the teacher for this course".to_string(),
            ));
        }

        let now = database::now();
        let mut tx = self.pool.begin().await?;
        database::set_query_answer(&mut tx, &query.id, answer, now).await?;
        if let Some(stub_id) = &query.embedded_question_id {
            if !database::set_embedded_answer(&mut tx, stub_id, answer, now).await? {
                warn!(stub_id = %stub_id, "Linked FAQ entry is missing");
            }
        }
        tx.commit().await?;

        info!(query_id = %query.id, "Question answered");

        self.reindex_answered(&query).await;

        let answered = Query {
            answer: Some(answer.to_string()),
            answered: true,
            answered_at: Some(now),
            ..query
        };

        self.notify(
            answered.student_id.clone(),
            format!(
                "Your question in {} has been answered by {}",
                answered.course_name, teacher.name
            ),
            answered.id.clone(),
            answered.course_id.clone(),
        );

        Ok(answered)
    }

    /// Marks the query and its stub as answered in the native index.
    async fn reindex_answered(&self, query: &Query) {
        let search = self.matcher.search();
        if let Some(vector) = &query.embedding {
            search
                .index(Collection::Queries, &query.id, &query.course_id, &vector.0, true)
                .await;
        }
        let Some(stub_id) = &query.embedded_question_id else {
            return;
        };
        match database::get_embedded_question(&self.pool, stub_id).await {
            Ok(Some(stub)) => {
                search
                    .index(Collection::Faq, &stub.id, &stub.course_id, &stub.embedding.0, true)
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!(stub_id = %stub_id, "Failed to load FAQ entry for indexing: {}", e),
        }
    }

    /// Writes a notification in the background; failures are only logged.
    fn notify(&self, user_id: String, message: String, query_id: String, course_id: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) =
                database::create_notification(&pool, &user_id, &message, &query_id, &course_id)
                    .await
            {
                warn!("Failed to create notification for {}: {}", user_id, e);
            }
        });
    }
}
