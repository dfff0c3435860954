use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::database::Database;
use crate::document_store::{unique_object_name, DocumentStore};
use crate::errors::{DataAccessError, ExtractionError, StudyError};
use crate::extractor::{ContentExtractor, ExtractedDocument};
use crate::grading::GradingEngine;
use crate::models::*;
use crate::progress;
use crate::question_generator::{QuestionGenerator, MAX_CONTEXT_QUESTIONS};
use crate::{log_service_error, log_service_start, log_service_success, log_validation};

pub type StudyResult<T> = Result<T, StudyError>;

pub const DEFAULT_HISTORY_LIMIT: i64 = 10;
pub const MAX_HISTORY_LIMIT: i64 = 500;
const MAX_USERNAME_CHARS: usize = 64;
const MAX_TOPIC_CHARS: usize = 200;

fn invalid(component: &str, message: String) -> StudyError {
    log_validation!(failure, component, error = message);
    StudyError::InvalidInput(message)
}

fn validate_username(username: &str) -> StudyResult<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(invalid("username", "username must not be empty".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(invalid(
            "username",
            format!("username is longer than {} characters", MAX_USERNAME_CHARS),
        ));
    }
    Ok(username.to_string())
}

fn validate_topic(topic: &str) -> StudyResult<String> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(invalid("topic", "topic must not be empty".to_string()));
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return Err(invalid(
            "topic",
            format!("topic is longer than {} characters", MAX_TOPIC_CHARS),
        ));
    }
    Ok(topic.to_string())
}

fn validate_mix(mix: QuestionMix) -> StudyResult<()> {
    mix.validate().map_err(|msg| invalid("question_mix", msg))
}

/// Orchestrates the study workflows. The acting user is always passed in explicitly.
#[derive(Clone)]
pub struct StudyService {
    db: Database,
    store: Arc<dyn DocumentStore>,
    extractor: ContentExtractor,
    generator: QuestionGenerator,
    grader: GradingEngine,
}

impl StudyService {
    pub fn new(
        db: Database,
        store: Arc<dyn DocumentStore>,
        extractor: ContentExtractor,
        generator: QuestionGenerator,
        grader: GradingEngine,
    ) -> Self {
        Self {
            db,
            store,
            extractor,
            generator,
            grader,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Extract, store, generate, then persist every question in one transaction.
    /// Any failure along the way leaves the question table untouched.
    pub async fn ingest_documents(
        &self,
        username: &str,
        topic: &str,
        documents: Vec<UploadedDocument>,
        mix: QuestionMix,
    ) -> StudyResult<IngestReport> {
        let started = Instant::now();
        log_service_start!("study_service", "ingest_documents", topic = topic);

        let username = validate_username(username)?;
        let topic = validate_topic(topic)?;
        validate_mix(mix)?;
        if documents.is_empty() {
            return Err(invalid("documents", "at least one document is required".to_string()));
        }

        let (documents, extracted) = self.extract_all(documents).await?;

        let mut stored = Vec::with_capacity(documents.len());
        for (document, text) in documents.into_iter().zip(&extracted) {
            let object_name = unique_object_name(&username, text.format.extension());
            let saved = self
                .store
                .put(&object_name, text.format.mime_type(), document.bytes)
                .await
                .map_err(|e| {
                    log_service_error!("study_service", "ingest_documents", error = e);
                    e
                })?;
            stored.push(saved);
        }

        let source_text = ContentExtractor::combine(&extracted);
        let generated = self.generator.generate_from_text(&source_text, &topic, mix).await?;
        let questions = self.db.insert_questions(&generated).await?;

        log_service_success!(
            "study_service",
            "ingest_documents",
            question_count = questions.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(IngestReport {
            topic,
            documents: stored,
            questions,
        })
    }

    /// Parsing is CPU-bound, so it runs on the blocking pool and hands the uploads back
    async fn extract_all(
        &self,
        documents: Vec<UploadedDocument>,
    ) -> StudyResult<(Vec<UploadedDocument>, Vec<ExtractedDocument>)> {
        let extractor = self.extractor.clone();
        let (documents, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = documents
                .iter()
                .map(|document| extractor.extract_upload(document))
                .collect::<Result<Vec<_>, _>>();
            (documents, extracted)
        })
        .await
        .map_err(|e| {
            log_service_error!("study_service", "extract_all", error = e);
            ExtractionError::Aborted(e.to_string())
        })?;

        Ok((documents, extracted?))
    }

    /// Ask for more questions on a topic that already has some
    pub async fn generate_for_topic(&self, topic: &str, mix: QuestionMix) -> StudyResult<Vec<Question>> {
        let started = Instant::now();
        log_service_start!("study_service", "generate_for_topic", topic = topic);

        let topic = validate_topic(topic)?;
        validate_mix(mix)?;

        let existing = self
            .db
            .recent_question_texts(&topic, MAX_CONTEXT_QUESTIONS as i64)
            .await?;
        if existing.is_empty() {
            return Err(invalid(
                "topic",
                format!("topic '{}' has no questions yet; upload documents first", topic),
            ));
        }

        let generated = self.generator.generate_for_topic(&topic, mix, &existing).await?;
        let questions = self.db.insert_questions(&generated).await?;

        log_service_success!(
            "study_service",
            "generate_for_topic",
            question_count = questions.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(questions)
    }

    /// Grade a submission and append the attempt. A failed grading records nothing.
    pub async fn submit_answer(
        &self,
        username: &str,
        question_id: i64,
        submission: Submission,
    ) -> StudyResult<GradedAttempt> {
        let started = Instant::now();
        log_service_start!("study_service", "submit_answer", question_id = question_id);

        let username = validate_username(username)?;
        let question = self.get_question(question_id).await?;

        let judgment = self.grader.grade(&question, &submission).await.map_err(|e| {
            log_service_error!("study_service", "submit_answer", question_id = question_id, error = e);
            e
        })?;

        let attempt = self
            .db
            .insert_attempt(&NewAttempt {
                username,
                question_id,
                is_correct: judgment.is_correct,
                user_answer: submission.recorded_answer(),
            })
            .await?;

        log_service_success!(
            "study_service",
            "submit_answer",
            question_id = question_id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(GradedAttempt {
            attempt,
            feedback: judgment.feedback,
        })
    }

    pub async fn get_question(&self, question_id: i64) -> StudyResult<Question> {
        self.db
            .get_question(question_id)
            .await?
            .ok_or_else(|| DataAccessError::QuestionNotFound(question_id).into())
    }

    pub async fn study_questions(&self, filter: &QuestionFilter) -> StudyResult<Vec<Question>> {
        let topic = filter.topic.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let mut questions = self.db.list_questions(topic, filter.kind).await?;

        if let Some(username) = &filter.review_for {
            let review_ids: HashSet<i64> = self
                .review_questions(username)
                .await?
                .into_iter()
                .map(|question| question.id)
                .collect();
            questions.retain(|question| review_ids.contains(&question.id));
        }

        Ok(questions)
    }

    pub async fn topics(&self) -> StudyResult<Vec<TopicSummary>> {
        Ok(self.db.topic_summaries().await?)
    }

    pub async fn progress(&self, username: &str) -> StudyResult<ProgressReport> {
        let username = validate_username(username)?;
        let records = self.db.attempt_records_for_user(&username).await?;
        log_service_success!(
            "study_service",
            "progress",
            format!("{} attempts aggregated for {}", records.len(), username)
        );
        Ok(progress::build_report(&username, &records))
    }

    pub async fn review_questions(&self, username: &str) -> StudyResult<Vec<Question>> {
        let username = validate_username(username)?;
        let records = self.db.attempt_records_for_user(&username).await?;
        Ok(progress::review_list(&records))
    }

    /// Latest attempts, newest first
    pub async fn history(&self, username: &str, limit: Option<i64>) -> StudyResult<Vec<AttemptRecord>> {
        let username = validate_username(username)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(invalid(
                "history_limit",
                format!("limit must be between 1 and {}", MAX_HISTORY_LIMIT),
            ));
        }
        Ok(self.db.recent_attempts(&username, limit).await?)
    }
}
