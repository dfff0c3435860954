use axum::{
    extract::{
        multipart::Multipart,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    api_error,
    models::*,
    study_service::StudyService,
};

use crate::{log_api_start, log_api_success};

/// Upper bound on files accepted in one upload request
pub const MAX_DOCUMENTS_PER_UPLOAD: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub study_service: StudyService,
    pub max_upload_bytes: usize,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

/// Either `{"answer": "..."}` for quiz/essay or `{"knew_it": true}` for flashcards
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub answer: Option<String>,
    pub knew_it: Option<bool>,
}

impl SubmitAnswerRequest {
    fn into_submission(self) -> Result<Submission, &'static str> {
        match (self.answer, self.knew_it) {
            (Some(answer), None) => Ok(Submission::Answer(answer)),
            (None, Some(knew_it)) => Ok(Submission::SelfAssessment(knew_it)),
            (Some(_), Some(_)) => Err("provide either 'answer' or 'knew_it', not both"),
            (None, None) => Err("request must contain 'answer' or 'knew_it'"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestionQuery {
    pub topic: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub only_missed: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

fn parse_question_id(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not a valid question id", raw))
}

pub async fn health() -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

// Document endpoints

struct UploadForm {
    topic: String,
    mix: QuestionMix,
    documents: Vec<UploadedDocument>,
}

async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm, String> {
    let mut topic = None;
    let mut mix = QuestionMix::default();
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("invalid multipart body: {}", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "topic" => {
                topic = Some(field.text().await.map_err(|e| format!("unreadable topic: {}", e))?);
            }
            "flashcards" | "quiz" | "essay" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| format!("unreadable '{}' field: {}", name, e))?;
                let count: u32 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{}' must be a non-negative integer", name))?;
                match name.as_str() {
                    "flashcards" => mix.flashcards = count,
                    "quiz" => mix.quiz = count,
                    _ => mix.essay = count,
                }
            }
            "file" | "files" => {
                if documents.len() == MAX_DOCUMENTS_PER_UPLOAD {
                    return Err(format!(
                        "at most {} documents can be uploaded at once",
                        MAX_DOCUMENTS_PER_UPLOAD
                    ));
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("could not read '{}': {}", file_name, e))?;
                documents.push(UploadedDocument {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    Ok(UploadForm {
        topic: topic.ok_or_else(|| "missing 'topic' field".to_string())?,
        mix,
        documents,
    })
}

pub async fn upload_documents(
    State(state): State<AppState>,
    Path(username): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<IngestReport> {
    log_api_start!("upload_documents", username = username);

    let form = match read_upload_form(&mut multipart).await {
        Ok(form) => form,
        Err(message) => return Err(api_error!(validation, "upload_documents", "document", message)),
    };

    info!(
        username = %username,
        topic = %form.topic,
        documents = form.documents.len(),
        flashcards = form.mix.flashcards,
        quiz = form.mix.quiz,
        essay = form.mix.essay,
        "Ingesting uploaded documents"
    );

    match state
        .study_service
        .ingest_documents(&username, &form.topic, form.documents, form.mix)
        .await
    {
        Ok(report) => {
            log_api_success!(
                "upload_documents",
                count = report.questions.len(),
                format!("questions generated for topic '{}'", report.topic)
            );
            Ok(Json(ApiResponse::success(report)))
        }
        Err(e) => Err(api_error!(study, "upload_documents", "document", username, e)),
    }
}

// Topic endpoints

pub async fn list_topics(State(state): State<AppState>) -> ApiResult<Vec<TopicSummary>> {
    log_api_start!("list_topics");

    match state.study_service.topics().await {
        Ok(topics) => {
            log_api_success!("list_topics", count = topics.len(), "topics listed");
            Ok(Json(ApiResponse::success(topics)))
        }
        Err(e) => Err(api_error!(study, "list_topics", "topic", e)),
    }
}

pub async fn generate_for_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    payload: Result<Json<QuestionMix>, JsonRejection>,
) -> ApiResult<Vec<Question>> {
    log_api_start!("generate_for_topic", topic = topic);

    let Json(mix) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return Err(api_error!(validation, "generate_for_topic", "topic", rejection.body_text()))
        }
    };

    match state.study_service.generate_for_topic(&topic, mix).await {
        Ok(questions) => {
            log_api_success!("generate_for_topic", count = questions.len(), "questions generated");
            Ok(Json(ApiResponse::success(questions)))
        }
        Err(e) => Err(api_error!(study, "generate_for_topic", "topic", topic, e)),
    }
}

// Question endpoints

pub async fn list_questions(
    State(state): State<AppState>,
    query: Result<Query<QuestionQuery>, QueryRejection>,
) -> ApiResult<Vec<Question>> {
    log_api_start!("list_questions");

    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return Err(api_error!(validation, "list_questions", "question", rejection.body_text()))
        }
    };

    let kind = match query.kind.as_deref().map(str::parse::<QuestionType>).transpose() {
        Ok(kind) => kind,
        Err(message) => return Err(api_error!(validation, "list_questions", "question", message)),
    };

    let review_for = match (query.only_missed, query.username) {
        (true, Some(username)) => Some(username),
        (true, None) => {
            return Err(api_error!(
                validation,
                "list_questions",
                "question",
                "only_missed requires a username"
            ))
        }
        (false, _) => None,
    };

    let filter = QuestionFilter {
        topic: query.topic,
        kind,
        review_for,
    };

    match state.study_service.study_questions(&filter).await {
        Ok(questions) => {
            log_api_success!("list_questions", count = questions.len(), "questions listed");
            Ok(Json(ApiResponse::success(questions)))
        }
        Err(e) => Err(api_error!(study, "list_questions", "question", e)),
    }
}

pub async fn get_question(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Question> {
    let question_id = match parse_question_id(&id) {
        Ok(question_id) => question_id,
        Err(message) => return Err(api_error!(validation, "get_question", "question", message)),
    };
    log_api_start!("get_question", question_id = question_id);

    match state.study_service.get_question(question_id).await {
        Ok(question) => {
            log_api_success!("get_question", question_id = question_id, "question retrieved");
            Ok(Json(ApiResponse::success(question)))
        }
        Err(e) => Err(api_error!(study, "get_question", "question", question_id, e)),
    }
}

// Answer and progress endpoints

pub async fn submit_answer(
    State(state): State<AppState>,
    Path((username, id)): Path<(String, String)>,
    payload: Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> ApiResult<GradedAttempt> {
    let question_id = match parse_question_id(&id) {
        Ok(question_id) => question_id,
        Err(message) => return Err(api_error!(validation, "submit_answer", "question", message)),
    };
    log_api_start!("submit_answer", question_id = question_id);

    let submission = match payload {
        Ok(Json(request)) => match request.into_submission() {
            Ok(submission) => submission,
            Err(message) => return Err(api_error!(validation, "submit_answer", "question", message)),
        },
        Err(rejection) => {
            return Err(api_error!(validation, "submit_answer", "question", rejection.body_text()))
        }
    };

    match state
        .study_service
        .submit_answer(&username, question_id, submission)
        .await
    {
        Ok(graded) => {
            log_api_success!(
                "submit_answer",
                question_id = question_id,
                format!("answer graded, correct: {}", graded.attempt.is_correct)
            );
            Ok(Json(ApiResponse::success(graded)))
        }
        Err(e) => Err(api_error!(study, "submit_answer", "question", question_id, e)),
    }
}

pub async fn get_progress(State(state): State<AppState>, Path(username): Path<String>) -> ApiResult<ProgressReport> {
    log_api_start!("get_progress", username = username);

    match state.study_service.progress(&username).await {
        Ok(report) => {
            log_api_success!("get_progress", username = username, "progress computed");
            Ok(Json(ApiResponse::success(report)))
        }
        Err(e) => Err(api_error!(study, "get_progress", "user", username, e)),
    }
}

pub async fn get_review(State(state): State<AppState>, Path(username): Path<String>) -> ApiResult<Vec<Question>> {
    log_api_start!("get_review", username = username);

    match state.study_service.review_questions(&username).await {
        Ok(questions) => {
            log_api_success!("get_review", count = questions.len(), "review list built");
            Ok(Json(ApiResponse::success(questions)))
        }
        Err(e) => Err(api_error!(study, "get_review", "user", username, e)),
    }
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(username): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<AttemptRecord>> {
    log_api_start!("get_history", username = username);

    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return Err(api_error!(validation, "get_history", "user", rejection.body_text())),
    };

    match state.study_service.history(&username, query.limit).await {
        Ok(records) => {
            log_api_success!("get_history", count = records.len(), "history listed");
            Ok(Json(ApiResponse::success(records)))
        }
        Err(e) => Err(api_error!(study, "get_history", "user", username, e)),
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .max_upload_bytes
        .saturating_mul(MAX_DOCUMENTS_PER_UPLOAD);

    Router::new()
        .route("/api/health", get(health))
        // Topic routes
        .route("/api/topics", get(list_topics))
        .route("/api/topics/:topic/generate", post(generate_for_topic))
        // Question routes
        .route("/api/questions", get(list_questions))
        .route("/api/questions/:id", get(get_question))
        // User routes
        .route("/api/users/:username/documents", post(upload_documents))
        .route("/api/users/:username/questions/:id/answer", post(submit_answer))
        .route("/api/users/:username/progress", get(get_progress))
        .route("/api/users/:username/review", get(get_review))
        .route("/api/users/:username/history", get(get_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
