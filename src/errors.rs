use crate::api::ApiResponse;
use crate::models::DocumentFormat;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Failures of a single request/response exchange with the model service
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("model request timed out after {0}s")]
    Timeout(u64),

    #[error("model service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("model service transport error: {0}")]
    Transport(String),

    #[error("model service returned no candidates")]
    EmptyResponse,

    #[error("model HTTP client could not be built: {0}")]
    ClientSetup(String),
}

impl LLMError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LLMError::Timeout(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document is {size} bytes, above the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("corrupt {format} document: {reason}")]
    Corrupt {
        format: DocumentFormat,
        reason: String,
    },

    #[error("{0} document contains no extractable text")]
    NoText(DocumentFormat),

    #[error("extraction did not finish: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Model(#[from] LLMError),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model response does not match the question schema: {0}")]
    Malformed(String),

    #[error("generated question #{index} rejected: {reason}")]
    InvalidQuestion { index: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("model request failed: {0}")]
    Model(#[from] LLMError),

    #[error("model returned an empty judgment")]
    EmptyResponse,

    #[error("model judgment does not match the expected shape: {0}")]
    Malformed(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DataAccessError {
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),

    #[error("document storage failed: {0}")]
    Storage(String),

    #[error("question {0} does not exist")]
    QuestionNotFound(i64),
}

/// Every failure a study workflow can surface to its caller
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Grading(#[from] GradingError),

    #[error(transparent)]
    DataAccess(#[from] DataAccessError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for StudyError {
    fn from(err: sqlx::Error) -> Self {
        StudyError::DataAccess(DataAccessError::Query(err))
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Document rejected: {0}")]
    DocumentRejected(String),

    #[error("LLM service error: {message}")]
    LLMError { message: String, timed_out: bool },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<StudyError> for ApiError {
    fn from(err: StudyError) -> Self {
        match err {
            StudyError::InvalidInput(msg) => ApiError::ValidationError(msg),
            StudyError::Extraction(e) => ApiError::DocumentRejected(e.to_string()),
            StudyError::Grading(GradingError::InvalidSubmission(msg)) => {
                ApiError::ValidationError(msg)
            }
            StudyError::Generation(e) => {
                let timed_out = matches!(&e, GenerationError::Model(inner) if inner.is_timeout());
                ApiError::LLMError {
                    message: e.to_string(),
                    timed_out,
                }
            }
            StudyError::Grading(e) => {
                let timed_out = matches!(&e, GradingError::Model(inner) if inner.is_timeout());
                ApiError::LLMError {
                    message: e.to_string(),
                    timed_out,
                }
            }
            StudyError::DataAccess(DataAccessError::QuestionNotFound(id)) => {
                ApiError::NotFound(format!("Question with id '{}' not found", id))
            }
            StudyError::DataAccess(DataAccessError::Storage(msg)) => ApiError::StorageError(msg),
            StudyError::DataAccess(e) => ApiError::DatabaseError(e.to_string()),
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(format!("{} not found", context.resource_type))),
                )
            }
            ApiError::ValidationError(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::DocumentRejected(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Document could not be processed"
                );
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::LLMError { timed_out, .. } => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    timed_out = *timed_out,
                    error = %self,
                    "LLM service error"
                );
                let status = if *timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (
                    status,
                    Json(ApiResponse::error(
                        "AI service could not complete the request. Please try again.".to_string(),
                    )),
                )
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
            ApiError::StorageError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Storage error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Document storage failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }
}

/// Helper macro for structured error responses
#[macro_export]
macro_rules! api_error {
    (not_found, $operation:expr, $resource_type:expr, $id:expr) => {
        $crate::errors::ApiError::NotFound(format!("{} with id '{}' not found", $resource_type, $id))
            .to_response_with_context(
                $crate::errors::ErrorContext::new($operation, $resource_type).with_id(&$id.to_string()),
            )
    };

    (validation, $operation:expr, $resource_type:expr, $message:expr) => {
        $crate::errors::ApiError::ValidationError($message.to_string())
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (study, $operation:expr, $resource_type:expr, $error:expr) => {
        $crate::errors::ApiError::from($error)
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (study, $operation:expr, $resource_type:expr, $id:expr, $error:expr) => {
        $crate::errors::ApiError::from($error).to_response_with_context(
            $crate::errors::ErrorContext::new($operation, $resource_type).with_id(&$id.to_string()),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("submit_answer", "question").with_id("42");

        assert_eq!(context.operation, "submit_answer");
        assert_eq!(context.resource_type, "question");
        assert_eq!(context.resource_id, Some("42".to_string()));
    }

    #[test]
    fn test_study_error_classification() {
        let err = StudyError::Extraction(ExtractionError::UnsupportedFormat("docx".into()));
        assert!(matches!(ApiError::from(err), ApiError::DocumentRejected(_)));

        let err = StudyError::DataAccess(DataAccessError::QuestionNotFound(7));
        assert!(matches!(ApiError::from(err), ApiError::NotFound(_)));

        let err = StudyError::Grading(GradingError::InvalidSubmission("blank".into()));
        assert!(matches!(ApiError::from(err), ApiError::ValidationError(_)));

        let err = StudyError::Generation(GenerationError::Model(LLMError::Timeout(60)));
        assert!(matches!(
            ApiError::from(err),
            ApiError::LLMError { timed_out: true, .. }
        ));

        let err = StudyError::Grading(GradingError::Malformed("eof".into()));
        assert!(matches!(
            ApiError::from(err),
            ApiError::LLMError { timed_out: false, .. }
        ));
    }

    #[test]
    fn test_api_error_responses() {
        let context = ErrorContext::new("get_question", "question").with_id("123");
        let (status, _) = ApiError::NotFound("gone".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let context = ErrorContext::new("ingest_documents", "document");
        let (status, _) =
            ApiError::DocumentRejected("bad pdf".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let context = ErrorContext::new("grade_essay", "question");
        let (status, _) = ApiError::LLMError {
            message: "slow".to_string(),
            timed_out: true,
        }
        .to_response_with_context(context);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let context = ErrorContext::new("list_topics", "topic");
        let (status, _) =
            ApiError::DatabaseError("locked".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
