// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros for consistent field names and message patterns across the application
///
/// These macros ensure:
/// - Consistent field naming conventions
/// - Appropriate logging levels for different scenarios
/// - Structured logging with context

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, question_id = $question_id:expr) => {
        tracing::debug!(
            operation = $operation,
            question_id = %$question_id,
            "API operation started"
        );
    };
    ($operation:expr, username = $username:expr) => {
        tracing::debug!(
            operation = $operation,
            username = %$username,
            "API operation started"
        );
    };
    ($operation:expr, topic = $topic:expr) => {
        tracing::debug!(
            operation = $operation,
            topic = %$topic,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "API operation started"
        );
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            question_id = %$question_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, username = $username:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            username = %$username,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            "API operation completed: {}", $msg
        );
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, topic = $topic:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            topic = %$topic,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr, question_id = $question_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_id = %$question_id,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation started"
        );
    };
}

/// Log service operation success
#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, question_count = $count:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_count = $count,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, question_id = $question_id:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_id = %$question_id,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

/// Log service operation errors
#[macro_export]
macro_rules! log_service_error {
    ($service:expr, $operation:expr, question_id = $question_id:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            question_id = %$question_id,
            error = %$error,
            "Service operation failed"
        );
    };
    ($service:expr, $operation:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            error = %$error,
            "Service operation failed"
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

/// Log database operation performance and results
#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, question_id = $question_id:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            question_id = %$question_id,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = $operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// LLM Service Logging Macros
// ============================================================================

/// Log LLM service operations with provider context
#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, prompt_length = $length:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            prompt_length = $length,
            "LLM operation started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr, response_length = $length:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            response_length = $length,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            error = %$error,
            "LLM operation failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(
            component = "llm_service",
            operation = $operation,
            "LLM operation warning: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and shutdown events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "shutdown",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}
