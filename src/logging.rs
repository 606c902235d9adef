// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros for consistent field names and message patterns
/// across the application.

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(
            operation = $operation,
            user_id = %$user_id,
            "API operation started"
        );
    };
    ($operation:expr, user_id = $user_id:expr, question_id = $question_id:expr) => {
        tracing::debug!(
            operation = $operation,
            user_id = %$user_id,
            question_id = %$question_id,
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

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, question_id = $question_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            question_id = %$question_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            question_id = %$question_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            "API operation warning: {}", $msg
        );
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
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

/// Log service operation errors
#[macro_export]
macro_rules! log_service_error {
    ($service:expr, $operation:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            error = %$error,
            "Service operation failed"
        );
    };
}

/// Log service warnings
#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service warning: {}",
            $msg
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

/// Log database operation performance and results
#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "card_store",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "card_store",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "card_store",
            operation = $operation,
            error = %$error,
            "Database operation failed"
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

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn test_logging_macros_compile() {
        let user_id = Uuid::new_v4();
        let question_id = Uuid::new_v4();
        let error = anyhow::anyhow!("test error");

        log_api_start!("test_operation", user_id = user_id);
        log_api_start!("test_operation", user_id = user_id, question_id = question_id);
        log_api_start!("test_operation");

        log_api_success!("test_operation", question_id = question_id, "operation completed");
        log_api_success!("test_operation", count = 5, "cards returned");
        log_api_success!("test_operation", "done");

        log_api_error!("test_operation", question_id = question_id, error = error, "failed");
        log_api_warn!("test_operation", question_id = question_id, "operation warning");
        log_api_warn!("test_operation", "operation warning");

        log_service_start!("review_service", "record_review", question_id = question_id);
        log_service_start!("review_service", "due_cards");
        log_service_warn!("review_service", "record_review", "write conflict");
        log_service_error!("review_service", "record_review", error = error);

        log_db_operation!(debug, "get_due", count = 3, duration_ms = 10);
        log_db_operation!(info, "migrate", "schema initialized");
        log_db_operation!(error, "save", error = error);

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_validation!(success, "configuration", "validated");
        log_validation!(failure, "configuration", error = error);
    }
}
