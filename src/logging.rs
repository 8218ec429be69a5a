// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros so every component reports with the same field
/// names (`service`, `operation`, `component`, `pack_id`, ...).

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, subject_id = $subject_id:expr) => {
        tracing::debug!(
            service = $service,
            operation = $operation,
            subject_id = %$subject_id,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr, question_id = $question_id:expr) => {
        tracing::debug!(
            service = $service,
            operation = $operation,
            question_id = %$question_id,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr) => {
        tracing::debug!(
            service = $service,
            operation = $operation,
            "Service operation started"
        );
    };
}

/// Log service operation success
#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, subject_id = $subject_id:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            subject_id = %$subject_id,
            "Service operation completed: {}", $msg
        );
    };
    ($service:expr, $operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_id = %$question_id,
            "Service operation completed: {}", $msg
        );
    };
    ($service:expr, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            count = $count,
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
            component = "database",
            operation = %$operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = %$operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = %$operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// Merge / Transfer Logging Macros
// ============================================================================

/// Log contribution merge and bank transfer progress with pack context
#[macro_export]
macro_rules! log_merge_event {
    (start, pack_id = $pack_id:expr, questions = $count:expr) => {
        tracing::info!(
            component = "merge_engine",
            pack_id = %$pack_id,
            question_count = $count,
            "Contribution merge started"
        );
    };
    (created, $entity:expr, pack_id = $pack_id:expr, id = $id:expr) => {
        tracing::debug!(
            component = "merge_engine",
            pack_id = %$pack_id,
            entity = $entity,
            id = %$id,
            "Entity created from contribution"
        );
    };
    (dedup, pack_id = $pack_id:expr, index = $index:expr, existing = $existing:expr) => {
        tracing::debug!(
            component = "merge_engine",
            pack_id = %$pack_id,
            index = $index,
            existing_question_id = %$existing,
            "Contribution question deduplicated"
        );
    };
    (issue, pack_id = $pack_id:expr, index = $index:expr, $msg:expr) => {
        tracing::warn!(
            component = "merge_engine",
            pack_id = %$pack_id,
            index = ?$index,
            "Contribution item skipped: {}", $msg
        );
    };
    (done, pack_id = $pack_id:expr, imported = $imported:expr, deduplicated = $dedup:expr, errors = $errors:expr) => {
        tracing::info!(
            component = "merge_engine",
            pack_id = %$pack_id,
            imported = $imported,
            deduplicated = $dedup,
            error_count = $errors,
            "Contribution merge finished"
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
// Performance Logging Macros
// ============================================================================

/// Log performance metrics with consistent structure
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, duration_ms = $duration:expr, items = $items:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            items = $items,
            "Performance metrics"
        );
    };
    ($operation:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            "Performance metrics"
        );
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
