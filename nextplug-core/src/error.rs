//! Error types for the plugin engine.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Plugin id reported by errors that do not originate from a specific plugin.
pub const SYSTEM_PLUGIN_ID: &str = "system";

/// Machine-readable error codes surfaced to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Plugin, tool, action or resource does not exist
    NotFound,
    /// Plugin id is already installed
    AlreadyExists,
    /// Plugin is not in the `active` state
    NotActive,
    /// Plugin lacks the permission for an operation
    PermissionDenied,
    /// Sliding-window rate limit exceeded
    RateLimitExceeded,
    /// Input failed the declared schema
    ValidationError,
    /// Operation exceeded its execution window
    Timeout,
    /// Handler raised an error
    ExecutionError,
    /// Installation failed
    InstallationError,
    /// Enabling failed
    EnableError,
    /// Disabling failed
    DisableError,
    /// Lifecycle move not allowed from the current state
    InvalidStateTransition,
    /// Configuration failed schema validation or persistence
    ConfigurationError,
    /// Unmet dependency, conflict or cycle
    DependencyError,
    /// Required metadata fields missing
    InvalidMetadata,
    /// Version is not valid semver
    InvalidVersion,
    /// License not on the allow-list
    InvalidLicense,
    /// Metadata matched a dangerous pattern
    SecurityViolation,
    /// Dependency on a blacklisted package
    MaliciousPackage,
    /// Capability declaration is malformed
    InvalidCapability,
    /// Critical hook failure
    HookError,
    /// Message bus failure
    CommunicationError,
    /// Serialization or parsing failure
    SerializationError,
    /// Internal engine failure
    InternalError,
}

impl ErrorCode {
    /// Get the wire name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotActive => "NOT_ACTIVE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::InstallationError => "INSTALLATION_ERROR",
            Self::EnableError => "ENABLE_ERROR",
            Self::DisableError => "DISABLE_ERROR",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::DependencyError => "DEPENDENCY_ERROR",
            Self::InvalidMetadata => "INVALID_METADATA",
            Self::InvalidVersion => "INVALID_VERSION",
            Self::InvalidLicense => "INVALID_LICENSE",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::MaliciousPackage => "MALICIOUS_PACKAGE",
            Self::InvalidCapability => "INVALID_CAPABILITY",
            Self::HookError => "HOOK_ERROR",
            Self::CommunicationError => "COMMUNICATION_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin engine error types.
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// Plugin not installed
    #[error("Plugin not found: {plugin_id}")]
    NotFound {
        /// Plugin identifier
        plugin_id: String,
    },

    /// Plugin already installed
    #[error("Plugin already exists: {plugin_id}")]
    AlreadyExists {
        /// Plugin identifier
        plugin_id: String,
    },

    /// Tool, action or resource not declared by the plugin
    #[error("{kind} not found: {plugin_id}, name: {name}")]
    OperationNotFound {
        /// Plugin identifier
        plugin_id: String,
        /// Operation kind (tool, action, resource)
        kind: String,
        /// Operation name
        name: String,
    },

    /// Plugin is not active
    #[error("Plugin is not active: {plugin_id}, current state: {state}")]
    NotActive {
        /// Plugin identifier
        plugin_id: String,
        /// Current lifecycle state
        state: String,
    },

    /// Permission check failed
    #[error("Permission denied: {plugin_id}, permission: {permission}")]
    PermissionDenied {
        /// Plugin identifier
        plugin_id: String,
        /// Missing permission
        permission: String,
    },

    /// Rate limit exceeded for an operation
    #[error("Rate limit exceeded: {plugin_id}, operation: {operation}, limit: {limit} per {window_ms}ms")]
    RateLimitExceeded {
        /// Plugin identifier
        plugin_id: String,
        /// Rate-limited operation
        operation: String,
        /// Maximum requests per window
        limit: u32,
        /// Window length in milliseconds
        window_ms: u64,
    },

    /// Operation input failed its declared schema
    #[error("Input validation failed: {plugin_id}, operation: {operation}, violations: {}", .violations.join("; "))]
    InputValidation {
        /// Plugin identifier
        plugin_id: String,
        /// Operation whose input was rejected
        operation: String,
        /// Violated constraints
        violations: Vec<String>,
    },

    /// Operation timed out
    #[error("Plugin operation timed out: {plugin_id}, operation: {operation}, timeout: {timeout_ms}ms")]
    Timeout {
        /// Plugin identifier
        plugin_id: String,
        /// Operation that timed out
        operation: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Plugin handler failed
    #[error("Plugin execution error: {plugin_id}, operation: {operation}, reason: {reason}")]
    ExecutionError {
        /// Plugin identifier
        plugin_id: String,
        /// Operation that failed
        operation: String,
        /// Failure reason
        reason: String,
    },

    /// Installation failed
    #[error("Plugin installation failed: {plugin_id}, reason: {reason}")]
    InstallationError {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
    },

    /// Enabling failed
    #[error("Plugin enable failed: {plugin_id}, reason: {reason}")]
    EnableError {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
    },

    /// Disabling failed
    #[error("Plugin disable failed: {plugin_id}, reason: {reason}")]
    DisableError {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
    },

    /// Invalid lifecycle state transition
    #[error("Invalid state transition: plugin {plugin_id}, from {from} to {to}")]
    InvalidStateTransition {
        /// Plugin identifier
        plugin_id: String,
        /// Source state
        from: String,
        /// Target state
        to: String,
    },

    /// Configuration rejected
    #[error("Plugin configuration error: {plugin_id}, violations: {}", .violations.join("; "))]
    ConfigurationError {
        /// Plugin identifier
        plugin_id: String,
        /// Violated constraints
        violations: Vec<String>,
    },

    /// Dependency resolution failed
    #[error("Plugin dependency error: {plugin_id}, reason: {reason}")]
    DependencyError {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
        /// Missing or mismatched dependencies
        missing: Vec<String>,
        /// Detected conflicts
        conflicts: Vec<String>,
    },

    /// Metadata or capability validation failed
    #[error("Plugin validation failed: {plugin_id}, code: {code}, reason: {reason}")]
    Validation {
        /// Plugin identifier
        plugin_id: String,
        /// Specific validation code
        code: ErrorCode,
        /// Failure reason
        reason: String,
    },

    /// Critical hook failure
    #[error("Hook error: {plugin_id}, hook: {hook}, reason: {reason}")]
    HookError {
        /// Plugin identifier
        plugin_id: String,
        /// Hook key
        hook: String,
        /// Failure reason
        reason: String,
    },

    /// Message bus failure
    #[error("Plugin communication error: {plugin_id}, reason: {reason}")]
    CommunicationError {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
    },

    /// Serialization failure
    #[error("Plugin serialization error: {plugin_id}, operation: {operation}, reason: {reason}")]
    SerializationError {
        /// Plugin identifier
        plugin_id: String,
        /// Operation being performed
        operation: String,
        /// Failure reason
        reason: String,
    },

    /// Internal engine error
    #[error("Internal plugin engine error: {operation}, reason: {reason}")]
    Internal {
        /// Operation being performed
        operation: String,
        /// Failure reason
        reason: String,
    },
}

/// Type alias for plugin engine results.
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Get the machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } | Self::OperationNotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::NotActive { .. } => ErrorCode::NotActive,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            Self::InputValidation { .. } => ErrorCode::ValidationError,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ExecutionError { .. } => ErrorCode::ExecutionError,
            Self::InstallationError { .. } => ErrorCode::InstallationError,
            Self::EnableError { .. } => ErrorCode::EnableError,
            Self::DisableError { .. } => ErrorCode::DisableError,
            Self::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::ConfigurationError { .. } => ErrorCode::ConfigurationError,
            Self::DependencyError { .. } => ErrorCode::DependencyError,
            Self::Validation { code, .. } => *code,
            Self::HookError { .. } => ErrorCode::HookError,
            Self::CommunicationError { .. } => ErrorCode::CommunicationError,
            Self::SerializationError { .. } => ErrorCode::SerializationError,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Get the originating plugin id, or `"system"` for engine-level errors.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::NotFound { plugin_id }
            | Self::AlreadyExists { plugin_id }
            | Self::OperationNotFound { plugin_id, .. }
            | Self::NotActive { plugin_id, .. }
            | Self::PermissionDenied { plugin_id, .. }
            | Self::RateLimitExceeded { plugin_id, .. }
            | Self::InputValidation { plugin_id, .. }
            | Self::Timeout { plugin_id, .. }
            | Self::ExecutionError { plugin_id, .. }
            | Self::InstallationError { plugin_id, .. }
            | Self::EnableError { plugin_id, .. }
            | Self::DisableError { plugin_id, .. }
            | Self::InvalidStateTransition { plugin_id, .. }
            | Self::ConfigurationError { plugin_id, .. }
            | Self::DependencyError { plugin_id, .. }
            | Self::Validation { plugin_id, .. }
            | Self::HookError { plugin_id, .. }
            | Self::CommunicationError { plugin_id, .. }
            | Self::SerializationError { plugin_id, .. } => plugin_id,
            Self::Internal { .. } => SYSTEM_PLUGIN_ID,
        }
    }

    /// Structured details for the host application.
    pub fn details(&self) -> Value {
        match self {
            Self::OperationNotFound { kind, name, .. } => json!({ "kind": kind, "name": name }),
            Self::NotActive { state, .. } => json!({ "state": state }),
            Self::PermissionDenied { permission, .. } => json!({ "permission": permission }),
            Self::RateLimitExceeded {
                operation,
                limit,
                window_ms,
                ..
            } => json!({ "operation": operation, "limit": limit, "window_ms": window_ms }),
            Self::InputValidation {
                operation,
                violations,
                ..
            } => json!({ "operation": operation, "violations": violations }),
            Self::Timeout {
                operation,
                timeout_ms,
                ..
            } => json!({ "operation": operation, "timeout_ms": timeout_ms }),
            Self::ExecutionError { operation, .. } => json!({ "operation": operation }),
            Self::InvalidStateTransition { from, to, .. } => json!({ "from": from, "to": to }),
            Self::ConfigurationError { violations, .. } => json!({ "violations": violations }),
            Self::DependencyError {
                reason,
                missing,
                conflicts,
                ..
            } => json!({ "reason": reason, "missing": missing, "conflicts": conflicts }),
            Self::HookError { hook, .. } => json!({ "hook": hook }),
            Self::SerializationError { operation, .. } | Self::Internal { operation, .. } => {
                json!({ "operation": operation })
            }
            _ => Value::Null,
        }
    }

    /// Check whether the error must abort a hook chain.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::HookError { .. }
                | Self::Internal { .. }
                | Self::Validation {
                    code: ErrorCode::SecurityViolation,
                    ..
                }
        )
    }
}

/// Helper functions for error creation.
impl PluginError {
    /// Create a not found error.
    pub fn not_found(plugin_id: impl Into<String>) -> Self {
        Self::NotFound {
            plugin_id: plugin_id.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(plugin_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            plugin_id: plugin_id.into(),
        }
    }

    /// Create an operation not found error.
    pub fn operation_not_found(
        plugin_id: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::OperationNotFound {
            plugin_id: plugin_id.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an execution error.
    pub fn execution_error(
        plugin_id: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExecutionError {
            plugin_id: plugin_id.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(plugin_id: impl Into<String>, operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            plugin_id: plugin_id.into(),
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an installation error.
    pub fn installation(plugin_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstallationError {
            plugin_id: plugin_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(plugin_id: impl Into<String>, violations: Vec<String>) -> Self {
        Self::ConfigurationError {
            plugin_id: plugin_id.into(),
            violations,
        }
    }

    /// Create a dependency error.
    pub fn dependency(plugin_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyError {
            plugin_id: plugin_id.into(),
            reason: reason.into(),
            missing: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Create a communication error.
    pub fn communication(plugin_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommunicationError {
            plugin_id: plugin_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            plugin_id: SYSTEM_PLUGIN_ID.to_string(),
            operation: "json_serialization".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<std::io::Error> for PluginError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal {
            operation: "io_operation".to_string(),
            reason: error.to_string(),
        }
    }
}

/// Security validator error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Required metadata fields missing
    #[error("Invalid metadata: {plugin_id}, missing fields: {}", .missing.join(", "))]
    InvalidMetadata {
        /// Plugin identifier
        plugin_id: String,
        /// Missing field names
        missing: Vec<String>,
    },

    /// Version string is not semver
    #[error("Invalid version: {plugin_id}, version: {version}")]
    InvalidVersion {
        /// Plugin identifier
        plugin_id: String,
        /// Rejected version string
        version: String,
    },

    /// License not allowed
    #[error("Invalid license: {plugin_id}, license: {license}")]
    InvalidLicense {
        /// Plugin identifier
        plugin_id: String,
        /// Rejected license
        license: String,
    },

    /// Metadata matched a dangerous pattern
    #[error("Security violation: {plugin_id}, matched pattern: {pattern}")]
    DangerousPattern {
        /// Plugin identifier
        plugin_id: String,
        /// Pattern that matched
        pattern: String,
    },

    /// Dependency on a blacklisted package
    #[error("Malicious package: {plugin_id}, package: {package}")]
    MaliciousPackage {
        /// Plugin identifier
        plugin_id: String,
        /// Blacklisted package name
        package: String,
    },

    /// Capability declaration is malformed
    #[error("Invalid capability: {plugin_id}, capability: {capability}, reason: {reason}")]
    InvalidCapability {
        /// Plugin identifier
        plugin_id: String,
        /// Capability name (or index when unnamed)
        capability: String,
        /// Failure reason
        reason: String,
    },

    /// Permission check failed
    #[error("Permission denied: {plugin_id}, permission: {permission}")]
    PermissionDenied {
        /// Plugin identifier
        plugin_id: String,
        /// Missing permission
        permission: String,
    },
}

impl SecurityError {
    /// Get the machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMetadata { .. } => ErrorCode::InvalidMetadata,
            Self::InvalidVersion { .. } => ErrorCode::InvalidVersion,
            Self::InvalidLicense { .. } => ErrorCode::InvalidLicense,
            Self::DangerousPattern { .. } => ErrorCode::SecurityViolation,
            Self::MaliciousPackage { .. } => ErrorCode::MaliciousPackage,
            Self::InvalidCapability { .. } => ErrorCode::InvalidCapability,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
        }
    }
}

/// Type alias for security results.
pub type SecurityResult<T> = Result<T, SecurityError>;

impl From<SecurityError> for PluginError {
    fn from(error: SecurityError) -> Self {
        let code = error.code();
        match error {
            SecurityError::PermissionDenied {
                plugin_id,
                permission,
            } => Self::PermissionDenied {
                plugin_id,
                permission,
            },
            other => {
                let plugin_id = match &other {
                    SecurityError::InvalidMetadata { plugin_id, .. }
                    | SecurityError::InvalidVersion { plugin_id, .. }
                    | SecurityError::InvalidLicense { plugin_id, .. }
                    | SecurityError::DangerousPattern { plugin_id, .. }
                    | SecurityError::MaliciousPackage { plugin_id, .. }
                    | SecurityError::InvalidCapability { plugin_id, .. }
                    | SecurityError::PermissionDenied { plugin_id, .. } => plugin_id.clone(),
                };
                Self::Validation {
                    plugin_id,
                    code,
                    reason: other.to_string(),
                }
            }
        }
    }
}

/// Hook pipeline error types.
#[derive(Error, Debug, Clone)]
pub enum HookError {
    /// Recoverable hook failure, the chain continues
    #[error("Hook failed: {plugin_id}, hook: {hook}, reason: {reason}")]
    Failed {
        /// Plugin identifier
        plugin_id: String,
        /// Hook key
        hook: String,
        /// Failure reason
        reason: String,
    },

    /// Critical hook failure, the chain aborts
    #[error("Critical hook failure: {plugin_id}, hook: {hook}, reason: {reason}")]
    Critical {
        /// Plugin identifier
        plugin_id: String,
        /// Hook key
        hook: String,
        /// Failure reason
        reason: String,
    },
}

impl HookError {
    /// Create a recoverable failure.
    pub fn failed(plugin_id: impl Into<String>, hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            plugin_id: plugin_id.into(),
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Create a critical failure.
    pub fn critical(plugin_id: impl Into<String>, hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Critical {
            plugin_id: plugin_id.into(),
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Check if this failure aborts the chain.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }
}

impl From<HookError> for PluginError {
    fn from(error: HookError) -> Self {
        match error {
            HookError::Failed {
                plugin_id,
                hook,
                reason,
            }
            | HookError::Critical {
                plugin_id,
                hook,
                reason,
            } => Self::HookError {
                plugin_id,
                hook,
                reason,
            },
        }
    }
}

/// Communication bus error types.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Request received no response in time
    #[error("Request timed out: recipient {recipient}, timeout: {timeout_ms}ms")]
    RequestTimeout {
        /// Addressed plugin
        recipient: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Message queue is full
    #[error("Message queue full: capacity {capacity}")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Response channel dropped before a reply arrived
    #[error("Request cancelled: recipient {recipient}, reason: {reason}")]
    Cancelled {
        /// Addressed plugin
        recipient: String,
        /// Cancellation reason
        reason: String,
    },
}

impl From<BusError> for PluginError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::RequestTimeout {
                recipient,
                timeout_ms,
            } => Self::Timeout {
                plugin_id: recipient,
                operation: "request".to_string(),
                timeout_ms,
            },
            BusError::QueueFull { capacity } => Self::CommunicationError {
                plugin_id: SYSTEM_PLUGIN_ID.to_string(),
                reason: format!("Message queue full ({capacity})"),
            },
            BusError::Cancelled { recipient, reason } => Self::CommunicationError {
                plugin_id: recipient,
                reason,
            },
        }
    }
}
