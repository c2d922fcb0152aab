//! Metadata validation and permission enforcement.
//!
//! The validator rejects malformed or dangerous plugin descriptors before
//! anything else touches them, and keeps the per-plugin permission set that
//! the execution engine consults before every operation.

use crate::error::{PluginError, PluginResult, SecurityError, SecurityResult};
use crate::types::PluginMetadata;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Permission that grants every operation.
pub const WILDCARD_PERMISSION: &str = "*";

const VERSION_PATTERN: &str = r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$";

/// Security policy applied to every plugin descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// SPDX identifiers accepted as plugin licenses
    pub allowed_licenses: Vec<String>,

    /// Regexes that must not match the serialized descriptor
    pub dangerous_patterns: Vec<String>,

    /// Package names that may not appear as dependencies
    pub blocked_packages: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_licenses: [
                "MIT",
                "Apache-2.0",
                "BSD-2-Clause",
                "BSD-3-Clause",
                "ISC",
                "GPL-3.0",
                "LGPL-3.0",
                "MPL-2.0",
                "Unlicense",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            dangerous_patterns: vec![
                r"\beval\s*\(".to_string(),
                r"\bnew\s+Function\s*\(".to_string(),
                r"\b(inner|outer)HTML\s*=".to_string(),
                r"\bdocument\.write(ln)?\s*\(".to_string(),
                r#"\bset(Timeout|Interval)\s*\(\s*\\?["']"#.to_string(),
                r"\bchild_process\b".to_string(),
                r#"\brequire\s*\(\s*\\?["']fs\\?["']\s*\)"#.to_string(),
            ],
            blocked_packages: [
                "flatmap-stream",
                "crossenv",
                "cross-env.js",
                "getcookies",
                "electron-native-notify",
                "discord.dll",
                "twilio-npm",
                "fallguys",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl SecurityPolicy {
    /// Create a policy for development: every license accepted by default plus proprietary.
    pub fn permissive() -> Self {
        let mut policy = Self::default();
        policy.allowed_licenses.push("UNLICENSED".to_string());
        policy.allowed_licenses.push("Proprietary".to_string());
        policy
    }

    /// Create a strict policy for production marketplaces.
    pub fn strict() -> Self {
        let mut policy = Self::default();
        policy
            .allowed_licenses
            .retain(|l| matches!(l.as_str(), "MIT" | "Apache-2.0" | "BSD-3-Clause" | "ISC"));
        policy.dangerous_patterns.push(r"\bXMLHttpRequest\b".to_string());
        policy.dangerous_patterns.push(r"\bprocess\.env\b".to_string());
        policy
    }
}

/// Validates plugin descriptors and tracks granted permissions.
///
/// # Examples
///
/// ```rust
/// use nextplug_core::security::{SecurityPolicy, SecurityValidator};
/// use nextplug_core::types::{OperationSpec, PluginMetadata};
///
/// let validator = SecurityValidator::new(SecurityPolicy::default()).unwrap();
/// let metadata = PluginMetadata::new("echo", "Echo", "1.0.0")
///     .with_author("Ada")
///     .with_license("MIT")
///     .with_tool(OperationSpec::new("echo", "Echo the input"));
///
/// validator.validate(&metadata).unwrap();
/// assert!(validator.has_permission("echo", "tool:echo"));
/// ```
pub struct SecurityValidator {
    /// Active policy
    policy: SecurityPolicy,

    /// Compiled semver check
    version_regex: Regex,

    /// Compiled dangerous patterns with their source text
    dangerous: Vec<(String, Regex)>,

    /// Granted permissions by plugin id
    permissions: DashMap<String, Vec<String>>,

    /// Validation counters
    stats: ValidationStats,
}

impl SecurityValidator {
    /// Create a validator, compiling every policy pattern.
    ///
    /// # Errors
    /// Returns an internal error when a policy pattern is not a valid regex.
    pub fn new(policy: SecurityPolicy) -> PluginResult<Self> {
        let version_regex = Regex::new(VERSION_PATTERN)
            .map_err(|e| PluginError::internal("compile_version_pattern", e.to_string()))?;

        let dangerous = policy
            .dangerous_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|regex| (pattern.clone(), regex))
                    .map_err(|e| PluginError::internal("compile_security_pattern", format!("{pattern}: {e}")))
            })
            .collect::<PluginResult<Vec<_>>>()?;

        Ok(Self {
            policy,
            version_regex,
            dangerous,
            permissions: DashMap::new(),
            stats: ValidationStats::default(),
        })
    }

    /// Get the active policy.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Validate a descriptor. Nothing is granted; callers record
    /// permissions once the plugin is actually registered.
    ///
    /// # Errors
    /// Returns the first failed check, in order: required fields, version,
    /// license, dangerous patterns, blocked dependencies, capabilities.
    pub fn validate(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        let result = self.run_checks(metadata);

        match &result {
            Ok(()) => {
                self.stats.passed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(plugin_id = %metadata.id, "Plugin metadata validated");
            }
            Err(error) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    plugin_id = %metadata.id,
                    code = %error.code(),
                    error = %error,
                    "Plugin metadata rejected"
                );
            }
        }

        result
    }

    fn run_checks(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        self.check_required_fields(metadata)?;

        if !self.version_regex.is_match(&metadata.version) {
            return Err(SecurityError::InvalidVersion {
                plugin_id: metadata.id.clone(),
                version: metadata.version.clone(),
            });
        }

        if !self.policy.allowed_licenses.iter().any(|l| l == &metadata.license) {
            return Err(SecurityError::InvalidLicense {
                plugin_id: metadata.id.clone(),
                license: metadata.license.clone(),
            });
        }

        self.scan_patterns(metadata)?;
        self.check_dependencies(metadata)?;
        self.check_capabilities(metadata)
    }

    fn check_required_fields(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        let missing: Vec<String> = [
            ("id", &metadata.id),
            ("name", &metadata.name),
            ("version", &metadata.version),
            ("author", &metadata.author),
            ("license", &metadata.license),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field.to_string())
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SecurityError::InvalidMetadata {
                plugin_id: metadata.id.clone(),
                missing,
            })
        }
    }

    fn scan_patterns(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        // Serialization of plain data cannot fail; an empty scan would only miss matches.
        let serialized = serde_json::to_string(metadata).unwrap_or_default();

        match self.dangerous.iter().find(|(_, regex)| regex.is_match(&serialized)) {
            Some((pattern, _)) => Err(SecurityError::DangerousPattern {
                plugin_id: metadata.id.clone(),
                pattern: pattern.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_dependencies(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        let blocked = metadata
            .dependencies
            .keys()
            .chain(metadata.peer_dependencies.keys())
            .find(|name| self.policy.blocked_packages.iter().any(|b| b == *name));

        match blocked {
            Some(package) => Err(SecurityError::MaliciousPackage {
                plugin_id: metadata.id.clone(),
                package: package.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_capabilities(&self, metadata: &PluginMetadata) -> SecurityResult<()> {
        let invalid = |capability: String, reason: &str| SecurityError::InvalidCapability {
            plugin_id: metadata.id.clone(),
            capability,
            reason: reason.to_string(),
        };
        let caps = &metadata.capabilities;

        for (kind, operations) in [("tool", &caps.tools), ("action", &caps.actions)] {
            let mut seen = HashSet::new();
            for (index, operation) in operations.iter().enumerate() {
                if operation.name.trim().is_empty() {
                    return Err(invalid(format!("{kind}[{index}]"), "name is required"));
                }
                if operation.description.trim().is_empty() {
                    return Err(invalid(format!("{kind}:{}", operation.name), "description is required"));
                }
                if !seen.insert(operation.name.as_str()) {
                    return Err(invalid(format!("{kind}:{}", operation.name), "declared more than once"));
                }
                if let Err(e) = operation.input_schema.compile() {
                    return Err(invalid(format!("{kind}:{}", operation.name), &e.to_string()));
                }
            }
        }

        let mut seen = HashSet::new();
        for (index, resource) in caps.resources.iter().enumerate() {
            if resource.name.trim().is_empty() {
                return Err(invalid(format!("resource[{index}]"), "name is required"));
            }
            if resource.resource_type.trim().is_empty() || resource.uri.trim().is_empty() {
                return Err(invalid(format!("resource:{}", resource.name), "type and uri are required"));
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(invalid(format!("resource:{}", resource.name), "declared more than once"));
            }
        }

        for (index, hook) in caps.hooks.iter().enumerate() {
            if hook.name.trim().is_empty() || hook.event.trim().is_empty() {
                return Err(invalid(format!("hook[{index}]"), "name and event are required"));
            }
        }

        for (index, middleware) in caps.middleware.iter().enumerate() {
            if middleware.name.trim().is_empty() {
                return Err(invalid(format!("middleware[{index}]"), "name is required"));
            }
        }

        if let Err(e) = metadata.config_schema.compile() {
            return Err(invalid("config_schema".to_string(), &e.to_string()));
        }

        Ok(())
    }

    /// Derive the default permission list from declared capabilities.
    pub fn default_permissions(metadata: &PluginMetadata) -> Vec<String> {
        let caps = &metadata.capabilities;
        caps.tools
            .iter()
            .map(|t| format!("tool:{}", t.name))
            .chain(caps.actions.iter().map(|a| format!("action:{}", a.name)))
            .chain(caps.resources.iter().map(|r| format!("resource:{}", r.name)))
            .collect()
    }

    /// Check whether a plugin holds a permission. `*` grants everything.
    pub fn has_permission(&self, plugin_id: &str, permission: &str) -> bool {
        self.permissions.get(plugin_id).map_or(false, |granted| {
            granted
                .iter()
                .any(|p| p == WILDCARD_PERMISSION || p == permission)
        })
    }

    /// Enforce a permission.
    ///
    /// # Errors
    /// Returns [`SecurityError::PermissionDenied`] when the permission is missing.
    pub fn check_permission(&self, plugin_id: &str, permission: &str) -> SecurityResult<()> {
        if self.has_permission(plugin_id, permission) {
            Ok(())
        } else {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            Err(SecurityError::PermissionDenied {
                plugin_id: plugin_id.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    /// Grant a permission. Granting twice has no further effect.
    pub fn grant_permission(&self, plugin_id: &str, permission: impl Into<String>) {
        let permission = permission.into();
        let mut granted = self.permissions.entry(plugin_id.to_string()).or_default();
        if !granted.contains(&permission) {
            granted.push(permission);
        }
    }

    /// Revoke a permission. Revoking an absent permission is a no-op.
    pub fn revoke_permission(&self, plugin_id: &str, permission: &str) {
        if let Some(mut granted) = self.permissions.get_mut(plugin_id) {
            granted.retain(|p| p != permission);
        }
    }

    /// Replace a plugin's permission list.
    pub fn set_permissions(&self, plugin_id: &str, permissions: Vec<String>) {
        self.permissions.insert(plugin_id.to_string(), permissions);
    }

    /// Get a plugin's permissions.
    pub fn permissions(&self, plugin_id: &str) -> Vec<String> {
        self.permissions
            .get(plugin_id)
            .map(|granted| granted.clone())
            .unwrap_or_default()
    }

    /// Forget a plugin.
    pub fn remove_plugin(&self, plugin_id: &str) {
        self.permissions.remove(plugin_id);
    }

    /// Get validation counters.
    pub fn stats(&self) -> ValidationStatsSnapshot {
        ValidationStatsSnapshot::from(&self.stats)
    }
}

/// Validation counters.
#[derive(Debug, Default)]
struct ValidationStats {
    passed: AtomicU64,
    rejected: AtomicU64,
    denied: AtomicU64,
}

/// Immutable snapshot of validation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStatsSnapshot {
    /// Descriptors that passed validation
    pub passed: u64,
    /// Descriptors that were rejected
    pub rejected: u64,
    /// Permission checks that failed
    pub denied: u64,
}

impl From<&ValidationStats> for ValidationStatsSnapshot {
    fn from(stats: &ValidationStats) -> Self {
        Self {
            passed: stats.passed.load(Ordering::Relaxed),
            rejected: stats.rejected.load(Ordering::Relaxed),
            denied: stats.denied.load(Ordering::Relaxed),
        }
    }
}
