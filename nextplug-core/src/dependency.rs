//! Dependency graph, installability checks and conflict detection.
//!
//! Nodes live in an id-keyed arena and refer to each other only by id. The
//! `dependents` side of every node is derived from the whole graph after each
//! insert or remove.

use crate::config::DependencySettings;
use crate::error::{PluginError, PluginResult};
use crate::types::{DependencyMap, PluginMetadata};
use parking_lot::RwLock;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Why an install was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// A dependency is absent or its version does not satisfy the range
    DependenciesNotSatisfied,
    /// The candidate conflicts with an installed plugin
    ConflictsDetected,
    /// Host version bounds or blocking warnings
    CompatibilityIssues,
    /// Installing would close a dependency cycle
    CircularDependency,
}

impl BlockReason {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependenciesNotSatisfied => "dependencies_not_satisfied",
            Self::ConflictsDetected => "conflicts_detected",
            Self::CompatibilityIssues => "compatibility_issues",
            Self::CircularDependency => "circular_dependency",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of conflict between two plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// One side lists the other in `conflicts`
    Direct,
    /// Both provide the same resource uri
    Resource,
    /// Both expose the same tool or action name
    Api,
}

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict kind
    pub kind: ConflictKind,
    /// Installed plugin on the other side
    pub plugin_id: String,
    /// Conflicting uri or name, or the plugin id for direct conflicts
    pub subject: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConflictKind::Direct => "direct",
            ConflictKind::Resource => "resource",
            ConflictKind::Api => "api",
        };
        write!(f, "{kind} conflict with {} ({})", self.plugin_id, self.subject)
    }
}

/// Result of an installability check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallCheck {
    /// Whether the install may proceed
    pub can_install: bool,
    /// First blocking reason
    pub reason: Option<BlockReason>,
    /// `"<name>@<range>"`, with `" (installed: <v>)"` on mismatch
    pub missing_dependencies: Vec<String>,
    /// Detected conflicts
    pub conflicts: Vec<Conflict>,
    /// Host version problems
    pub compatibility_issues: Vec<String>,
    /// Advisory problems
    pub warnings: Vec<String>,
    /// Cycle the candidate would close, starting and ending at the candidate
    pub cycle: Option<Vec<String>>,
}

impl InstallCheck {
    /// Render the blocking problems as one line.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(reason) = self.reason {
            parts.push(reason.to_string());
        }
        if !self.missing_dependencies.is_empty() {
            parts.push(format!("missing: {}", self.missing_dependencies.join(", ")));
        }
        if !self.conflicts.is_empty() {
            let conflicts: Vec<String> = self.conflicts.iter().map(ToString::to_string).collect();
            parts.push(format!("conflicts: {}", conflicts.join(", ")));
        }
        if !self.compatibility_issues.is_empty() {
            parts.push(format!("compatibility: {}", self.compatibility_issues.join(", ")));
        }
        if let Some(cycle) = &self.cycle {
            parts.push(format!("cycle: {}", cycle.join(" -> ")));
        }
        parts.join("; ")
    }

    /// Convert a refused check into a `DependencyError`.
    pub fn into_error(self, plugin_id: &str) -> PluginError {
        PluginError::DependencyError {
            plugin_id: plugin_id.to_string(),
            reason: self.summary(),
            missing: self.missing_dependencies,
            conflicts: self.conflicts.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Installed, never enabled
    Installed,
    /// Enabled
    Active,
    /// Disabled after being enabled
    Inactive,
}

/// One installed plugin in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Plugin identifier
    pub id: String,
    /// Installed version
    pub version: String,
    /// Required plugins and ranges
    pub dependencies: DependencyMap,
    /// Peer plugins and ranges
    pub peer_dependencies: DependencyMap,
    /// Installed plugins depending on this one
    pub dependents: BTreeSet<String>,
    /// Declared conflicts
    pub conflicts: Vec<String>,
    /// Provided resource uris
    pub resources: Vec<String>,
    /// Provided tool and action names
    pub apis: Vec<String>,
    /// Status
    pub status: NodeStatus,
}

impl DependencyNode {
    fn from_metadata(metadata: &PluginMetadata) -> Self {
        let capabilities = &metadata.capabilities;
        Self {
            id: metadata.id.clone(),
            version: metadata.version.clone(),
            dependencies: metadata.dependencies.clone(),
            peer_dependencies: metadata.peer_dependencies.clone(),
            dependents: BTreeSet::new(),
            conflicts: metadata.conflicts.clone(),
            resources: capabilities.resources.iter().map(|r| r.uri.clone()).collect(),
            apis: capabilities
                .tools
                .iter()
                .chain(capabilities.actions.iter())
                .map(|op| op.name.clone())
                .collect(),
            status: NodeStatus::Installed,
        }
    }
}

/// Recursive view of dependencies or dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyTree {
    /// Plugin identifier
    pub id: String,
    /// Installed version, `None` when not installed
    pub version: Option<String>,
    /// Declared range, for dependency edges
    pub range: Option<String>,
    /// Set when this node already appears on the path from the root
    pub circular: bool,
    /// Children
    pub children: Vec<DependencyTree>,
}

/// Suggested fix for a refused install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    /// Install a missing dependency
    InstallDependency {
        /// Dependency id
        plugin_id: String,
        /// Required range
        range: String,
    },
    /// Upgrade or downgrade an installed dependency
    ChangeDependencyVersion {
        /// Dependency id
        plugin_id: String,
        /// Required range
        range: String,
        /// Installed version
        installed: String,
    },
    /// Uninstall a conflicting plugin
    UninstallConflicting {
        /// Conflicting plugin id
        plugin_id: String,
        /// Conflict description
        reason: String,
    },
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Nodes
    pub nodes: usize,
    /// Dependency edges between installed nodes
    pub edges: usize,
    /// Back edges found by cycle detection
    pub cycles: usize,
    /// Nodes with neither dependencies nor dependents
    pub orphaned: usize,
    /// Longest dependency chain, in edges
    pub max_depth: usize,
}

/// Parse an npm-style range into alternatives.
///
/// Accepts `*`, `latest`, `^`, `~`, comparators separated by spaces or commas,
/// `a - b` hyphen ranges and `||` unions. A bare version means exactly that
/// version.
pub fn parse_range(range: &str) -> Result<Vec<VersionReq>, String> {
    let range = range.trim();
    if range.is_empty() || range == "*" || range.eq_ignore_ascii_case("latest") {
        return Ok(vec![VersionReq::STAR]);
    }

    range
        .split("||")
        .map(|alternative| {
            let normalized = normalize_alternative(alternative.trim());
            VersionReq::parse(&normalized).map_err(|e| format!("invalid version range {range:?}: {e}"))
        })
        .collect()
}

fn normalize_alternative(alternative: &str) -> String {
    if alternative.is_empty() || alternative == "*" {
        return "*".to_string();
    }
    if let Some((low, high)) = alternative.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    // Glue bare operators to the following version (`>= 1.0.0`).
    let mut comparators: Vec<String> = Vec::new();
    let mut pending = String::new();
    for token in alternative.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending.push_str(token);
            continue;
        }
        let comparator = format!("{pending}{token}");
        pending.clear();
        if comparator.starts_with(|c: char| c.is_ascii_digit()) {
            comparators.push(format!("={comparator}"));
        } else {
            comparators.push(comparator);
        }
    }
    if comparators.is_empty() {
        return alternative.to_string();
    }
    comparators.join(", ")
}

/// Check `version` against an npm-style range.
pub fn satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = Version::parse(version.trim()) else {
        return false;
    };
    match parse_range(range) {
        Ok(alternatives) => alternatives.iter().any(|req| req.matches(&version)),
        Err(_) => false,
    }
}

/// Dependency graph over installed plugins.
pub struct DependencyGraph {
    nodes: RwLock<HashMap<String, DependencyNode>>,
    settings: DependencySettings,
    host_version: String,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new(settings: DependencySettings, host_version: impl Into<String>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            settings,
            host_version: host_version.into(),
        }
    }

    /// Check whether `metadata` can be installed against the current graph.
    ///
    /// Every category is evaluated; `reason` names the first blocking one in
    /// the order dependencies, conflicts, compatibility, cycles.
    pub fn can_install(&self, metadata: &PluginMetadata) -> InstallCheck {
        let nodes = self.nodes.read();
        let mut check = InstallCheck::default();

        check.missing_dependencies = Self::missing(&nodes, &metadata.dependencies);
        check.conflicts = Self::find_conflicts(&nodes, metadata);
        check.compatibility_issues = self.host_issues(metadata);

        for (name, range) in &metadata.peer_dependencies {
            match nodes.get(name) {
                None => check.warnings.push(format!("peer dependency {name}@{range} is not installed")),
                Some(node) if !satisfies(&node.version, range) => check.warnings.push(format!(
                    "peer dependency {name}@{range} is not satisfied (installed: {})",
                    node.version
                )),
                Some(_) => {}
            }
        }

        check.cycle = Self::closing_cycle(&nodes, metadata);

        check.reason = if !check.missing_dependencies.is_empty() {
            Some(BlockReason::DependenciesNotSatisfied)
        } else if !check.conflicts.is_empty() {
            Some(BlockReason::ConflictsDetected)
        } else if !check.compatibility_issues.is_empty()
            || (self.settings.block_on_warnings && !check.warnings.is_empty())
        {
            Some(BlockReason::CompatibilityIssues)
        } else if self.settings.block_on_cycles && check.cycle.is_some() {
            Some(BlockReason::CircularDependency)
        } else {
            None
        };
        check.can_install = check.reason.is_none();

        tracing::debug!(
            plugin_id = %metadata.id,
            can_install = check.can_install,
            reason = ?check.reason,
            warnings = check.warnings.len(),
            "Installability checked"
        );
        check
    }

    /// Declared dependencies that are absent or out of range, in the
    /// `missing_dependencies` format.
    pub fn unsatisfied_dependencies(&self, metadata: &PluginMetadata) -> Vec<String> {
        Self::missing(&self.nodes.read(), &metadata.dependencies)
    }

    fn missing(nodes: &HashMap<String, DependencyNode>, dependencies: &DependencyMap) -> Vec<String> {
        let mut missing = Vec::new();
        for (name, range) in dependencies {
            match nodes.get(name) {
                None => missing.push(format!("{name}@{range}")),
                Some(node) if !satisfies(&node.version, range) => {
                    missing.push(format!("{name}@{range} (installed: {})", node.version))
                }
                Some(_) => {}
            }
        }
        missing
    }

    fn find_conflicts(nodes: &HashMap<String, DependencyNode>, metadata: &PluginMetadata) -> Vec<Conflict> {
        let candidate = DependencyNode::from_metadata(metadata);
        let mut conflicts = Vec::new();

        let mut others: Vec<&DependencyNode> = nodes.values().filter(|node| node.id != candidate.id).collect();
        others.sort_by(|a, b| a.id.cmp(&b.id));

        for node in others {
            if candidate.conflicts.contains(&node.id) || node.conflicts.contains(&candidate.id) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Direct,
                    plugin_id: node.id.clone(),
                    subject: node.id.clone(),
                });
            }
            for uri in candidate.resources.iter().filter(|uri| node.resources.contains(uri)) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Resource,
                    plugin_id: node.id.clone(),
                    subject: uri.clone(),
                });
            }
            for api in candidate.apis.iter().filter(|api| node.apis.contains(api)) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Api,
                    plugin_id: node.id.clone(),
                    subject: api.clone(),
                });
            }
        }
        conflicts
    }

    fn host_issues(&self, metadata: &PluginMetadata) -> Vec<String> {
        let mut issues = Vec::new();
        let host = match Version::parse(&self.host_version) {
            Ok(host) => host,
            Err(e) => {
                if metadata.min_host_version.is_some() || metadata.max_host_version.is_some() {
                    issues.push(format!("host version {} is not valid semver: {e}", self.host_version));
                }
                return issues;
            }
        };

        if let Some(min) = &metadata.min_host_version {
            match Version::parse(min) {
                Ok(min_version) if host < min_version => {
                    issues.push(format!("requires host >= {min}, running {host}"));
                }
                Ok(_) => {}
                Err(e) => issues.push(format!("invalid min_host_version {min}: {e}")),
            }
        }
        if let Some(max) = &metadata.max_host_version {
            match Version::parse(max) {
                Ok(max_version) if host > max_version => {
                    issues.push(format!("requires host <= {max}, running {host}"));
                }
                Ok(_) => {}
                Err(e) => issues.push(format!("invalid max_host_version {max}: {e}")),
            }
        }
        issues
    }

    /// Path `candidate -> dep -> ... -> candidate` if adding the candidate's
    /// edges would close a cycle.
    fn closing_cycle(nodes: &HashMap<String, DependencyNode>, metadata: &PluginMetadata) -> Option<Vec<String>> {
        let target = metadata.id.as_str();
        let mut visited = HashSet::new();

        fn walk<'a>(
            nodes: &'a HashMap<String, DependencyNode>,
            current: &'a str,
            target: &str,
            visited: &mut HashSet<&'a str>,
            path: &mut Vec<String>,
        ) -> bool {
            if current == target {
                path.push(current.to_string());
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            let Some(node) = nodes.get(current) else {
                return false;
            };
            path.push(current.to_string());
            for dependency in node.dependencies.keys() {
                if walk(nodes, dependency, target, visited, path) {
                    return true;
                }
            }
            path.pop();
            false
        }

        for dependency in metadata.dependencies.keys() {
            let mut path = vec![target.to_string()];
            if walk(nodes, dependency, target, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    /// Insert or replace a node, keeping the status of a replaced node.
    pub fn add_plugin(&self, metadata: &PluginMetadata) {
        let mut nodes = self.nodes.write();
        let mut node = DependencyNode::from_metadata(metadata);
        if let Some(existing) = nodes.get(&metadata.id) {
            node.status = existing.status;
        }
        nodes.insert(metadata.id.clone(), node);
        Self::recompute_dependents(&mut nodes);
        tracing::debug!(plugin_id = %metadata.id, "Dependency node added");
    }

    /// Remove a node.
    pub fn remove_plugin(&self, plugin_id: &str) -> Option<DependencyNode> {
        let mut nodes = self.nodes.write();
        let removed = nodes.remove(plugin_id);
        Self::recompute_dependents(&mut nodes);
        removed
    }

    fn recompute_dependents(nodes: &mut HashMap<String, DependencyNode>) {
        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .keys()
                    .map(move |dependency| (dependency.clone(), node.id.clone()))
            })
            .collect();

        for node in nodes.values_mut() {
            node.dependents.clear();
        }
        for (dependency, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.dependents.insert(dependent);
            }
        }
    }

    /// Update a node's status.
    pub fn set_status(&self, plugin_id: &str, status: NodeStatus) -> bool {
        match self.nodes.write().get_mut(plugin_id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    /// Get a node.
    pub fn node(&self, plugin_id: &str) -> Option<DependencyNode> {
        self.nodes.read().get(plugin_id).cloned()
    }

    /// Check whether a node exists.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.nodes.read().contains_key(plugin_id)
    }

    /// Installed plugins depending on `plugin_id`, sorted.
    pub fn dependents(&self, plugin_id: &str) -> Vec<String> {
        self.nodes
            .read()
            .get(plugin_id)
            .map(|node| node.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Installed dependents whose declared range rejects `version` of
    /// `plugin_id`, formatted as `dependent requires plugin_id@range`.
    pub fn incompatible_dependents(&self, plugin_id: &str, version: &str) -> Vec<String> {
        let nodes = self.nodes.read();
        let Some(node) = nodes.get(plugin_id) else {
            return Vec::new();
        };
        node.dependents
            .iter()
            .filter_map(|dependent| {
                let range = nodes.get(dependent)?.dependencies.get(plugin_id)?;
                (!satisfies(version, range)).then(|| format!("{dependent} requires {plugin_id}@{range}"))
            })
            .collect()
    }

    /// Refuse removal while installed plugins depend on `plugin_id`.
    pub fn can_uninstall(&self, plugin_id: &str) -> PluginResult<()> {
        let dependents = self.dependents(plugin_id);
        if dependents.is_empty() {
            return Ok(());
        }
        Err(PluginError::DependencyError {
            plugin_id: plugin_id.to_string(),
            reason: format!("required by {}", dependents.join(", ")),
            missing: Vec::new(),
            conflicts: Vec::new(),
        })
    }

    /// Recursive dependencies of `plugin_id`.
    pub fn dependency_tree(&self, plugin_id: &str) -> Option<DependencyTree> {
        let nodes = self.nodes.read();
        let node = nodes.get(plugin_id)?;
        let mut path = Vec::new();
        Some(Self::build_tree(&nodes, &node.id, None, &mut path, true))
    }

    /// Recursive dependents of `plugin_id`.
    pub fn dependent_tree(&self, plugin_id: &str) -> Option<DependencyTree> {
        let nodes = self.nodes.read();
        let node = nodes.get(plugin_id)?;
        let mut path = Vec::new();
        Some(Self::build_tree(&nodes, &node.id, None, &mut path, false))
    }

    fn build_tree(
        nodes: &HashMap<String, DependencyNode>,
        id: &str,
        range: Option<&str>,
        path: &mut Vec<String>,
        downward: bool,
    ) -> DependencyTree {
        let node = nodes.get(id);
        let mut tree = DependencyTree {
            id: id.to_string(),
            version: node.map(|n| n.version.clone()),
            range: range.map(str::to_string),
            circular: path.iter().any(|p| p == id),
            children: Vec::new(),
        };
        let Some(node) = node else {
            return tree;
        };
        if tree.circular {
            return tree;
        }

        path.push(id.to_string());
        if downward {
            for (dependency, range) in &node.dependencies {
                tree.children
                    .push(Self::build_tree(nodes, dependency, Some(range), path, true));
            }
        } else {
            for dependent in &node.dependents {
                tree.children.push(Self::build_tree(nodes, dependent, None, path, false));
            }
        }
        path.pop();
        tree
    }

    /// Order `ids` so every plugin follows its dependencies.
    ///
    /// Dependencies outside `ids` are ignored. Ties keep id order.
    pub fn install_order(&self, ids: &[&str]) -> PluginResult<Vec<String>> {
        let nodes = self.nodes.read();
        let selected: BTreeSet<&str> = ids.iter().copied().collect();
        for id in &selected {
            if !nodes.contains_key(*id) {
                return Err(PluginError::not_found(*id));
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            nodes: &'a HashMap<String, DependencyNode>,
            selected: &BTreeSet<&'a str>,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            order: &mut Vec<String>,
        ) -> Result<(), String> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(id.to_string()),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(node) = nodes.get(id) {
                for dependency in node.dependencies.keys() {
                    if selected.contains(dependency.as_str()) {
                        visit(nodes, selected, dependency.as_str(), marks, order)?;
                    }
                }
            }
            marks.insert(id, Mark::Done);
            order.push(id.to_string());
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(selected.len());
        for id in &selected {
            let Some((key, _)) = nodes.get_key_value(*id) else {
                continue;
            };
            visit(&nodes, &selected, key.as_str(), &mut marks, &mut order).map_err(|at| {
                PluginError::dependency(at.clone(), format!("circular dependency involving {at}"))
            })?;
        }
        Ok(order)
    }

    /// Find cycles with a DFS over a recursion stack.
    ///
    /// Every back edge to a node on the active stack yields one cycle path.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let nodes = self.nodes.read();
        let mut ids: Vec<&str> = nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();

        fn dfs<'a>(
            nodes: &'a HashMap<String, DependencyNode>,
            id: &'a str,
            visited: &mut HashSet<&'a str>,
            stack: &mut Vec<&'a str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            visited.insert(id);
            stack.push(id);
            if let Some(node) = nodes.get(id) {
                for dependency in node.dependencies.keys() {
                    let Some((key, _)) = nodes.get_key_value(dependency) else {
                        continue;
                    };
                    let key = key.as_str();
                    if let Some(position) = stack.iter().position(|entry| *entry == key) {
                        let mut cycle: Vec<String> = stack[position..].iter().map(|s| s.to_string()).collect();
                        cycle.push(key.to_string());
                        cycles.push(cycle);
                    } else if !visited.contains(key) {
                        dfs(nodes, key, visited, stack, cycles);
                    }
                }
            }
            stack.pop();
        }

        let mut visited = HashSet::new();
        let mut cycles = Vec::new();
        for id in ids {
            if !visited.contains(id) {
                let mut stack = Vec::new();
                dfs(&nodes, id, &mut visited, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    /// Concrete suggestions for making `metadata` installable.
    pub fn resolve_conflicts(&self, metadata: &PluginMetadata) -> Vec<Resolution> {
        let nodes = self.nodes.read();
        let mut resolutions = Vec::new();

        for (name, range) in &metadata.dependencies {
            match nodes.get(name) {
                None => resolutions.push(Resolution::InstallDependency {
                    plugin_id: name.clone(),
                    range: range.clone(),
                }),
                Some(node) if !satisfies(&node.version, range) => {
                    resolutions.push(Resolution::ChangeDependencyVersion {
                        plugin_id: name.clone(),
                        range: range.clone(),
                        installed: node.version.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for conflict in Self::find_conflicts(&nodes, metadata) {
            resolutions.push(Resolution::UninstallConflicting {
                plugin_id: conflict.plugin_id.clone(),
                reason: conflict.to_string(),
            });
        }
        resolutions
    }

    /// Graph statistics.
    pub fn stats(&self) -> GraphStats {
        let cycles = self.detect_cycles().len();
        let nodes = self.nodes.read();

        let edges = nodes
            .values()
            .map(|node| node.dependencies.keys().filter(|d| nodes.contains_key(*d)).count())
            .sum();
        let orphaned = nodes
            .values()
            .filter(|node| node.dependencies.is_empty() && node.dependents.is_empty())
            .count();

        fn depth<'a>(
            nodes: &'a HashMap<String, DependencyNode>,
            id: &'a str,
            stack: &mut Vec<&'a str>,
            memo: &mut HashMap<&'a str, usize>,
        ) -> usize {
            if let Some(known) = memo.get(id) {
                return *known;
            }
            if stack.contains(&id) {
                return 0;
            }
            let Some((key, node)) = nodes.get_key_value(id) else {
                return 0;
            };
            stack.push(key.as_str());
            let deepest = node
                .dependencies
                .keys()
                .filter(|d| nodes.contains_key(*d))
                .map(|d| 1 + depth(nodes, d.as_str(), stack, memo))
                .max()
                .unwrap_or(0);
            stack.pop();
            memo.insert(key.as_str(), deepest);
            deepest
        }

        let mut memo = HashMap::new();
        let max_depth = nodes
            .keys()
            .map(|id| depth(&nodes, id.as_str(), &mut Vec::new(), &mut memo))
            .max()
            .unwrap_or(0);

        GraphStats {
            nodes: nodes.len(),
            edges,
            cycles,
            orphaned,
            max_depth,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Check whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
