//! Branch to environment resolution

use glob_match::glob_match;
use keel_core::domain::{Condition, EnvironmentBinding, EnvironmentTable};
use keel_core::{KeelError, Result};

/// Maps a branch to the deployment target of a definition
///
/// Rules are tried in declaration order and the first match wins; the
/// fallback binding is used when nothing matches.
pub struct EnvironmentResolver<'a> {
    table: &'a EnvironmentTable,
}

impl<'a> EnvironmentResolver<'a> {
    pub fn new(table: &'a EnvironmentTable) -> Self {
        Self { table }
    }

    pub fn resolve(&self, branch: &str) -> Result<&'a EnvironmentBinding> {
        let branch = normalize_branch(branch);
        self.table
            .rules
            .iter()
            .find(|rule| branch_matches(&rule.pattern, branch))
            .or(self.table.fallback.as_ref())
            .ok_or_else(|| KeelError::NoEnvironmentMatch {
                branch: branch.to_string(),
            })
    }
}

/// Strips remote and ref prefixes SCM webhooks put on branch names
pub fn normalize_branch(branch: &str) -> &str {
    let branch = branch.trim();
    ["refs/heads/", "refs/remotes/origin/", "origin/"]
        .iter()
        .find_map(|prefix| branch.strip_prefix(prefix))
        .unwrap_or(branch)
}

pub fn branch_matches(pattern: &str, branch: &str) -> bool {
    pattern == branch || glob_match(pattern, branch)
}

/// Whether a step's `when` condition lets it run for this trigger
pub fn condition_allows(condition: &Condition, branch: &str, environment: &str) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Never => false,
        Condition::Branch(patterns) => {
            let branch = normalize_branch(branch);
            patterns.iter().any(|p| branch_matches(p, branch))
        }
        Condition::Environment(names) => names.iter().any(|n| n == environment),
    }
}
