//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs against the server's run list, so
//! users can type the first few characters of an ID.

use anyhow::{Context, Result, anyhow};
use keel_client::KeelClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Runs searched when resolving a prefix
const SEARCH_LIMIT: u32 = 500;

/// Resolve a run ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if no run or more than one run matches, or the API call
/// fails
pub async fn resolve_run_id(client: &KeelClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs(None, Some(SEARCH_LIMIT))
        .await
        .context("Failed to fetch runs for ID resolution")?;

    match_prefix(runs.iter().map(|r| r.id), &id_or_prefix.to_string())
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids.filter(|id| id.to_string().starts_with(prefix)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
