//! Key placement: rendezvous hashing over the server list.
//!
//! Every key type whose prefix encodes a user id places by that user, so all
//! of a user's metadata lands on the same replica set. Scores are the first
//! eight bytes of `SHA-256(server || subject)` — deterministic across nodes
//! and stable under membership change: removing one server only moves the
//! keys that ranked it.
//!
//! Shard data itself is not placed here; shards are pinned to the node that
//! created them and their path carries the owner implicitly.

use crate::error::{ClusterError, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

// Key shapes:
//   U/<user>/C/        a user's collection listing
//   U/<user>/C/<col>   one collection record
fn user_collections_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^U/\w+/C/$").unwrap())
}

fn collection_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^U/\w+/C/\w+$").unwrap())
}

fn score(server: &str, subject: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(server.as_bytes());
    hasher.update(subject.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Rank `servers` by `hash(server, subject)` and return the top
/// `replication` of them.
pub fn rendezvous_hash(subject: &str, servers: &[String], replication: usize) -> Vec<String> {
    let mut ranked: Vec<(u64, &String)> = servers
        .iter()
        .map(|server| (score(server, subject), server))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ranked
        .into_iter()
        .take(replication)
        .map(|(_, server)| server.clone())
        .collect()
}

/// Resolve the replica set responsible for `key`. Unknown key shapes are an
/// error rather than a silent default.
pub fn key_placement(key: &str, servers: &[String], replication: usize) -> Result<Vec<String>> {
    if user_collections_regex().is_match(key) || collection_key_regex().is_match(key) {
        let user_id = key.split('/').nth(1).unwrap_or_default();
        Ok(rendezvous_hash(user_id, servers, replication))
    } else {
        Err(ClusterError::InvalidRequest(format!(
            "unknown key type: {key}"
        )))
    }
}

/// Fold per-replica write outcomes into the contract result: any stale
/// replica means the value is outdated everywhere (`Conflict`); a write that
/// landed nowhere distinguishes "everything timed out" from "everything
/// failed"; a partial landing is reported as such so the caller can repair.
pub fn aggregate_write_outcomes(outcomes: &[Result<()>]) -> Result<()> {
    let attempted = outcomes.len();
    let mut succeeded = 0usize;
    let mut conflicts = 0usize;
    let mut timeouts = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(()) => succeeded += 1,
            Err(ClusterError::StaleData(_)) => conflicts += 1,
            Err(ClusterError::Timeout(_)) => timeouts += 1,
            Err(err) => {
                tracing::warn!(error = %err, "replica write failed");
            }
        }
    }
    if conflicts > 0 {
        // A newer version exists somewhere; the caller's value is outdated.
        return Err(ClusterError::Conflict(format!(
            "{conflicts}/{attempted} replicas reported stale data"
        )));
    }
    if attempted > 0 && timeouts == attempted {
        return Err(ClusterError::Timeout("every replica timed out".into()));
    }
    if succeeded == 0 {
        return Err(ClusterError::NoSuccess(format!(
            "0/{attempted} replicas accepted the write"
        )));
    }
    if succeeded == attempted {
        return Ok(());
    }
    Err(ClusterError::PartialSuccess {
        succeeded,
        attempted,
    })
}
