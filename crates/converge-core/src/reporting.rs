//! Persisted run reports.
//!
//! Layout: `<dir>/<run_id>/convergence.json` plus `convergence.digest`, the
//! SHA-256 hex digest of the JSON bytes. Reads verify the digest before
//! deserializing.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::convergence::{ConvergenceResult, IssueStatus};

pub const REPORT_FILE: &str = "convergence.json";
pub const DIGEST_FILE: &str = "convergence.digest";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("report {run_id} digest mismatch: expected {expected}, found {actual}")]
    DigestMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },
}

pub type ReportResult<T> = std::result::Result<T, ReportError>;

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> ReportResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}

/// Persist `result` under `dir` and return the report directory.
pub fn write_run_report(result: &ConvergenceResult, dir: &Path) -> ReportResult<PathBuf> {
    let run_dir = dir.join(&result.run_id);
    fs::create_dir_all(&run_dir)?;

    let content = serde_json::to_vec_pretty(result)?;
    let digest = digest_hex(&content);
    write_atomic(&run_dir, REPORT_FILE, &content)?;
    write_atomic(&run_dir, DIGEST_FILE, digest.as_bytes())?;

    debug!(run_id = %result.run_id, digest = %digest, path = ?run_dir, "run report written");
    Ok(run_dir)
}

/// Load a persisted report, rejecting it if the content no longer matches its digest.
pub fn read_run_report(run_id: &str, dir: &Path) -> ReportResult<ConvergenceResult> {
    let run_dir = dir.join(run_id);
    let content = fs::read(run_dir.join(REPORT_FILE))?;
    let expected = fs::read_to_string(run_dir.join(DIGEST_FILE))?.trim().to_string();
    let actual = digest_hex(&content);
    if expected != actual {
        return Err(ReportError::DigestMismatch {
            run_id: run_id.to_string(),
            expected,
            actual,
        });
    }
    Ok(serde_json::from_slice(&content)?)
}

/// Render a markdown summary for PR comments and CI output.
pub fn render_summary_md(result: &ConvergenceResult) -> String {
    let summary = &result.summary;
    let mut out = String::new();
    out.push_str(&format!("# Convergence Run `{}`\n\n", result.run_id));
    out.push_str(&format!(
        "- subject: `{}`\n- outcome: **{}** ({})\n- passes: {} ({} clean)\n- issues fixed: {}\n- escalations: {}\n- duration: {}ms\n\n",
        result.subject_id,
        summary.termination_reason,
        result.state,
        summary.passes_executed,
        summary.clean_passes,
        summary.total_issues_fixed,
        summary.escalations,
        result.duration_ms()
    ));

    if let Some(reason) = &result.escalation_reason {
        out.push_str(&format!("> {reason}\n\n"));
    }

    out.push_str("## Passes\n");
    out.push_str("| # | methodology | clean | issues | streak |\n");
    out.push_str("|---|---|---|---|---|\n");
    for pass in &result.passes {
        let clean = match (&pass.error, pass.clean) {
            (Some(_), _) => "error",
            (None, true) => "yes",
            (None, false) => "no",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            pass.index,
            pass.methodology,
            clean,
            pass.issues.len(),
            pass.consecutive_clean_after
        ));
    }

    if !result.outstanding_issues.is_empty() {
        out.push_str("\n## Outstanding Issues\n");
        for outstanding in &result.outstanding_issues {
            let status = match outstanding.status {
                IssueStatus::Unresolved => "unresolved",
                IssueStatus::FixedUnverified => "fixed (unverified)",
                IssueStatus::Escalated => "escalated",
                IssueStatus::AcceptedDebt => "accepted as debt",
            };
            let issue = &outstanding.issue;
            out.push_str(&format!(
                "- `{}` [{}] {} at `{}`: {} ({status})\n",
                issue.id, issue.severity, issue.category, issue.location, issue.description
            ));
        }
    }
    out
}
