//! Subprocess bridge to the resume parser worker
//!
//! The parser lives at a single canonical path and is invoked once per
//! upload: `parser <resumePath>`. It writes one JSON document matching
//! [`ParsedResume`] to stdout, diagnostics to stderr, and always exits 0; a
//! failed parse is signalled by an empty-defaults payload. The bridge adds a
//! hard timeout with a forced kill and treats every failure as "parser
//! failed, proceed with empty defaults" so an upload can never block on
//! parsing.

use crate::resume::{ParsedResume, ParsingStatus};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Canonical location of the parser worker; no alternative locations are
/// searched.
pub const RESUME_PARSER_PATH: &str = "workers/resume_parser.py";

/// Completeness under this threshold downgrades SUCCESS to PARTIAL
const PARTIAL_COMPLETENESS_THRESHOLD: f64 = 0.5;

pub struct ResumeParser {
    program: String,
    worker_path: PathBuf,
    timeout_ms: u64,
}

impl ResumeParser {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            program: super::classifier::WORKER_INTERPRETER.to_string(),
            worker_path: PathBuf::from(RESUME_PARSER_PATH),
            timeout_ms,
        }
    }

    /// Override the worker command (tests point this at a shell script)
    pub fn with_worker(mut self, program: &str, worker_path: PathBuf) -> Self {
        self.program = program.to_string();
        self.worker_path = worker_path;
        self
    }

    /// Parse one resume file; never fails
    ///
    /// A fresh process per upload means no parser state can leak between
    /// uploads.
    pub async fn parse(&self, resume_path: &Path) -> (ParsedResume, ParsingStatus) {
        let mut child = match Command::new(&self.program)
            .arg(&self.worker_path)
            .arg(resume_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::warn!(
                    "[ResumeParser] Failed to spawn parser {} {}: {}",
                    self.program,
                    self.worker_path.display(),
                    e
                );
                return (ParsedResume::default(), ParsingStatus::Failed);
            }
        };

        let limit = Duration::from_millis(self.timeout_ms);
        let output = match timeout(limit, async {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let mut out = String::new();
            let mut diag = String::new();
            if let Some(mut stdout) = stdout {
                use tokio::io::AsyncReadExt;
                let _ = stdout.read_to_string(&mut out).await;
            }
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut diag).await;
            }
            let _ = child.wait().await;
            (out, diag)
        })
        .await
        {
            Ok(output) => output,
            Err(_) => {
                let _ = child.start_kill();
                log::warn!(
                    "[ResumeParser] Parser exceeded {}ms for {}, killed",
                    self.timeout_ms,
                    resume_path.display()
                );
                return (ParsedResume::default(), ParsingStatus::Failed);
            }
        };

        let (stdout, diagnostics) = output;
        if !diagnostics.trim().is_empty() {
            log::debug!("[ResumeParser] stderr: {}", diagnostics.trim());
        }

        let parsed: ParsedResume = match serde_json::from_str(stdout.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!(
                    "[ResumeParser] Unparseable parser output for {}: {}",
                    resume_path.display(),
                    e
                );
                return (ParsedResume::default(), ParsingStatus::Failed);
            }
        };

        let status = classify_outcome(&parsed);
        log::info!(
            "[ResumeParser] Parsed {}: status={} skills={} experienceMonths={} completeness={:.2}",
            resume_path.display(),
            status.as_str(),
            parsed.skills.technical_skill_union().len(),
            parsed.experience_months,
            parsed.resume_completeness_score
        );
        (parsed, status)
    }
}

fn classify_outcome(parsed: &ParsedResume) -> ParsingStatus {
    let has_any_content = !parsed.skills.technical_skill_union().is_empty()
        || parsed.experience_months > 0
        || !parsed.projects.is_empty()
        || !parsed.education.is_empty();

    if !has_any_content {
        ParsingStatus::Failed
    } else if parsed.resume_completeness_score < PARTIAL_COMPLETENESS_THRESHOLD {
        ParsingStatus::Partial
    } else {
        ParsingStatus::Success
    }
}
