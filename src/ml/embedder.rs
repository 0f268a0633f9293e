//! Subprocess bridge to the sentence-embedding worker
//!
//! Unlike the classifier, the embedding worker is long-lived: model weights
//! dominate its startup cost, so one process is spawned lazily and reused
//! across calls. The worker holds no per-request state; the request/response
//! protocol is one JSON line each way. Any protocol or I/O failure tears the
//! worker down so the next call respawns it.

use crate::errors::ShortlistError;
use crate::ml::{l2_normalize, TextEmbedder, EMBEDDING_DIM};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Canonical location of the embedding worker
pub const EMBEDDING_WORKER_PATH: &str = "workers/embedding_worker.py";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbedResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    error: Option<String>,
}

struct EmbedWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Embedding bridge backed by the long-lived worker process
pub struct SubprocessEmbedder {
    program: String,
    worker_path: PathBuf,
    model_id: String,
    timeout_ms: u64,
    worker: Mutex<Option<EmbedWorker>>,
}

impl SubprocessEmbedder {
    pub fn new(model_id: String, timeout_ms: u64) -> Self {
        Self {
            program: super::classifier::WORKER_INTERPRETER.to_string(),
            worker_path: PathBuf::from(EMBEDDING_WORKER_PATH),
            model_id,
            timeout_ms,
            worker: Mutex::new(None),
        }
    }

    /// Override the worker command (tests point this at a shell script)
    pub fn with_worker(mut self, program: &str, worker_path: PathBuf) -> Self {
        self.program = program.to_string();
        self.worker_path = worker_path;
        self
    }

    async fn spawn_worker(&self) -> Result<EmbedWorker, ShortlistError> {
        let mut child = Command::new(&self.program)
            .arg(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ShortlistError::ModelUnavailable(format!(
                    "failed to spawn embedding worker {} {}: {}",
                    self.program,
                    self.worker_path.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ShortlistError::ModelUnavailable("embedding worker stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ShortlistError::ModelUnavailable("embedding worker stdout unavailable".to_string())
        })?;

        let mut worker = EmbedWorker {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        // One-time load message; the ack confirms the model is resident.
        let load = serde_json::to_string(&EmbedRequest {
            mode: "load",
            model_id: Some(&self.model_id),
            text: None,
        })
        .map_err(|e| ShortlistError::ModelUnavailable(e.to_string()))?;

        let ack = self.exchange(&mut worker, &load).await?;
        if !ack.success {
            let _ = worker.child.start_kill();
            return Err(ShortlistError::ModelUnavailable(format!(
                "embedding worker failed to load model {}: {}",
                self.model_id,
                ack.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        log::info!(
            "[ML] Embedding worker ready (model {})",
            self.model_id
        );
        Ok(worker)
    }

    async fn exchange(
        &self,
        worker: &mut EmbedWorker,
        request_line: &str,
    ) -> Result<EmbedResponse, ShortlistError> {
        let limit = Duration::from_millis(self.timeout_ms);
        let result = timeout(limit, async {
            worker
                .stdin
                .write_all(format!("{}\n", request_line).as_bytes())
                .await
                .map_err(|e| {
                    ShortlistError::ModelUnavailable(format!(
                        "embedding worker write failed: {}",
                        e
                    ))
                })?;
            worker.stdin.flush().await.map_err(|e| {
                ShortlistError::ModelUnavailable(format!("embedding worker flush failed: {}", e))
            })?;

            let line = worker
                .stdout
                .next_line()
                .await
                .map_err(|e| {
                    ShortlistError::ModelUnavailable(format!(
                        "embedding worker read failed: {}",
                        e
                    ))
                })?
                .ok_or_else(|| {
                    ShortlistError::ModelUnavailable("embedding worker closed stdout".to_string())
                })?;

            serde_json::from_str::<EmbedResponse>(line.trim()).map_err(|e| {
                ShortlistError::ModelUnavailable(format!(
                    "unparseable embedding worker output: {}",
                    e
                ))
            })
        })
        .await;

        match result {
            Err(_) => {
                let _ = worker.child.start_kill();
                Err(ShortlistError::Timeout {
                    operation: "embedding inference".to_string(),
                    limit_ms: self.timeout_ms,
                })
            }
            Ok(inner) => inner,
        }
    }
}

#[async_trait]
impl TextEmbedder for SubprocessEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShortlistError> {
        let request = serde_json::to_string(&EmbedRequest {
            mode: "embed",
            model_id: None,
            text: Some(text),
        })
        .map_err(|e| ShortlistError::ModelUnavailable(e.to_string()))?;

        let mut guard = self.worker.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn_worker().await?);
        }
        let worker = guard.as_mut().expect("worker was just ensured");

        let response = match self.exchange(worker, &request).await {
            Ok(resp) => resp,
            Err(e) => {
                // Tear down so the next call starts from a clean worker
                *guard = None;
                return Err(e);
            }
        };

        if !response.success {
            *guard = None;
            return Err(ShortlistError::ModelUnavailable(format!(
                "embedding worker reported failure: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let mut embedding = response.embedding;
        if embedding.len() != EMBEDDING_DIM {
            *guard = None;
            return Err(ShortlistError::ModelUnavailable(format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                EMBEDDING_DIM
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            *guard = None;
            return Err(ShortlistError::ModelUnavailable(
                "embedding contains non-finite values".to_string(),
            ));
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_worker(dir: &tempfile::TempDir, line: &str) -> PathBuf {
        let script = dir.path().join("embedder.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nwhile read _line; do\n  echo '{}'\ndone\n", line),
        )
        .unwrap();
        script
    }

    #[tokio::test]
    async fn test_valid_embedding_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let values = vec!["0.05"; EMBEDDING_DIM].join(",");
        let line = format!("{{\"success\":true,\"embedding\":[{}]}}", values);
        let embedder = SubprocessEmbedder::new("test-model".into(), 2_000)
            .with_worker("/bin/sh", echo_worker(&dir, &line));

        let embedding = embedder.embed("some text").await.unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        // Worker stays resident across calls
        let again = embedder.embed("other text").await.unwrap();
        assert_eq!(again.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = SubprocessEmbedder::new("test-model".into(), 2_000).with_worker(
            "/bin/sh",
            echo_worker(&dir, r#"{"success":true,"embedding":[0.1,0.2]}"#),
        );

        let err = embedder.embed("some text").await.unwrap_err();
        assert!(matches!(err, ShortlistError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_hung_worker_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("embedder.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        let embedder =
            SubprocessEmbedder::new("test-model".into(), 200).with_worker("/bin/sh", script);

        let err = embedder.embed("some text").await.unwrap_err();
        assert!(matches!(err, ShortlistError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unspawnable_worker_is_model_unavailable() {
        let embedder = SubprocessEmbedder::new("test-model".into(), 500)
            .with_worker("/nonexistent/interpreter", PathBuf::from("missing.py"));
        let err = embedder.embed("some text").await.unwrap_err();
        assert!(matches!(err, ShortlistError::ModelUnavailable(_)));
    }
}
