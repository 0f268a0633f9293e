//! Subprocess bridge to the candidate-strength inference worker
//!
//! The worker owns the trained classifier artifact. One process is spawned
//! per call: the bridge sends a `load` line followed by a `predict` line and
//! reads one JSON response per request line from stdout. Stderr is captured
//! for logs only. Every call runs under a hard wall-clock timeout; on expiry
//! the worker is killed and the call fails with a typed error — there is no
//! fallback score.

use crate::errors::ShortlistError;
use crate::features::CLASSIFIER_FEATURE_COUNT;
use crate::ml::StrengthModel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

/// Canonical location of the inference worker; no alternative locations are
/// searched.
pub const CLASSIFIER_WORKER_PATH: &str = "workers/classifier_worker.py";
pub const WORKER_INTERPRETER: &str = "python3";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<&'a [f64]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    candidate_strength: f64,
    #[serde(default)]
    #[allow(dead_code)]
    confidence: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Classifier bridge backed by the external inference worker
pub struct SubprocessClassifier {
    program: String,
    worker_path: PathBuf,
    model_path: Option<PathBuf>,
    timeout_ms: u64,
}

impl SubprocessClassifier {
    pub fn new(model_path: Option<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            program: WORKER_INTERPRETER.to_string(),
            worker_path: PathBuf::from(CLASSIFIER_WORKER_PATH),
            model_path,
            timeout_ms,
        }
    }

    /// Override the worker command (tests point this at a shell script)
    pub fn with_worker(mut self, program: &str, worker_path: PathBuf) -> Self {
        self.program = program.to_string();
        self.worker_path = worker_path;
        self
    }

    async fn run_worker(&self, features: &[f64]) -> Result<WorkerResponse, ShortlistError> {
        let model_path = self.model_path.as_ref().ok_or_else(|| {
            ShortlistError::ModelUnavailable("CLASSIFIER_MODEL_PATH is not configured".to_string())
        })?;

        if !model_path.exists() {
            return Err(ShortlistError::ModelUnavailable(format!(
                "classifier artifact not found at {}",
                model_path.display()
            )));
        }

        let mut child = Command::new(&self.program)
            .arg(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ShortlistError::ModelUnavailable(format!(
                    "failed to spawn inference worker {} {}: {}",
                    self.program,
                    self.worker_path.display(),
                    e
                ))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ShortlistError::ClassifierInvariantFailed("worker stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ShortlistError::ClassifierInvariantFailed("worker stdout unavailable".to_string())
        })?;
        let mut stderr = child.stderr.take();

        let model_path_str = model_path.to_string_lossy().to_string();
        let load = serde_json::to_string(&WorkerRequest {
            mode: "load",
            model_path: Some(&model_path_str),
            features: None,
        })
        .map_err(|e| ShortlistError::ClassifierInvariantFailed(e.to_string()))?;
        let predict = serde_json::to_string(&WorkerRequest {
            mode: "predict",
            model_path: None,
            features: Some(features),
        })
        .map_err(|e| ShortlistError::ClassifierInvariantFailed(e.to_string()))?;

        let limit = Duration::from_millis(self.timeout_ms);
        let exchange = timeout(limit, async {
            stdin
                .write_all(format!("{}\n{}\n", load, predict).as_bytes())
                .await
                .map_err(|e| {
                    ShortlistError::ClassifierInvariantFailed(format!(
                        "failed to write to worker stdin: {}",
                        e
                    ))
                })?;
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            let mut responses: Vec<WorkerResponse> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerResponse>(&line) {
                    Ok(resp) => responses.push(resp),
                    Err(e) => {
                        return Err(ShortlistError::ClassifierInvariantFailed(format!(
                            "unparseable worker output: {} ({})",
                            line, e
                        )))
                    }
                }
                if responses.len() == 2 {
                    break;
                }
            }
            Ok(responses)
        })
        .await;

        let responses = match exchange {
            Err(_) => {
                let _ = child.start_kill();
                log::error!(
                    "[ML] Inference worker exceeded {}ms, killed",
                    self.timeout_ms
                );
                return Err(ShortlistError::Timeout {
                    operation: "classifier inference".to_string(),
                    limit_ms: self.timeout_ms,
                });
            }
            Ok(result) => result?,
        };

        // Drain stderr for the log before reaping the worker
        if let Some(stderr) = stderr.as_mut() {
            let mut diagnostics = String::new();
            let _ = timeout(Duration::from_millis(250), stderr.read_to_string(&mut diagnostics))
                .await;
            if !diagnostics.trim().is_empty() {
                log::debug!("[ML] worker stderr: {}", diagnostics.trim());
            }
        }

        let status = match timeout(Duration::from_millis(1_000), child.wait()).await {
            Ok(Ok(status)) => status,
            _ => {
                let _ = child.start_kill();
                return Err(ShortlistError::ClassifierInvariantFailed(
                    "worker did not exit after responding".to_string(),
                ));
            }
        };
        if !status.success() {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "worker exited with status {}",
                status
            )));
        }

        let mut responses = responses.into_iter();
        let load_resp = responses.next().ok_or_else(|| {
            ShortlistError::ClassifierInvariantFailed("worker produced no output".to_string())
        })?;
        if !load_resp.success {
            return Err(ShortlistError::ModelUnavailable(format!(
                "worker failed to load artifact: {}",
                load_resp.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        responses.next().ok_or_else(|| {
            ShortlistError::ClassifierInvariantFailed(
                "worker produced no prediction response".to_string(),
            )
        })
    }
}

#[async_trait]
impl StrengthModel for SubprocessClassifier {
    async fn candidate_strength(&self, features: &[f64]) -> Result<f64, ShortlistError> {
        if features.len() != CLASSIFIER_FEATURE_COUNT {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "expected {} features, got {}",
                CLASSIFIER_FEATURE_COUNT,
                features.len()
            )));
        }

        let response = self.run_worker(features).await?;

        if !response.success {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "worker reported failure: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let strength = response.candidate_strength;
        if !strength.is_finite() || !(0.0..=1.0).contains(&strength) {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "candidate strength out of range: {}",
                strength
            )));
        }

        // A zero on non-empty input means the artifact and the extractor
        // disagree on feature shape.
        let has_signal = features[0] > 0.0 || features[5] > 0.0;
        if strength == 0.0 && has_signal {
            return Err(ShortlistError::ClassifierInvariantFailed(
                "feature shape mismatch: zero strength for non-empty profile".to_string(),
            ));
        }

        Ok(strength)
    }

    fn is_available(&self) -> bool {
        self.model_path
            .as_ref()
            .map(|p| p.exists())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_artifact_is_model_unavailable() {
        let bridge = SubprocessClassifier::new(None, 1_000);
        let features = vec![1.0; CLASSIFIER_FEATURE_COUNT];
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        assert!(matches!(err, ShortlistError::ModelUnavailable(_)));
        assert!(!bridge.is_available());

        let bridge =
            SubprocessClassifier::new(Some(PathBuf::from("/nonexistent/model.pkl")), 1_000);
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        assert!(matches!(err, ShortlistError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_wrong_feature_count_is_rejected() {
        let bridge = SubprocessClassifier::new(None, 1_000);
        let err = bridge.candidate_strength(&[1.0; 12]).await.unwrap_err();
        assert!(matches!(
            err,
            ShortlistError::ClassifierInvariantFailed(_)
        ));
    }

    fn stub_artifact(dir: &tempfile::TempDir) -> PathBuf {
        let artifact = dir.path().join("model.pkl");
        std::fs::write(&artifact, b"stub").unwrap();
        artifact
    }

    fn script_worker(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_sleeping_worker_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SubprocessClassifier::new(Some(stub_artifact(&dir)), 200)
            .with_worker("/bin/sh", script_worker(&dir, "sleep 5"));

        let features = vec![1.0; CLASSIFIER_FEATURE_COUNT];
        let started = std::time::Instant::now();
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        assert!(matches!(err, ShortlistError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(1_200));
    }

    #[tokio::test]
    async fn test_worker_responses_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SubprocessClassifier::new(Some(stub_artifact(&dir)), 2_000).with_worker(
            "/bin/sh",
            script_worker(
                &dir,
                "cat > /dev/null\necho '{\"success\":true}'\necho '{\"success\":true,\"candidateStrength\":0.72}'",
            ),
        );

        let features = vec![1.0; CLASSIFIER_FEATURE_COUNT];
        let strength = bridge.candidate_strength(&features).await.unwrap();
        assert!((strength - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_strength_with_signal_is_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SubprocessClassifier::new(Some(stub_artifact(&dir)), 2_000).with_worker(
            "/bin/sh",
            script_worker(
                &dir,
                "cat > /dev/null\necho '{\"success\":true}'\necho '{\"success\":true,\"candidateStrength\":0.0}'",
            ),
        );

        let mut features = vec![0.0; CLASSIFIER_FEATURE_COUNT];
        features[0] = 5.0;
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        match err {
            ShortlistError::ClassifierInvariantFailed(msg) => {
                assert!(msg.contains("shape mismatch"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_worker_is_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SubprocessClassifier::new(Some(stub_artifact(&dir)), 2_000)
            .with_worker("/bin/sh", script_worker(&dir, "cat > /dev/null"));

        let features = vec![1.0; CLASSIFIER_FEATURE_COUNT];
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        assert!(matches!(err, ShortlistError::ClassifierInvariantFailed(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_strength_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = SubprocessClassifier::new(Some(stub_artifact(&dir)), 2_000).with_worker(
            "/bin/sh",
            script_worker(
                &dir,
                "cat > /dev/null\necho '{\"success\":true}'\necho '{\"success\":true,\"candidateStrength\":1.7}'",
            ),
        );

        let features = vec![1.0; CLASSIFIER_FEATURE_COUNT];
        let err = bridge.candidate_strength(&features).await.unwrap_err();
        assert!(matches!(err, ShortlistError::ClassifierInvariantFailed(_)));
    }
}
