//! Prediction orchestrator
//!
//! Drives one (user, job) prediction end to end: fresh profile and job
//! fetches inside a single snapshot, feature extraction, per-job embedding,
//! classifier call, score combination, collision guards, explanation
//! synthesis, persistence. The engine itself is stateless across requests
//! apart from a small ring buffer used solely for leakage detection.

use crate::config::EngineConfig;
use crate::db::Database;
use crate::embedding::{job_match_score, EmbeddingService, EmbeddingSource};
use crate::errors::{ShortlistError, StorageError};
use crate::features::{extract_features, FeatureSet};
use crate::jobs::{fetch_job, jd_demands_seniority, FetchedJob};
use crate::ml::StrengthModel;
use crate::profile::{fetch_candidate_profile, CandidateProfile, SkillLevel};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Weight of candidate strength in the combined probability
pub const STRENGTH_WEIGHT: f64 = 0.4;
/// Weight of job match in the combined probability
pub const MATCH_WEIGHT: f64 = 0.6;
/// Calibration floor and ceiling
pub const PROBABILITY_FLOOR: f64 = 0.05;
pub const PROBABILITY_CEILING: f64 = 0.95;

/// How many recent job-match scores the leakage guard remembers
const RECENT_SCORE_CAPACITY: usize = 10;

/// A computed prediction, as returned and persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub user_id: String,
    pub job_id: String,
    pub candidate_strength: f64,
    pub job_match_score: f64,
    pub shortlist_probability: f64,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub weak_skills: Vec<String>,
    pub improvements: Vec<String>,
    pub job_description_hash: String,
    pub embedding_source: EmbeddingSource,
    pub status: String,
    pub timestamp: String,
}

/// The three scores of one pipeline run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSet {
    pub candidate_strength: f64,
    pub job_match_score: f64,
    pub shortlist_probability: f64,
}

/// Pure skill-gap explanations for one (profile, job) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Explanations {
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub weak_skills: Vec<String>,
}

/// Request lifecycle, logged per transition for leakage investigations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineStage {
    Fetching,
    Embedding,
    Classifying,
    Combining,
    Explaining,
    Persisting,
}

impl PipelineStage {
    fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Fetching => "fetching",
            PipelineStage::Embedding => "embedding",
            PipelineStage::Classifying => "classifying",
            PipelineStage::Combining => "combining",
            PipelineStage::Explaining => "explaining",
            PipelineStage::Persisting => "persisting",
        }
    }
}

struct EngineState {
    previous_job_id: Option<String>,
    recent_scores: VecDeque<(String, f64)>,
}

/// The prediction engine shared across requests
pub struct PredictionEngine {
    db: Database,
    embeddings: Arc<EmbeddingService>,
    model: Arc<dyn StrengthModel>,
    limiter: Arc<Semaphore>,
    prediction_timeout_ms: u64,
    queue_wait_timeout_ms: u64,
    state: Mutex<EngineState>,
}

impl PredictionEngine {
    pub fn new(
        db: Database,
        embeddings: Arc<EmbeddingService>,
        model: Arc<dyn StrengthModel>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            db,
            embeddings,
            model,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_predictions)),
            prediction_timeout_ms: config.prediction_timeout_ms,
            queue_wait_timeout_ms: config.queue_wait_timeout_ms,
            state: Mutex::new(EngineState {
                previous_job_id: None,
                recent_scores: VecDeque::new(),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn model_available(&self) -> bool {
        self.model.is_available()
    }

    /// Compute one prediction
    pub async fn predict(
        &self,
        user_id: &str,
        job_id: &str,
    ) -> Result<Prediction, ShortlistError> {
        if user_id.trim().is_empty() || job_id.trim().is_empty() {
            return Err(ShortlistError::Validation(
                "userId and jobId are required".to_string(),
            ));
        }

        // Admission control: the workers are expensive, surplus requests
        // queue briefly and then fail typed.
        let _permit = match timeout(
            Duration::from_millis(self.queue_wait_timeout_ms),
            self.limiter.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ShortlistError::ClassifierInvariantFailed(
                    "prediction pool closed".to_string(),
                ))
            }
            Err(_) => {
                return Err(ShortlistError::Timeout {
                    operation: "prediction queue admission".to_string(),
                    limit_ms: self.queue_wait_timeout_ms,
                })
            }
        };

        // Shift the previous job id at entry; it goes into the audit line.
        let previous_job_id = {
            let mut state = self.state.lock().expect("engine state lock");
            std::mem::replace(&mut state.previous_job_id, Some(job_id.to_string()))
        };

        let result = self
            .run_pipeline(user_id, job_id, previous_job_id.as_deref())
            .await;

        if let Err(e) = &result {
            log::warn!(
                "[ML] prediction failed user={} job={} stage-error={}",
                user_id,
                job_id,
                e
            );
        }
        result
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        job_id: &str,
        previous_job_id: Option<&str>,
    ) -> Result<Prediction, ShortlistError> {
        log::debug!(
            "[ML] user={} job={} stage={}",
            user_id,
            job_id,
            PipelineStage::Fetching.as_str()
        );
        let (profile, job) = self.fetch_inputs(user_id, job_id)?;

        let (scores, source, features) = self.score_profile(&profile, &job).await?;

        // Leakage guard: a match score identical (to six decimals) to a
        // recent one for a different job is suspect and never returned.
        {
            let mut state = self.state.lock().expect("engine state lock");
            let rounded = round6(scores.job_match_score);
            if let Some((colliding, _)) = state
                .recent_scores
                .iter()
                .find(|(jid, score)| jid.as_str() != job_id && round6(*score) == rounded)
            {
                let colliding = colliding.clone();
                return Err(ShortlistError::StateLeakageDetected {
                    current_job_id: job_id.to_string(),
                    colliding_job_id: colliding,
                }
                .log_and_return("Predict"));
            }
            state.recent_scores.retain(|(jid, _)| jid.as_str() != job_id);
            state
                .recent_scores
                .push_back((job_id.to_string(), scores.job_match_score));
            while state.recent_scores.len() > RECENT_SCORE_CAPACITY {
                state.recent_scores.pop_front();
            }
        }

        log::debug!(
            "[ML] user={} job={} stage={}",
            user_id,
            job_id,
            PipelineStage::Explaining.as_str()
        );
        let explanations = synthesize_explanations(&profile, &job.skills);
        let improvements = build_improvements(&profile, &features, &job, &explanations);

        let prediction = Prediction {
            user_id: user_id.to_string(),
            job_id: job_id.to_string(),
            candidate_strength: scores.candidate_strength,
            job_match_score: scores.job_match_score,
            shortlist_probability: scores.shortlist_probability,
            matched_skills: explanations.matched_skills,
            missing_skills: explanations.missing_skills,
            weak_skills: explanations.weak_skills,
            improvements,
            job_description_hash: job.jd_hash.clone(),
            embedding_source: source,
            status: "completed".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        log::debug!(
            "[ML] user={} job={} stage={}",
            user_id,
            job_id,
            PipelineStage::Persisting.as_str()
        );
        let conn = self.db.open()?;
        store_prediction(&conn, &prediction)?;

        log::info!(
            "[ML] prediction userId={} jobId={} previousJobId={} jdHash={} embeddingSource={} candidateStrength={:.6} jobMatchScore={:.6} shortlistProbability={:.6}",
            user_id,
            job_id,
            previous_job_id.unwrap_or("none"),
            prediction.job_description_hash,
            prediction.embedding_source.as_str(),
            prediction.candidate_strength,
            prediction.job_match_score,
            prediction.shortlist_probability
        );

        Ok(prediction)
    }

    /// Read profile and job within one transactional snapshot
    pub(crate) fn fetch_inputs(
        &self,
        user_id: &str,
        job_id: &str,
    ) -> Result<(CandidateProfile, FetchedJob), ShortlistError> {
        let conn = self.db.open()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(StorageError::from)?;
        let profile = fetch_candidate_profile(&tx, user_id)?;
        let job = fetch_job(&tx, job_id)?;
        tx.commit().map_err(StorageError::from)?;
        Ok((profile, job))
    }

    /// Run the scoring half of the pipeline for an in-memory profile
    ///
    /// Shared by prediction and what-if simulation; the job-side embedding
    /// goes through the per-job cache discipline, the skill-side embedding
    /// is always computed from the profile at hand.
    pub(crate) async fn score_profile(
        &self,
        profile: &CandidateProfile,
        job: &FetchedJob,
    ) -> Result<(ScoreSet, EmbeddingSource, FeatureSet), ShortlistError> {
        let features = extract_features(profile);
        if features.is_empty_profile() {
            return Err(ShortlistError::CandidateIncomplete(profile.user_id.clone()));
        }

        log::debug!(
            "[ML] user={} job={} stage={}",
            profile.user_id,
            job.id,
            PipelineStage::Embedding.as_str()
        );
        let (job_embedding, source) = self.embeddings.embed_job(&job.id, &job.jd_text).await?;
        let user_embedding = self
            .embeddings
            .embed_skill_text(&profile.skill_text())
            .await?;

        log::debug!(
            "[ML] user={} job={} stage={}",
            profile.user_id,
            job.id,
            PipelineStage::Classifying.as_str()
        );
        let strength = match timeout(
            Duration::from_millis(self.prediction_timeout_ms),
            self.model.candidate_strength(features.classifier_slice()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ShortlistError::Timeout {
                    operation: "classifier inference".to_string(),
                    limit_ms: self.prediction_timeout_ms,
                })
            }
        };

        if !strength.is_finite() || strength == 0.0 && features.has_signal() {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "strength {} contradicts non-empty feature vector",
                strength
            )));
        }

        log::debug!(
            "[ML] user={} job={} stage={}",
            profile.user_id,
            job.id,
            PipelineStage::Combining.as_str()
        );
        let match_score = job_match_score(&user_embedding, &job_embedding);
        let scores = ScoreSet {
            candidate_strength: strength,
            job_match_score: match_score,
            shortlist_probability: combine_scores(strength, match_score),
        };
        Ok((scores, source, features))
    }
}

/// The calibration formula: 0.4·strength + 0.6·match, clamped to [0.05, 0.95]
pub fn combine_scores(candidate_strength: f64, job_match: f64) -> f64 {
    (STRENGTH_WEIGHT * candidate_strength + MATCH_WEIGHT * job_match)
        .clamp(PROBABILITY_FLOOR, PROBABILITY_CEILING)
}

fn round6(value: f64) -> i64 {
    (value * 1_000_000.0).round() as i64
}

/// Pure function of the profile and the job's required-skills list
pub fn synthesize_explanations(profile: &CandidateProfile, job_skills: &[String]) -> Explanations {
    let mut matched = Vec::new();
    let mut missing = Vec::new();
    let mut weak = Vec::new();

    for skill in job_skills {
        if profile.has_skill(skill) {
            matched.push(skill.clone());
            if profile.skill_level(skill) == Some(SkillLevel::Beginner) {
                weak.push(skill.clone());
            }
        } else {
            // Missing skills stay in JD order
            missing.push(skill.clone());
        }
    }

    Explanations {
        matched_skills: matched,
        missing_skills: missing,
        weak_skills: weak,
    }
}

/// Short ordered list of concrete gaps; nothing generic
pub fn build_improvements(
    profile: &CandidateProfile,
    features: &FeatureSet,
    job: &FetchedJob,
    explanations: &Explanations,
) -> Vec<String> {
    let mut improvements = Vec::new();

    if !explanations.missing_skills.is_empty() {
        let top: Vec<&str> = explanations
            .missing_skills
            .iter()
            .take(3)
            .map(|s| s.as_str())
            .collect();
        improvements.push(format!(
            "Add {} to your skill set; this role lists {} required skill{} you don't have yet",
            top.join(", "),
            explanations.missing_skills.len(),
            if explanations.missing_skills.len() == 1 { "" } else { "s" }
        ));
    }

    if profile.experience_months < 12 && jd_demands_seniority(&job.jd_text) {
        improvements.push(format!(
            "This role asks for senior-level experience; you currently show {} month{}",
            profile.experience_months,
            if profile.experience_months == 1 { "" } else { "s" }
        ));
    }

    if features.project_count() < 2.0 {
        improvements.push(format!(
            "Build out your project portfolio; {} project{} is thin evidence of applied skills",
            features.project_count() as u32,
            if features.project_count() as u32 == 1 { "" } else { "s" }
        ));
    }

    if features.skill_count() < 5.0 {
        improvements.push(format!(
            "Broaden your skill list; {} skill{} reads as a narrow profile for screening",
            features.skill_count() as u32,
            if features.skill_count() as u32 == 1 { "" } else { "s" }
        ));
    }

    if profile.experience_months == 0 && features.internship_count() == 0.0 {
        improvements.push(
            "Pick up an internship or freelance engagement; the profile shows no work history at all"
                .to_string(),
        );
    }

    improvements.truncate(5);
    improvements
}

/// Insert one prediction row
pub fn store_prediction(conn: &Connection, prediction: &Prediction) -> Result<(), StorageError> {
    let to_json = |list: &Vec<String>| -> Result<String, StorageError> {
        serde_json::to_string(list).map_err(|e| StorageError::InvalidData(e.to_string()))
    };

    conn.execute(
        "INSERT INTO shortlist_predictions
            (user_id, job_id, candidate_strength, job_match_score, shortlist_probability,
             matched_skills, missing_skills, weak_skills, improvements, jd_hash,
             embedding_source, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            prediction.user_id,
            prediction.job_id,
            prediction.candidate_strength,
            prediction.job_match_score,
            prediction.shortlist_probability,
            to_json(&prediction.matched_skills)?,
            to_json(&prediction.missing_skills)?,
            to_json(&prediction.weak_skills)?,
            to_json(&prediction.improvements)?,
            prediction.job_description_hash,
            prediction.embedding_source.as_str(),
            prediction.status,
            prediction.timestamp,
        ],
    )?;
    Ok(())
}

/// Map one `shortlist_predictions` row (selected in declared column order)
pub fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let parse_list = |raw: String| -> Vec<String> {
        serde_json::from_str(&raw).unwrap_or_default()
    };
    Ok(Prediction {
        user_id: row.get(0)?,
        job_id: row.get(1)?,
        candidate_strength: row.get(2)?,
        job_match_score: row.get(3)?,
        shortlist_probability: row.get(4)?,
        matched_skills: parse_list(row.get(5)?),
        missing_skills: parse_list(row.get(6)?),
        weak_skills: parse_list(row.get(7)?),
        improvements: parse_list(row.get(8)?),
        job_description_hash: row.get(9)?,
        embedding_source: EmbeddingSource::parse(&row.get::<_, String>(10)?)
            .unwrap_or(EmbeddingSource::Fresh),
        status: row.get(11)?,
        timestamp: row.get(12)?,
    })
}

pub const PREDICTION_COLUMNS: &str =
    "user_id, job_id, candidate_strength, job_match_score, shortlist_probability, \
     matched_skills, missing_skills, weak_skills, improvements, jd_hash, \
     embedding_source, status, created_at";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SkillEntry;

    fn profile_with(skills: &[(&str, SkillLevel)]) -> CandidateProfile {
        CandidateProfile {
            user_id: "u1".into(),
            user_type: None,
            skills: skills
                .iter()
                .map(|(name, level)| SkillEntry {
                    name: name.to_string(),
                    level: *level,
                })
                .collect(),
            education: vec![],
            experience_months: 0,
            experience: vec![],
            projects_count: 0,
            projects: vec![],
            cgpa: 0.0,
        }
    }

    fn job_with(skills: &[&str], jd_text: &str) -> FetchedJob {
        FetchedJob {
            id: "j1".into(),
            title: "Role".into(),
            company: None,
            jd_text: jd_text.into(),
            jd_hash: crate::jobs::jd_hash(jd_text),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience_level: None,
            location: String::new(),
            is_remote: false,
        }
    }

    #[test]
    fn test_combine_scores_formula() {
        let p = combine_scores(0.5, 0.5);
        assert!((p - 0.5).abs() < 1e-9);

        let p = combine_scores(0.8, 0.6);
        assert!((p - (0.4 * 0.8 + 0.6 * 0.6)).abs() < 1e-9);
    }

    #[test]
    fn test_combine_scores_clamps() {
        assert_eq!(combine_scores(0.0, 0.0), PROBABILITY_FLOOR);
        assert_eq!(combine_scores(1.0, 1.0), PROBABILITY_CEILING);
    }

    #[test]
    fn test_explanations_partition_job_skills() {
        let profile = profile_with(&[
            ("Python", SkillLevel::Advanced),
            ("docker", SkillLevel::Beginner),
        ]);
        let explanations =
            synthesize_explanations(&profile, &vec!["Python".into(), "Docker".into(), "AWS".into()]);

        assert_eq!(explanations.matched_skills, vec!["Python", "Docker"]);
        assert_eq!(explanations.missing_skills, vec!["AWS"]);
        assert_eq!(explanations.weak_skills, vec!["Docker"]);
    }

    #[test]
    fn test_explanations_are_idempotent() {
        let profile = profile_with(&[("Python", SkillLevel::Advanced)]);
        let job_skills = vec!["Python".into(), "Kubernetes".into()];
        let a = synthesize_explanations(&profile, &job_skills);
        let b = synthesize_explanations(&profile, &job_skills);
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_skills_keep_jd_order() {
        let profile = profile_with(&[]);
        let explanations = synthesize_explanations(
            &profile,
            &vec!["Kubernetes".into(), "AWS".into(), "Terraform".into()],
        );
        assert_eq!(
            explanations.missing_skills,
            vec!["Kubernetes", "AWS", "Terraform"]
        );
    }

    #[test]
    fn test_improvements_name_concrete_gaps() {
        let profile = profile_with(&[("HTML", SkillLevel::Beginner)]);
        let job = job_with(
            &["Java", "Spring", "AWS", "Kubernetes", "Microservices"],
            "Senior backend engineer, 5+ years required",
        );
        let features = extract_features(&profile);
        let explanations = synthesize_explanations(&profile, &job.skills);
        let improvements = build_improvements(&profile, &features, &job, &explanations);

        assert!(improvements.len() <= 5);
        // Missing skills named concretely
        assert!(improvements[0].contains("Java"));
        assert!(improvements[0].contains("Spring"));
        assert!(improvements[0].contains("AWS"));
        // Low experience against a senior JD
        assert!(improvements.iter().any(|i| i.contains("senior-level")));
        // No work history at all
        assert!(improvements.iter().any(|i| i.contains("no work history")));
    }

    #[test]
    fn test_no_improvements_for_complete_match() {
        let profile = CandidateProfile {
            user_id: "u1".into(),
            user_type: None,
            skills: ["Python", "ML", "SQL", "Docker", "AWS", "Git"]
                .iter()
                .map(|s| SkillEntry {
                    name: s.to_string(),
                    level: SkillLevel::Advanced,
                })
                .collect(),
            education: vec![],
            experience_months: 36,
            experience: vec![],
            projects_count: 4,
            projects: vec![],
            cgpa: 0.9,
        };
        let job = job_with(&["Python", "SQL"], "Python and SQL work");
        let features = extract_features(&profile);
        let explanations = synthesize_explanations(&profile, &job.skills);
        let improvements = build_improvements(&profile, &features, &job, &explanations);
        assert!(improvements.is_empty());
    }

    #[test]
    fn test_round6_distinguishes_at_six_decimals() {
        assert_eq!(round6(0.1234567), round6(0.1234569));
        assert_ne!(round6(0.123456), round6(0.123458));
    }
}
