//! What-if simulator
//!
//! Applies a hypothetical scenario to a freshly fetched profile purely in
//! memory — nothing is persisted to the profile tables — and reruns the full
//! pipeline, including the job-side embedding lookup and a recomputed
//! skill-side embedding. Both scores are genuinely recomputed; there are no
//! fixed percentage boosts anywhere.

use crate::errors::{ShortlistError, StorageError};
use crate::predict::{PredictionEngine, ScoreSet};
use crate::profile::{CandidateProfile, SkillEntry, SkillLevel};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillModification {
    pub name: String,
    pub new_level: SkillLevel,
}

/// A hypothetical profile edit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub added_skills: Vec<String>,
    #[serde(default)]
    pub removed_skills: Vec<String>,
    #[serde(default)]
    pub modified_skills: Vec<SkillModification>,
}

impl Scenario {
    pub fn is_empty(&self) -> bool {
        self.added_skills.is_empty()
            && self.removed_skills.is_empty()
            && self.modified_skills.is_empty()
    }
}

/// Baseline and projected scores with their deltas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResult {
    pub user_id: String,
    pub job_id: String,
    pub baseline: ScoreSet,
    pub projected: ScoreSet,
    pub deltas: ScoreSet,
    pub scenario: Scenario,
    pub timestamp: String,
}

/// Result of the greedy optimal-skill search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimalSkillsResult {
    pub skills_to_add: Vec<String>,
    pub projected_probability: f64,
    pub target_reached: bool,
}

/// Apply a scenario to a profile, in memory only
///
/// Added skills enter at Intermediate (same admission level as resume-only
/// skills); removals and level changes match case-insensitively. Adding a
/// skill the profile already has is a no-op rather than a duplicate.
pub fn apply_scenario(profile: &CandidateProfile, scenario: &Scenario) -> CandidateProfile {
    let mut modified = profile.clone();

    for removal in &scenario.removed_skills {
        let lower = removal.to_lowercase();
        modified.skills.retain(|s| s.name.to_lowercase() != lower);
    }

    for change in &scenario.modified_skills {
        let lower = change.name.to_lowercase();
        if let Some(entry) = modified
            .skills
            .iter_mut()
            .find(|s| s.name.to_lowercase() == lower)
        {
            entry.level = change.new_level;
        }
    }

    for addition in &scenario.added_skills {
        if !modified.has_skill(addition) {
            modified.skills.push(SkillEntry {
                name: addition.clone(),
                level: SkillLevel::Intermediate,
            });
        }
    }

    modified
}

/// Simulate one scenario against a (user, job) pair
pub async fn simulate(
    engine: &PredictionEngine,
    user_id: &str,
    job_id: &str,
    scenario: &Scenario,
) -> Result<WhatIfResult, ShortlistError> {
    // Baseline is a full prediction, computed and persisted exactly like any
    // other request.
    let baseline_prediction = engine.predict(user_id, job_id).await?;
    let baseline = ScoreSet {
        candidate_strength: baseline_prediction.candidate_strength,
        job_match_score: baseline_prediction.job_match_score,
        shortlist_probability: baseline_prediction.shortlist_probability,
    };

    let (profile, job) = engine.fetch_inputs(user_id, job_id)?;
    let modified = apply_scenario(&profile, scenario);
    let (projected, _, _) = engine.score_profile(&modified, &job).await?;

    let result = WhatIfResult {
        user_id: user_id.to_string(),
        job_id: job_id.to_string(),
        baseline,
        projected,
        deltas: ScoreSet {
            candidate_strength: projected.candidate_strength - baseline.candidate_strength,
            job_match_score: projected.job_match_score - baseline.job_match_score,
            shortlist_probability: projected.shortlist_probability
                - baseline.shortlist_probability,
        },
        scenario: scenario.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    store_simulation(engine, &result)?;

    log::info!(
        "[ML] what-if userId={} jobId={} added={} removed={} modified={} baseline={:.6} projected={:.6}",
        user_id,
        job_id,
        scenario.added_skills.len(),
        scenario.removed_skills.len(),
        scenario.modified_skills.len(),
        result.baseline.shortlist_probability,
        result.projected.shortlist_probability
    );

    Ok(result)
}

fn store_simulation(
    engine: &PredictionEngine,
    result: &WhatIfResult,
) -> Result<(), StorageError> {
    let conn = engine.db().open()?;
    conn.execute(
        "INSERT INTO what_if_simulations
            (user_id, job_id, scenario, baseline, projected, deltas, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            result.user_id,
            result.job_id,
            serde_json::to_string(&result.scenario)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            serde_json::to_string(&result.baseline)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            serde_json::to_string(&result.projected)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            serde_json::to_string(&result.deltas)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            result.timestamp,
        ],
    )?;
    Ok(())
}

/// Greedy search over the baseline's missing skills
///
/// Adds one missing skill at a time, re-simulating after each addition,
/// until the projected probability reaches the target or the list runs out.
pub async fn find_optimal_skills(
    engine: &PredictionEngine,
    user_id: &str,
    job_id: &str,
    target_probability: f64,
) -> Result<OptimalSkillsResult, ShortlistError> {
    let baseline = engine.predict(user_id, job_id).await?;
    if baseline.shortlist_probability >= target_probability {
        return Ok(OptimalSkillsResult {
            skills_to_add: vec![],
            projected_probability: baseline.shortlist_probability,
            target_reached: true,
        });
    }

    let (profile, job) = engine.fetch_inputs(user_id, job_id)?;
    let mut working = profile;
    let mut added: Vec<String> = Vec::new();
    let mut projected_probability = baseline.shortlist_probability;

    for skill in &baseline.missing_skills {
        working = apply_scenario(
            &working,
            &Scenario {
                added_skills: vec![skill.clone()],
                ..Default::default()
            },
        );
        added.push(skill.clone());

        let (scores, _, _) = engine.score_profile(&working, &job).await?;
        projected_probability = scores.shortlist_probability;

        if projected_probability >= target_probability {
            return Ok(OptimalSkillsResult {
                skills_to_add: added,
                projected_probability,
                target_reached: true,
            });
        }
    }

    Ok(OptimalSkillsResult {
        skills_to_add: added,
        projected_probability,
        target_reached: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_profile() -> CandidateProfile {
        CandidateProfile {
            user_id: "u1".into(),
            user_type: None,
            skills: vec![
                SkillEntry {
                    name: "Python".into(),
                    level: SkillLevel::Advanced,
                },
                SkillEntry {
                    name: "Docker".into(),
                    level: SkillLevel::Beginner,
                },
            ],
            education: vec![],
            experience_months: 6,
            experience: vec![],
            projects_count: 1,
            projects: vec![],
            cgpa: 0.7,
        }
    }

    #[test]
    fn test_added_skills_enter_at_intermediate() {
        let scenario = Scenario {
            added_skills: vec!["Kubernetes".into()],
            ..Default::default()
        };
        let modified = apply_scenario(&base_profile(), &scenario);
        assert_eq!(
            modified.skill_level("Kubernetes"),
            Some(SkillLevel::Intermediate)
        );
        assert_eq!(modified.skills.len(), 3);
    }

    #[test]
    fn test_adding_existing_skill_is_noop() {
        let scenario = Scenario {
            added_skills: vec!["python".into()],
            ..Default::default()
        };
        let modified = apply_scenario(&base_profile(), &scenario);
        assert_eq!(modified.skills.len(), 2);
        assert_eq!(modified.skill_level("Python"), Some(SkillLevel::Advanced));
    }

    #[test]
    fn test_removal_is_case_insensitive() {
        let scenario = Scenario {
            removed_skills: vec!["PYTHON".into()],
            ..Default::default()
        };
        let modified = apply_scenario(&base_profile(), &scenario);
        assert!(!modified.has_skill("Python"));
        assert_eq!(modified.skills.len(), 1);
    }

    #[test]
    fn test_modification_changes_level() {
        let scenario = Scenario {
            modified_skills: vec![SkillModification {
                name: "docker".into(),
                new_level: SkillLevel::Advanced,
            }],
            ..Default::default()
        };
        let modified = apply_scenario(&base_profile(), &scenario);
        assert_eq!(modified.skill_level("Docker"), Some(SkillLevel::Advanced));
    }

    #[test]
    fn test_original_profile_untouched() {
        let profile = base_profile();
        let scenario = Scenario {
            removed_skills: vec!["Python".into()],
            added_skills: vec!["Rust".into()],
            ..Default::default()
        };
        let _ = apply_scenario(&profile, &scenario);
        assert!(profile.has_skill("Python"));
        assert!(!profile.has_skill("Rust"));
    }

    #[test]
    fn test_scenario_is_empty() {
        assert!(Scenario::default().is_empty());
        assert!(!Scenario {
            added_skills: vec!["X".into()],
            ..Default::default()
        }
        .is_empty());
    }
}
