//! Feature extraction for the candidate-strength classifier
//!
//! Eighteen named features in a fixed order. The classifier consumes only
//! the first thirteen; the trailing five project features feed logs and
//! explanations. Renaming, reordering, or widening the classifier-facing
//! prefix is a breaking change that has to move together with a retrained
//! artifact.

use crate::profile::{CandidateProfile, ExperienceType, ProjectComplexity, SkillLevel, UserType};
use std::collections::HashSet;

/// Number of features the trained classifier artifact expects
pub const CLASSIFIER_FEATURE_COUNT: usize = 13;

pub const FEATURE_COUNT: usize = 18;

/// Declared feature order. The first [`CLASSIFIER_FEATURE_COUNT`] entries are
/// the classifier-facing slice.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "skillCount",
    "advancedSkillCount",
    "intermediateSkillCount",
    "beginnerSkillCount",
    "skillDiversity",
    "totalExperienceMonths",
    "internshipCount",
    "jobCount",
    "hasRelevantExperience",
    "avgExperienceDurationMonths",
    "educationLevel",
    "hasQualifyingEducation",
    "cgpa",
    "projectCount",
    "highComplexityProjects",
    "mediumComplexityProjects",
    "projectComplexityScore",
    "overallStrengthScore",
];

/// One extracted feature vector, names and values in declared order
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub names: [&'static str; FEATURE_COUNT],
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureSet {
    /// The prefix the classifier artifact was trained on
    pub fn classifier_slice(&self) -> &[f64] {
        &self.values[..CLASSIFIER_FEATURE_COUNT]
    }

    pub fn skill_count(&self) -> f64 {
        self.values[0]
    }

    pub fn total_experience_months(&self) -> f64 {
        self.values[5]
    }

    pub fn internship_count(&self) -> f64 {
        self.values[6]
    }

    pub fn project_count(&self) -> f64 {
        self.values[13]
    }

    /// True when the profile carries no signal at all; predictions on such a
    /// profile are rejected as incomplete.
    pub fn is_empty_profile(&self) -> bool {
        self.skill_count() == 0.0
            && self.total_experience_months() == 0.0
            && self.project_count() == 0.0
    }

    /// True when any classifier-facing feature is non-zero; a zero strength
    /// on such input means the artifact and extractor disagree on shape.
    pub fn has_signal(&self) -> bool {
        self.skill_count() > 0.0
            || self.total_experience_months() > 0.0
            || self.project_count() > 0.0
    }
}

/// Deterministic pure function of the profile
pub fn extract_features(profile: &CandidateProfile) -> FeatureSet {
    let skill_count = profile.skills.len() as f64;
    let advanced = profile
        .skills
        .iter()
        .filter(|s| s.level == SkillLevel::Advanced)
        .count() as f64;
    let intermediate = profile
        .skills
        .iter()
        .filter(|s| s.level == SkillLevel::Intermediate)
        .count() as f64;
    let beginner = profile
        .skills
        .iter()
        .filter(|s| s.level == SkillLevel::Beginner)
        .count() as f64;

    let distinct_roots: HashSet<String> = profile
        .skills
        .iter()
        .map(|s| skill_root(&s.name))
        .collect();
    let skill_diversity = distinct_roots.len() as f64 / skill_count.max(1.0);

    let total_experience_months = profile.experience_months as f64;
    let internship_count = profile
        .experience
        .iter()
        .filter(|e| e.kind == ExperienceType::Internship)
        .count() as f64;
    let job_count = profile
        .experience
        .iter()
        .filter(|e| e.kind == ExperienceType::Job)
        .count() as f64;
    let has_relevant_experience = if profile
        .experience
        .iter()
        .any(|e| e.kind != ExperienceType::Internship)
    {
        1.0
    } else {
        0.0
    };

    let durations: Vec<f64> = profile
        .experience
        .iter()
        .filter_map(|e| e.duration_months)
        .map(|m| m as f64)
        .collect();
    let avg_experience_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    let education_level = education_level(profile) as f64;
    let has_qualifying_education = if education_level >= 2.0 { 1.0 } else { 0.0 };
    let cgpa = profile.cgpa.clamp(0.0, 1.0);

    let project_count = profile.projects_count as f64;
    let high_projects = profile
        .projects
        .iter()
        .filter(|p| p.complexity == ProjectComplexity::High)
        .count() as f64;
    let medium_projects = profile
        .projects
        .iter()
        .filter(|p| p.complexity == ProjectComplexity::Medium)
        .count() as f64;
    let low_projects = profile
        .projects
        .iter()
        .filter(|p| p.complexity == ProjectComplexity::Low)
        .count() as f64;
    let listed = profile.projects.len() as f64;
    let project_complexity_score = if listed > 0.0 {
        (3.0 * high_projects + 2.0 * medium_projects + low_projects) / (3.0 * listed)
    } else {
        0.0
    };

    let overall_strength_score = 0.35 * (skill_count / 10.0).min(1.0)
        + 0.25 * (total_experience_months / 24.0).min(1.0)
        + 0.20 * (project_count / 5.0).min(1.0)
        + 0.10 * (education_level / 3.0)
        + 0.10 * cgpa;

    FeatureSet {
        names: FEATURE_NAMES,
        values: [
            skill_count,
            advanced,
            intermediate,
            beginner,
            skill_diversity,
            total_experience_months,
            internship_count,
            job_count,
            has_relevant_experience,
            avg_experience_duration,
            education_level,
            has_qualifying_education,
            cgpa,
            project_count,
            high_projects,
            medium_projects,
            project_complexity_score,
            overall_strength_score,
        ],
    }
}

/// Normalized root used for the diversity count: lowercase first
/// alphanumeric token ("Node.js" and "NodeJS" collapse to "node"/"nodejs")
fn skill_root(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .find(|part| !part.is_empty())
        .unwrap_or("")
        .to_string()
}

/// 0 = no degree, 1 = bachelor in progress, 2 = bachelor, 3 = masters or higher
///
/// A bachelor entry counts as in-progress when it has no completion year or
/// the user is a Student.
fn education_level(profile: &CandidateProfile) -> u8 {
    let mut level = 0u8;
    for entry in &profile.education {
        let degree = entry.degree.to_lowercase();
        let entry_level = if ["master", "msc", "m.tech", "mtech", "mba", "phd", "doctor"]
            .iter()
            .any(|k| degree.contains(k))
        {
            3
        } else if ["bachelor", "b.tech", "btech", "b.e", "bsc", "bca", "b.sc"]
            .iter()
            .any(|k| degree.contains(k))
        {
            let in_progress =
                entry.year.is_none() || profile.user_type == Some(UserType::Student);
            if in_progress {
                1
            } else {
                2
            }
        } else {
            0
        };
        level = level.max(entry_level);
    }
    level
}
