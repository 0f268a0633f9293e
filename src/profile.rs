//! Candidate profile types and the per-request profile builder
//!
//! A [`CandidateProfile`] is constructed from storage reads inside one
//! request and discarded after the response. Nothing here is cached across
//! requests; reusing a profile between predictions is a defect.

use crate::errors::ShortlistError;
use crate::resume::ResumeSkillSets;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "Beginner",
            SkillLevel::Intermediate => "Intermediate",
            SkillLevel::Advanced => "Advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Beginner" => Some(SkillLevel::Beginner),
            "Intermediate" => Some(SkillLevel::Intermediate),
            "Advanced" => Some(SkillLevel::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserType {
    Fresher,
    Student,
    #[serde(rename = "Working Professional")]
    WorkingProfessional,
}

impl UserType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Fresher" => Some(UserType::Fresher),
            "Student" => Some(UserType::Student),
            "Working Professional" => Some(UserType::WorkingProfessional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceType {
    Job,
    Internship,
    Freelance,
}

impl ExperienceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceType::Job => "Job",
            ExperienceType::Internship => "Internship",
            ExperienceType::Freelance => "Freelance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Job" => Some(ExperienceType::Job),
            "Internship" => Some(ExperienceType::Internship),
            "Freelance" => Some(ExperienceType::Freelance),
            _ => None,
        }
    }
}

impl Default for ExperienceType {
    fn default() -> Self {
        ExperienceType::Job
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectComplexity {
    Low,
    Medium,
    High,
}

impl ProjectComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectComplexity::Low => "Low",
            ProjectComplexity::Medium => "Medium",
            ProjectComplexity::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(ProjectComplexity::Low),
            "Medium" => Some(ProjectComplexity::Medium),
            "High" => Some(ProjectComplexity::High),
            _ => None,
        }
    }
}

impl Default for ProjectComplexity {
    fn default() -> Self {
        ProjectComplexity::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    pub name: String,
    pub level: SkillLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationEntry {
    pub degree: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub cgpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceEntry {
    pub role: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub duration_months: Option<u32>,
    #[serde(rename = "type", default)]
    pub kind: ExperienceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEntry {
    pub title: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub complexity: ProjectComplexity,
}

/// Canonical in-memory candidate profile, built per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub user_id: String,
    pub user_type: Option<UserType>,
    pub skills: Vec<SkillEntry>,
    pub education: Vec<EducationEntry>,
    pub experience_months: u32,
    pub experience: Vec<ExperienceEntry>,
    pub projects_count: u32,
    pub projects: Vec<ProjectEntry>,
    /// Normalized to [0,1] from the 10-point scale
    pub cgpa: f64,
}

impl CandidateProfile {
    /// Space-joined skill names, the input to the skill-text embedding
    pub fn skill_text(&self) -> String {
        self.skills
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_skill(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.skills.iter().any(|s| s.name.to_lowercase() == lower)
    }

    pub fn skill_level(&self, name: &str) -> Option<SkillLevel> {
        let lower = name.to_lowercase();
        self.skills
            .iter()
            .find(|s| s.name.to_lowercase() == lower)
            .map(|s| s.level)
    }
}

struct UserRow {
    user_type: Option<String>,
    cgpa: Option<f64>,
    resume_parsed_skills: Option<String>,
    resume_experience_months: Option<i64>,
    resume_projects_count: Option<i64>,
    resume_cgpa: Option<f64>,
}

/// Build the candidate profile for one request
///
/// Merge semantics are "resume-first with dedup": resume data wins for
/// counts (experience months, project count), the profile table wins for
/// skill levels because users curate those by hand. Soft skills from the
/// resume snapshot are never admitted.
pub fn fetch_candidate_profile(
    conn: &Connection,
    user_id: &str,
) -> Result<CandidateProfile, ShortlistError> {
    let user: UserRow = conn
        .query_row(
            "SELECT user_type, cgpa, resume_parsed_skills, resume_experience_months,
                    resume_projects_count, resume_cgpa
             FROM users WHERE id = ?",
            [user_id],
            |row| {
                Ok(UserRow {
                    user_type: row.get(0)?,
                    cgpa: row.get(1)?,
                    resume_parsed_skills: row.get(2)?,
                    resume_experience_months: row.get(3)?,
                    resume_projects_count: row.get(4)?,
                    resume_cgpa: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(crate::errors::StorageError::from)?
        .ok_or_else(|| ShortlistError::UserNotFound(user_id.to_string()))?;

    // Profile-table rows
    let mut stmt = conn
        .prepare("SELECT name, level FROM skills WHERE user_id = ? ORDER BY id")
        .map_err(crate::errors::StorageError::from)?;
    let profile_skills: Vec<SkillEntry> = stmt
        .query_map([user_id], |row| {
            let name: String = row.get(0)?;
            let level: String = row.get(1)?;
            Ok(SkillEntry {
                name,
                level: SkillLevel::parse(&level).unwrap_or(SkillLevel::Intermediate),
            })
        })
        .map_err(crate::errors::StorageError::from)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT title, tech_stack, description, complexity FROM projects WHERE user_id = ? ORDER BY id")
        .map_err(crate::errors::StorageError::from)?;
    let projects: Vec<ProjectEntry> = stmt
        .query_map([user_id], |row| {
            let title: String = row.get(0)?;
            let tech_stack: Option<String> = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let complexity: Option<String> = row.get(3)?;
            Ok(ProjectEntry {
                title,
                tech_stack: tech_stack
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default(),
                description,
                complexity: complexity
                    .as_deref()
                    .and_then(ProjectComplexity::parse)
                    .unwrap_or_default(),
            })
        })
        .map_err(crate::errors::StorageError::from)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT role, company, duration_months, type FROM experience WHERE user_id = ? ORDER BY id")
        .map_err(crate::errors::StorageError::from)?;
    let experience: Vec<ExperienceEntry> = stmt
        .query_map([user_id], |row| {
            let role: String = row.get(0)?;
            let company: Option<String> = row.get(1)?;
            let duration_months: Option<i64> = row.get(2)?;
            let kind: Option<String> = row.get(3)?;
            Ok(ExperienceEntry {
                role,
                company,
                duration_months: duration_months.map(|m| m.max(0) as u32),
                kind: kind
                    .as_deref()
                    .and_then(ExperienceType::parse)
                    .unwrap_or_default(),
            })
        })
        .map_err(crate::errors::StorageError::from)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT degree, field, institution, year, cgpa FROM education WHERE user_id = ? ORDER BY id")
        .map_err(crate::errors::StorageError::from)?;
    let education: Vec<EducationEntry> = stmt
        .query_map([user_id], |row| {
            Ok(EducationEntry {
                degree: row.get(0)?,
                field: row.get(1)?,
                institution: row.get(2)?,
                year: row.get::<_, Option<i64>>(3)?.map(|y| y as i32),
                cgpa: row.get(4)?,
            })
        })
        .map_err(crate::errors::StorageError::from)?
        .filter_map(|r| r.ok())
        .collect();

    // Resume snapshot from the users row
    let resume_skills: ResumeSkillSets = user
        .resume_parsed_skills
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let profile_only = profile_skills.len();
    let skills = merge_skills(profile_skills, &resume_skills);
    let resume_only = skills.len() - profile_only;

    log::debug!(
        "[Profile] user={} skills merged: profile-only={} resume-only={} merged={}",
        user_id,
        profile_only,
        resume_only,
        skills.len()
    );

    let profile_experience_months: u32 = experience
        .iter()
        .filter_map(|e| e.duration_months)
        .sum();
    let resume_experience_months = user
        .resume_experience_months
        .map(|m| m.max(0) as u32)
        .unwrap_or(0);
    let experience_months = resume_experience_months.max(profile_experience_months);

    let resume_projects_count = user
        .resume_projects_count
        .map(|c| c.max(0) as u32)
        .unwrap_or(0);
    let projects_count = resume_projects_count.max(projects.len() as u32);

    let cgpa = match user.resume_cgpa {
        Some(raw) if raw > 0.0 => (raw / 10.0).clamp(0.0, 1.0),
        _ => user
            .cgpa
            .map(|raw| (raw / 10.0).clamp(0.0, 1.0))
            .unwrap_or(0.0),
    };

    Ok(CandidateProfile {
        user_id: user_id.to_string(),
        user_type: user.user_type.as_deref().and_then(UserType::parse),
        skills,
        education,
        experience_months,
        experience,
        projects_count,
        projects,
        cgpa,
    })
}

/// Union of profile-table skills and resume technical skills
///
/// Case-insensitive dedup; a skill only present in the resume is admitted at
/// Intermediate, a skill in the profile table keeps its curated level.
fn merge_skills(profile_skills: Vec<SkillEntry>, resume: &ResumeSkillSets) -> Vec<SkillEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<SkillEntry> = Vec::new();

    for entry in profile_skills {
        if seen.insert(entry.name.to_lowercase()) {
            merged.push(entry);
        }
    }

    for name in resume.technical_skill_union() {
        if seen.insert(name.to_lowercase()) {
            merged.push(SkillEntry {
                name,
                level: SkillLevel::Intermediate,
            });
        }
    }

    merged
}
