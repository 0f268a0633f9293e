//! Parsed-resume model and persistence
//!
//! The parser worker produces a [`ParsedResume`]; on a successful parse the
//! user's resume-derived rows are replaced atomically and every cached
//! prediction for the user is invalidated, so the next prediction recomputes
//! from scratch. Parsing failures never fail the upload: the caller receives
//! empty defaults and a FAILED status instead.

use crate::db::Database;
use crate::errors::{ShortlistError, StorageError};
use crate::ml::parser::ResumeParser;
use crate::profile::{EducationEntry, ExperienceEntry, ProjectComplexity, ProjectEntry};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

/// The six skill-category lists the parser emits
///
/// Persisted as JSON on the users row (`resume_parsed_skills`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSkillSets {
    #[serde(default)]
    pub technical_skills: Vec<String>,
    #[serde(default)]
    pub programming_languages: Vec<String>,
    #[serde(default)]
    pub frameworks_libraries: Vec<String>,
    #[serde(default)]
    pub tools_platforms: Vec<String>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub soft_skills: Vec<String>,
}

impl ResumeSkillSets {
    /// Union of the five technical categories, case-insensitively deduped
    /// and noise-filtered. Soft skills are never part of any technical total.
    pub fn technical_skill_union(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut union: Vec<String> = Vec::new();

        let categories = [
            &self.technical_skills,
            &self.programming_languages,
            &self.frameworks_libraries,
            &self.tools_platforms,
            &self.databases,
        ];

        for category in categories {
            for raw in category {
                let name = raw.trim();
                if !is_plausible_skill(name) {
                    continue;
                }
                if seen.insert(name.to_lowercase()) {
                    union.push(name.to_string());
                }
            }
        }

        union
    }
}

/// Filter obvious parser noise: blanks, single characters, run-on fragments
fn is_plausible_skill(name: &str) -> bool {
    let len = name.chars().count();
    len >= 2 && len <= 40 && name.chars().any(|c| c.is_alphanumeric())
}

/// Output of the resume parser worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResume {
    #[serde(flatten)]
    pub skills: ResumeSkillSets,
    #[serde(default)]
    pub experience_months: u32,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    /// On the 10-point scale when present
    #[serde(default)]
    pub cgpa: Option<f64>,
    #[serde(default)]
    pub resume_completeness_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParsingStatus {
    Success,
    Partial,
    Failed,
}

impl ParsingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStatus::Success => "SUCCESS",
            ParsingStatus::Partial => "PARTIAL",
            ParsingStatus::Failed => "FAILED",
        }
    }
}

/// Response payload of the upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeUploadOutcome {
    pub parsing_status: ParsingStatus,
    pub parsing_duration_ms: u64,
    pub skills: Vec<String>,
    pub education: Vec<EducationEntry>,
    pub experience_months: u32,
    pub projects_count: u32,
    pub resume_completeness_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Replace all resume-derived rows for a user in one transaction
///
/// Within a single IMMEDIATE transaction: delete the user's skills, projects
/// and experience rows, insert the parsed ones, update the users row's resume
/// fields, and purge every cached prediction for the user. The transaction
/// takes the write lock up front so a concurrent prediction reads either the
/// old profile or the new one, never a mix.
pub fn apply_parsed_resume(
    conn: &mut Connection,
    user_id: &str,
    file_path: &str,
    parsed: &ParsedResume,
    status: ParsingStatus,
) -> Result<(), StorageError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute("DELETE FROM skills WHERE user_id = ?", [user_id])?;
    tx.execute("DELETE FROM projects WHERE user_id = ?", [user_id])?;
    tx.execute("DELETE FROM experience WHERE user_id = ?", [user_id])?;

    for name in parsed.skills.technical_skill_union() {
        tx.execute(
            "INSERT INTO skills (user_id, name, level) VALUES (?, ?, 'Intermediate')",
            [user_id, name.as_str()],
        )?;
    }

    for project in &parsed.projects {
        let complexity = resolve_project_complexity(project);
        let tech_stack = serde_json::to_string(&project.tech_stack)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        tx.execute(
            "INSERT INTO projects (user_id, title, tech_stack, description, complexity)
             VALUES (?, ?, ?, ?, ?)",
            params![
                user_id,
                project.title,
                tech_stack,
                project.description,
                complexity.as_str()
            ],
        )?;
    }

    for entry in &parsed.experience {
        tx.execute(
            "INSERT INTO experience (user_id, role, company, duration_months, type)
             VALUES (?, ?, ?, ?, ?)",
            params![
                user_id,
                entry.role,
                entry.company,
                entry.duration_months,
                entry.kind.as_str()
            ],
        )?;
    }

    let skills_json = serde_json::to_string(&parsed.skills)
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
    let education_json = serde_json::to_string(&parsed.education)
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

    tx.execute(
        "UPDATE users SET
            resume_parsed_skills = ?,
            resume_experience_months = ?,
            resume_projects_count = ?,
            resume_education = ?,
            resume_cgpa = ?,
            resume_completeness_score = ?,
            resume_parsing_status = ?,
            resume_file_path = ?,
            updated_at = ?
         WHERE id = ?",
        params![
            skills_json,
            parsed.experience_months,
            parsed.projects.len() as i64,
            education_json,
            parsed.cgpa,
            parsed.resume_completeness_score,
            status.as_str(),
            file_path,
            chrono::Utc::now().to_rfc3339(),
            user_id
        ],
    )?;

    // Cached predictions are stale the moment the profile changes
    let purged = tx.execute(
        "DELETE FROM shortlist_predictions WHERE user_id = ?",
        [user_id],
    )?;

    tx.commit()?;

    log::info!(
        "[ResumeParser] Applied resume for user {}: {} skills, {} projects, {} experience rows, {} cached predictions purged",
        user_id,
        parsed.skills.technical_skill_union().len(),
        parsed.projects.len(),
        parsed.experience.len(),
        purged
    );

    Ok(())
}

/// Parser-supplied complexity stands unless the description clearly says
/// otherwise; Medium is the default for anything unclassifiable.
fn resolve_project_complexity(project: &ProjectEntry) -> ProjectComplexity {
    if project.complexity != ProjectComplexity::Medium {
        return project.complexity;
    }

    let description = project.description.as_deref().unwrap_or("").to_lowercase();
    const HIGH_MARKERS: [&str; 6] = [
        "distributed",
        "scalable",
        "real-time",
        "production",
        "microservice",
        "pipeline",
    ];
    const LOW_MARKERS: [&str; 4] = ["tutorial", "clone", "simple", "beginner"];

    if HIGH_MARKERS.iter().any(|m| description.contains(m)) || project.tech_stack.len() >= 4 {
        ProjectComplexity::High
    } else if LOW_MARKERS.iter().any(|m| description.contains(m)) {
        ProjectComplexity::Low
    } else {
        ProjectComplexity::Medium
    }
}

/// Run the parser worker for an uploaded file and persist the result
///
/// Parsing failures degrade to empty defaults; only an unknown user is an
/// error. A persistence failure after a good parse is reported as a warning
/// on the outcome, never as a 5xx.
pub async fn process_resume_upload(
    db: &Database,
    parser: &ResumeParser,
    user_id: &str,
    file_path: &Path,
) -> Result<ResumeUploadOutcome, ShortlistError> {
    {
        let conn = db.open()?;
        let exists: Option<String> = conn
            .query_row("SELECT id FROM users WHERE id = ?", [user_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StorageError::from)?;
        if exists.is_none() {
            return Err(ShortlistError::UserNotFound(user_id.to_string()));
        }
    }

    let started = Instant::now();
    let (parsed, status) = parser.parse(file_path).await;
    let parsing_duration_ms = started.elapsed().as_millis() as u64;

    let file_path_str = file_path.to_string_lossy().to_string();
    let mut warning = None;

    let mut conn = db.open()?;
    if let Err(e) = apply_parsed_resume(&mut conn, user_id, &file_path_str, &parsed, status) {
        log::error!(
            "[ResumeParser] Persistence failed for user {}: {}",
            user_id,
            e
        );
        // The file itself is already on disk; record the status so the
        // profile shows what happened.
        let _ = conn.execute(
            "UPDATE users SET resume_parsing_status = ?, resume_file_path = ?, updated_at = ? WHERE id = ?",
            params![
                status.as_str(),
                file_path_str,
                chrono::Utc::now().to_rfc3339(),
                user_id
            ],
        );
        warning = Some(format!("Parsed data could not be saved: {}", e));
    }

    Ok(ResumeUploadOutcome {
        parsing_status: status,
        parsing_duration_ms,
        skills: parsed.skills.technical_skill_union(),
        education: parsed.education.clone(),
        experience_months: parsed.experience_months,
        projects_count: parsed.projects.len() as u32,
        resume_completeness_score: parsed.resume_completeness_score,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::profile::ExperienceType;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn insert_user(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users (id, created_at, updated_at) VALUES (?, datetime('now'), datetime('now'))",
            [id],
        )
        .unwrap();
    }

    fn sample_resume() -> ParsedResume {
        ParsedResume {
            skills: ResumeSkillSets {
                technical_skills: vec!["Machine Learning".into()],
                programming_languages: vec!["Python".into(), "python".into()],
                frameworks_libraries: vec!["TensorFlow".into()],
                tools_platforms: vec!["Docker".into()],
                databases: vec!["PostgreSQL".into()],
                soft_skills: vec!["Teamwork".into()],
            },
            experience_months: 18,
            experience: vec![ExperienceEntry {
                role: "Data Science Intern".into(),
                company: Some("Acme".into()),
                duration_months: Some(6),
                kind: ExperienceType::Internship,
            }],
            projects: vec![ProjectEntry {
                title: "Churn Model".into(),
                tech_stack: vec!["Python".into(), "Scikit-learn".into()],
                description: Some("Production churn prediction pipeline".into()),
                complexity: ProjectComplexity::Medium,
            }],
            education: vec![EducationEntry {
                degree: "B.Tech".into(),
                field: Some("Computer Science".into()),
                institution: None,
                year: Some(2024),
                cgpa: Some(8.1),
            }],
            cgpa: Some(8.1),
            resume_completeness_score: 0.85,
        }
    }

    #[test]
    fn test_technical_union_excludes_soft_skills() {
        let resume = sample_resume();
        let union = resume.skills.technical_skill_union();
        assert!(union.iter().all(|s| s != "Teamwork"));
        // "python" deduped case-insensitively against "Python"
        assert_eq!(
            union.iter().filter(|s| s.to_lowercase() == "python").count(),
            1
        );
        assert_eq!(union.len(), 5);
    }

    #[test]
    fn test_noise_filter() {
        let sets = ResumeSkillSets {
            technical_skills: vec![
                "".into(),
                "x".into(),
                "  ".into(),
                "Rust".into(),
                "a".repeat(50),
            ],
            ..Default::default()
        };
        assert_eq!(sets.technical_skill_union(), vec!["Rust".to_string()]);
    }

    #[test]
    fn test_atomic_replace_leaves_no_remnants() {
        let mut conn = test_conn();
        insert_user(&conn, "u1");
        conn.execute(
            "INSERT INTO skills (user_id, name, level) VALUES ('u1', 'OldSkill', 'Advanced')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO projects (user_id, title) VALUES ('u1', 'Old Project')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO experience (user_id, role, type) VALUES ('u1', 'Old Role', 'Job')",
            [],
        )
        .unwrap();

        let resume = sample_resume();
        apply_parsed_resume(&mut conn, "u1", "/tmp/r.pdf", &resume, ParsingStatus::Success)
            .unwrap();

        let skills: Vec<String> = conn
            .prepare("SELECT name FROM skills WHERE user_id = 'u1'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert!(!skills.iter().any(|s| s == "OldSkill"));
        assert_eq!(skills.len(), 5);

        let project_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM projects WHERE user_id = 'u1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(project_count, 1);

        let levels: Vec<String> = conn
            .prepare("SELECT DISTINCT level FROM skills WHERE user_id = 'u1'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(levels, vec!["Intermediate".to_string()]);
    }

    #[test]
    fn test_replace_purges_cached_predictions() {
        let mut conn = test_conn();
        insert_user(&conn, "u1");
        conn.execute(
            "INSERT INTO shortlist_predictions
                (user_id, job_id, candidate_strength, job_match_score, shortlist_probability,
                 matched_skills, missing_skills, weak_skills, improvements, jd_hash,
                 embedding_source, status, created_at)
             VALUES ('u1', 'j1', 0.5, 0.5, 0.5, '[]', '[]', '[]', '[]', 'abcd', 'fresh',
                     'completed', datetime('now'))",
            [],
        )
        .unwrap();

        apply_parsed_resume(
            &mut conn,
            "u1",
            "/tmp/r.pdf",
            &sample_resume(),
            ParsingStatus::Success,
        )
        .unwrap();

        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM shortlist_predictions WHERE user_id = 'u1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_users_row_carries_resume_fields() {
        let mut conn = test_conn();
        insert_user(&conn, "u1");
        apply_parsed_resume(
            &mut conn,
            "u1",
            "/tmp/r.pdf",
            &sample_resume(),
            ParsingStatus::Success,
        )
        .unwrap();

        let (months, count, status): (i64, i64, String) = conn
            .query_row(
                "SELECT resume_experience_months, resume_projects_count, resume_parsing_status
                 FROM users WHERE id = 'u1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(months, 18);
        assert_eq!(count, 1);
        assert_eq!(status, "SUCCESS");
    }

    #[test]
    fn test_complexity_inferred_from_description() {
        let project = ProjectEntry {
            title: "T".into(),
            tech_stack: vec![],
            description: Some("A distributed task queue".into()),
            complexity: ProjectComplexity::Medium,
        };
        assert_eq!(
            resolve_project_complexity(&project),
            ProjectComplexity::High
        );

        let project = ProjectEntry {
            title: "T".into(),
            tech_stack: vec![],
            description: Some("Simple todo tutorial".into()),
            complexity: ProjectComplexity::Medium,
        };
        assert_eq!(resolve_project_complexity(&project), ProjectComplexity::Low);

        let explicit = ProjectEntry {
            title: "T".into(),
            tech_stack: vec![],
            description: Some("Simple tutorial".into()),
            complexity: ProjectComplexity::High,
        };
        // Explicit parser classification is not second-guessed
        assert_eq!(
            resolve_project_complexity(&explicit),
            ProjectComplexity::High
        );
    }

    #[test]
    fn test_parsed_resume_defaults_are_empty() {
        let parsed: ParsedResume = serde_json::from_str("{}").unwrap();
        assert!(parsed.skills.technical_skill_union().is_empty());
        assert_eq!(parsed.experience_months, 0);
        assert!(parsed.projects.is_empty());
        assert_eq!(parsed.resume_completeness_score, 0.0);
    }
}
