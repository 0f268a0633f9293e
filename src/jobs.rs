//! Job fetching and JD-text normalization
//!
//! Every prediction resolves its job row fresh, composes a canonical JD
//! text, and hashes it. When a job row carries no explicit skill list the
//! required skills are extracted from the JD text against a fixed technical
//! vocabulary and written back to the row, so later predictions see the same
//! list.

use crate::errors::{ShortlistError, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A job as stored; read-only from the engine's point of view apart from the
/// one-time skill write-back.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    pub description: Option<String>,
    pub job_description: Option<String>,
    pub skills: Vec<String>,
    pub experience_level: Option<String>,
    pub is_remote: bool,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub job_location: Option<String>,
}

/// A job resolved for one prediction: canonical JD text, its hash, and the
/// required-skills list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedJob {
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    pub jd_text: String,
    pub jd_hash: String,
    pub skills: Vec<String>,
    pub experience_level: Option<String>,
    pub location: String,
    pub is_remote: bool,
}

/// Fixed vocabulary for keyword extraction from JD text: languages,
/// frameworks, databases, clouds, tools.
pub const TECHNICAL_VOCABULARY: [&str; 90] = [
    "python",
    "java",
    "javascript",
    "typescript",
    "c++",
    "c#",
    "go",
    "rust",
    "ruby",
    "php",
    "swift",
    "kotlin",
    "scala",
    "r",
    "matlab",
    "html",
    "css",
    "sql",
    "nosql",
    "react",
    "angular",
    "vue",
    "next.js",
    "node.js",
    "express",
    "django",
    "flask",
    "fastapi",
    "spring",
    "spring boot",
    "hibernate",
    ".net",
    "laravel",
    "rails",
    "jquery",
    "bootstrap",
    "tailwind",
    "redux",
    "graphql",
    "rest api",
    "grpc",
    "mysql",
    "postgresql",
    "mongodb",
    "redis",
    "sqlite",
    "oracle",
    "cassandra",
    "elasticsearch",
    "dynamodb",
    "firebase",
    "aws",
    "azure",
    "gcp",
    "docker",
    "kubernetes",
    "terraform",
    "ansible",
    "jenkins",
    "git",
    "github",
    "gitlab",
    "ci/cd",
    "linux",
    "bash",
    "machine learning",
    "deep learning",
    "nlp",
    "computer vision",
    "tensorflow",
    "pytorch",
    "keras",
    "scikit-learn",
    "pandas",
    "numpy",
    "data analysis",
    "data science",
    "statistics",
    "tableau",
    "power bi",
    "spark",
    "hadoop",
    "kafka",
    "airflow",
    "microservices",
    "agile",
    "jira",
    "selenium",
    "junit",
    "pytest",
];

/// Resolve a job by id and normalize its JD text
///
/// Extracted skills (when the row had none) are persisted back on the same
/// connection so the resolution is deterministic across requests.
pub fn fetch_job(conn: &Connection, job_id: &str) -> Result<FetchedJob, ShortlistError> {
    let row = read_job_row(conn, job_id)?
        .ok_or_else(|| ShortlistError::JobNotFound(job_id.to_string()))?;

    let jd_text = canonical_jd_text(&row);
    if jd_text.trim().is_empty() {
        return Err(ShortlistError::JdEmpty(job_id.to_string()));
    }
    let jd_hash = jd_hash(&jd_text);

    let skills = if !row.skills.is_empty() {
        row.skills.clone()
    } else {
        let extracted = extract_skills_from_text(&jd_text);
        if !extracted.is_empty() {
            persist_extracted_skills(conn, job_id, &extracted)?;
            log::info!(
                "[Storage] Job {} had no skill list; extracted {} skills from JD text",
                job_id,
                extracted.len()
            );
        }
        extracted
    };

    Ok(FetchedJob {
        location: resolve_location(&row),
        id: row.id,
        title: row.title,
        company: row.company,
        jd_text,
        jd_hash,
        skills,
        experience_level: row.experience_level,
        is_remote: row.is_remote,
    })
}

fn read_job_row(conn: &Connection, job_id: &str) -> Result<Option<JobRow>, StorageError> {
    conn.query_row(
        "SELECT id, title, company, description, job_description, skills,
                experience_level, is_remote, city, state, country, job_location
         FROM jobs WHERE id = ?",
        [job_id],
        |row| {
            let skills_raw: Option<String> = row.get(5)?;
            Ok(JobRow {
                id: row.get(0)?,
                title: row.get(1)?,
                company: row.get(2)?,
                description: row.get(3)?,
                job_description: row.get(4)?,
                skills: skills_raw
                    .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
                    .unwrap_or_default(),
                experience_level: row.get(6)?,
                is_remote: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
                city: row.get(8)?,
                state: row.get(9)?,
                country: row.get(10)?,
                job_location: row.get(11)?,
            })
        },
    )
    .optional()
    .map_err(StorageError::from)
}

fn persist_extracted_skills(
    conn: &Connection,
    job_id: &str,
    skills: &[String],
) -> Result<(), StorageError> {
    let json = serde_json::to_string(skills).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    conn.execute(
        "UPDATE jobs SET skills = ?, updated_at = ? WHERE id = ?",
        params![json, chrono::Utc::now().to_rfc3339(), job_id],
    )?;
    Ok(())
}

/// Canonical JD text: `job_description` field first, else `description`,
/// else a composition from title, known skills, and experience level.
pub fn canonical_jd_text(row: &JobRow) -> String {
    if let Some(text) = non_empty(&row.job_description) {
        return text.to_string();
    }
    if let Some(text) = non_empty(&row.description) {
        return text.to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    if !row.title.trim().is_empty() {
        parts.push(row.title.trim().to_string());
    }
    if !row.skills.is_empty() {
        parts.push(format!("Required skills: {}", row.skills.join(", ")));
    }
    if let Some(level) = non_empty(&row.experience_level) {
        parts.push(format!("Experience level: {}", level));
    }
    parts.join(". ")
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// First 16 hex chars of SHA-256 over the canonical JD text
pub fn jd_hash(jd_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(jd_text.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)[..16].to_string()
}

/// Keyword-match the technical vocabulary against free text, in order of
/// first occurrence. Terms only count at token boundaries so "r" does not
/// fire inside "rest".
pub fn extract_skills_from_text(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: Vec<(usize, String)> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for term in TECHNICAL_VOCABULARY {
        if seen.contains(term) {
            continue;
        }
        if let Some(pos) = find_with_boundaries(&lower, term) {
            seen.insert(term);
            found.push((pos, display_skill_name(term)));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}

fn find_with_boundaries(haystack: &str, needle: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(rel) = haystack[start..].find(needle) {
        let pos = start + rel;
        let end = pos + needle.len();
        let before_ok = pos == 0
            || !haystack[..pos]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return Some(pos);
        }
        start = pos + 1;
        if start >= haystack.len() {
            break;
        }
    }
    None
}

/// Canonical display casing for extracted vocabulary terms
fn display_skill_name(term: &str) -> String {
    match term {
        "javascript" => "JavaScript".to_string(),
        "typescript" => "TypeScript".to_string(),
        "c++" => "C++".to_string(),
        "c#" => "C#".to_string(),
        "php" => "PHP".to_string(),
        "html" => "HTML".to_string(),
        "css" => "CSS".to_string(),
        "sql" => "SQL".to_string(),
        "nosql" => "NoSQL".to_string(),
        ".net" => ".NET".to_string(),
        "nlp" => "NLP".to_string(),
        "aws" => "AWS".to_string(),
        "gcp" => "GCP".to_string(),
        "mysql" => "MySQL".to_string(),
        "postgresql" => "PostgreSQL".to_string(),
        "mongodb" => "MongoDB".to_string(),
        "sqlite" => "SQLite".to_string(),
        "dynamodb" => "DynamoDB".to_string(),
        "ci/cd" => "CI/CD".to_string(),
        "rest api" => "REST API".to_string(),
        "grpc" => "gRPC".to_string(),
        "graphql" => "GraphQL".to_string(),
        "node.js" => "Node.js".to_string(),
        "next.js" => "Next.js".to_string(),
        "scikit-learn" => "Scikit-learn".to_string(),
        "power bi" => "Power BI".to_string(),
        "junit" => "JUnit".to_string(),
        "tensorflow" => "TensorFlow".to_string(),
        "pytorch" => "PyTorch".to_string(),
        "github" => "GitHub".to_string(),
        "gitlab" => "GitLab".to_string(),
        "r" => "R".to_string(),
        other => {
            // Title-case each word
            other
                .split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        None => String::new(),
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        }
    }
}

/// Remote beats everything, then city/state/country, then the free-form
/// location field.
pub fn resolve_location(row: &JobRow) -> String {
    if row.is_remote {
        return "Remote".to_string();
    }
    let parts: Vec<&str> = [&row.city, &row.state, &row.country]
        .iter()
        .filter_map(|f| non_empty(f))
        .collect();
    if !parts.is_empty() {
        return parts.join(", ");
    }
    non_empty(&row.job_location).unwrap_or("").to_string()
}

/// Whether the JD text asks for seniority (feeds the low-experience
/// improvement suggestion)
pub fn jd_demands_seniority(jd_text: &str) -> bool {
    use std::sync::OnceLock;
    static SENIORITY: OnceLock<regex::Regex> = OnceLock::new();
    let re = SENIORITY.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(senior|lead|principal|staff|architect|\d+\+?\s*years?)\b")
            .expect("seniority pattern is valid")
    });
    re.is_match(jd_text)
}
