use crate::errors::StorageError;
use rusqlite::Connection;
use std::path::PathBuf;

/// Handle to the engine's SQLite database
///
/// The file location comes from the resolved config paths
/// ([`crate::config::EngineConfig::resolved_database_path`]). Connections
/// are short-lived: each pipeline phase opens one, does its reads or writes,
/// and drops it before any suspension point.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn open(&self) -> Result<Connection, StorageError> {
        Connection::open(&self.path).map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    /// Create the database file (and its directory) and run any pending
    /// migrations
    pub fn init(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
            }
        }
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        run_migrations(&conn).map_err(|e| StorageError::MigrationFailed(e.to_string()))
    }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    // Run migration 001
    let migration_name = "001_core_schema";
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM migrations WHERE name = ?")?;
    let count: i64 = stmt.query_row([migration_name], |row| row.get(0))?;

    if count == 0 {
        log::info!("[Storage] Running migration: {}", migration_name);
        migration_001_core_schema(conn)?;
        conn.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?, datetime('now'))",
            [migration_name],
        )?;
    }

    // Run migration 002
    let migration_name = "002_predictions";
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM migrations WHERE name = ?")?;
    let count: i64 = stmt.query_row([migration_name], |row| row.get(0))?;

    if count == 0 {
        log::info!("[Storage] Running migration: {}", migration_name);
        migration_002_predictions(conn)?;
        conn.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?, datetime('now'))",
            [migration_name],
        )?;
    }

    // Run migration 003
    let migration_name = "003_what_if_simulations";
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM migrations WHERE name = ?")?;
    let count: i64 = stmt.query_row([migration_name], |row| row.get(0))?;

    if count == 0 {
        log::info!("[Storage] Running migration: {}", migration_name);
        migration_003_what_if_simulations(conn)?;
        conn.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?, datetime('now'))",
            [migration_name],
        )?;
    }

    Ok(())
}

pub fn migration_001_core_schema(conn: &Connection) -> rusqlite::Result<()> {
    // Users (resume-derived fields live directly on the row)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            full_name TEXT,
            user_type TEXT,
            cgpa REAL,
            resume_parsed_skills TEXT,
            resume_experience_months INTEGER,
            resume_projects_count INTEGER,
            resume_education TEXT,
            resume_cgpa REAL,
            resume_completeness_score REAL,
            resume_parsing_status TEXT,
            resume_file_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Skills
    conn.execute(
        "CREATE TABLE IF NOT EXISTS skills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            level TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Projects
    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            tech_stack TEXT,
            description TEXT,
            complexity TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Experience
    conn.execute(
        "CREATE TABLE IF NOT EXISTS experience (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            company TEXT,
            duration_months INTEGER,
            type TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Education
    conn.execute(
        "CREATE TABLE IF NOT EXISTS education (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            degree TEXT NOT NULL,
            field TEXT,
            institution TEXT,
            year INTEGER,
            cgpa REAL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Jobs
    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            company TEXT,
            description TEXT,
            job_description TEXT,
            skills TEXT,
            experience_level TEXT,
            is_remote INTEGER DEFAULT 0,
            city TEXT,
            state TEXT,
            country TEXT,
            job_location TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_skills_user_id ON skills (user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_user_id ON projects (user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_experience_user_id ON experience (user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_education_user_id ON education (user_id)",
        [],
    )?;

    Ok(())
}

pub fn migration_002_predictions(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shortlist_predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            job_id TEXT NOT NULL,
            candidate_strength REAL NOT NULL,
            job_match_score REAL NOT NULL,
            shortlist_probability REAL NOT NULL,
            matched_skills TEXT NOT NULL,
            missing_skills TEXT NOT NULL,
            weak_skills TEXT NOT NULL,
            improvements TEXT NOT NULL,
            jd_hash TEXT NOT NULL,
            embedding_source TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shortlist_predictions_user_created
         ON shortlist_predictions (user_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shortlist_predictions_user_job_created
         ON shortlist_predictions (user_id, job_id, created_at DESC)",
        [],
    )?;

    Ok(())
}

pub fn migration_003_what_if_simulations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS what_if_simulations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            job_id TEXT NOT NULL,
            scenario TEXT NOT NULL,
            baseline TEXT NOT NULL,
            projected TEXT NOT NULL,
            deltas TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_what_if_simulations_user_id
         ON what_if_simulations (user_id)",
        [],
    )?;

    Ok(())
}

/// Run all migrations against an already-open connection (test databases)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    run_migrations(conn)
}
