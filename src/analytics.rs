//! History and analytics over stored predictions

use crate::errors::{ShortlistError, StorageError};
use crate::predict::{prediction_from_row, Prediction, PREDICTION_COLUMNS};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
const TOP_MISSING_SKILLS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSummary {
    pub job_id: String,
    pub shortlist_probability: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnalytics {
    pub total_predictions: i64,
    pub average_probability: f64,
    pub best: Option<PredictionSummary>,
    pub worst: Option<PredictionSummary>,
    pub top_missing_skills: Vec<String>,
}

fn ensure_user_exists(conn: &Connection, user_id: &str) -> Result<(), ShortlistError> {
    let exists: Option<String> = conn
        .query_row("SELECT id FROM users WHERE id = ?", [user_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(StorageError::from)?;
    match exists {
        Some(_) => Ok(()),
        None => Err(ShortlistError::UserNotFound(user_id.to_string())),
    }
}

/// Most recent predictions for a user, newest first
pub fn fetch_history(
    conn: &Connection,
    user_id: &str,
    limit: u32,
) -> Result<Vec<Prediction>, ShortlistError> {
    ensure_user_exists(conn, user_id)?;

    let query = format!(
        "SELECT {} FROM shortlist_predictions
         WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        PREDICTION_COLUMNS
    );
    let mut stmt = conn.prepare(&query).map_err(StorageError::from)?;
    let rows = stmt
        .query_map(params![user_id, limit], prediction_from_row)
        .map_err(StorageError::from)?;

    let mut predictions = Vec::new();
    for row in rows {
        predictions.push(row.map_err(StorageError::from)?);
    }
    Ok(predictions)
}

/// Aggregate view of a user's stored predictions
pub fn compute_analytics(
    conn: &Connection,
    user_id: &str,
) -> Result<UserAnalytics, ShortlistError> {
    ensure_user_exists(conn, user_id)?;

    let (total, average): (i64, Option<f64>) = conn
        .query_row(
            "SELECT COUNT(*), AVG(shortlist_probability)
             FROM shortlist_predictions WHERE user_id = ?",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(StorageError::from)?;

    let summary_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PredictionSummary> {
        Ok(PredictionSummary {
            job_id: row.get(0)?,
            shortlist_probability: row.get(1)?,
            created_at: row.get(2)?,
        })
    };

    let best = conn
        .query_row(
            "SELECT job_id, shortlist_probability, created_at
             FROM shortlist_predictions WHERE user_id = ?
             ORDER BY shortlist_probability DESC, created_at DESC LIMIT 1",
            [user_id],
            summary_row,
        )
        .optional()
        .map_err(StorageError::from)?;

    let worst = conn
        .query_row(
            "SELECT job_id, shortlist_probability, created_at
             FROM shortlist_predictions WHERE user_id = ?
             ORDER BY shortlist_probability ASC, created_at DESC LIMIT 1",
            [user_id],
            summary_row,
        )
        .optional()
        .map_err(StorageError::from)?;

    // Missing skills ranked by how often they block this user
    let mut stmt = conn
        .prepare("SELECT missing_skills FROM shortlist_predictions WHERE user_id = ?")
        .map_err(StorageError::from)?;
    let rows = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))
        .map_err(StorageError::from)?;

    let mut frequency: HashMap<String, (i64, String)> = HashMap::new();
    for row in rows {
        let raw = row.map_err(StorageError::from)?;
        let skills: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        for skill in skills {
            let entry = frequency
                .entry(skill.to_lowercase())
                .or_insert((0, skill.clone()));
            entry.0 += 1;
        }
    }

    let mut ranked: Vec<(i64, String)> = frequency.into_values().map(|(n, name)| (n, name)).collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let top_missing_skills = ranked
        .into_iter()
        .take(TOP_MISSING_SKILLS)
        .map(|(_, name)| name)
        .collect();

    Ok(UserAnalytics {
        total_predictions: total,
        average_probability: average.unwrap_or(0.0),
        best,
        worst,
        top_missing_skills,
    })
}
