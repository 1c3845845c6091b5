//! SQLite storage for completed interviews.
//!
//! Feedback and transcript are stored as JSON text and decoded on read, so the table
//! layout stays the same whatever the report contains.

use chrono::{DateTime, Utc};
use interview_core::store::{InterviewRecord, InterviewSummary, NewInterview};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS interviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT,
    topic TEXT,
    score INTEGER,
    feedback TEXT,
    transcript TEXT
)";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored date is invalid: {0}")]
    Date(#[from] chrono::ParseError),
}

pub struct InterviewDb {
    conn: Mutex<Connection>,
}

impl InterviewDb {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        tracing::info!("Opening interview database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, interview: &NewInterview) -> Result<i64, DbError> {
        let feedback = serde_json::to_string(&interview.feedback)?;
        let transcript = serde_json::to_string(&interview.transcript)?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO interviews (date, topic, score, feedback, transcript) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                interview.date.to_rfc3339(),
                interview.topic,
                interview.score,
                feedback,
                transcript
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Summaries of all interviews, newest first.
    pub fn list(&self) -> Result<Vec<InterviewSummary>, DbError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, date, topic, score FROM interviews ORDER BY date DESC, id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, date, topic, score) = row?;
            summaries.push(InterviewSummary {
                id,
                date: parse_date(&date)?,
                topic: topic.unwrap_or_default(),
                score: clamp_score(score),
            });
        }
        Ok(summaries)
    }

    pub fn get(&self, id: i64) -> Result<Option<InterviewRecord>, DbError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, date, topic, score, feedback, transcript FROM interviews WHERE id = ?1",
                params![id],
                StoredRow::from_row,
            )
            .optional()?;

        row.map(StoredRow::into_record).transpose()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StoredRow {
    id: i64,
    date: String,
    topic: Option<String>,
    score: Option<i64>,
    feedback: Option<String>,
    transcript: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            topic: row.get(2)?,
            score: row.get(3)?,
            feedback: row.get(4)?,
            transcript: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<InterviewRecord, DbError> {
        let feedback = match self.feedback.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => Default::default(),
        };
        let transcript = match self.transcript.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => Vec::new(),
        };
        Ok(InterviewRecord {
            id: self.id,
            date: parse_date(&self.date)?,
            topic: self.topic.unwrap_or_default(),
            score: clamp_score(self.score),
            feedback,
            transcript,
        })
    }
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, DbError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn clamp_score(score: Option<i64>) -> u8 {
    score.unwrap_or(0).clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use interview_core::message::Message;
    use interview_core::report::{FeedbackReport, SkillScore};

    fn interview(topic: &str, day: u32, score: u8) -> NewInterview {
        NewInterview {
            date: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
            topic: topic.to_string(),
            score,
            feedback: FeedbackReport {
                overall_score: score,
                summary: format!("{topic} summary"),
                skills: vec![SkillScore {
                    name: "Communication".to_string(),
                    score,
                }],
                ..FeedbackReport::default()
            },
            transcript: vec![Message::assistant("Q"), Message::user("A")],
        }
    }

    #[test]
    fn test_insert_then_get_round_trips() {
        let db = InterviewDb::open_in_memory().unwrap();
        let new = interview("Nurse", 1, 66);

        let id = db.insert(&new).unwrap();
        let record = db.get(id).unwrap().unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.date, new.date);
        assert_eq!(record.topic, "Nurse");
        assert_eq!(record.score, 66);
        assert_eq!(record.feedback, new.feedback);
        assert_eq!(record.transcript, new.transcript);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = InterviewDb::open_in_memory().unwrap();
        assert!(db.get(42).unwrap().is_none());
    }

    #[test]
    fn test_list_orders_newest_first() {
        let db = InterviewDb::open_in_memory().unwrap();
        db.insert(&interview("Older", 1, 50)).unwrap();
        db.insert(&interview("Newest", 9, 70)).unwrap();
        db.insert(&interview("Middle", 5, 60)).unwrap();

        let topics: Vec<String> = db.list().unwrap().into_iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec!["Newest", "Middle", "Older"]);
    }

    #[test]
    fn test_database_file_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interviews.sqlite");

        let id = InterviewDb::open(&path)
            .unwrap()
            .insert(&interview("Pilot", 2, 80))
            .unwrap();

        let reopened = InterviewDb::open(&path).unwrap();
        assert_eq!(reopened.get(id).unwrap().unwrap().topic, "Pilot");
    }
}
