use crate::message::Message;
use crate::report::FeedbackReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Topic recorded when the candidate never named a role.
pub const DEFAULT_TOPIC: &str = "General Interview";

/// A completed interview, as submitted for saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInterview {
    pub date: DateTime<Utc>,
    pub topic: String,
    pub score: u8,
    pub feedback: FeedbackReport,
    pub transcript: Vec<Message>,
}

impl NewInterview {
    pub fn new(role: &str, report: &FeedbackReport, transcript: &[Message]) -> Self {
        let role = role.trim();
        Self {
            date: Utc::now(),
            topic: if role.is_empty() {
                DEFAULT_TOPIC.to_string()
            } else {
                role.to_string()
            },
            score: report.overall_score,
            feedback: report.clone(),
            transcript: transcript.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSummary {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub topic: String,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewRecord {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub topic: String,
    pub score: u8,
    pub feedback: FeedbackReport,
    pub transcript: Vec<Message>,
}

impl InterviewRecord {
    pub fn summary(&self) -> InterviewSummary {
        InterviewSummary {
            id: self.id,
            date: self.date,
            topic: self.topic.clone(),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInterview {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("interview {0} not found")]
    NotFound(i64),
    #[error("could not reach the interview store: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("interview store responded with {status}: {message}")]
    Server { status: StatusCode, message: String },
}

/// Durable storage for completed interviews.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn create(&self, interview: &NewInterview) -> Result<CreatedInterview, StoreError>;

    /// All saved interviews, newest first.
    async fn list(&self) -> Result<Vec<InterviewSummary>, StoreError>;

    async fn get(&self, id: i64) -> Result<InterviewRecord, StoreError>;
}

/// [`InterviewStore`] backed by the interview API service.
pub struct HttpInterviewStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInterviewStore {
    /// `base_url` is the API root, e.g. `http://localhost:3001/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn interviews_url(&self) -> String {
        format!("{}/interviews", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(StoreError::Server { status, message })
    }
}

#[async_trait]
impl InterviewStore for HttpInterviewStore {
    async fn create(&self, interview: &NewInterview) -> Result<CreatedInterview, StoreError> {
        let response = self
            .http
            .post(self.interviews_url())
            .json(interview)
            .send()
            .await?;
        let created = Self::check(response).await?.json().await?;
        Ok(created)
    }

    async fn list(&self) -> Result<Vec<InterviewSummary>, StoreError> {
        let response = self.http.get(self.interviews_url()).send().await?;
        let summaries = Self::check(response).await?.json().await?;
        Ok(summaries)
    }

    async fn get(&self, id: i64) -> Result<InterviewRecord, StoreError> {
        let response = self
            .http
            .get(format!("{}/{}", self.interviews_url(), id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id));
        }
        let record = Self::check(response).await?.json().await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_role_records_default_topic() {
        let report = FeedbackReport {
            overall_score: 71,
            ..FeedbackReport::default()
        };
        let record = NewInterview::new("  ", &report, &[Message::user("hi")]);
        assert_eq!(record.topic, DEFAULT_TOPIC);
        assert_eq!(record.score, 71);
        assert_eq!(record.transcript.len(), 1);

        let record = NewInterview::new("Data Scientist", &report, &[]);
        assert_eq!(record.topic, "Data Scientist");
    }

    #[test]
    fn test_record_serializes_iso_date_and_nested_json() {
        let record = NewInterview::new("Nurse", &FeedbackReport::fallback(), &[]);
        let value = serde_json::to_value(&record).unwrap();

        let date = value["date"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(date).is_ok());
        assert_eq!(value["feedback"]["overallScore"], 0);
        assert!(value["transcript"].is_array());
    }

    #[test]
    fn test_base_url_trailing_slash_is_ignored() {
        let store = HttpInterviewStore::new("http://localhost:3001/api/");
        assert_eq!(store.interviews_url(), "http://localhost:3001/api/interviews");
    }
}
