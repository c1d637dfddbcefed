//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Binding access-control axis of a document
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Readable enterprise-wide
    Common,
    /// Readable within one department
    Dept,
}

impl DocumentType {
    /// Advisory access level applied when none is supplied
    pub fn default_access_level(self) -> AccessLevel {
        match self {
            DocumentType::Common => AccessLevel::Public,
            DocumentType::Dept => AccessLevel::Restricted,
        }
    }
}

/// Advisory sensitivity tier shown to users. Does not grant or deny access.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Restricted,
    Confidential,
}

/// Status reported by the embedding worker
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    /// Statuses a worker report may move a document out of, for a given target.
    pub fn allowed_predecessors(self) -> &'static [EmbeddingStatus] {
        match self {
            EmbeddingStatus::Pending => &[],
            EmbeddingStatus::Processing => &[EmbeddingStatus::Pending],
            EmbeddingStatus::Completed | EmbeddingStatus::Failed => {
                &[EmbeddingStatus::Pending, EmbeddingStatus::Processing]
            }
        }
    }
}

/// Monotonic analytics counter on a document row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Counter {
    View,
    Download,
}

impl Counter {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Counter::View => "view_count",
            Counter::Download => "download_count",
        }
    }
}

/// Document metadata record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub original_file_name: String,
    pub document_type: DocumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub access_level: AccessLevel,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub view_count: u64,
    pub download_count: u64,
    /// Unset until a payload has been attached
    pub embedding_status: Option<EmbeddingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Column list matching [`Document::from_row`]
pub(crate) const DOCUMENT_COLUMNS: &str = "d.id, d.file_name, d.original_file_name, \
     d.document_type, d.department, d.access_level, d.owner_id, d.creator_name, \
     d.storage_path, d.file_size, d.content_hash, d.version, d.category, d.tags, \
     d.description, d.view_count, d.download_count, d.embedding_status, \
     d.embedding_error, d.total_chunks, d.created_at, d.updated_at, d.deleted_at";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let document_type_str: String = row.get(3)?;
        let access_level_str: String = row.get(5)?;
        let file_size: Option<i64> = row.get(9)?;
        let tags_str: String = row.get(13)?;
        let view_count: i64 = row.get(15)?;
        let download_count: i64 = row.get(16)?;
        let embedding_status_str: Option<String> = row.get(17)?;
        let total_chunks: Option<i64> = row.get(19)?;
        let created_at_str: String = row.get(20)?;
        let updated_at_str: String = row.get(21)?;
        let deleted_at_str: Option<String> = row.get(22)?;

        Ok(Self {
            id: row.get(0)?,
            file_name: row.get(1)?,
            original_file_name: row.get(2)?,
            document_type: parse_column(3, &document_type_str)?,
            department: row.get(4)?,
            access_level: parse_column(5, &access_level_str)?,
            owner_id: row.get(6)?,
            creator_name: row.get(7)?,
            storage_path: row.get(8)?,
            file_size: file_size.map(|s| s.max(0) as u64),
            content_hash: row.get(10)?,
            version: row.get(11)?,
            category: row.get(12)?,
            tags: serde_json::from_str(&tags_str).map_err(|e| conversion_failure(13, e))?,
            description: row.get(14)?,
            view_count: view_count.max(0) as u64,
            download_count: download_count.max(0) as u64,
            embedding_status: embedding_status_str
                .as_deref()
                .map(|s| parse_column(17, s))
                .transpose()?,
            embedding_error: row.get(18)?,
            total_chunks: total_chunks.map(|t| t.max(0) as u64),
            created_at: parse_timestamp(20, &created_at_str)?,
            updated_at: parse_timestamp(21, &updated_at_str)?,
            deleted_at: deleted_at_str
                .as_deref()
                .map(|s| parse_timestamp(22, s))
                .transpose()?,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn parse_column<T>(index: usize, value: &str) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr<Err = strum::ParseError>,
{
    value.parse().map_err(|e| conversion_failure(index, e))
}

fn parse_timestamp(index: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(index, e))
}

fn conversion_failure<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}

/// Fields accepted when registering a document
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub original_file_name: String,
    pub document_type: DocumentType,
    pub department: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub creator_name: Option<String>,
}

/// Allow-listed mutable fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub document_type: Option<DocumentType>,
    pub access_level: Option<AccessLevel>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.document_type.is_none()
            && self.access_level.is_none()
            && self.version.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.description.is_none()
    }
}

/// One chunk of a worker-produced embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub chunk_index: u32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// Payload details written when an upload completes
#[derive(Debug, Clone)]
pub struct AttachedPayload {
    pub storage_path: String,
    pub file_size: u64,
    pub content_hash: String,
}

/// Sort/paging window for listing
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_forms() {
        assert_eq!(DocumentType::Dept.to_string(), "dept");
        assert_eq!("common".parse::<DocumentType>().unwrap(), DocumentType::Common);
        assert!("team".parse::<DocumentType>().is_err());
        assert_eq!(
            "confidential".parse::<AccessLevel>().unwrap(),
            AccessLevel::Confidential
        );
        assert_eq!(EmbeddingStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_default_access_level_follows_type() {
        assert_eq!(
            DocumentType::Common.default_access_level(),
            AccessLevel::Public
        );
        assert_eq!(
            DocumentType::Dept.default_access_level(),
            AccessLevel::Restricted
        );
    }

    #[test]
    fn test_embedding_transitions() {
        assert!(EmbeddingStatus::Pending.allowed_predecessors().is_empty());
        assert!(
            EmbeddingStatus::Completed
                .allowed_predecessors()
                .contains(&EmbeddingStatus::Processing)
        );
        assert!(
            !EmbeddingStatus::Processing
                .allowed_predecessors()
                .contains(&EmbeddingStatus::Completed)
        );
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(Page { page: 1, limit: 10 }.offset(), 0);
        assert_eq!(Page { page: 3, limit: 25 }.offset(), 50);
        assert_eq!(Page { page: 0, limit: 10 }.offset(), 0);
    }
}
