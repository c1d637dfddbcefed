//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Document metadata. Rows are never deleted; deleted_at marks removal.
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            original_file_name TEXT NOT NULL,
            document_type TEXT NOT NULL CHECK (document_type IN ('common', 'dept')),
            department TEXT,
            access_level TEXT NOT NULL CHECK (access_level IN ('public', 'restricted', 'confidential')),
            owner_id TEXT NOT NULL,
            creator_name TEXT,
            storage_path TEXT,
            file_size INTEGER,
            content_hash TEXT,
            version TEXT NOT NULL DEFAULT 'v1.0',
            category TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            description TEXT,
            view_count INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0),
            download_count INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0),
            embedding_status TEXT CHECK (
                embedding_status IS NULL
                OR embedding_status = 'pending'
                OR storage_path IS NOT NULL
            ),
            embedding_error TEXT,
            total_chunks INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_documents_created ON documents(created_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
        CREATE INDEX IF NOT EXISTS idx_documents_type_department ON documents(document_type, department);
        CREATE INDEX IF NOT EXISTS idx_documents_embedding_status ON documents(embedding_status);

        -- Worker-produced embedding chunks, owned by their document
        CREATE TABLE IF NOT EXISTS document_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        );

        CREATE INDEX IF NOT EXISTS idx_document_embeddings_document ON document_embeddings(document_id);
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
