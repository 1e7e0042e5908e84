//! Tracker repository: persistence for `case_trackers`, `tracker_documents`
//! and `tracker_logs`.
//!
//! Every write function runs in a single transaction and appends the log
//! entry describing the mutation, so the persisted log never disagrees with
//! the persisted state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::tracker::types::{
    CaseStatus, DocumentRecord, DocumentStatus, LogEntry, RunId, TrackerLogType, TrackerSnapshot,
};

use super::{Database, DatabaseError};

fn corrupt(case_id: &str, column: &'static str, value: String) -> DatabaseError {
    DatabaseError::CorruptValue {
        case_id: case_id.to_string(),
        column,
        value,
    }
}

fn append_log(
    conn: &Connection,
    case_id: &str,
    seq: usize,
    entry: &LogEntry,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tracker_logs (case_id, seq, log_type, timestamp, document_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            case_id,
            seq as i64,
            entry.log_type.as_str(),
            entry.timestamp.to_rfc3339(),
            entry.document_id,
        ],
    )?;
    Ok(())
}

fn touch(conn: &Connection, case_id: &str, updated_at: DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE case_trackers SET updated_at = ?2 WHERE case_id = ?1",
        params![case_id, updated_at.to_rfc3339()],
    )?;
    Ok(())
}

/// Loads the full tracker state for a case, or `None` if it was never initialised.
pub fn load(db: &Database, case_id: &str) -> Result<Option<TrackerSnapshot>, DatabaseError> {
    db.with_conn(|conn| {
        let header = conn
            .query_row(
                "SELECT transaction_id, run_id, status FROM case_trackers WHERE case_id = ?1",
                params![case_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((transaction_id, run_id, status)) = header else {
            return Ok(None);
        };

        let status =
            CaseStatus::parse(&status).ok_or_else(|| corrupt(case_id, "status", status))?;

        let mut stmt = conn.prepare(
            "SELECT document_id, version_id, file_name, category, pdf_blob_name, status
             FROM tracker_documents WHERE case_id = ?1 ORDER BY position",
        )?;
        let raw_documents = stmt
            .query_map(params![case_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut documents = Vec::with_capacity(raw_documents.len());
        for (document_id, version_id, file_name, category, pdf_blob_name, status) in raw_documents
        {
            let status = DocumentStatus::parse(&status)
                .ok_or_else(|| corrupt(case_id, "document status", status))?;
            documents.push(DocumentRecord {
                document_id,
                version_id,
                file_name,
                category,
                pdf_blob_name,
                status,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT log_type, timestamp, document_id
             FROM tracker_logs WHERE case_id = ?1 ORDER BY seq",
        )?;
        let raw_logs = stmt
            .query_map(params![case_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut logs = Vec::with_capacity(raw_logs.len());
        for (log_type, timestamp, document_id) in raw_logs {
            let log_type = TrackerLogType::parse(&log_type)
                .ok_or_else(|| corrupt(case_id, "log type", log_type))?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| corrupt(case_id, "log timestamp", timestamp.clone()))?;
            logs.push(LogEntry {
                log_type,
                timestamp,
                document_id,
            });
        }

        Ok(Some(TrackerSnapshot {
            case_id: case_id.to_string(),
            transaction_id,
            run_id: RunId(run_id as u64),
            status,
            documents,
            logs,
        }))
    })
}

/// Replaces all state for a case with a fresh run: documents and logs are
/// cleared, the header is upserted and the single `Initialised` entry written.
pub fn reset(db: &Database, snapshot: &TrackerSnapshot) -> Result<(), DatabaseError> {
    db.with_transaction(|conn| {
        conn.execute(
            "DELETE FROM tracker_documents WHERE case_id = ?1",
            params![snapshot.case_id],
        )?;
        conn.execute(
            "DELETE FROM tracker_logs WHERE case_id = ?1",
            params![snapshot.case_id],
        )?;
        conn.execute(
            "INSERT INTO case_trackers (case_id, transaction_id, run_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(case_id) DO UPDATE SET
                transaction_id = excluded.transaction_id,
                run_id = excluded.run_id,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                snapshot.case_id,
                snapshot.transaction_id,
                snapshot.run_id.0 as i64,
                snapshot.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        for (seq, entry) in snapshot.logs.iter().enumerate() {
            append_log(conn, &snapshot.case_id, seq, entry)?;
        }
        Ok(())
    })
}

/// Inserts the registered documents in discovery order.
pub fn insert_documents(
    db: &Database,
    case_id: &str,
    documents: &[DocumentRecord],
    seq: usize,
    entry: &LogEntry,
) -> Result<(), DatabaseError> {
    db.with_transaction(|conn| {
        let mut stmt = conn.prepare(
            "INSERT INTO tracker_documents
             (case_id, position, document_id, version_id, file_name, category, pdf_blob_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (position, doc) in documents.iter().enumerate() {
            stmt.execute(params![
                case_id,
                position as i64,
                doc.document_id,
                doc.version_id,
                doc.file_name,
                doc.category,
                doc.pdf_blob_name,
                doc.status.as_str(),
            ])?;
        }
        append_log(conn, case_id, seq, entry)?;
        touch(conn, case_id, entry.timestamp)
    })
}

/// Overwrites one document's blob name and status.
pub fn update_document(
    db: &Database,
    case_id: &str,
    position: usize,
    document: &DocumentRecord,
    seq: usize,
    entry: &LogEntry,
) -> Result<(), DatabaseError> {
    db.with_transaction(|conn| {
        conn.execute(
            "UPDATE tracker_documents SET pdf_blob_name = ?3, status = ?4
             WHERE case_id = ?1 AND position = ?2",
            params![
                case_id,
                position as i64,
                document.pdf_blob_name,
                document.status.as_str(),
            ],
        )?;
        append_log(conn, case_id, seq, entry)?;
        touch(conn, case_id, entry.timestamp)
    })
}

/// Sets the case-level status.
pub fn update_case_status(
    db: &Database,
    case_id: &str,
    status: CaseStatus,
    seq: usize,
    entry: &LogEntry,
) -> Result<(), DatabaseError> {
    db.with_transaction(|conn| {
        conn.execute(
            "UPDATE case_trackers SET status = ?2 WHERE case_id = ?1",
            params![case_id, status.as_str()],
        )?;
        append_log(conn, case_id, seq, entry)?;
        touch(conn, case_id, entry.timestamp)
    })
}

/// Lists the ids of cases currently in the given status, oldest update first.
pub fn case_ids_with_status(
    db: &Database,
    status: CaseStatus,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT case_id FROM case_trackers WHERE status = ?1 ORDER BY updated_at",
        )?;
        let ids = stmt
            .query_map(params![status.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}
