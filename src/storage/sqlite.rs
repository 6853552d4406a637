//! SQLite storage backend for openlink

use super::traits::{OpenStore, RequestStore, StorageError, StorageResult};
use crate::model::{
    DispatchState, DispatchStatus, Origin, OriginId, Request, RequestId, Response, ResponseData,
    ResponseId, ResponseTag, Subject, SubjectId, TypeTag,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite-backed request store
///
/// Uses a single SQLite database file. Thread-safe via internal mutex on the
/// connection. Uniqueness of subjects, origins, requests and dispatch records
/// is enforced by the schema, so concurrent creators race on the constraint
/// rather than on a prior read.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Subjects: one row per identity
            CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                identity_key TEXT NOT NULL UNIQUE,
                format TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subject_identifiers (
                subject_id TEXT NOT NULL,
                identifier TEXT NOT NULL,
                PRIMARY KEY (subject_id, identifier),
                FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
            );

            -- Metadata fields; the primary key makes enrichment non-overwriting
            CREATE TABLE IF NOT EXISTS subject_metadata (
                subject_id TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (subject_id, field),
                FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS origins (
                id TEXT PRIMARY KEY,
                identifier TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- Requests: at most one per (session, canonical params)
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                params TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                origin_id TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (session_id, params),
                FOREIGN KEY (subject_id) REFERENCES subjects(id),
                FOREIGN KEY (origin_id) REFERENCES origins(id)
            );

            -- Dispatch records: at most one per (request, service)
            CREATE TABLE IF NOT EXISTS dispatches (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error_detail TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE (request_id, service_id),
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
            );

            -- Responses are append-only
            CREATE TABLE IF NOT EXISTS responses (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                request_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                response_key TEXT,
                display_text TEXT,
                url TEXT,
                notes TEXT,
                value_string TEXT,
                value_alt_string TEXT,
                value_text TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_responses_request
                ON responses(request_id);

            -- Response/tag join, ordered by seq
            CREATE TABLE IF NOT EXISTS response_tags (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                response_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE,
                FOREIGN KEY (response_id) REFERENCES responses(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_response_tags_request
                ON response_tags(request_id, tag);

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }

    fn parse_state(value: &str) -> StorageResult<DispatchState> {
        value.parse().map_err(StorageError::InvalidValue)
    }

    /// Read one subject row selected by `sql`, with identifiers and metadata
    fn read_subject<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> StorageResult<Option<Subject>> {
        let row: Option<(String, String, String)> = conn
            .query_row(sql, params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;
        let Some((id, format, created_at)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT identifier FROM subject_identifiers WHERE subject_id = ?1 ORDER BY identifier",
        )?;
        let identifiers = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT field, value FROM subject_metadata WHERE subject_id = ?1 ORDER BY field",
        )?;
        let metadata = stmt
            .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<_, _>>()?;

        Ok(Some(Subject {
            id: SubjectId::from_string(id),
            format,
            identifiers,
            metadata,
            created_at: Self::parse_time(&created_at)?,
        }))
    }

    fn read_origin<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> StorageResult<Option<Origin>> {
        let row: Option<(String, String, String)> = conn
            .query_row(sql, params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;
        match row {
            Some((id, identifier, created_at)) => Ok(Some(Origin {
                id: OriginId::from_string(id),
                identifier,
                created_at: Self::parse_time(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    /// Read one request row selected by `sql`, with all of its records
    fn read_request<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> StorageResult<Option<Request>> {
        type Row = (String, String, String, String, Option<String>, String);
        let row: Option<Row> = conn
            .query_row(sql, params, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .optional()?;
        let Some((id, session_id, params, subject_id, origin_id, created_at)) = row else {
            return Ok(None);
        };

        let mut request = Request {
            id: RequestId::from_string(id),
            session_id,
            params,
            subject_id: SubjectId::from_string(subject_id),
            origin_id: origin_id.map(OriginId::from_string),
            created_at: Self::parse_time(&created_at)?,
            dispatches: Vec::new(),
            responses: Vec::new(),
            tags: Vec::new(),
        };
        Self::read_records(conn, &mut request)?;
        Ok(Some(request))
    }

    fn read_records(conn: &Connection, request: &mut Request) -> StorageResult<()> {
        let request_id = request.id.to_string();

        let mut stmt = conn.prepare(
            "SELECT service_id, status, error_detail, updated_at FROM dispatches
             WHERE request_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![request_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (service_id, status, error_detail, updated_at) in rows {
            request.dispatches.push(DispatchStatus {
                service_id,
                state: Self::parse_state(&status)?,
                error_detail,
                updated_at: Self::parse_time(&updated_at)?,
            });
        }

        let mut stmt = conn.prepare(&format!(
            "{} WHERE request_id = ?1 ORDER BY seq",
            RESPONSE_SELECT
        ))?;
        let rows = stmt
            .query_map(params![request_id], response_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for row in rows {
            request.responses.push(row.into_response()?);
        }

        let mut stmt = conn.prepare(
            "SELECT response_id, tag FROM response_tags WHERE request_id = ?1 ORDER BY seq",
        )?;
        request.tags = stmt
            .query_map(params![request_id], |row| {
                Ok(ResponseTag {
                    response_id: ResponseId::from_string(row.get::<_, String>(0)?),
                    tag: TypeTag::from(row.get::<_, String>(1)?),
                })
            })?
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

const RESPONSE_SELECT: &str = "SELECT id, request_id, service_id, response_key, display_text, url, notes,
            value_string, value_alt_string, value_text, created_at FROM responses";

/// Raw response columns, converted once the row closure has returned
struct ResponseRow {
    id: String,
    request_id: String,
    service_id: String,
    data: ResponseData,
    created_at: String,
}

impl ResponseRow {
    fn into_response(self) -> StorageResult<Response> {
        Ok(Response {
            id: ResponseId::from_string(self.id),
            request_id: RequestId::from_string(self.request_id),
            service_id: self.service_id,
            data: self.data,
            created_at: SqliteStore::parse_time(&self.created_at)?,
        })
    }
}

fn response_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResponseRow> {
    Ok(ResponseRow {
        id: row.get(0)?,
        request_id: row.get(1)?,
        service_id: row.get(2)?,
        data: ResponseData {
            key: row.get(3)?,
            display_text: row.get(4)?,
            url: row.get(5)?,
            notes: row.get(6)?,
            value_string: row.get(7)?,
            value_alt_string: row.get(8)?,
            value_text: row.get(9)?,
        },
        created_at: row.get(10)?,
    })
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RequestStore for SqliteStore {
    // === Subject Operations ===

    fn find_subject(&self, identity_key: &str) -> StorageResult<Option<Subject>> {
        let conn = self.conn();
        Self::read_subject(
            &conn,
            "SELECT id, format, created_at FROM subjects WHERE identity_key = ?1",
            params![identity_key],
        )
    }

    fn insert_subject(&self, subject: &Subject) -> StorageResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"
            INSERT INTO subjects (id, identity_key, format, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(identity_key) DO NOTHING
            "#,
            params![
                subject.id.as_str(),
                subject.identity_key(),
                subject.format,
                subject.created_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        for identifier in &subject.identifiers {
            tx.execute(
                "INSERT INTO subject_identifiers (subject_id, identifier) VALUES (?1, ?2)",
                params![subject.id.as_str(), identifier],
            )?;
        }
        for (field, value) in &subject.metadata {
            tx.execute(
                "INSERT INTO subject_metadata (subject_id, field, value) VALUES (?1, ?2, ?3)",
                params![subject.id.as_str(), field, value],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn load_subject(&self, id: &SubjectId) -> StorageResult<Option<Subject>> {
        let conn = self.conn();
        Self::read_subject(
            &conn,
            "SELECT id, format, created_at FROM subjects WHERE id = ?1",
            params![id.as_str()],
        )
    }

    fn enrich_subject(&self, id: &SubjectId, field: &str, value: &str) -> StorageResult<bool> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM subjects WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::SubjectNotFound(id.to_string()));
        }

        let inserted = conn.execute(
            r#"
            INSERT INTO subject_metadata (subject_id, field, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(subject_id, field) DO NOTHING
            "#,
            params![id.as_str(), field, value],
        )?;
        Ok(inserted > 0)
    }

    // === Origin Operations ===

    fn find_origin(&self, identifier: &str) -> StorageResult<Option<Origin>> {
        let conn = self.conn();
        Self::read_origin(
            &conn,
            "SELECT id, identifier, created_at FROM origins WHERE identifier = ?1",
            params![identifier],
        )
    }

    fn insert_origin(&self, origin: &Origin) -> StorageResult<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            r#"
            INSERT INTO origins (id, identifier, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(identifier) DO NOTHING
            "#,
            params![
                origin.id.as_str(),
                origin.identifier,
                origin.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn load_origin(&self, id: &OriginId) -> StorageResult<Option<Origin>> {
        let conn = self.conn();
        Self::read_origin(
            &conn,
            "SELECT id, identifier, created_at FROM origins WHERE id = ?1",
            params![id.as_str()],
        )
    }

    // === Request Operations ===

    fn find_request(&self, session_id: &str, params: &str) -> StorageResult<Option<Request>> {
        let conn = self.conn();
        Self::read_request(
            &conn,
            "SELECT id, session_id, params, subject_id, origin_id, created_at FROM requests
             WHERE session_id = ?1 AND params = ?2",
            params![session_id, params],
        )
    }

    fn insert_request(&self, request: &Request) -> StorageResult<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            r#"
            INSERT INTO requests (id, session_id, params, subject_id, origin_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id, params) DO NOTHING
            "#,
            params![
                request.id.as_str(),
                request.session_id,
                request.params,
                request.subject_id.as_str(),
                request.origin_id.as_ref().map(|id| id.as_str()),
                request.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn load_request(&self, id: &RequestId) -> StorageResult<Option<Request>> {
        let conn = self.conn();
        Self::read_request(
            &conn,
            "SELECT id, session_id, params, subject_id, origin_id, created_at FROM requests
             WHERE id = ?1",
            params![id.as_str()],
        )
    }

    // === Dispatch Operations ===

    fn load_dispatch(
        &self,
        request_id: &RequestId,
        service_id: &str,
    ) -> StorageResult<Option<DispatchStatus>> {
        let conn = self.conn();
        let row: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT status, error_detail, updated_at FROM dispatches
                 WHERE request_id = ?1 AND service_id = ?2",
                params![request_id.as_str(), service_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((status, error_detail, updated_at)) => Ok(Some(DispatchStatus {
                service_id: service_id.to_string(),
                state: Self::parse_state(&status)?,
                error_detail,
                updated_at: Self::parse_time(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    fn insert_dispatch_if_absent(
        &self,
        request_id: &RequestId,
        status: &DispatchStatus,
    ) -> StorageResult<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            r#"
            INSERT INTO dispatches (request_id, service_id, status, error_detail, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(request_id, service_id) DO NOTHING
            "#,
            params![
                request_id.as_str(),
                status.service_id,
                status.state.as_str(),
                status.error_detail,
                status.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn upsert_dispatch(
        &self,
        request_id: &RequestId,
        status: &DispatchStatus,
    ) -> StorageResult<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO dispatches (request_id, service_id, status, error_detail, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(request_id, service_id) DO UPDATE SET
                status = excluded.status,
                error_detail = excluded.error_detail,
                updated_at = excluded.updated_at
            "#,
            params![
                request_id.as_str(),
                status.service_id,
                status.state.as_str(),
                status.error_detail,
                status.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Response Operations ===

    fn insert_response(&self, response: &Response, tags: &[TypeTag]) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let data = &response.data;
        tx.execute(
            r#"
            INSERT INTO responses (id, request_id, service_id, response_key, display_text, url,
                                   notes, value_string, value_alt_string, value_text, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                response.id.as_str(),
                response.request_id.as_str(),
                response.service_id,
                data.key,
                data.display_text,
                data.url,
                data.notes,
                data.value_string,
                data.value_alt_string,
                data.value_text,
                response.created_at.to_rfc3339(),
            ],
        )?;

        for tag in tags {
            tx.execute(
                "INSERT INTO response_tags (request_id, response_id, tag) VALUES (?1, ?2, ?3)",
                params![response.request_id.as_str(), response.id.as_str(), tag.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_response(&self, id: &ResponseId) -> StorageResult<Option<Response>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", RESPONSE_SELECT),
                params![id.as_str()],
                response_row,
            )
            .optional()?;
        row.map(ResponseRow::into_response).transpose()
    }
}
