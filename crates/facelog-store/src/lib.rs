//! facelog-store — SQLite persistence for people, reference embeddings and
//! emotion events.
//!
//! Embeddings are stored as JSON arrays of floats. `serde_json` writes the
//! shortest representation that parses back to the same `f32`, so vectors
//! round-trip exactly.

use chrono::Utc;
use facelog_core::{Embedding, EmotionEvent, FaceStore, Gallery, Person, PersonId};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS people (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id      TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    vector         TEXT NOT NULL,
    model_version  TEXT,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_person ON embeddings(person_id);

CREATE TABLE IF NOT EXISTS emotions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id    TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    emotion      TEXT NOT NULL,
    detected_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_emotions_person ON emotions(person_id);
";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("vector encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("person name is empty")]
    EmptyName,
    #[error("no person with id {0}")]
    UnknownPerson(PersonId),
    #[error("identical embedding already stored for person {existing}")]
    DuplicateEmbedding { existing: PersonId },
    #[error("vector component {index} is not finite")]
    NonFiniteVector { index: usize },
    #[error("invalid value in database: {0}")]
    InvalidDbValue(String),
}

/// A person with the number of stored reference embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct PersonSummary {
    #[serde(flatten)]
    pub person: Person,
    pub embeddings: usize,
    pub created_at: String,
}

/// One stored reference embedding, without the vector itself.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingSummary {
    pub id: i64,
    pub person: String,
    /// `None` when the stored vector does not decode.
    pub dim: Option<usize>,
    pub model_version: Option<String>,
}

/// A stored emotion event joined with the person's name.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub person: String,
    pub emotion: String,
    /// Absent on rows written before the column existed.
    pub detected_at: Option<String>,
}

/// SQLite-backed [`FaceStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, bootstrapping the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        upgrade_emotions_table(&conn)?;
        Ok(Self { conn })
    }

    /// Everyone in the store, oldest first, including people without embeddings.
    pub fn list_people(&self) -> Result<Vec<PersonSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.created_at, COUNT(e.id)
             FROM people p LEFT JOIN embeddings e ON e.person_id = p.id
             GROUP BY p.id
             ORDER BY p.created_at, p.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PersonSummary {
                person: Person {
                    id: person_id_column(row, 0)?,
                    name: row.get(1)?,
                },
                created_at: row.get(2)?,
                embeddings: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All stored embeddings in insertion order.
    pub fn embedding_summaries(&self) -> Result<Vec<EmbeddingSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, p.name, e.vector, e.model_version
             FROM embeddings e JOIN people p ON p.id = e.person_id
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let vector: String = row.get(2)?;
            Ok(EmbeddingSummary {
                id: row.get(0)?,
                person: row.get(1)?,
                dim: decode_vector(&vector).ok().map(|v| v.len()),
                model_version: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The `limit` most recent emotion events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, p.name, m.emotion, m.detected_at
             FROM emotions m JOIN people p ON p.id = m.person_id
             ORDER BY m.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                person: row.get(1)?,
                emotion: row.get(2)?,
                detected_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn event_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM emotions", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl FaceStore for SqliteStore {
    type Error = StoreError;

    fn load_gallery(&self) -> Result<Gallery> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, e.id, e.vector, e.model_version
             FROM embeddings e JOIN people p ON p.id = e.person_id
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut gallery = Gallery::new();
        let mut skipped = 0usize;
        for row in rows {
            let (person_id, name, row_id, vector, model_version) = row?;

            let id = match PersonId::parse(&person_id) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(row = row_id, %person_id, error = %err, "skipping embedding with bad person id");
                    skipped += 1;
                    continue;
                }
            };
            let values = match decode_vector(&vector) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(row = row_id, person = %name, error = %err, "skipping malformed embedding");
                    skipped += 1;
                    continue;
                }
            };

            let embedding = Embedding {
                values,
                model_version,
            };
            if let Err(err) = gallery.append(Person { id, name }, embedding) {
                tracing::warn!(row = row_id, error = %err, "skipping embedding");
                skipped += 1;
            }
        }

        tracing::info!(
            embeddings = gallery.len(),
            people = gallery.person_count(),
            skipped,
            "loaded gallery"
        );
        Ok(gallery)
    }

    fn get_or_create_person(&mut self, name: &str) -> Result<Person> {
        get_or_create_person(&self.conn, name)
    }

    fn append_embedding(&mut self, person: &PersonId, embedding: &Embedding) -> Result<()> {
        insert_embedding(&self.conn, person, embedding)
    }

    fn register(&mut self, name: &str, embedding: &Embedding) -> Result<Person> {
        let tx = self.conn.transaction()?;
        let person = get_or_create_person(&tx, name)?;
        insert_embedding(&tx, &person.id, embedding)?;
        tx.commit()?;
        Ok(person)
    }

    fn record_event(&mut self, event: &EmotionEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO emotions (person_id, emotion, detected_at) VALUES (?1, ?2, ?3)",
            params![event.person.to_string(), event.emotion, event.detected_at],
        )?;
        Ok(())
    }
}

/// Default database location: `$XDG_DATA_HOME/facelog/facelog.db`.
pub fn default_db_path() -> PathBuf {
    facelog_core::default_data_dir().join("facelog.db")
}

/// JSON has no NaN or infinity (`serde_json` would write `null`), so such
/// vectors are refused instead of stored unreadable.
pub fn encode_vector(values: &[f32]) -> Result<String> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::NonFiniteVector { index });
    }
    Ok(serde_json::to_string(values)?)
}

pub fn decode_vector(text: &str) -> std::result::Result<Vec<f32>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Older databases created `emotions` without `detected_at`.
fn upgrade_emotions_table(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(emotions)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !columns.iter().any(|c| c == "detected_at") {
        tracing::info!("adding detected_at column to emotions");
        conn.execute("ALTER TABLE emotions ADD COLUMN detected_at TEXT", [])?;
    }
    Ok(())
}

fn get_or_create_person(conn: &Connection, name: &str) -> Result<Person> {
    let name = facelog_core::store::normalize_name(name).ok_or(StoreError::EmptyName)?;

    // A concurrent writer may have created the same name; DO NOTHING keeps
    // theirs and the select below returns it.
    let inserted = conn.execute(
        "INSERT INTO people (id, name, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO NOTHING",
        params![PersonId::new().to_string(), name, Utc::now().to_rfc3339()],
    )?;

    let person = conn.query_row(
        "SELECT id, name FROM people WHERE name = ?1",
        params![name],
        |row| {
            Ok(Person {
                id: person_id_column(row, 0)?,
                name: row.get(1)?,
            })
        },
    )?;

    if inserted > 0 {
        tracing::info!(person = %person.id, name, "created person");
    }
    Ok(person)
}

fn insert_embedding(conn: &Connection, person: &PersonId, embedding: &Embedding) -> Result<()> {
    let person_key = person.to_string();
    let exists = conn
        .query_row("SELECT 1 FROM people WHERE id = ?1", params![person_key], |_| Ok(()))
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::UnknownPerson(*person));
    }

    let vector = encode_vector(&embedding.values)?;
    let duplicate: Option<String> = conn
        .query_row(
            "SELECT person_id FROM embeddings WHERE vector = ?1 AND person_id != ?2 LIMIT 1",
            params![vector, person_key],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing) = duplicate {
        let existing = PersonId::parse(&existing)
            .map_err(|e| StoreError::InvalidDbValue(format!("person id {existing:?}: {e}")))?;
        return Err(StoreError::DuplicateEmbedding { existing });
    }

    conn.execute(
        "INSERT INTO embeddings (person_id, vector, model_version, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![person_key, vector, embedding.model_version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn person_id_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<PersonId> {
    let raw: String = row.get(idx)?;
    PersonId::parse(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}
