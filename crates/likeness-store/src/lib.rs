//! likeness-store — SQLite implementation of the likeness [`Store`].
//!
//! Descriptors are stored as JSON arrays, ids as UUID text and timestamps
//! as RFC 3339. Enumeration follows insertion order (`rowid`).

use std::path::Path;

use chrono::{DateTime, Utc};
use likeness_core::{
    BoundingBox, Descriptor, Face, FaceFilter, FaceId, MediaRef, Person, PersonId, Store,
    StoreError,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id             TEXT PRIMARY KEY,
    representative TEXT NOT NULL,
    name           TEXT,
    created_at     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS faces (
    id          TEXT PRIMARY KEY,
    media       TEXT NOT NULL,
    descriptor  TEXT NOT NULL,
    box_x       REAL NOT NULL,
    box_y       REAL NOT NULL,
    box_width   REAL NOT NULL,
    box_height  REAL NOT NULL,
    person_id   TEXT REFERENCES persons(id),
    thumbnail   TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS faces_person_id ON faces(person_id);
CREATE INDEX IF NOT EXISTS faces_media ON faces(media);
";

const PERSON_COLUMNS: &str = "id, representative, name, created_at";
const FACE_COLUMNS: &str =
    "id, media, descriptor, box_x, box_y, box_width, box_height, person_id, thumbnail, created_at";

fn db(e: rusqlite::Error) -> StoreError {
    StoreError::backend(e)
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }
        let conn = Connection::open(path).map_err(db)?;
        tracing::info!(path = %path.display(), "opened gallery database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(Self { conn })
    }

    fn query_faces(&self, filter: &FaceFilter) -> Result<Vec<Face>, StoreError> {
        let (clause, param) = where_clause(filter);
        let sql = format!("SELECT {FACE_COLUMNS} FROM faces {clause} ORDER BY rowid");
        let mut stmt = self.conn.prepare_cached(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params_from_iter(param.iter()), FaceRow::from_row)
            .map_err(db)?;

        let mut faces = Vec::new();
        for row in rows {
            faces.push(row.map_err(db)?.into_face()?);
        }
        Ok(faces)
    }
}

fn where_clause(filter: &FaceFilter) -> (&'static str, Option<String>) {
    match filter {
        FaceFilter::All => ("", None),
        FaceFilter::Assigned => ("WHERE person_id IS NOT NULL", None),
        FaceFilter::Unassigned => ("WHERE person_id IS NULL", None),
        FaceFilter::Person(id) => ("WHERE person_id = ?1", Some(id.to_string())),
        FaceFilter::Media(media) => ("WHERE media = ?1", Some(media.0.clone())),
    }
}

fn encode_descriptor(d: &Descriptor) -> Result<String, StoreError> {
    serde_json::to_string(d).map_err(StoreError::backend)
}

fn decode_descriptor(id: &str, json: &str) -> Result<Descriptor, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("descriptor: {e}"),
    })
}

fn decode_time(id: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("created_at: {e}"),
        })
}

fn decode_id<T: std::str::FromStr>(id: &str, field: &str, raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("{field}: {e}"),
    })
}

struct PersonRow {
    id: String,
    representative: String,
    name: Option<String>,
    created_at: String,
}

impl PersonRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            representative: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_person(self) -> Result<Person, StoreError> {
        Ok(Person {
            id: decode_id(&self.id, "id", &self.id)?,
            representative: decode_descriptor(&self.id, &self.representative)?,
            name: self.name,
            created_at: decode_time(&self.id, &self.created_at)?,
        })
    }
}

struct FaceRow {
    id: String,
    media: String,
    descriptor: String,
    bbox: BoundingBox,
    person_id: Option<String>,
    thumbnail: Option<String>,
    created_at: String,
}

impl FaceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            media: row.get(1)?,
            descriptor: row.get(2)?,
            bbox: BoundingBox {
                x: row.get::<_, f64>(3)? as f32,
                y: row.get::<_, f64>(4)? as f32,
                width: row.get::<_, f64>(5)? as f32,
                height: row.get::<_, f64>(6)? as f32,
            },
            person_id: row.get(7)?,
            thumbnail: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_face(self) -> Result<Face, StoreError> {
        let person_id = match &self.person_id {
            Some(raw) => Some(decode_id::<PersonId>(&self.id, "person_id", raw)?),
            None => None,
        };
        Ok(Face {
            id: decode_id(&self.id, "id", &self.id)?,
            media: MediaRef(self.media),
            descriptor: decode_descriptor(&self.id, &self.descriptor)?,
            bbox: self.bbox,
            person_id,
            thumbnail: self.thumbnail,
            created_at: decode_time(&self.id, &self.created_at)?,
        })
    }
}

impl Store for SqliteStore {
    fn persons(&self) -> Result<Vec<Person>, StoreError> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY rowid");
        let mut stmt = self.conn.prepare_cached(&sql).map_err(db)?;
        let rows = stmt.query_map([], PersonRow::from_row).map_err(db)?;

        let mut persons = Vec::new();
        for row in rows {
            persons.push(row.map_err(db)?.into_person()?);
        }
        Ok(persons)
    }

    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], PersonRow::from_row)
            .optional()
            .map_err(db)?;
        row.map(PersonRow::into_person).transpose()
    }

    fn insert_person(&self, person: &Person) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO persons (id, representative, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    person.id.to_string(),
                    encode_descriptor(&person.representative)?,
                    person.name,
                    person.created_at.to_rfc3339(),
                ],
            )
            .map_err(db)?;
        Ok(())
    }

    fn update_representative(
        &self,
        id: PersonId,
        representative: &Descriptor,
    ) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute(
                "UPDATE persons SET representative = ?2 WHERE id = ?1",
                params![id.to_string(), encode_descriptor(representative)?],
            )
            .map_err(db)?;
        Ok(n > 0)
    }

    fn set_person_name(&self, id: PersonId, name: Option<&str>) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute(
                "UPDATE persons SET name = ?2 WHERE id = ?1",
                params![id.to_string(), name],
            )
            .map_err(db)?;
        Ok(n > 0)
    }

    fn delete_person(&self, id: PersonId) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM persons WHERE id = ?1", params![id.to_string()])
            .map_err(db)?;
        Ok(n > 0)
    }

    fn faces(&self, filter: &FaceFilter) -> Result<Vec<Face>, StoreError> {
        self.query_faces(filter)
    }

    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError> {
        let sql = format!("SELECT {FACE_COLUMNS} FROM faces WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], FaceRow::from_row)
            .optional()
            .map_err(db)?;
        row.map(FaceRow::into_face).transpose()
    }

    fn insert_face(&self, face: &Face) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO faces (id, media, descriptor, box_x, box_y, box_width, box_height, \
                 person_id, thumbnail, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    face.id.to_string(),
                    face.media.as_str(),
                    encode_descriptor(&face.descriptor)?,
                    face.bbox.x as f64,
                    face.bbox.y as f64,
                    face.bbox.width as f64,
                    face.bbox.height as f64,
                    face.person_id.map(|p| p.to_string()),
                    face.thumbnail,
                    face.created_at.to_rfc3339(),
                ],
            )
            .map_err(db)?;
        Ok(())
    }

    fn assign_face(&self, face_id: FaceId, person_id: PersonId) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute(
                "UPDATE faces SET person_id = ?2 WHERE id = ?1",
                params![face_id.to_string(), person_id.to_string()],
            )
            .map_err(db)?;
        Ok(n > 0)
    }

    fn delete_face(&self, id: FaceId) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM faces WHERE id = ?1", params![id.to_string()])
            .map_err(db)?;
        Ok(n > 0)
    }

    fn count_faces(&self, filter: &FaceFilter) -> Result<usize, StoreError> {
        let (clause, param) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM faces {clause}");
        let n: i64 = self
            .conn
            .query_row(&sql, params_from_iter(param.iter()), |row| row.get(0))
            .map_err(db)?;
        Ok(n as usize)
    }
}
