use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use tracing::info;

/// Offset added to every schema version before it is written to `PRAGMA user_version`,
/// so a database created by something else (user_version 0) is never mistaken for ours.
pub const BASE_DB_VERSION: usize = 77000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed to the macro
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    sql.push_str(&format!(" DEFAULT {}", default_value));
                }
                sql
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({});", self.name, columns)
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let type_name: String = row.get(2)?;
                let sql_type = SqlType::parse(&type_name).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, type_name.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found: {}, expected: {}",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            // SQLite may report defaults wrapped in parentheses
            if actual
                .default_value
                .as_ref()
                .map(strip_leading_and_trailing_parentheses)
                != expected
                    .default_value
                    .map(strip_leading_and_trailing_parentheses)
            {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
        }

        for (index_name, _) in self.indices {
            let index_exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !index_exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

fn strip_leading_and_trailing_parentheses<S: AsRef<str>>(s: S) -> String {
    let s = s.as_ref();
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

fn user_tables_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?)
}

/// Brings `conn` to the latest schema in `schemas`.
///
/// An empty database is created at the latest version. An existing one is
/// validated against the schema matching its recorded version and then migrated
/// forward inside a single transaction. `schemas` must be ordered by version.
pub fn migrate_to_latest(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    db_name: &str,
) -> Result<()> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema defined for {} database", db_name))?;

    if user_tables_count(conn)? == 0 {
        info!(
            "Creating {} database schema at version {}",
            db_name, latest.version
        );
        let tx = conn.transaction()?;
        latest.create(&tx)?;
        tx.commit()?;
        return Ok(());
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if raw_version < BASE_DB_VERSION as i64 {
        bail!(
            "{} database has foreign user_version {}, refusing to touch it",
            db_name,
            raw_version
        );
    }
    let db_version = (raw_version - BASE_DB_VERSION as i64) as usize;

    let current = schemas
        .iter()
        .find(|s| s.version == db_version)
        .with_context(|| format!("Unknown {} database version {}", db_name, db_version))?;
    current.validate(conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            db_name, db_version
        )
    })?;

    if db_version >= latest.version {
        return Ok(());
    }

    let tx = conn.transaction()?;
    let mut reached = db_version;
    for schema in schemas.iter().filter(|s| s.version > db_version) {
        info!(
            "Migrating {} database from version {} to {}",
            db_name, reached, schema.version
        );
        if let Some(migration_fn) = schema.migration {
            migration_fn(&tx).with_context(|| {
                format!("Failed to run migration to version {}", schema.version)
            })?;
        }
        reached = schema.version;
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + reached)?;
    tx.commit()?;

    latest.validate(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTES_TABLE_V0: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
        ],
        indices: &[("idx_notes_body", "body")],
    };

    const TAGS_TABLE_V1: Table = Table {
        name: "tags",
        columns: &[
            sqlite_column!("name", &SqlType::Text, is_primary_key = true),
            sqlite_column!(
                "weight",
                &SqlType::Real,
                non_null = true,
                default_value = Some("1.0")
            ),
        ],
        indices: &[],
    };

    fn add_tags_table(conn: &Connection) -> Result<()> {
        TAGS_TABLE_V1.create(conn)
    }

    const SCHEMAS_V0: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[NOTES_TABLE_V0],
        migration: None,
    }];

    const SCHEMAS_V1: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[NOTES_TABLE_V0],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[NOTES_TABLE_V0, TAGS_TABLE_V1],
            migration: Some(add_tags_table),
        },
    ];

    fn user_version(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_create_sql_renders_column_flags() {
        let sql = TAGS_TABLE_V1.create_sql();
        assert_eq!(
            sql,
            "CREATE TABLE tags (name TEXT PRIMARY KEY, weight REAL NOT NULL DEFAULT 1.0);"
        );
    }

    #[test]
    fn test_fresh_database_is_created_at_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn, SCHEMAS_V1, "test").unwrap();

        assert_eq!(user_version(&conn), (BASE_DB_VERSION + 1) as i64);
        SCHEMAS_V1[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_existing_database_is_migrated_forward() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn, SCHEMAS_V0, "test").unwrap();
        conn.execute("INSERT INTO notes (body) VALUES ('kept')", [])
            .unwrap();

        migrate_to_latest(&mut conn, SCHEMAS_V1, "test").unwrap();

        assert_eq!(user_version(&conn), (BASE_DB_VERSION + 1) as i64);
        let body: String = conn
            .query_row("SELECT body FROM notes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(body, "kept");
        conn.execute("INSERT INTO tags (name) VALUES ('rain')", [])
            .unwrap();
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(&NOTES_TABLE_V0.create_sql(), []).unwrap();

        let err = SCHEMAS_V0[0].validate(&conn).unwrap_err();
        assert!(err.to_string().contains("idx_notes_body"));
    }

    #[test]
    fn test_validate_detects_column_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body REAL NOT NULL)", [])
            .unwrap();
        conn.execute("CREATE INDEX idx_notes_body ON notes(body)", [])
            .unwrap();

        let err = SCHEMAS_V0[0].validate(&conn).unwrap_err();
        assert!(err.to_string().contains("type mismatch"));
    }

    #[test]
    fn test_foreign_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE other (x INTEGER)", []).unwrap();

        assert!(migrate_to_latest(&mut conn, SCHEMAS_V1, "test").is_err());
    }
}
