use anyhow::{bail, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension};

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed
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
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_sql(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            "BLOB" => Some(&SqlType::Blob),
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

impl<S: AsRef<str>> Column<'_, S> {
    fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name.as_ref(), self.sql_type.as_sql());
        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default_value) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default_value.as_ref());
        }
        sql
    }

    /// Default values read back from SQLite may be wrapped in parentheses.
    fn normalized_default(&self) -> Option<&str> {
        self.default_value.as_ref().map(|d| {
            let d = d.as_ref();
            d.strip_prefix('(')
                .and_then(|inner| inner.strip_suffix(')'))
                .unwrap_or(d)
        })
    }

    /// Name of the first attribute that differs from `expected`, if any.
    fn mismatch(&self, expected: &Column<'_, &str>) -> Option<&'static str> {
        if self.name.as_ref() != expected.name {
            Some("name")
        } else if self.sql_type != expected.sql_type {
            Some("type")
        } else if self.non_null != expected.non_null {
            Some("non-null")
        } else if self.normalized_default() != expected.normalized_default() {
            Some("default value")
        } else if self.is_primary_key != expected.is_primary_key {
            Some("primary key")
        } else {
            None
        }
    }
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns: Vec<String> = self.columns.iter().map(Column::definition).collect();
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, columns.join(", ")),
            params![],
        )?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_name),
                params![],
            )?;
        }
        Ok(())
    }

    fn read_columns(&self, conn: &Connection) -> Result<Vec<Column<'static, String>>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let columns = stmt
            .query_map(params![], |row| {
                let declared: String = row.get(2)?;
                let sql_type = SqlType::from_sql(&declared).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, declared.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn has_index(&self, conn: &Connection, index_name: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                params![index_name, self.name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let actual = self.read_columns(conn)?;
        if actual.len() != self.columns.len() {
            let found: Vec<&str> = actual.iter().map(|c| c.name.as_str()).collect();
            let expected: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
            bail!(
                "Table {} has {} columns, expected {}. Found: [{}], expected: [{}]",
                self.name,
                actual.len(),
                self.columns.len(),
                found.join(", "),
                expected.join(", ")
            );
        }

        for (actual_column, expected_column) in actual.iter().zip(self.columns) {
            if let Some(attribute) = actual_column.mismatch(expected_column) {
                bail!(
                    "Table {} column {} {} mismatch: expected {}, got {}",
                    self.name,
                    expected_column.name,
                    attribute,
                    expected_column.definition(),
                    actual_column.definition()
                );
            }
        }

        for (index_name, _) in self.indices {
            if !self.has_index(conn, index_name)? {
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

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Checks that every table matches its declared columns and indices.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        self.tables.iter().try_for_each(|table| table.validate(conn))
    }
}

pub const BASE_DB_VERSION: usize = 99999;

/// Reads `PRAGMA user_version` and returns it relative to [`BASE_DB_VERSION`].
pub fn read_schema_version(conn: &Connection) -> Result<i64> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(raw_version - BASE_DB_VERSION as i64)
}
