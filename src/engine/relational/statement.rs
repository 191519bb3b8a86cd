//! SQL statement builder
//!
//! Generates SQLite statement text from field/value descriptions. Every
//! string value goes through [`escape_string`] before it reaches the text.

use crate::engine::contract::{Direction, KeyRange};
use crate::engine::record::{Key, Record, Scalar};

/// Double every single quote: `bbc's` becomes `bbc''s`
pub fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Quote an identifier (table or column name)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a value as an SQL literal. Non-finite reals have no literal form
/// and are written as NULL.
pub fn literal(value: &Scalar) -> String {
    match value {
        Scalar::Null => "NULL".to_string(),
        Scalar::Integer(i) => i.to_string(),
        Scalar::Real(f) if f.is_finite() => format!("{:?}", f),
        Scalar::Real(_) => "NULL".to_string(),
        Scalar::Text(s) => format!("'{}'", escape_string(s)),
    }
}

pub fn key_literal(key: &Key) -> String {
    literal(&Scalar::from(key.clone()))
}

/// `field = value` conditions joined by `AND`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    conditions: Vec<(String, Scalar)>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Scalar>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn key(key_path: &str, key: &Key) -> Self {
        Self::new().eq(key_path, key.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|(f, _)| f.as_str())
    }

    /// ` WHERE ...`, or an empty string when there are no conditions
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(field, value)| match value {
                Scalar::Null => format!("{} IS NULL", quote_ident(field)),
                other => format!("{} = {}", quote_ident(field), literal(other)),
            })
            .collect();
        format!(" WHERE {}", parts.join(" AND "))
    }
}

impl From<&Record> for WhereClause {
    fn from(record: &Record) -> Self {
        Self {
            conditions: record.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// A table as raw column definitions, e.g. `"name VARCHAR(100)"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

pub fn create_table(schema: &TableSchema) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&schema.name),
        schema.fields.join(", ")
    )
}

/// Primary key column for a container table
pub fn primary_key_column(key_path: &str, auto_increment: bool) -> String {
    if auto_increment {
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(key_path))
    } else {
        format!("{} PRIMARY KEY", quote_ident(key_path))
    }
}

pub fn create_index(table: &str, index: &str, field: &str, unique: bool) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(&format!("{}_{}", table, index)),
        quote_ident(table),
        quote_ident(field)
    )
}

pub fn add_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(table), quote_ident(column))
}

pub fn table_exists(name: &str) -> String {
    format!(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{}'",
        escape_string(name)
    )
}

/// One-row probe used to learn a table's columns
pub fn probe(table: &str) -> String {
    format!("SELECT * FROM {} LIMIT 1", quote_ident(table))
}

/// `SELECT fields FROM table WHERE ...`; no fields selects every column
pub fn select(table: &str, fields: &[&str], filter: &WhereClause) -> String {
    let columns = if fields.is_empty() {
        "*".to_string()
    } else {
        fields.iter().map(|f| quote_ident(f)).collect::<Vec<_>>().join(", ")
    };
    format!("SELECT {} FROM {}{}", columns, quote_ident(table), filter.to_sql())
}

pub fn insert_or_replace(table: &str, record: &Record) -> String {
    if record.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let columns: Vec<String> = record.fields().map(|f| quote_ident(f)).collect();
    let values: Vec<String> = record.iter().map(|(_, v)| literal(v)).collect();
    format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        values.join(", ")
    )
}

pub fn delete(table: &str, filter: &WhereClause) -> String {
    format!("DELETE FROM {}{}", quote_ident(table), filter.to_sql())
}

/// What a cursor query walks and how
#[derive(Debug, Clone, Default)]
pub struct CursorQuery<'a> {
    pub table: &'a str,
    pub key_path: &'a str,
    /// Column to order by instead of the key path
    pub index: Option<&'a str>,
    pub order: Direction,
    /// One row per distinct index value, the lowest key winning
    pub unique: bool,
    pub range: Option<&'a KeyRange>,
}

impl CursorQuery<'_> {
    pub fn to_sql(&self) -> String {
        let table = quote_ident(self.table);
        let pk = quote_ident(self.key_path);
        let column = quote_ident(self.index.unwrap_or(self.key_path));

        let mut conditions = Vec::new();
        if self.index.is_some() {
            conditions.push(format!("{} IS NOT NULL", column));
        }
        if let Some(range) = self.range {
            if let Some(lower) = &range.lower {
                let op = if range.lower_open { ">" } else { ">=" };
                conditions.push(format!("{} {} {}", column, op, key_literal(lower)));
            }
            if let Some(upper) = &range.upper {
                let op = if range.upper_open { "<" } else { "<=" };
                conditions.push(format!("{} {} {}", column, op, key_literal(upper)));
            }
        }
        if self.unique && self.index.is_some() {
            let filter = if conditions.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", conditions.join(" AND "))
            };
            conditions.push(format!(
                "{} IN (SELECT MIN({}) FROM {}{} GROUP BY {})",
                pk, pk, table, filter, column
            ));
        }

        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        format!(
            "SELECT * FROM {}{} ORDER BY {} {}, {} {}",
            table, filter, column, self.order, pk, self.order
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_every_quote() {
        assert_eq!(escape_string("bbc's"), "bbc''s");
        assert_eq!(escape_string("it's bob's"), "it''s bob''s");
        assert_eq!(literal(&Scalar::from("o'neil")), "'o''neil'");
        assert_eq!(literal(&Scalar::from(3)), "3");
        assert_eq!(literal(&Scalar::Real(f64::INFINITY)), "NULL");
    }

    #[test]
    fn test_where_clause() {
        let filter = WhereClause::new().eq("title", "eastenders").eq("episodeCount", 3);
        assert_eq!(
            filter.to_sql(),
            " WHERE \"title\" = 'eastenders' AND \"episodeCount\" = 3"
        );
        assert_eq!(WhereClause::new().to_sql(), "");
        assert_eq!(
            WhereClause::new().eq("x", Scalar::Null).to_sql(),
            " WHERE \"x\" IS NULL"
        );
    }

    #[test]
    fn test_select_and_insert() {
        let filter = WhereClause::new().eq("name", "render");
        assert_eq!(
            select("profiles", &[], &filter),
            "SELECT * FROM \"profiles\" WHERE \"name\" = 'render'"
        );
        assert_eq!(
            select("profiles", &["avg", "max"], &WhereClause::new()),
            "SELECT \"avg\", \"max\" FROM \"profiles\""
        );

        let record = Record::new().with("name", "it's").with("calls", 2);
        assert_eq!(
            insert_or_replace("profiles", &record),
            "INSERT OR REPLACE INTO \"profiles\" (\"calls\", \"name\") VALUES (2, 'it''s')"
        );
    }

    #[test]
    fn test_create_table() {
        let schema = TableSchema::new("profiles", &["id INTEGER PRIMARY KEY", "name VARCHAR(100)"]);
        assert_eq!(
            create_table(&schema),
            "CREATE TABLE IF NOT EXISTS \"profiles\" (id INTEGER PRIMARY KEY, name VARCHAR(100))"
        );
    }

    #[test]
    fn test_cursor_query() {
        let range = KeyRange::lower_bound(2, true);
        let query = CursorQuery {
            table: "Store",
            key_path: "id",
            order: Direction::Desc,
            range: Some(&range),
            ..CursorQuery::default()
        };
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM \"Store\" WHERE \"id\" > 2 ORDER BY \"id\" DESC, \"id\" DESC"
        );

        let unique = CursorQuery {
            table: "Store",
            key_path: "id",
            index: Some("name"),
            unique: true,
            ..CursorQuery::default()
        };
        assert_eq!(
            unique.to_sql(),
            "SELECT * FROM \"Store\" WHERE \"name\" IS NOT NULL AND \"id\" IN \
             (SELECT MIN(\"id\") FROM \"Store\" WHERE \"name\" IS NOT NULL GROUP BY \"name\") \
             ORDER BY \"name\" ASC, \"id\" ASC"
        );
    }
}
