//! Schema stores: SQLite introspection, JSON files, fixed lists, and a TTL
//! cache in front of any of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use quarry_types::{QuarryError, Result, Table};

use crate::collaborators::SchemaStore;

// ---------------------------------------------------------------------------
// StaticSchemaStore / JsonSchemaStore
// ---------------------------------------------------------------------------

pub struct StaticSchemaStore {
    tables: Vec<Table>,
}

impl StaticSchemaStore {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl SchemaStore for StaticSchemaStore {
    async fn introspect(&self) -> Result<Vec<Table>> {
        Ok(self.tables.clone())
    }
}

/// Tables described as a JSON array of [`Table`].
pub struct JsonSchemaStore {
    path: PathBuf,
}

impl JsonSchemaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchemaStore for JsonSchemaStore {
    async fn introspect(&self) -> Result<Vec<Table>> {
        let data = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            QuarryError::SchemaStoreUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            QuarryError::SchemaStoreUnavailable(format!("{}: {e}", self.path.display()))
        })
    }
}

// ---------------------------------------------------------------------------
// SqliteSchemaStore
// ---------------------------------------------------------------------------

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSchemaStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
    use sqlx::Row;

    use quarry_types::{Column, QuarryError, Result, Table};

    use crate::collaborators::SchemaStore;

    fn unavailable(e: sqlx::Error) -> QuarryError {
        QuarryError::SchemaStoreUnavailable(e.to_string())
    }

    /// Double-quote an identifier for use inside a PRAGMA.
    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Read-only introspection of a SQLite database file.
    pub struct SqliteSchemaStore {
        path: PathBuf,
    }

    impl SqliteSchemaStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        async fn connect(&self) -> Result<SqlitePool> {
            let options = SqliteConnectOptions::new()
                .filename(&self.path)
                .read_only(true);
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .map_err(unavailable)
        }

        async fn load_table(pool: &SqlitePool, name: &str) -> Result<Table> {
            let mut table = Table::new(name, "main");

            let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(name)))
                .fetch_all(pool)
                .await
                .map_err(unavailable)?;
            for row in columns {
                let col_name: String = row.try_get("name").map_err(unavailable)?;
                let data_type: String = row.try_get("type").map_err(unavailable)?;
                let not_null: i64 = row.try_get("notnull").map_err(unavailable)?;
                let pk: i64 = row.try_get("pk").map_err(unavailable)?;

                let mut column = Column::new(col_name, data_type);
                if pk > 0 {
                    column = column.primary_key();
                } else if not_null != 0 {
                    column = column.not_null();
                }
                table.columns.push(column);
            }

            let fks = sqlx::query(&format!("PRAGMA foreign_key_list({})", quote_ident(name)))
                .fetch_all(pool)
                .await
                .map_err(unavailable)?;
            for row in fks {
                let target: String = row.try_get("table").map_err(unavailable)?;
                let from: String = row.try_get("from").map_err(unavailable)?;
                let to: Option<String> = row.try_get("to").map_err(unavailable)?;
                // A NULL target column means the referenced table's primary key.
                let to = to.unwrap_or_else(|| "id".to_string());
                if let Some(col) = table.columns.iter_mut().find(|c| c.name == from) {
                    *col = col.clone().references(target, to);
                }
            }

            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)))
                .fetch_one(pool)
                .await
                .map_err(unavailable)?;
            table.row_count = u64::try_from(count).ok();

            Ok(table)
        }
    }

    #[async_trait]
    impl SchemaStore for SqliteSchemaStore {
        async fn introspect(&self) -> Result<Vec<Table>> {
            let pool = self.connect().await?;
            let names: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT name
                FROM sqlite_master
                WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                ORDER BY name
                "#,
            )
            .fetch_all(&pool)
            .await
            .map_err(unavailable)?;

            let mut tables = Vec::with_capacity(names.len());
            for name in &names {
                tables.push(Self::load_table(&pool, name).await?);
            }
            pool.close().await;

            tracing::info!(
                path = %self.path.display(),
                tables = tables.len(),
                "SQLite schema introspected"
            );
            Ok(tables)
        }
    }
}

// ---------------------------------------------------------------------------
// CachedSchemaStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: DateTime<Utc>,
    tables: Vec<Table>,
}

/// JSON file cache with a freshness window in front of another store.
pub struct CachedSchemaStore {
    inner: Arc<dyn SchemaStore>,
    path: PathBuf,
    ttl: Duration,
}

impl CachedSchemaStore {
    pub fn new(inner: Arc<dyn SchemaStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            ttl: Duration::hours(24),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `~/.quarry/schema_cache.json`, when `HOME` is set.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".quarry").join("schema_cache.json"))
    }

    fn read_fresh(&self, now: DateTime<Utc>) -> Option<Vec<Table>> {
        let data = std::fs::read_to_string(&self.path).ok()?;
        let cache: CacheFile = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt schema cache");
                return None;
            }
        };
        if now - cache.fetched_at < self.ttl {
            Some(cache.tables)
        } else {
            None
        }
    }

    fn write(path: &Path, tables: &[Table], now: DateTime<Utc>) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let cache = CacheFile {
            fetched_at: now,
            tables: tables.to_vec(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&cache)?)?;
        Ok(())
    }
}

#[async_trait]
impl SchemaStore for CachedSchemaStore {
    async fn introspect(&self) -> Result<Vec<Table>> {
        let now = Utc::now();
        if let Some(tables) = self.read_fresh(now) {
            tracing::info!(path = %self.path.display(), tables = tables.len(), "Schema cache hit");
            return Ok(tables);
        }

        let tables = self.inner.introspect().await?;
        if let Err(e) = Self::write(&self.path, &tables, now) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write schema cache");
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::Column;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaStore for CountingStore {
        async fn introspect(&self) -> Result<Vec<Table>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Table::new("orders", "main").with_column(Column::new("id", "INTEGER"))])
        }
    }

    #[tokio::test]
    async fn json_store_reads_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let tables = vec![Table::new("customers", "main").with_comment("buyers")];
        std::fs::write(&path, serde_json::to_string(&tables).unwrap()).unwrap();

        let loaded = JsonSchemaStore::new(&path).introspect().await.unwrap();
        assert_eq!(loaded, tables);
    }

    #[tokio::test]
    async fn missing_json_file_is_store_unavailable() {
        let err = JsonSchemaStore::new("/nonexistent/schema.json")
            .introspect()
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::SchemaStoreUnavailable(_)));
    }

    #[tokio::test]
    async fn cache_serves_fresh_entries() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let store = CachedSchemaStore::new(inner.clone(), dir.path().join("nested/cache.json"));

        store.introspect().await.unwrap();
        let second = store.introspect().await.unwrap();
        assert_eq!(second[0].name, "orders");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_cache_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let store = CachedSchemaStore::new(inner.clone(), dir.path().join("cache.json"))
            .with_ttl(Duration::zero());

        store.introspect().await.unwrap();
        store.introspect().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_store_reads_columns_and_foreign_keys() {
        use sqlx::sqlite::SqliteConnectOptions;
        use sqlx::ConnectOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");
        {
            let mut conn = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .connect()
                .await
                .unwrap();
            for stmt in [
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), total REAL)",
                "INSERT INTO customers (name) VALUES ('ada'), ('grace')",
            ] {
                sqlx::query(stmt).execute(&mut conn).await.unwrap();
            }
        }

        let tables = SqliteSchemaStore::new(&path).introspect().await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let customers = &tables[0];
        assert_eq!(customers.row_count, Some(2));
        assert!(customers.columns[0].primary_key);
        assert!(!customers.columns[1].nullable);

        let orders = &tables[1];
        let fk = orders.columns[1].references.as_ref().unwrap();
        assert_eq!(fk.table, "customers");
        assert_eq!(fk.column, "id");
        assert!(orders.columns[2].nullable);
    }
}
