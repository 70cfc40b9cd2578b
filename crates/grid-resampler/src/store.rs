//! Result table persistence.
//!
//! The table is stored in SQLite with one REAL column per variable and a
//! `year_month` grouping column, plus a `months` table recording what each
//! committed month was expected to cover. Months are written whole inside a
//! single transaction, so a crash never leaves half a month behind.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ResampleError, Result};
use crate::table::{MonthCoverage, ResultRow, ResultTable};
use crate::time::YearMonth;

/// Where the result table lives between runs.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Load the persisted table, or an empty one.
    async fn load(&self, variables: &[String]) -> Result<ResultTable>;

    /// Months already persisted, with their coverage.
    async fn recorded_months(&self) -> Result<BTreeMap<YearMonth, MonthCoverage>>;

    /// Persist every month of `table` not yet stored. Returns the number of months written.
    async fn save(&self, table: &ResultTable) -> Result<usize>;
}

const FIXED_COLUMNS: [&str; 5] = ["year_month", "time", "lat", "lon", "height_level"];

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite-backed result table.
pub struct SqliteTableStore {
    pool: SqlitePool,
    variables: Vec<String>,
}

impl SqliteTableStore {
    /// Open or create the table database at `path` for the given variable columns.
    pub async fn open(path: &Path, variables: &[String]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            variables: variables.to_vec(),
        };
        store.create_schema().await?;

        info!(path = %path.display(), "Opened result table database");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory(variables: &[String]) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            variables: variables.to_vec(),
        };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        let value_columns: String = self
            .variables
            .iter()
            .map(|v| format!(",\n                {} REAL", quote_ident(v)))
            .collect();

        let create_results = format!(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year_month TEXT NOT NULL,
                time TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                height_level INTEGER NOT NULL{}
            )
            "#,
            value_columns
        );
        sqlx::query(&create_results).execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_year_month ON results(year_month)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS months (
                year_month TEXT PRIMARY KEY,
                expected_locations INTEGER NOT NULL,
                rows INTEGER NOT NULL,
                committed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.check_columns().await
    }

    /// An existing table must have exactly the requested variable columns.
    async fn check_columns(&self) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(results)")
            .fetch_all(&self.pool)
            .await?;
        let existing: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;
        let existing: Vec<&String> = existing
            .iter()
            .filter(|c| c.as_str() != "id" && !FIXED_COLUMNS.contains(&c.as_str()))
            .collect();
        let wanted: Vec<&String> = self.variables.iter().collect();

        if existing != wanted {
            return Err(ResampleError::config(format!(
                "result table has variable columns {:?}, parameter document requests {:?}",
                existing, wanted
            )));
        }
        Ok(())
    }

    async fn insert_month(&self, month: &YearMonth, coverage: &MonthCoverage, table: &ResultTable) -> Result<()> {
        let columns: Vec<String> = FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.variables.iter().map(|v| quote_ident(v)))
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            "INSERT INTO results ({}) VALUES ({})",
            columns.join(", "),
            placeholders
        );

        let month_key = month.to_string();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for row in table.month_rows(month) {
            let mut query = sqlx::query(&insert)
                .bind(&month_key)
                .bind(&row.time)
                .bind(row.lat)
                .bind(row.lon)
                .bind(row.height_level as i64);
            for value in &row.values {
                query = query.bind(*value);
            }
            query.execute(&mut *tx).await?;
        }

        sqlx::query(
            "INSERT INTO months (year_month, expected_locations, rows, committed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&month_key)
        .bind(coverage.expected_locations as i64)
        .bind(coverage.rows as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(month = %month, rows = coverage.rows, "Committed month to result table");
        Ok(())
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn load(&self, variables: &[String]) -> Result<ResultTable> {
        if variables != self.variables.as_slice() {
            return Err(ResampleError::config(format!(
                "store opened for {:?}, asked to load {:?}",
                self.variables, variables
            )));
        }

        let months = self.recorded_months().await?;

        let select = format!(
            "SELECT {}{} FROM results ORDER BY id",
            FIXED_COLUMNS.join(", "),
            self.variables
                .iter()
                .map(|v| format!(", {}", quote_ident(v)))
                .collect::<String>()
        );
        let records = sqlx::query(&select).fetch_all(&self.pool).await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let year_month: String = record.try_get(0)?;
            let height_level: i64 = record.try_get(4)?;
            let mut values = Vec::with_capacity(self.variables.len());
            for i in 0..self.variables.len() {
                // SQLite stores NaN as NULL.
                let v: Option<f64> = record.try_get(FIXED_COLUMNS.len() + i)?;
                values.push(v.unwrap_or(f64::NAN));
            }
            rows.push(ResultRow {
                time: record.try_get(1)?,
                year_month: year_month.parse()?,
                lat: record.try_get(2)?,
                lon: record.try_get(3)?,
                height_level: height_level as u32,
                values,
            });
        }

        debug!(rows = rows.len(), months = months.len(), "Loaded result table");
        Ok(ResultTable::from_parts(self.variables.clone(), rows, months))
    }

    async fn recorded_months(&self) -> Result<BTreeMap<YearMonth, MonthCoverage>> {
        let records: Vec<(String, i64, i64)> =
            sqlx::query_as("SELECT year_month, expected_locations, rows FROM months ORDER BY year_month")
                .fetch_all(&self.pool)
                .await?;

        let mut months = BTreeMap::new();
        for (month, expected, rows) in records {
            let month: YearMonth = month.parse()?;
            months.insert(
                month,
                MonthCoverage {
                    expected_locations: expected as usize,
                    rows: rows as usize,
                },
            );
        }
        Ok(months)
    }

    async fn save(&self, table: &ResultTable) -> Result<usize> {
        let recorded = self.recorded_months().await?;
        let mut written = 0usize;
        for (month, coverage) in table.months() {
            if recorded.contains_key(month) {
                continue;
            }
            self.insert_month(month, coverage, table).await?;
            written += 1;
        }
        if written > 0 {
            info!(months = written, rows = table.len(), "Saved result table");
        }
        Ok(written)
    }
}

/// In-memory store, mainly for tests.
#[derive(Default)]
pub struct MemoryTableStore {
    table: Mutex<Option<ResultTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing table.
    pub fn with_table(table: ResultTable) -> Self {
        Self {
            table: Mutex::new(Some(table)),
        }
    }

    /// Snapshot of what has been saved.
    pub async fn snapshot(&self) -> Option<ResultTable> {
        self.table.lock().await.clone()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn load(&self, variables: &[String]) -> Result<ResultTable> {
        Ok(self
            .table
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| ResultTable::new(variables.to_vec())))
    }

    async fn recorded_months(&self) -> Result<BTreeMap<YearMonth, MonthCoverage>> {
        Ok(self
            .table
            .lock()
            .await
            .as_ref()
            .map(|t| t.months().map(|(m, c)| (*m, *c)).collect())
            .unwrap_or_default())
    }

    async fn save(&self, table: &ResultTable) -> Result<usize> {
        let mut stored = self.table.lock().await;
        let before = stored.as_ref().map(|t| t.months().count()).unwrap_or(0);
        let after = table.months().count();
        *stored = Some(table.clone());
        Ok(after.saturating_sub(before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MonthRows;

    fn vars() -> Vec<String> {
        vec!["Wind speed".to_string(), "Temperature".to_string()]
    }

    fn month(m: &str, n: usize) -> MonthRows {
        let rows = (0..n)
            .map(|i| ResultRow {
                time: format!("{}-01T06:00:00", m),
                year_month: m.parse().unwrap(),
                lat: 65.0 + i as f64,
                lon: -20.0,
                height_level: 100,
                values: vec![5.5, 271.0 + i as f64],
            })
            .collect::<Vec<_>>();
        MonthRows {
            month: m.parse().unwrap(),
            expected_locations: n,
            rows,
            gaps: 0,
            dropped: 0,
        }
    }

    #[tokio::test]
    async fn test_sqlite_save_and_load() {
        let store = SqliteTableStore::open_memory(&vars()).await.unwrap();
        let mut table = store.load(&vars()).await.unwrap();
        assert!(table.is_empty());

        table.append_month(month("2024-06", 2)).unwrap();
        assert_eq!(store.save(&table).await.unwrap(), 1);

        table.append_month(month("2024-07", 1)).unwrap();
        // Only the new month is written.
        assert_eq!(store.save(&table).await.unwrap(), 1);
        assert_eq!(store.save(&table).await.unwrap(), 0);

        let loaded = store.load(&vars()).await.unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.column("Temperature").unwrap(), vec![271.0, 272.0, 271.0]);
    }

    #[tokio::test]
    async fn test_sqlite_file_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.db");

        {
            let store = SqliteTableStore::open(&path, &vars()).await.unwrap();
            let mut table = ResultTable::new(vars());
            table.append_month(month("2024-06", 3)).unwrap();
            store.save(&table).await.unwrap();
        }

        let store = SqliteTableStore::open(&path, &vars()).await.unwrap();
        let recorded = store.recorded_months().await.unwrap();
        let june: YearMonth = "2024-06".parse().unwrap();
        assert_eq!(
            recorded.get(&june),
            Some(&MonthCoverage {
                expected_locations: 3,
                rows: 3
            })
        );
    }

    #[tokio::test]
    async fn test_sqlite_rejects_changed_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        SqliteTableStore::open(&path, &vars()).await.unwrap();

        let other = vec!["Pressure".to_string()];
        assert!(matches!(
            SqliteTableStore::open(&path, &other).await,
            Err(ResampleError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTableStore::new();
        let mut table = store.load(&vars()).await.unwrap();
        table.append_month(month("2024-06", 1)).unwrap();
        assert_eq!(store.save(&table).await.unwrap(), 1);
        assert_eq!(store.recorded_months().await.unwrap().len(), 1);
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }
}
