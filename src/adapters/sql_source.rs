//! Relational source backed by `sqlx`, or by `tiberius` for SQL Server.
//!
//! Tables come from the database's own catalog (SQL Server and PostgreSQL:
//! base tables from `INFORMATION_SCHEMA`; SQLite: user tables). Rows are read
//! with every column cast to text, so the exporter never needs per-type
//! handling.

use crate::adapters::sql_server;
use crate::config::SourceKind;
use crate::domain::model::{ConnectionProfile, Row, TableDescriptor};
use crate::domain::ports::{RowStream, SourceDatabase};
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use std::time::Duration;
use tokio::sync::mpsc;

/// Rows buffered between the reader task and the exporter.
const ROW_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_PG_PORT: u16 = 5432;

#[derive(Clone)]
enum SourcePool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
    /// Holds credentials, so never printed.
    SqlServer(tiberius::Config),
}

impl std::fmt::Debug for SourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourcePool::Postgres(pool) => f.debug_tuple("Postgres").field(pool).finish(),
            SourcePool::Sqlite(pool) => f.debug_tuple("Sqlite").field(pool).finish(),
            SourcePool::SqlServer(_) => f.write_str("SqlServer"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlSource {
    pool: SourcePool,
}

impl SqlSource {
    pub async fn connect(kind: SourceKind, profile: &ConnectionProfile) -> Result<Self> {
        let connection_error = |e: sqlx::Error| TransferError::ConnectionError {
            message: format!(
                "cannot reach database '{}' on '{}': {}",
                profile.database, profile.server, e
            ),
        };

        let pool = match kind {
            SourceKind::SqlServer => {
                let (host, port) = split_host_port(&profile.server, sql_server::DEFAULT_PORT)?;
                let config = sql_server::config(profile, host, port);
                // 先連一次確認帳密與網路
                sql_server::connect(&config).await.map_err(|e| {
                    TransferError::ConnectionError {
                        message: format!(
                            "cannot reach database '{}' on '{}': {}",
                            profile.database, profile.server, e
                        ),
                    }
                })?;
                SourcePool::SqlServer(config)
            }
            SourceKind::Postgres => {
                let (host, port) = split_host_port(&profile.server, DEFAULT_PG_PORT)?;
                let options = PgConnectOptions::new()
                    .host(host)
                    .port(port)
                    .username(&profile.username)
                    .password(&profile.password)
                    .database(&profile.database);
                let pool = PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_with(options)
                    .await
                    .map_err(connection_error)?;
                SourcePool::Postgres(pool)
            }
            SourceKind::Sqlite => {
                let options = SqliteConnectOptions::new()
                    .filename(&profile.database)
                    .read_only(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(2)
                    .connect_with(options)
                    .await
                    .map_err(connection_error)?;
                SourcePool::Sqlite(pool)
            }
        };

        tracing::info!("Connected to {:?} source '{}'", kind, profile.database);
        Ok(Self { pool })
    }

    pub fn from_sqlite_pool(pool: SqlitePool) -> Self {
        Self {
            pool: SourcePool::Sqlite(pool),
        }
    }

    async fn table_names(&self) -> std::result::Result<Vec<String>, String> {
        let names: std::result::Result<Vec<String>, sqlx::Error> = match &self.pool {
            SourcePool::Postgres(pool) => {
                sqlx::query_scalar(
                    "SELECT table_name::text FROM information_schema.tables \
                     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .fetch_all(pool)
                .await
            }
            SourcePool::Sqlite(pool) => {
                sqlx::query_scalar(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(pool)
                .await
            }
            SourcePool::SqlServer(config) => {
                let mut client = sql_server::connect(config).await?;
                return sql_server::table_names(&mut client)
                    .await
                    .map_err(|e| e.to_string());
            }
        };
        names.map_err(|e| e.to_string())
    }

    async fn column_names(&self, table: &str) -> std::result::Result<Vec<String>, String> {
        let names: std::result::Result<Vec<String>, sqlx::Error> = match &self.pool {
            SourcePool::Postgres(pool) => {
                sqlx::query_scalar(
                    "SELECT column_name::text FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = $1 \
                     ORDER BY ordinal_position",
                )
                .bind(table)
                .fetch_all(pool)
                .await
            }
            SourcePool::Sqlite(pool) => {
                sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
                    .bind(table)
                    .fetch_all(pool)
                    .await
            }
            SourcePool::SqlServer(config) => {
                let mut client = sql_server::connect(config).await?;
                return sql_server::column_names(&mut client, table)
                    .await
                    .map_err(|e| e.to_string());
            }
        };
        names.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SourceDatabase for SqlSource {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let schema_error = |message: String| TransferError::SchemaQueryError { message };

        let names = self.table_names().await.map_err(schema_error)?;
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.column_names(&name).await.map_err(schema_error)?;
            tables.push(TableDescriptor { name, columns });
        }
        Ok(tables)
    }

    async fn stream_rows(&self, table: &TableDescriptor) -> Result<RowStream> {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        if table.columns.is_empty() {
            return Ok(rx);
        }

        let table_name = table.name.clone();
        match self.pool.clone() {
            SourcePool::Postgres(pool) => {
                let sql = select_as_text(table);
                tokio::spawn(async move {
                    let rows = sqlx::query(&sql)
                        .fetch(&pool)
                        .map(|row| row.and_then(|row| decode_row(&row)))
                        .boxed();
                    forward_rows(rows, &table_name, &tx).await;
                });
            }
            SourcePool::Sqlite(pool) => {
                let sql = select_as_text(table);
                tokio::spawn(async move {
                    let rows = sqlx::query(&sql)
                        .fetch(&pool)
                        .map(|row| row.and_then(|row| decode_row(&row)))
                        .boxed();
                    forward_rows(rows, &table_name, &tx).await;
                });
            }
            SourcePool::SqlServer(config) => {
                tokio::spawn(sql_server::forward_rows(config, table.clone(), tx));
            }
        }

        Ok(rx)
    }
}

/// Sends each decoded row to `tx`. Stops after the first error, or as soon
/// as the receiver is gone because the exporter stopped reading.
pub(crate) async fn forward_rows<E: std::fmt::Display>(
    mut rows: BoxStream<'_, std::result::Result<Row, E>>,
    table: &str,
    tx: &mpsc::Sender<Result<Row>>,
) {
    while let Some(next) = rows.next().await {
        let failed = next.is_err();
        let item = next.map_err(|e| TransferError::export(table, e));
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

fn decode_row<R>(row: &R) -> std::result::Result<Row, sqlx::Error>
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> Option<String>: sqlx::Decode<'r, R::Database>,
{
    (0..row.len())
        .map(|index| row.try_get_unchecked::<Option<String>, _>(index))
        .collect()
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_as_text(table: &TableDescriptor) -> String {
    let columns = table
        .columns
        .iter()
        .map(|column| format!("CAST({} AS TEXT)", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", columns, quote_identifier(&table.name))
}

/// `host`, `host:port`, or the SQL Server style `host,port`.
fn split_host_port(server: &str, default_port: u16) -> Result<(&str, u16)> {
    match server.rsplit_once([':', ',']) {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| TransferError::InvalidConfigValueError {
                    field: "server".to_string(),
                    value: server.to_string(),
                    reason: "port must be a number between 1 and 65535".to_string(),
                })?;
            Ok((host, port))
        }
        _ => Ok((server, default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded_database(dir: &TempDir) -> String {
        let path = dir.path().join("source.db");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query("CREATE TABLE Customers (id INTEGER PRIMARY KEY, name TEXT, balance REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE Orders (order_id INTEGER, note TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO Customers (id, name, balance) VALUES \
             (1, 'Ada, Countess', 10.5), (2, 'Quote \"Q\"', NULL), (3, 'multi\nline', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        path.to_string_lossy().into_owned()
    }

    fn profile(database: String) -> ConnectionProfile {
        ConnectionProfile {
            server: "localhost".to_string(),
            database,
            username: "etl".to_string(),
            password: "unused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lists_tables_with_ordered_columns() {
        let dir = TempDir::new().unwrap();
        let source = SqlSource::connect(SourceKind::Sqlite, &profile(seeded_database(&dir).await))
            .await
            .unwrap();

        let tables = source.list_tables().await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"Customers"));
        assert!(names.contains(&"Orders"));

        let customers = tables.iter().find(|t| t.name == "Customers").unwrap();
        assert_eq!(customers.columns, vec!["id", "name", "balance"]);
    }

    #[tokio::test]
    async fn test_streams_rows_as_text() {
        let dir = TempDir::new().unwrap();
        let source = SqlSource::connect(SourceKind::Sqlite, &profile(seeded_database(&dir).await))
            .await
            .unwrap();
        let customers = TableDescriptor::new(
            "Customers",
            vec!["id".to_string(), "name".to_string(), "balance".to_string()],
        );

        let mut rows = source.stream_rows(&customers).await.unwrap();
        let mut collected = Vec::new();
        while let Some(row) = rows.recv().await {
            collected.push(row.unwrap());
        }

        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0][0].as_deref(), Some("1"));
        assert_eq!(collected[0][1].as_deref(), Some("Ada, Countess"));
        assert_eq!(collected[0][2].as_deref(), Some("10.5"));
        assert_eq!(collected[1][2], None);
        assert_eq!(collected[2][1].as_deref(), Some("multi\nline"));
    }

    #[tokio::test]
    async fn test_missing_database_file_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.db").to_string_lossy().into_owned();

        let err = SqlSource::connect(SourceKind::Sqlite, &profile(missing))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ConnectionError { .. }));
    }

    #[test]
    fn test_select_quotes_identifiers() {
        let table = TableDescriptor::new("Order \"Lines\"", vec!["qty".to_string()]);
        assert_eq!(
            select_as_text(&table),
            "SELECT CAST(\"qty\" AS TEXT) FROM \"Order \"\"Lines\"\"\""
        );
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("db.internal", 5432).unwrap(), ("db.internal", 5432));
        assert_eq!(split_host_port("db.internal:6543", 5432).unwrap(), ("db.internal", 6543));
        assert_eq!(split_host_port("sql01,1444", 1433).unwrap(), ("sql01", 1444));
        assert_eq!(split_host_port("sql01", 1433).unwrap(), ("sql01", 1433));
        assert!(split_host_port("db.internal:abc", 5432).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_sql_server_is_connection_error() {
        let mut unreachable = profile("sales".to_string());
        unreachable.server = "127.0.0.1,1".to_string();

        let err = SqlSource::connect(SourceKind::SqlServer, &unreachable)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ConnectionError { .. }));
    }
}
