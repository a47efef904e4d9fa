//! SQL Server access over TDS with `tiberius`.
//!
//! `sqlx` 0.8 no longer ships an MSSQL driver, so this backend keeps its own
//! connection handling. Every operation opens a fresh client: a row stream
//! owns its client for as long as the exporter reads from it.

use crate::domain::model::{ConnectionProfile, Row, TableDescriptor};
use crate::utils::error::{Result, TransferError};
use futures::stream::{BoxStream, StreamExt};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub(crate) const DEFAULT_PORT: u16 = 1433;

pub(crate) type SqlServerClient = Client<Compat<TcpStream>>;

pub(crate) fn config(profile: &ConnectionProfile, host: &str, port: u16) -> Config {
    let mut config = Config::new();
    config.host(host);
    config.port(port);
    config.database(&profile.database);
    config.authentication(AuthMethod::sql_server(&profile.username, &profile.password));
    // 內部網路常見自簽憑證
    config.trust_cert();
    config
}

pub(crate) async fn connect(config: &Config) -> std::result::Result<SqlServerClient, String> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| e.to_string())?;
    tcp.set_nodelay(true).map_err(|e| e.to_string())?;
    Client::connect(config.clone(), tcp.compat_write())
        .await
        .map_err(|e| e.to_string())
}

pub(crate) async fn table_names(client: &mut SqlServerClient) -> tiberius::Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
            &[],
        )
        .await?
        .into_first_result()
        .await?;
    first_column(&rows)
}

pub(crate) async fn column_names(
    client: &mut SqlServerClient,
    table: &str,
) -> tiberius::Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION",
            &[&table],
        )
        .await?
        .into_first_result()
        .await?;
    first_column(&rows)
}

fn first_column(rows: &[tiberius::Row]) -> tiberius::Result<Vec<String>> {
    rows.iter()
        .map(|row| -> tiberius::Result<String> {
            Ok(row.try_get::<&str, _>(0)?.unwrap_or_default().to_string())
        })
        .collect()
}

fn decode_row(row: tiberius::Row) -> tiberius::Result<Row> {
    (0..row.len())
        .map(|index| -> tiberius::Result<Option<String>> {
            Ok(row.try_get::<&str, _>(index)?.map(str::to_string))
        })
        .collect()
}

/// Reads `table` on a dedicated client and forwards each row to `tx` until
/// the table ends, a read fails or the receiver is dropped.
pub(crate) async fn forward_rows(
    config: Config,
    table: TableDescriptor,
    tx: tokio::sync::mpsc::Sender<Result<Row>>,
) {
    let mut client = match connect(&config).await {
        Ok(client) => client,
        Err(e) => {
            let _ = tx.send(Err(TransferError::export(&table.name, e))).await;
            return;
        }
    };

    let sql = select_as_nvarchar(&table);
    let rows: BoxStream<'_, tiberius::Result<Row>> = match client.query(sql, &[]).await {
        Ok(stream) => stream
            .into_row_stream()
            .map(|row| row.and_then(decode_row))
            .boxed(),
        Err(e) => {
            let _ = tx.send(Err(TransferError::export(&table.name, e))).await;
            return;
        }
    };
    super::sql_source::forward_rows(rows, &table.name, &tx).await;
}

fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Every column cast to `NVARCHAR(MAX)`, so rows decode as text.
pub(crate) fn select_as_nvarchar(table: &TableDescriptor) -> String {
    let columns = table
        .columns
        .iter()
        .map(|column| format!("CAST({} AS NVARCHAR(MAX))", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", columns, quote_identifier(&table.name))
}
