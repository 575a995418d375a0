//! Postgres warehouse backend
//!
//! Tables live in a per-profile schema. Data arrives as CSV text; typed
//! columns get explicit casts in the insert expressions so Postgres performs
//! the text-to-type conversion server side.

use crate::config::WarehouseConfig;
use crate::error::WarehouseError;
use crate::manifest::{ColumnType, SourceKind, KEY_COLUMN};
use crate::warehouse::{Row, TableChange, TableColumn, Warehouse};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};

pub struct PostgresWarehouse {
    pool: PgPool,
    schema: String,
    batch_size: usize,
}

impl PostgresWarehouse {
    pub async fn connect(
        config: &WarehouseConfig,
        schema: &str,
        batch_size: usize,
    ) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!(schema = %schema, "Connected to warehouse");

        Ok(Self {
            pool,
            schema: schema.to_string(),
            batch_size: batch_size.max(1),
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    /// Cast expressions for one row of placeholders starting at `offset`.
    fn insert_exprs(columns: &[TableColumn], offset: usize) -> String {
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let n = offset + i + 1;
                match col.column_type.kind {
                    SourceKind::Id | SourceKind::String => format!("${n}"),
                    _ => format!("CAST(${n} AS {})", col.column_type.warehouse_type()),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve the declared types of `columns` on `table`, in `columns` order.
    async fn column_snapshot(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<TableColumn>, WarehouseError> {
        let known = self
            .table_columns(table)
            .await?
            .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;

        columns
            .iter()
            .map(|name| {
                known
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| WarehouseError::NoSuchColumn {
                        table: table.to_string(),
                        column: name.clone(),
                    })
            })
            .collect()
    }

    async fn insert_batches(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        columns: &[TableColumn],
        rows: &[Row],
    ) -> Result<u64, WarehouseError> {
        let column_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut written = 0u64;

        for batch in rows.chunks(self.batch_size) {
            let values = batch
                .iter()
                .enumerate()
                .map(|(i, _)| format!("({})", Self::insert_exprs(columns, i * columns.len())))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = format!(
                "INSERT INTO {} ({column_list}) VALUES {values}",
                self.qualified(table)
            );

            let mut query = sqlx::query(&sql);
            for row in batch {
                for value in row {
                    query = query.bind(value.clone());
                }
            }

            let result = query.execute(&mut **tx).await?;
            written += result.rows_affected();
        }

        Ok(written)
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> Result<(), WarehouseError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn table_columns(
        &self,
        table: &str,
    ) -> Result<Option<Vec<TableColumn>>, WarehouseError> {
        let rows: Vec<(String, String, Option<i32>)> = sqlx::query_as(
            "SELECT column_name, data_type, character_maximum_length \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let columns = rows
            .into_iter()
            .map(|(name, data_type, max_length)| TableColumn {
                name,
                column_type: observed_type(&data_type, max_length),
            })
            .collect();

        Ok(Some(columns))
    }

    #[instrument(skip(self, changes))]
    async fn apply_table_changes(
        &self,
        table: &str,
        changes: &[TableChange],
    ) -> Result<(), WarehouseError> {
        let qualified = self.qualified(table);
        let mut tx = self.pool.begin().await?;

        for change in changes {
            let sql = match change {
                TableChange::CreateTable { columns } => {
                    let mut defs = columns
                        .iter()
                        .map(|c| {
                            format!("{} {}", quote_ident(&c.name), c.column_type.warehouse_type())
                        })
                        .collect::<Vec<_>>();
                    if columns.iter().any(|c| c.name == KEY_COLUMN) {
                        defs.push(format!("PRIMARY KEY ({})", quote_ident(KEY_COLUMN)));
                    }
                    format!(
                        "CREATE TABLE IF NOT EXISTS {qualified} ({})",
                        defs.join(", ")
                    )
                },
                TableChange::AddColumn { column } => format!(
                    "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS {} {}",
                    quote_ident(&column.name),
                    column.column_type.warehouse_type()
                ),
                TableChange::DropColumn { column } => format!(
                    "ALTER TABLE {qualified} DROP COLUMN IF EXISTS {}",
                    quote_ident(column)
                ),
                TableChange::RenameColumn { from, to } => format!(
                    "ALTER TABLE {qualified} RENAME COLUMN {} TO {}",
                    quote_ident(from),
                    quote_ident(to)
                ),
                TableChange::AlterColumnType {
                    column,
                    column_type,
                } => {
                    let col = quote_ident(column);
                    let ty = column_type.warehouse_type();
                    format!(
                        "ALTER TABLE {qualified} ALTER COLUMN {col} TYPE {ty} USING {col}::{ty}"
                    )
                },
            };

            debug!(table = %table, sql = %sql, "Applying schema change");
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, columns, rows))]
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64, WarehouseError> {
        let snapshot = self.column_snapshot(table, columns).await?;
        let mut tx = self.pool.begin().await?;

        let truncate = format!("TRUNCATE TABLE {}", self.qualified(table));
        sqlx::query(&truncate).execute(&mut *tx).await?;

        let written = self.insert_batches(&mut tx, table, &snapshot, rows).await?;
        tx.commit().await?;

        info!(table = %table, rows = written, "Table contents replaced");
        Ok(written)
    }

    #[instrument(skip(self, columns, rows))]
    async fn merge_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &str,
    ) -> Result<u64, WarehouseError> {
        let snapshot = self.column_snapshot(table, columns).await?;
        let key_index = columns
            .iter()
            .position(|c| c == key)
            .ok_or_else(|| WarehouseError::NoSuchColumn {
                table: table.to_string(),
                column: key.to_string(),
            })?;

        let mut tx = self.pool.begin().await?;

        // Delete-then-insert merge: idempotent by key without requiring an
        // upsert conflict target.
        let keys: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get(key_index).cloned().flatten())
            .collect();

        let delete = format!(
            "DELETE FROM {} WHERE {} = ANY($1)",
            self.qualified(table),
            quote_ident(key)
        );
        sqlx::query(&delete).bind(&keys).execute(&mut *tx).await?;

        let written = self.insert_batches(&mut tx, table, &snapshot, rows).await?;
        tx.commit().await?;

        info!(table = %table, rows = written, "Rows merged");
        Ok(written)
    }

    #[instrument(skip(self, keys))]
    async fn delete_rows(
        &self,
        table: &str,
        key: &str,
        keys: &[String],
    ) -> Result<u64, WarehouseError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ANY($1)",
            self.qualified(table),
            quote_ident(key)
        );

        let mut deleted = 0u64;
        for batch in keys.chunks(self.batch_size) {
            let result = sqlx::query(&sql)
                .bind(batch.to_vec())
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }

        debug!(table = %table, deleted, "Rows deleted");
        Ok(deleted)
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map an information_schema type back into the source type space. Tables
/// here are created by this pipeline, so only its own mappings appear;
/// anything unexpected is treated as a string.
fn observed_type(data_type: &str, max_length: Option<i32>) -> ColumnType {
    let length = max_length.and_then(|l| u32::try_from(l).ok());
    match data_type {
        "numeric" => ColumnType::new(SourceKind::Number, None),
        "boolean" => ColumnType::new(SourceKind::Boolean, None),
        "date" => ColumnType::new(SourceKind::Date, None),
        "timestamp with time zone" => ColumnType::new(SourceKind::Datetime, None),
        _ => ColumnType::new(SourceKind::String, length),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("account"), "\"account\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_observed_type_round_trips_pipeline_types() {
        assert_eq!(
            observed_type("character varying", Some(40)).warehouse_type(),
            "VARCHAR(40)"
        );
        assert_eq!(observed_type("numeric", None).warehouse_type(), "NUMERIC");
        assert_eq!(
            observed_type("timestamp with time zone", None).warehouse_type(),
            "TIMESTAMPTZ"
        );
    }

    #[test]
    fn test_insert_exprs_cast_typed_columns() {
        let columns = vec![
            TableColumn {
                name: "id".to_string(),
                column_type: ColumnType::new(SourceKind::Id, Some(40)),
            },
            TableColumn {
                name: "amount".to_string(),
                column_type: ColumnType::new(SourceKind::Number, None),
            },
        ];

        let exprs = PostgresWarehouse::insert_exprs(&columns, 0);
        assert_eq!(exprs, "$1, CAST($2 AS NUMERIC)");

        let offset = PostgresWarehouse::insert_exprs(&columns, 2);
        assert_eq!(offset, "$3, CAST($4 AS NUMERIC)");
    }
}
