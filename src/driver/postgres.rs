//! PostgreSQL driver
//!
//! Table and column names are used as given (quoted). Rows are exchanged with
//! the database as `jsonb` documents, see [`crate::sql::statement`].

use std::str::FromStr;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{LevelFilter, debug, info};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool, Postgres, Row as _};

use crate::config::PostgresConfig;
use crate::driver::{Driver, RowCallback, RowCallbackSync};
use crate::error::{MapperError, Result};
use crate::filter::{self, Filter};
use crate::query::{ExtraOptions, HINT_OPTION, Query};
use crate::sql::{SqlParam, Statement};
use crate::update::Update;
use crate::value::{Number, Row, Value, row_from_json};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Driver backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    /// Connect using the given configuration
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        let level = if config.log_statements {
            LevelFilter::Debug
        } else {
            LevelFilter::Off
        };
        let options = PgConnectOptions::from_str(&config.database_url)?.log_statements(level);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                MapperError::Driver(crate::error::DriverError::Backend(format!(
                    "Database connection failed: {}",
                    e
                )))
            })?;

        info!(
            "event=driver_connected module=driver driver=postgres max_connections={}",
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// Create a driver from an existing pool
    ///
    /// Use this when you already have a connection pool and want to
    /// share it with the mapper.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, stmt: &Statement) -> Result<Vec<Row>> {
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let result = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    fn select(table: &str, query: &Query) -> Result<Statement> {
        if let Some(hint) = query.options.extra.get(HINT_OPTION) {
            debug!(
                "event=hint_ignored module=driver driver=postgres table={} hint={}",
                table,
                hint.to_json()
            );
        }
        Statement::select(table, query).map_err(MapperError::invalid_condition)
    }
}

fn bind_params<'q>(mut query: PgQuery<'q>, params: &'q [SqlParam]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            SqlParam::Json(value) => query.bind(value),
            SqlParam::Text(text) => query.bind(text.as_str()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Row> {
    let document: serde_json::Value = row.try_get("row")?;
    row_from_json(document)
}

/// Unique violations surface as duplicate-key errors; everything else is
/// passed through as the underlying sqlx error.
fn map_sqlx_error(err: sqlx::Error) -> MapperError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return MapperError::duplicate_key(db.message().to_string());
        }
    }
    err.into()
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn find_by_key(&self, table: &str, key_field: &str, key: &Value) -> Result<Option<Row>> {
        let stmt = Statement::select_by_key(table, key_field, key)
            .map_err(MapperError::invalid_condition)?;
        Ok(self.fetch_rows(&stmt).await?.into_iter().next())
    }

    async fn find(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        let stmt = Self::select(table, query)?;
        self.fetch_rows(&stmt).await
    }

    async fn find_stream(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallback<'_>,
    ) -> Result<()> {
        let stmt = Self::select(table, query)?;
        let mut rows = bind_params(sqlx::query(&stmt.sql), &stmt.params).fetch(&self.pool);
        while let Some(row) = rows.try_next().await.map_err(map_sqlx_error)? {
            on_row(decode_row(&row)?).await?;
        }
        Ok(())
    }

    async fn find_stream_sync(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallbackSync<'_>,
    ) -> Result<()> {
        let stmt = Self::select(table, query)?;
        let mut rows = bind_params(sqlx::query(&stmt.sql), &stmt.params).fetch(&self.pool);
        while let Some(row) = rows.try_next().await.map_err(map_sqlx_error)? {
            on_row(decode_row(&row)?)?;
        }
        Ok(())
    }

    async fn count(&self, table: &str, filter: &Filter, _extra: &ExtraOptions) -> Result<u64> {
        let stmt = Statement::count(table, filter).map_err(MapperError::invalid_condition)?;
        let row = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn sum(
        &self,
        table: &str,
        filter: &Filter,
        _key_field: Option<&str>,
        field: &str,
    ) -> Result<f64> {
        let stmt = Statement::sum(table, filter, field).map_err(MapperError::invalid_condition)?;
        let row = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.try_get::<f64, _>(0)?)
    }

    async fn insert(&self, table: &str, row: &Row, key_field: Option<&str>) -> Result<Option<Value>> {
        let stmt = Statement::insert(table, row, key_field);
        let Some(key_field) = key_field else {
            self.execute(&stmt).await?;
            return Ok(None);
        };

        let returned = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let key: Option<serde_json::Value> = returned.try_get("key")?;

        let supplied = row.get(key_field).is_some_and(|v| !v.is_null());
        if supplied {
            return Ok(None);
        }
        Ok(key.map(Value::from).filter(|k| !k.is_null()))
    }

    async fn batch_insert(
        &self,
        table: &str,
        rows: &[Row],
        key_field: Option<&str>,
    ) -> Result<Vec<Option<Value>>> {
        let supplied = |row: &Row| key_field.is_none_or(|k| row.get(k).is_some_and(|v| !v.is_null()));
        let Some(key_field) = key_field.filter(|_| !rows.iter().all(supplied)) else {
            if let Some(stmt) = Statement::batch_insert(table, rows) {
                self.execute(&stmt).await?;
            }
            return Ok(vec![None; rows.len()]);
        };

        // rows without a key are inserted one by one to read back their
        // generated key; runs of keyed rows share a statement
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut generated = Vec::with_capacity(rows.len());
        let mut start = 0;
        while start < rows.len() {
            if supplied(&rows[start]) {
                let end = rows[start..]
                    .iter()
                    .position(|row| !supplied(row))
                    .map_or(rows.len(), |offset| start + offset);
                if let Some(stmt) = Statement::batch_insert(table, &rows[start..end]) {
                    bind_params(sqlx::query(&stmt.sql), &stmt.params)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
                generated.extend(std::iter::repeat_n(None, end - start));
                start = end;
            } else {
                let stmt = Statement::insert(table, &rows[start], Some(key_field));
                let returned = bind_params(sqlx::query(&stmt.sql), &stmt.params)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                let key: Option<serde_json::Value> = returned.try_get("key")?;
                generated.push(key.map(Value::from).filter(|k| !k.is_null()));
                start += 1;
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(generated)
    }

    async fn update(&self, table: &str, key_field: &str, key: &Value, changes: &Update) -> Result<u64> {
        self.update_many(table, &filter::equals(key_field, key.clone()), changes)
            .await
    }

    async fn update_many(&self, table: &str, filter: &Filter, changes: &Update) -> Result<u64> {
        match Statement::update(table, filter, changes).map_err(MapperError::invalid_condition)? {
            Some(stmt) => self.execute(&stmt).await,
            None => self.count(table, filter, &ExtraOptions::new()).await,
        }
    }

    async fn delete(&self, table: &str, key_field: &str, key: &Value) -> Result<bool> {
        let affected = self
            .delete_many(table, &filter::equals(key_field, key.clone()))
            .await?;
        Ok(affected > 0)
    }

    async fn delete_many(&self, table: &str, filter: &Filter) -> Result<u64> {
        let stmt = Statement::delete(table, filter).map_err(MapperError::invalid_condition)?;
        self.execute(&stmt).await
    }

    async fn increment(
        &self,
        table: &str,
        key_field: &str,
        key: &Value,
        field: &str,
        amount: Number,
    ) -> Result<()> {
        let changes = Update::new().increment(field, amount);
        let affected = self.update(table, key_field, key, &changes).await?;
        if affected == 0 {
            debug!("event=increment_missed module=driver driver=postgres table={table} field={field}");
        }
        Ok(())
    }
}
