//! Storage driver contract
//!
//! Every backend implements [`Driver`]. The mapper core only routes calls to
//! it; how rows are physically stored, filtered and ordered is entirely the
//! driver's concern.
//!
//! Conventions shared by all drivers:
//! - an `any()` filter matches every row
//! - `skip`/`limit` of `None` mean no skip and no limit
//! - no `order` means driver order, which must be stable for a fixed dataset
//! - a projection of `None` returns all fields

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::filter::Filter;
use crate::query::{ExtraOptions, Query};
use crate::update::Update;
use crate::value::{Number, Row, Value};

pub mod eval;
pub mod memory;
pub mod postgres;

pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;

/// Per-row asynchronous handler for streamed finds.
///
/// The driver awaits the returned future before producing the next row.
pub type RowCallback<'c> = dyn FnMut(Row) -> BoxFuture<'c, Result<()>> + Send + 'c;

/// Per-row synchronous handler for streamed finds
pub type RowCallbackSync<'c> = dyn FnMut(Row) -> Result<()> + Send + 'c;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Fetch the row whose `key_field` equals `key`
    async fn find_by_key(&self, table: &str, key_field: &str, key: &Value) -> Result<Option<Row>>;

    async fn find(&self, table: &str, query: &Query) -> Result<Vec<Row>>;

    /// Deliver matching rows one at a time, awaiting each callback in turn
    async fn find_stream(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallback<'_>,
    ) -> Result<()>;

    async fn find_stream_sync(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallbackSync<'_>,
    ) -> Result<()>;

    async fn count(&self, table: &str, filter: &Filter, extra: &ExtraOptions) -> Result<u64>;

    /// Sum `field` over matching rows. `key_field` is the table's primary key
    /// when one is configured.
    async fn sum(
        &self,
        table: &str,
        filter: &Filter,
        key_field: Option<&str>,
        field: &str,
    ) -> Result<f64>;

    /// Insert a row. Returns the key value when the driver generated one.
    async fn insert(&self, table: &str, row: &Row, key_field: Option<&str>) -> Result<Option<Value>>;

    /// Insert all rows or none. With a `key_field`, rows go through the same
    /// key handling as [`Driver::insert`]; the result holds, per row, the key
    /// the driver generated for it.
    async fn batch_insert(
        &self,
        table: &str,
        rows: &[Row],
        key_field: Option<&str>,
    ) -> Result<Vec<Option<Value>>>;

    /// Update the row identified by `key`. Returns the number of affected rows.
    async fn update(&self, table: &str, key_field: &str, key: &Value, changes: &Update) -> Result<u64>;

    async fn update_many(&self, table: &str, filter: &Filter, changes: &Update) -> Result<u64>;

    /// Returns whether a row was removed
    async fn delete(&self, table: &str, key_field: &str, key: &Value) -> Result<bool>;

    async fn delete_many(&self, table: &str, filter: &Filter) -> Result<u64>;

    /// Atomically add `amount` to `field` of the row identified by `key`
    async fn increment(
        &self,
        table: &str,
        key_field: &str,
        key: &Value,
        field: &str,
        amount: Number,
    ) -> Result<()>;
}
