//! Named sources and the access façade
//!
//! A [`SourceRegistry`] maps source names to drivers. [`DataAccess`] resolves
//! a name on every call and forwards the operation unchanged, so a missing
//! source is the only error raised at this layer. Every forwarded call is
//! logged at debug level, and failures at warn level.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::driver::{Driver, RowCallback, RowCallbackSync};
use crate::error::{MapperError, Result};
use crate::filter::Filter;
use crate::query::{ExtraOptions, Query};
use crate::update::Update;
use crate::value::{Number, Row, Value};

static GLOBAL_REGISTRY: Lazy<Arc<SourceRegistry>> = Lazy::new(|| Arc::new(SourceRegistry::new()));

/// A registered (name, driver) pair
#[derive(Clone)]
pub struct Source {
    name: String,
    driver: Arc<dyn Driver>,
}

impl Source {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Mapping from source name to driver
///
/// Entries are never removed; registering a name again replaces the driver.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<SourceRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register `driver` under `name`, returning the source it replaced
    pub fn register(&self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Option<Source> {
        let name = name.into();
        let source = Source {
            name: name.clone(),
            driver,
        };
        let previous = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), source);
        debug!(
            "event=source_register module=source status=ok name={} replaced={}",
            name,
            previous.is_some()
        );
        previous
    }

    pub fn get(&self, name: &str) -> Option<Source> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Register a driver in the process-wide registry
pub fn register_source(name: impl Into<String>, driver: Arc<dyn Driver>) -> Option<Source> {
    GLOBAL_REGISTRY.register(name, driver)
}

/// Stateless routing layer from source names to drivers
#[derive(Debug, Clone)]
pub struct DataAccess {
    registry: Arc<SourceRegistry>,
}

impl Default for DataAccess {
    fn default() -> Self {
        Self::global()
    }
}

fn logged<T>(op: &str, source: &str, table: &str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => debug!("event=driver_call module=access status=ok op={op} source={source} table={table}"),
        Err(err) => warn!(
            "event=driver_call module=access status=error op={op} source={source} table={table} error={err}"
        ),
    }
    result
}

impl DataAccess {
    /// Façade over the process-wide registry
    pub fn global() -> Self {
        Self::new(SourceRegistry::global())
    }

    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Look up the driver registered under `source`
    pub fn resolve(&self, source: &str) -> Result<Arc<dyn Driver>> {
        match self.registry.get(source) {
            Some(found) => Ok(Arc::clone(&found.driver)),
            None => {
                warn!("event=source_resolve module=access status=error source={source} error_code=source_not_found");
                Err(MapperError::source_not_found(source))
            }
        }
    }

    pub async fn find_by_key(
        &self,
        source: &str,
        table: &str,
        key_field: &str,
        key: &Value,
    ) -> Result<Option<Row>> {
        let driver = self.resolve(source)?;
        logged(
            "find_by_key",
            source,
            table,
            driver.find_by_key(table, key_field, key).await,
        )
    }

    pub async fn find(&self, source: &str, table: &str, query: &Query) -> Result<Vec<Row>> {
        let driver = self.resolve(source)?;
        logged("find", source, table, driver.find(table, query).await)
    }

    pub async fn find_stream(
        &self,
        source: &str,
        table: &str,
        query: &Query,
        on_row: &mut RowCallback<'_>,
    ) -> Result<()> {
        let driver = self.resolve(source)?;
        logged(
            "find_stream",
            source,
            table,
            driver.find_stream(table, query, on_row).await,
        )
    }

    pub async fn find_stream_sync(
        &self,
        source: &str,
        table: &str,
        query: &Query,
        on_row: &mut RowCallbackSync<'_>,
    ) -> Result<()> {
        let driver = self.resolve(source)?;
        logged(
            "find_stream_sync",
            source,
            table,
            driver.find_stream_sync(table, query, on_row).await,
        )
    }

    pub async fn count(
        &self,
        source: &str,
        table: &str,
        filter: &Filter,
        extra: &ExtraOptions,
    ) -> Result<u64> {
        let driver = self.resolve(source)?;
        logged("count", source, table, driver.count(table, filter, extra).await)
    }

    pub async fn sum(
        &self,
        source: &str,
        table: &str,
        filter: &Filter,
        key_field: Option<&str>,
        field: &str,
    ) -> Result<f64> {
        let driver = self.resolve(source)?;
        logged(
            "sum",
            source,
            table,
            driver.sum(table, filter, key_field, field).await,
        )
    }

    pub async fn insert(
        &self,
        source: &str,
        table: &str,
        row: &Row,
        key_field: Option<&str>,
    ) -> Result<Option<Value>> {
        let driver = self.resolve(source)?;
        logged("insert", source, table, driver.insert(table, row, key_field).await)
    }

    pub async fn batch_insert(
        &self,
        source: &str,
        table: &str,
        rows: &[Row],
        key_field: Option<&str>,
    ) -> Result<Vec<Option<Value>>> {
        let driver = self.resolve(source)?;
        logged(
            "batch_insert",
            source,
            table,
            driver.batch_insert(table, rows, key_field).await,
        )
    }

    pub async fn update(
        &self,
        source: &str,
        table: &str,
        key_field: &str,
        key: &Value,
        changes: &Update,
    ) -> Result<u64> {
        let driver = self.resolve(source)?;
        logged(
            "update",
            source,
            table,
            driver.update(table, key_field, key, changes).await,
        )
    }

    pub async fn update_many(
        &self,
        source: &str,
        table: &str,
        filter: &Filter,
        changes: &Update,
    ) -> Result<u64> {
        let driver = self.resolve(source)?;
        logged(
            "update_many",
            source,
            table,
            driver.update_many(table, filter, changes).await,
        )
    }

    pub async fn delete(
        &self,
        source: &str,
        table: &str,
        key_field: &str,
        key: &Value,
    ) -> Result<bool> {
        let driver = self.resolve(source)?;
        logged("delete", source, table, driver.delete(table, key_field, key).await)
    }

    pub async fn delete_many(&self, source: &str, table: &str, filter: &Filter) -> Result<u64> {
        let driver = self.resolve(source)?;
        logged("delete_many", source, table, driver.delete_many(table, filter).await)
    }

    pub async fn increment(
        &self,
        source: &str,
        table: &str,
        key_field: &str,
        key: &Value,
        field: &str,
        amount: Number,
    ) -> Result<()> {
        let driver = self.resolve(source)?;
        logged(
            "increment",
            source,
            table,
            driver.increment(table, key_field, key, field, amount).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::filter;

    fn memory() -> Arc<dyn Driver> {
        Arc::new(MemoryDriver::new())
    }

    // ==================== Registry ====================

    #[test]
    fn test_register_and_get() {
        let registry = SourceRegistry::new();
        assert!(registry.register("main", memory()).is_none());

        let source = registry.get("main").unwrap();
        assert_eq!(source.name(), "main");
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = SourceRegistry::new();
        let first = memory();
        let second = memory();
        registry.register("main", Arc::clone(&first));
        let replaced = registry.register("main", Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(replaced.driver(), &first));
        assert!(Arc::ptr_eq(registry.get("main").unwrap().driver(), &second));
        assert_eq!(registry.names(), vec!["main".to_string()]);
    }

    #[test]
    fn test_names_sorted() {
        let registry = SourceRegistry::new();
        registry.register("zeta", memory());
        registry.register("alpha", memory());
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let name = format!("global_{}", uuid::Uuid::new_v4().simple());
        register_source(name.clone(), memory());
        assert!(SourceRegistry::global().get(&name).is_some());
        assert!(DataAccess::global().resolve(&name).is_ok());
    }

    // ==================== Access Façade ====================

    #[tokio::test]
    async fn test_unknown_source() {
        let access = DataAccess::new(Arc::new(SourceRegistry::new()));
        let err = access
            .find("missing", "users", &Query::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::SourceNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_forwards_to_driver() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register("main", memory());
        let access = DataAccess::new(registry);

        let mut row = Row::new();
        row.insert("name".into(), Value::from("Ann"));
        let key = access.insert("main", "users", &row, Some("id")).await.unwrap();
        assert_eq!(key, Some(Value::Int(1)));

        let found = access
            .find_by_key("main", "users", "id", &Value::Int(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], Value::from("Ann"));
        assert_eq!(
            access
                .count("main", "users", &filter::any(), &ExtraOptions::new())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_driver_errors_pass_through() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register("main", memory());
        let access = DataAccess::new(registry);

        let err = access
            .count("main", "users", &filter::custom("1 = 1"), &ExtraOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MapperError::Driver(crate::error::DriverError::Unsupported(_))
        ));
    }
}
