//! In-process driver
//!
//! Keeps tables as insertion-ordered row lists behind an async lock. Tables
//! are created on first write. Useful for tests and for embedding the mapper
//! without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use crate::driver::eval::{CompiledFilter, sort_order};
use crate::driver::{Driver, RowCallback, RowCallbackSync};
use crate::error::{MapperError, Result};
use crate::filter::Filter;
use crate::query::{ExtraOptions, Query};
use crate::update::Update;
use crate::value::{Number, Row, Value, deep_equals};

#[derive(Debug)]
struct Table {
    rows: Vec<Row>,
    next_key: i64,
    /// Key field named by the last keyed write, checked by bulk updates
    key_field: Option<String>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_key: 1,
            key_field: None,
        }
    }
}

impl Table {
    fn position(&self, key_field: &str, key: &Value) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(key_field).is_some_and(|v| deep_equals(v, key)))
    }

    fn observe_key(&mut self, key: &Value) {
        if let Some(i) = key.as_i64() {
            self.next_key = self.next_key.max(i.saturating_add(1));
        }
    }

    fn remember_key_field(&mut self, key_field: &str) {
        if self.key_field.as_deref() != Some(key_field) {
            self.key_field = Some(key_field.to_string());
        }
    }
}

/// Driver storing rows in process memory
#[derive(Debug, Default)]
pub struct MemoryDriver {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every row currently stored in `table`, in storage order
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        let matcher = CompiledFilter::compile(&query.filter)?;
        let mut rows: Vec<Row> = {
            let tables = self.tables.read().await;
            match tables.get(table) {
                Some(t) => t.rows.iter().filter(|r| matcher.matches(r)).cloned().collect(),
                None => return Ok(Vec::new()),
            }
        };

        if let Some(order) = &query.order {
            let field = order.field();
            rows.sort_by(|a, b| {
                let ordering = sort_order(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                if order.is_descending() {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(hint) = query.options.extra.get(crate::query::HINT_OPTION) {
            debug!(
                "event=hint_ignored module=driver driver=memory table={table} hint={}",
                hint.to_json()
            );
        }

        let skip = query.options.skip.map_or(0, |s| s as usize);
        let limit = query.options.limit.map_or(usize::MAX, |l| l as usize);
        let page = rows.into_iter().skip(skip).take(limit);

        Ok(match &query.options.fields {
            Some(fields) => page
                .map(|row| {
                    row.into_iter()
                        .filter(|(name, _)| fields.iter().any(|f| f == name))
                        .collect()
                })
                .collect(),
            None => page.collect(),
        })
    }
}

fn duplicate_key(key_field: &str, key: &Value) -> MapperError {
    MapperError::duplicate_key(format!("{key_field} = {}", key.to_json()))
}

fn has_key(row: &Row, key_field: &str, key: &Value) -> bool {
    row.get(key_field).is_some_and(|v| deep_equals(v, key))
}

fn check_unique(table: &Table, key_field: &str, key: &Value, skip_index: Option<usize>) -> Result<()> {
    if key.is_null() {
        return Ok(());
    }
    let clash = table
        .rows
        .iter()
        .enumerate()
        .any(|(i, row)| Some(i) != skip_index && has_key(row, key_field, key));
    if clash {
        return Err(duplicate_key(key_field, key));
    }
    Ok(())
}

/// Keys of staged replacements must stay unique against the untouched rows
/// and against each other.
fn check_staged_unique(table: &Table, key_field: &str, staged: &[(usize, Row)]) -> Result<()> {
    for (pos, (index, row)) in staged.iter().enumerate() {
        let Some(key) = row.get(key_field).filter(|k| !k.is_null()) else {
            continue;
        };
        let clash_untouched = table.rows.iter().enumerate().any(|(i, other)| {
            i != *index
                && !staged.iter().any(|(s, _)| *s == i)
                && has_key(other, key_field, key)
        });
        let clash_staged = staged[..pos]
            .iter()
            .any(|(_, other)| has_key(other, key_field, key));
        if clash_untouched || clash_staged {
            return Err(duplicate_key(key_field, key));
        }
    }
    Ok(())
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn find_by_key(&self, table: &str, key_field: &str, key: &Value) -> Result<Option<Row>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|t| t.position(key_field, key).map(|i| t.rows[i].clone())))
    }

    async fn find(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        self.select(table, query).await
    }

    async fn find_stream(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallback<'_>,
    ) -> Result<()> {
        // rows are snapshotted so callbacks may write back through this driver
        for row in self.select(table, query).await? {
            on_row(row).await?;
        }
        Ok(())
    }

    async fn find_stream_sync(
        &self,
        table: &str,
        query: &Query,
        on_row: &mut RowCallbackSync<'_>,
    ) -> Result<()> {
        for row in self.select(table, query).await? {
            on_row(row)?;
        }
        Ok(())
    }

    async fn count(&self, table: &str, filter: &Filter, _extra: &ExtraOptions) -> Result<u64> {
        let matcher = CompiledFilter::compile(filter)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map_or(0, |t| t.rows.iter().filter(|r| matcher.matches(r)).count() as u64))
    }

    async fn sum(
        &self,
        table: &str,
        filter: &Filter,
        _key_field: Option<&str>,
        field: &str,
    ) -> Result<f64> {
        let matcher = CompiledFilter::compile(filter)?;
        let tables = self.tables.read().await;
        Ok(tables.get(table).map_or(0.0, |t| {
            t.rows
                .iter()
                .filter(|r| matcher.matches(r))
                .filter_map(|r| r.get(field).and_then(Value::as_f64))
                .sum()
        }))
    }

    async fn insert(&self, table: &str, row: &Row, key_field: Option<&str>) -> Result<Option<Value>> {
        let mut tables = self.tables.write().await;
        let target = tables.entry(table.to_string()).or_insert_with(|| {
            debug!("event=table_created module=driver driver=memory table={table}");
            Table::default()
        });

        let mut stored = row.clone();
        let mut generated = None;
        if let Some(key_field) = key_field {
            target.remember_key_field(key_field);
            match row.get(key_field).filter(|v| !v.is_null()) {
                Some(key) => {
                    check_unique(target, key_field, key, None)?;
                    target.observe_key(key);
                }
                None => {
                    let key = Value::Int(target.next_key);
                    target.next_key += 1;
                    stored.insert(key_field.to_string(), key.clone());
                    generated = Some(key);
                }
            }
        }

        target.rows.push(stored);
        Ok(generated)
    }

    async fn batch_insert(
        &self,
        table: &str,
        rows: &[Row],
        key_field: Option<&str>,
    ) -> Result<Vec<Option<Value>>> {
        let mut tables = self.tables.write().await;
        let target = tables.entry(table.to_string()).or_insert_with(|| {
            debug!("event=table_created module=driver driver=memory table={table}");
            Table::default()
        });

        let Some(key_field) = key_field else {
            target.rows.extend(rows.iter().cloned());
            return Ok(vec![None; rows.len()]);
        };

        // nothing is stored until every row has a unique key
        let mut next_key = target.next_key;
        let mut staged: Vec<Row> = Vec::with_capacity(rows.len());
        let mut generated = Vec::with_capacity(rows.len());
        for row in rows {
            let mut stored = row.clone();
            match row.get(key_field).filter(|v| !v.is_null()) {
                Some(key) => {
                    check_unique(target, key_field, key, None)?;
                    if staged.iter().any(|other| has_key(other, key_field, key)) {
                        return Err(duplicate_key(key_field, key));
                    }
                    if let Some(i) = key.as_i64() {
                        next_key = next_key.max(i.saturating_add(1));
                    }
                    generated.push(None);
                }
                None => {
                    let key = Value::Int(next_key);
                    next_key += 1;
                    stored.insert(key_field.to_string(), key.clone());
                    generated.push(Some(key));
                }
            }
            staged.push(stored);
        }

        target.remember_key_field(key_field);
        target.next_key = next_key;
        target.rows.extend(staged);
        Ok(generated)
    }

    async fn update(&self, table: &str, key_field: &str, key: &Value, changes: &Update) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            return Ok(0);
        };
        target.remember_key_field(key_field);
        let Some(index) = target.position(key_field, key) else {
            return Ok(0);
        };

        let mut row = target.rows[index].clone();
        changes.apply(&mut row)?;
        if let Some(new_key) = row.get(key_field) {
            check_unique(target, key_field, new_key, Some(index))?;
            let new_key = new_key.clone();
            target.observe_key(&new_key);
        }
        target.rows[index] = row;
        Ok(1)
    }

    async fn update_many(&self, table: &str, filter: &Filter, changes: &Update) -> Result<u64> {
        let matcher = CompiledFilter::compile(filter)?;
        let mut tables = self.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            return Ok(0);
        };

        // stage every change first so a failing row leaves the table untouched
        let mut staged = Vec::new();
        for (index, row) in target.rows.iter().enumerate() {
            if matcher.matches(row) {
                let mut next = row.clone();
                changes.apply(&mut next)?;
                staged.push((index, next));
            }
        }

        if let Some(key_field) = target.key_field.clone() {
            check_staged_unique(target, &key_field, &staged)?;
            for (_, row) in &staged {
                if let Some(key) = row.get(&key_field) {
                    target.observe_key(key);
                }
            }
        }

        let affected = staged.len() as u64;
        for (index, row) in staged {
            target.rows[index] = row;
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, key_field: &str, key: &Value) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            return Ok(false);
        };
        match target.position(key_field, key) {
            Some(index) => {
                target.rows.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, table: &str, filter: &Filter) -> Result<u64> {
        let matcher = CompiledFilter::compile(filter)?;
        let mut tables = self.tables.write().await;
        let Some(target) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = target.rows.len();
        target.rows.retain(|row| !matcher.matches(row));
        Ok((before - target.rows.len()) as u64)
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
        if self.update(table, key_field, key, &changes).await? == 0 {
            debug!(
                "event=increment_missed module=driver driver=memory table={table} field={field}"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter;
    use crate::query::{OrderBy, SelectOptions};

    fn row(name: &str, age: i64) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row.insert("age".into(), Value::Int(age));
        row
    }

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        for (name, age) in [("Ann", 30), ("Bob", 25), ("Cid", 41), ("Dee", 19)] {
            driver.insert("people", &row(name, age), Some("id")).await.unwrap();
        }
        driver
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    // ==================== Insert ====================

    #[tokio::test]
    async fn test_insert_generates_sequential_keys() {
        let driver = MemoryDriver::new();
        let first = driver.insert("t", &row("a", 1), Some("id")).await.unwrap();
        let second = driver.insert("t", &row("b", 2), Some("id")).await.unwrap();
        assert_eq!(first, Some(Value::Int(1)));
        assert_eq!(second, Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn test_insert_with_explicit_key_and_duplicate() {
        let driver = MemoryDriver::new();
        let mut explicit = row("a", 1);
        explicit.insert("id".into(), Value::Int(10));

        assert_eq!(driver.insert("t", &explicit, Some("id")).await.unwrap(), None);
        let err = driver.insert("t", &explicit, Some("id")).await.unwrap_err();
        assert!(matches!(
            err,
            MapperError::Driver(crate::error::DriverError::DuplicateKey(_))
        ));
        // generated keys continue above explicit ones
        assert_eq!(
            driver.insert("t", &row("b", 2), Some("id")).await.unwrap(),
            Some(Value::Int(11))
        );
        assert_eq!(driver.rows("t").await.len(), 2);
    }

    fn keyed(name: &str, id: i64) -> Row {
        let mut keyed = row(name, 0);
        keyed.insert("id".into(), Value::Int(id));
        keyed
    }

    #[tokio::test]
    async fn test_batch_insert_generates_and_observes_keys() {
        let driver = MemoryDriver::new();
        let generated = driver
            .batch_insert("t", &[keyed("a", 1), row("b", 2), keyed("c", 5)], Some("id"))
            .await
            .unwrap();
        assert_eq!(generated, vec![None, Some(Value::Int(2)), None]);

        // the next generated key continues above the batch
        assert_eq!(
            driver.insert("t", &row("d", 3), Some("id")).await.unwrap(),
            Some(Value::Int(6))
        );
        let ids: Vec<Value> = driver
            .rows("t")
            .await
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(5), Value::Int(6)]);
    }

    #[tokio::test]
    async fn test_batch_insert_rejects_duplicates_atomically() {
        let driver = MemoryDriver::new();
        driver.insert("t", &keyed("a", 1), Some("id")).await.unwrap();

        let err = driver
            .batch_insert("t", &[keyed("b", 2), keyed("c", 1)], Some("id"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MapperError::Driver(crate::error::DriverError::DuplicateKey(_))
        ));

        let err = driver
            .batch_insert("t", &[keyed("b", 3), keyed("c", 3)], Some("id"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MapperError::Driver(crate::error::DriverError::DuplicateKey(_))
        ));

        assert_eq!(names(&driver.rows("t").await), vec!["a"]);
        assert_eq!(
            driver.insert("t", &row("d", 0), Some("id")).await.unwrap(),
            Some(Value::Int(2))
        );
    }

    #[tokio::test]
    async fn test_batch_insert_without_key_field() {
        let driver = MemoryDriver::new();
        let generated = driver
            .batch_insert("t", &[row("a", 1), row("b", 2)], None)
            .await
            .unwrap();
        assert_eq!(generated, vec![None, None]);
        assert!(driver.rows("t").await.iter().all(|r| !r.contains_key("id")));
    }

    // ==================== Find ====================

    #[tokio::test]
    async fn test_find_missing_table_is_empty() {
        let driver = MemoryDriver::new();
        let rows = driver.find("nothing", &Query::default()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(
            driver.find_by_key("nothing", "id", &Value::Int(1)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_find_orders_and_paginates() {
        let driver = seeded().await;
        let query = Query::new(filter::any()).with_order(Some(OrderBy::desc("age")));
        let all = driver.find("people", &query).await.unwrap();
        assert_eq!(names(&all), ["Cid", "Ann", "Bob", "Dee"]);

        let page = driver
            .find(
                "people",
                &query.with_options(SelectOptions::new().with_pagination(2, 2)),
            )
            .await
            .unwrap();
        assert_eq!(names(&page), ["Bob", "Dee"]);
    }

    #[tokio::test]
    async fn test_find_without_order_keeps_insertion_order() {
        let driver = seeded().await;
        let rows = driver
            .find("people", &Query::new(filter::greater_than("age", 20)))
            .await
            .unwrap();
        assert_eq!(names(&rows), ["Ann", "Bob", "Cid"]);
    }

    #[tokio::test]
    async fn test_projection() {
        let driver = seeded().await;
        let query = Query::new(filter::equals("name", "Ann"))
            .with_options(SelectOptions::new().with_fields(["name"]));
        let rows = driver.find("people", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 1);
        assert!(rows[0].contains_key("name"));
    }

    #[tokio::test]
    async fn test_stream_stops_on_callback_error() {
        let driver = seeded().await;
        let mut seen = 0;
        let mut on_row = |_row: Row| -> Result<()> {
            seen += 1;
            if seen == 2 {
                return Err(MapperError::conversion("stop"));
            }
            Ok(())
        };
        let err = driver
            .find_stream_sync("people", &Query::default(), &mut on_row)
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::Conversion(_)));
        assert_eq!(seen, 2);
    }

    // ==================== Aggregates ====================

    #[tokio::test]
    async fn test_count_and_sum() {
        let driver = seeded().await;
        let adults = filter::greater_than_or_equal("age", 21);
        assert_eq!(
            driver.count("people", &adults, &ExtraOptions::new()).await.unwrap(),
            3
        );
        assert_eq!(
            driver.sum("people", &adults, Some("id"), "age").await.unwrap(),
            96.0
        );
    }

    // ==================== Updates and Deletes ====================

    #[tokio::test]
    async fn test_update_many_is_all_or_nothing() {
        let driver = seeded().await;
        let mut odd = row("Eve", 50);
        odd.insert("age".into(), Value::from("fifty"));
        driver.insert("people", &odd, Some("id")).await.unwrap();

        let err = driver
            .update_many("people", &filter::any(), &Update::new().increment("age", 1))
            .await
            .unwrap_err();
        assert!(err.is_driver_failure());

        let ages: Vec<Value> = driver
            .rows("people")
            .await
            .into_iter()
            .map(|r| r["age"].clone())
            .collect();
        assert_eq!(ages[0], Value::Int(30));
    }

    #[tokio::test]
    async fn test_keyed_update_rejects_key_collision() {
        let driver = seeded().await;
        let err = driver
            .update("people", "id", &Value::Int(1), &Update::new().set("id", 2))
            .await
            .unwrap_err();
        assert!(err.is_driver_failure());
        assert_eq!(
            driver
                .update("people", "id", &Value::Int(99), &Update::new().set("age", 1))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_many_rejects_key_collision() {
        let driver = seeded().await;

        // moving Bob onto Ann's key
        let err = driver
            .update_many(
                "people",
                &filter::equals("name", "Bob"),
                &Update::new().set("id", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MapperError::Driver(crate::error::DriverError::DuplicateKey(_))
        ));

        // two staged rows landing on the same fresh key
        let err = driver
            .update_many(
                "people",
                &filter::is_in("name", ["Cid", "Dee"]),
                &Update::new().set("id", 50),
            )
            .await
            .unwrap_err();
        assert!(err.is_driver_failure());

        let ids: Vec<Value> = driver
            .rows("people")
            .await
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);

        // a key moving to an unused value is fine and raises the next generated key
        assert_eq!(
            driver
                .update_many(
                    "people",
                    &filter::equals("name", "Dee"),
                    &Update::new().set("id", 20),
                )
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            driver.insert("people", &row("Eve", 22), Some("id")).await.unwrap(),
            Some(Value::Int(21))
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let driver = seeded().await;
        assert!(driver.delete("people", "id", &Value::Int(1)).await.unwrap());
        assert!(!driver.delete("people", "id", &Value::Int(1)).await.unwrap());
        assert_eq!(
            driver
                .delete_many("people", &filter::less_than("age", 30))
                .await
                .unwrap(),
            2
        );
        assert_eq!(names(&driver.rows("people").await), ["Cid"]);
    }

    #[tokio::test]
    async fn test_increment() {
        let driver = seeded().await;
        driver
            .increment("people", "id", &Value::Int(2), "age", Number::Int(-5))
            .await
            .unwrap();
        let bob = driver
            .find_by_key("people", "id", &Value::Int(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob["age"], Value::Int(20));
    }
}
