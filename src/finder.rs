//! Typed multi-row queries and bulk mutations for one entity type
//!
//! A [`Finder`] binds an entity type to a source, table and primary key.
//! Rows it loads come back as entities whose tracker is already bound, so
//! they can be modified and saved directly. Bulk `update` and `delete` go
//! straight to the driver and bypass change tracking.

use std::marker::PhantomData;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::binding::TableBinding;
use crate::error::Result;
use crate::filter::Filter;
use crate::query::{ExtraOptions, OrderBy, Query, SelectOptions};
use crate::source::DataAccess;
use crate::tracker::{Entity, Tracker};
use crate::update::Update;
use crate::value::{Row, Value};

/// Query façade for entities of type `E` keyed by `K`
pub struct Finder<E, K> {
    binding: TableBinding,
    deserializer: fn(Row) -> Result<E>,
    _key: PhantomData<fn(K)>,
}

impl<E, K> Clone for Finder<E, K> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            deserializer: self.deserializer,
            _key: PhantomData,
        }
    }
}

impl<E, K> std::fmt::Debug for Finder<E, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finder")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl<E, K> Finder<E, K>
where
    E: Entity,
    K: Into<Value>,
{
    /// Finder deserializing rows with [`Entity::from_row`]
    pub fn new(binding: TableBinding) -> Self {
        Self {
            binding,
            deserializer: E::from_row,
            _key: PhantomData,
        }
    }

    /// Use a custom row deserializer
    pub fn with_deserializer(mut self, deserializer: fn(Row) -> Result<E>) -> Self {
        self.deserializer = deserializer;
        self
    }

    pub fn binding(&self) -> &TableBinding {
        &self.binding
    }

    fn access(&self) -> DataAccess {
        DataAccess::global()
    }

    fn load(&self, row: Row) -> Result<E> {
        let mut entity = (self.deserializer)(row)?;
        let snapshot = entity.to_row();
        *entity.tracker_mut() = Tracker::bound(self.binding.clone(), snapshot);
        Ok(entity)
    }

    fn query(filter: Filter, order: Option<OrderBy>, options: SelectOptions) -> Query {
        Query::new(filter).with_order(order).with_options(options)
    }

    /// Load the entity with the given primary key. A `None` key is never
    /// looked up.
    pub async fn find_by_key(&self, key: impl Into<Option<K>>) -> Result<Option<E>> {
        let key_field = self.binding.require_primary_key()?;
        let Some(key) = key.into().map(Into::into).filter(|k: &Value| !k.is_null()) else {
            return Ok(None);
        };

        let row = self
            .access()
            .find_by_key(self.binding.source(), self.binding.table(), key_field, &key)
            .await?;
        row.map(|row| self.load(row)).transpose()
    }

    pub async fn find(
        &self,
        filter: Filter,
        order: Option<OrderBy>,
        options: SelectOptions,
    ) -> Result<Vec<E>> {
        let query = Self::query(filter, order, options);
        self.access()
            .find(self.binding.source(), self.binding.table(), &query)
            .await?
            .into_iter()
            .map(|row| self.load(row))
            .collect()
    }

    /// First entity matching `filter` in the given order
    pub async fn find_one(&self, filter: Filter, order: Option<OrderBy>) -> Result<Option<E>> {
        let mut found = self
            .find(filter, order, SelectOptions::new().with_limit(1))
            .await?;
        Ok(found.pop())
    }

    pub async fn exists(&self, filter: Filter) -> Result<bool> {
        Ok(self.count(filter, ExtraOptions::new()).await? > 0)
    }

    /// Deliver matching entities one at a time. Each future returned by
    /// `on_entity` completes before the next row is produced.
    ///
    /// ```rust,ignore
    /// finder
    ///     .find_stream(filter::any(), None, SelectOptions::new(), |user: User| {
    ///         async move { notify(&user).await }.boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn find_stream<'a, F>(
        &self,
        filter: Filter,
        order: Option<OrderBy>,
        options: SelectOptions,
        mut on_entity: F,
    ) -> Result<()>
    where
        F: FnMut(E) -> BoxFuture<'a, Result<()>> + Send,
        E: 'a,
    {
        let query = Self::query(filter, order, options);
        self.access()
            .find_stream(
                self.binding.source(),
                self.binding.table(),
                &query,
                &mut |row: Row| {
                    let next = self.load(row).map(&mut on_entity);
                    async move {
                        match next {
                            Ok(handled) => handled.await,
                            Err(err) => Err(err),
                        }
                    }
                    .boxed()
                },
            )
            .await
    }

    pub async fn find_stream_sync<F>(
        &self,
        filter: Filter,
        order: Option<OrderBy>,
        options: SelectOptions,
        mut on_entity: F,
    ) -> Result<()>
    where
        F: FnMut(E) -> Result<()> + Send,
    {
        let query = Self::query(filter, order, options);
        self.access()
            .find_stream_sync(
                self.binding.source(),
                self.binding.table(),
                &query,
                &mut |row: Row| on_entity(self.load(row)?),
            )
            .await
    }

    pub async fn count(&self, filter: Filter, extra: ExtraOptions) -> Result<u64> {
        self.access()
            .count(self.binding.source(), self.binding.table(), &filter, &extra)
            .await
    }

    pub async fn sum(&self, field: &str, filter: Filter) -> Result<f64> {
        self.access()
            .sum(
                self.binding.source(),
                self.binding.table(),
                &filter,
                self.binding.primary_key(),
                field,
            )
            .await
    }

    /// Apply `changes` to every row matching `filter`; returns the number of
    /// rows updated
    pub async fn update(&self, changes: Update, filter: Filter) -> Result<u64> {
        self.access()
            .update_many(self.binding.source(), self.binding.table(), &filter, &changes)
            .await
    }

    /// Delete every row matching `filter`; returns the number of rows removed
    pub async fn delete(&self, filter: Filter) -> Result<u64> {
        self.access()
            .delete_many(self.binding.source(), self.binding.table(), &filter)
            .await
    }

    /// Insert all entities in one driver call and bind their trackers.
    /// Generated keys are written back to their entities.
    pub async fn insert_all(&self, entities: &mut [E]) -> Result<()> {
        let rows: Vec<Row> = entities.iter().map(Entity::to_row).collect();
        let generated = self
            .access()
            .batch_insert(
                self.binding.source(),
                self.binding.table(),
                &rows,
                self.binding.primary_key(),
            )
            .await?;

        for (entity, key) in entities.iter_mut().zip(generated) {
            if let (Some(key_field), Some(key)) = (self.binding.primary_key(), key) {
                entity.set_field(key_field, key)?;
            }
            let row = entity.to_row();
            *entity.tracker_mut() = Tracker::bound(self.binding.clone(), row);
        }
        Ok(())
    }
}
