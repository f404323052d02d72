//! Entity change tracking
//!
//! Every entity carries a [`Tracker`] holding its table binding and a
//! snapshot of its fields taken at the last load, insert or save. Saving
//! sends only the fields that differ from that snapshot.
//!
//! ```rust,no_run
//! use runtara_mapper::{Entity, Persist, Row, TableBinding, Tracker, Value, field};
//!
//! struct Counter {
//!     tracker: Tracker,
//!     id: Option<i64>,
//!     hits: i64,
//! }
//!
//! impl Entity for Counter {
//!     fn tracker(&self) -> &Tracker { &self.tracker }
//!     fn tracker_mut(&mut self) -> &mut Tracker { &mut self.tracker }
//!
//!     fn to_row(&self) -> Row {
//!         Row::from([
//!             ("id".to_string(), Value::from(self.id)),
//!             ("hits".to_string(), Value::from(self.hits)),
//!         ])
//!     }
//!
//!     fn from_row(row: Row) -> runtara_mapper::Result<Self> {
//!         Ok(Self {
//!             tracker: Tracker::default(),
//!             id: field(&row, "id")?,
//!             hits: field(&row, "hits")?,
//!         })
//!     }
//! }
//!
//! # async fn run() -> runtara_mapper::Result<()> {
//! let binding = TableBinding::new("main", "counters").with_primary_key("id");
//! let mut counter = Counter { tracker: Tracker::new(binding), id: None, hits: 0 };
//! counter.track()?;
//! counter.insert().await?;
//!
//! counter.hits += 1;
//! assert!(counter.save().await?);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use log::debug;

use crate::binding::TableBinding;
use crate::error::{MapperError, Result};
use crate::filter::{self, Filter};
use crate::source::DataAccess;
use crate::update::Update;
use crate::value::{Number, Row, Value, diff_rows};

/// Binding plus the last persisted snapshot of an entity
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    binding: Option<TableBinding>,
    original: Option<Row>,
}

impl Tracker {
    /// Tracker for a new entity. It must be bound with [`Persist::track`]
    /// before any persistence call.
    pub fn new(binding: TableBinding) -> Self {
        Self {
            binding: Some(binding),
            original: None,
        }
    }

    pub(crate) fn bound(binding: TableBinding, snapshot: Row) -> Self {
        Self {
            binding: Some(binding),
            original: Some(snapshot),
        }
    }

    pub fn binding(&self) -> Option<&TableBinding> {
        self.binding.as_ref()
    }

    /// Snapshot the diff is computed against
    pub fn original(&self) -> Option<&Row> {
        self.original.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some() && self.original.is_some()
    }

    /// Take the initial snapshot. Later calls keep the existing snapshot.
    pub fn bind(&mut self, snapshot: Row) -> Result<()> {
        if self.binding.is_none() {
            return Err(MapperError::not_initialized(
                "tracker has no table binding",
            ));
        }
        if self.original.is_none() {
            self.original = Some(snapshot);
        }
        Ok(())
    }

    fn refresh(&mut self, snapshot: Row) {
        self.original = Some(snapshot);
    }

    fn require_bound(&self) -> Result<(&TableBinding, &Row)> {
        match (&self.binding, &self.original) {
            (Some(binding), Some(original)) => Ok((binding, original)),
            (Some(binding), None) => Err(MapperError::not_initialized(format!(
                "entity of table '{}' was never tracked",
                binding.table()
            ))),
            (None, _) => Err(MapperError::not_initialized(
                "tracker has no table binding",
            )),
        }
    }

    /// Table binding, primary key field and the original key value
    fn key(&self) -> Result<(TableBinding, String, Value)> {
        let (binding, original) = self.require_bound()?;
        let key_field = binding.require_primary_key()?;
        let key = original.get(key_field).cloned().unwrap_or_default();
        Ok((binding.clone(), key_field.to_string(), key))
    }
}

/// A record type that can be converted to and from a [`Row`]
pub trait Entity: Send + Sync + Sized {
    fn tracker(&self) -> &Tracker;

    fn tracker_mut(&mut self) -> &mut Tracker;

    /// The persisted fields. Trackers and derived values are not part of it.
    fn to_row(&self) -> Row;

    /// Build an entity from a stored row. The returned entity's tracker is
    /// replaced by whoever loaded it.
    fn from_row(row: Row) -> Result<Self>;

    /// Assign a single field, e.g. a key generated on insert
    fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
        let mut row = self.to_row();
        row.insert(field.to_string(), value);
        let tracker = std::mem::take(self.tracker_mut());
        *self = Self::from_row(row)?;
        *self.tracker_mut() = tracker;
        Ok(())
    }
}

/// Single-entity persistence through the entity's tracker
#[async_trait]
pub trait Persist: Entity {
    /// Snapshot the current fields as the comparison baseline
    fn track(&mut self) -> Result<()>;

    /// Fields that differ from the snapshot
    fn changes(&self) -> Result<Row>;

    fn is_dirty(&self) -> Result<bool>;

    /// Insert every field. A key generated by the driver is written back.
    async fn insert(&mut self) -> Result<()>;

    /// Write the changed fields to the row identified by the original key.
    /// Returns `false` when nothing changed or no row was updated.
    async fn save(&mut self) -> Result<bool>;

    /// Like [`save`](Persist::save), but only updates the row if it also
    /// matches `condition`. Returns whether the condition matched.
    async fn save_if(&mut self, condition: &Filter) -> Result<bool>;

    /// Returns whether a row was removed
    async fn delete(&self) -> Result<bool>;

    /// Atomically add `amount` to `field` in storage. The entity and its
    /// snapshot are left as they are.
    async fn increment<N>(&self, field: &str, amount: N) -> Result<()>
    where
        N: Into<Number> + Send;
}

fn pending_changes<E: Entity>(entity: &E, current: &Row) -> Result<Row> {
    let (_, original) = entity.tracker().require_bound()?;
    Ok(diff_rows(original, current))
}

#[async_trait]
impl<E: Entity> Persist for E {
    fn track(&mut self) -> Result<()> {
        let snapshot = self.to_row();
        self.tracker_mut().bind(snapshot)
    }

    fn changes(&self) -> Result<Row> {
        pending_changes(self, &self.to_row())
    }

    fn is_dirty(&self) -> Result<bool> {
        Ok(!self.changes()?.is_empty())
    }

    async fn insert(&mut self) -> Result<()> {
        let binding = self.tracker().require_bound()?.0.clone();
        let row = self.to_row();

        let generated = DataAccess::global()
            .insert(binding.source(), binding.table(), &row, binding.primary_key())
            .await?;
        if let (Some(key_field), Some(key)) = (binding.primary_key(), generated) {
            self.set_field(key_field, key)?;
        }

        let snapshot = self.to_row();
        self.tracker_mut().refresh(snapshot);
        Ok(())
    }

    async fn save(&mut self) -> Result<bool> {
        let current = self.to_row();
        let diff = pending_changes(self, &current)?;
        if diff.is_empty() {
            return Ok(false);
        }
        let (binding, key_field, key) = self.tracker().key()?;

        let affected = DataAccess::global()
            .update(
                binding.source(),
                binding.table(),
                &key_field,
                &key,
                &Update::from(diff),
            )
            .await?;
        if affected == 0 {
            debug!(
                "event=entity_save module=tracker status=missed table={} key={}",
                binding.table(),
                key.to_json()
            );
            return Ok(false);
        }

        self.tracker_mut().refresh(current);
        Ok(true)
    }

    async fn save_if(&mut self, condition: &Filter) -> Result<bool> {
        let current = self.to_row();
        let diff = pending_changes(self, &current)?;
        if diff.is_empty() {
            return Ok(false);
        }
        let (binding, key_field, key) = self.tracker().key()?;

        let guarded = filter::and([filter::equals(key_field, key), condition.clone()]);
        let affected = DataAccess::global()
            .update_many(binding.source(), binding.table(), &guarded, &Update::from(diff))
            .await?;
        if affected == 0 {
            return Ok(false);
        }

        self.tracker_mut().refresh(current);
        Ok(true)
    }

    async fn delete(&self) -> Result<bool> {
        let (binding, key_field, key) = self.tracker().key()?;
        DataAccess::global()
            .delete(binding.source(), binding.table(), &key_field, &key)
            .await
    }

    async fn increment<N>(&self, field: &str, amount: N) -> Result<()>
    where
        N: Into<Number> + Send,
    {
        let (binding, key_field, key) = self.tracker().key()?;
        DataAccess::global()
            .increment(
                binding.source(),
                binding.table(),
                &key_field,
                &key,
                field,
                amount.into(),
            )
            .await
    }
}
