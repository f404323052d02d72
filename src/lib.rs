//! # runtara-mapper
//!
//! A typed data-mapping layer with portable filters and pluggable storage
//! drivers.
//!
//! Application code describes *what* to read or write using backend-neutral
//! [`Filter`] and [`Update`] values. Every call is routed by source name to a
//! registered [`Driver`], which translates it into its native query form.
//! Entities remember the state they were loaded with, so saving writes only
//! the fields that actually changed.
//!
//! ## Features
//!
//! - **Portable Filters**: Comparisons, null checks, set membership, regex and
//!   substring matching, combined with AND/OR/NOT
//! - **Change Tracking**: Minimal updates computed from a per-entity snapshot
//! - **Conditional Saves**: Update a row only if it still matches a condition
//! - **Streaming**: Rows delivered one at a time with backpressure
//! - **Drivers**: In-memory and PostgreSQL implementations of one contract
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use runtara_mapper::{
//!     Finder, PostgresConfig, PostgresDriver, SelectOptions, TableBinding, filter, register_source,
//! };
//! # use runtara_mapper::{Entity, Row, Tracker, Value, field};
//! # struct User { tracker: Tracker, id: Option<i64>, age: i64 }
//! # impl Entity for User {
//! #     fn tracker(&self) -> &Tracker { &self.tracker }
//! #     fn tracker_mut(&mut self) -> &mut Tracker { &mut self.tracker }
//! #     fn to_row(&self) -> Row {
//! #         Row::from([("id".into(), Value::from(self.id)), ("age".into(), Value::from(self.age))])
//! #     }
//! #     fn from_row(row: Row) -> runtara_mapper::Result<Self> {
//! #         Ok(Self { tracker: Tracker::default(), id: field(&row, "id")?, age: field(&row, "age")? })
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PostgresConfig::builder("postgres://localhost/mydb").build();
//!     register_source("main", Arc::new(PostgresDriver::connect(config).await?));
//!
//!     let users: Finder<User, i64> =
//!         Finder::new(TableBinding::new("main", "users").with_primary_key("id"));
//!
//!     let adults = users
//!         .find(filter::greater_than_or_equal("age", 18), None, SelectOptions::new())
//!         .await?;
//!     println!("{} adults", adults.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Sources
//!
//! Sources live in a process-wide [`SourceRegistry`]. Registering a name a
//! second time replaces its driver. Tests usually register a
//! [`MemoryDriver`] under a unique name.

pub mod binding;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod finder;
pub mod query;
pub mod source;
pub mod sql;
pub mod tracker;
pub mod update;
pub mod value;

// Re-export main types for convenience
pub use binding::TableBinding;
pub use config::{PostgresConfig, PostgresConfigBuilder};
pub use driver::{Driver, MemoryDriver, PostgresDriver, RowCallback, RowCallbackSync};
pub use error::{DriverError, MapperError, Result};
pub use filter::{CompareOp, Expression, Filter};
pub use finder::Finder;
pub use query::{ExtraOptions, OrderBy, Query, SelectOptions};
pub use source::{DataAccess, Source, SourceRegistry, register_source};
pub use tracker::{Entity, Persist, Tracker};
pub use update::{Update, UpdateOp};
pub use value::{FromValue, Number, Row, Value, deep_equals, field};
