//! fanload core: partitioned SQL reads into typed columnar results.
//!
//! A read runs in five stages:
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌─────────┐   ┌───────────┐
//! │ Partitioner │──▶│  Dispatcher  │──▶│ Reconcile  │──▶│ Decode  │──▶│ Assembler │
//! │ (+ probe)   │   │ (concurrent) │   │ metadata   │   │ (typed) │   │ (ordered) │
//! └─────────────┘   └──────────────┘   └────────────┘   └─────────┘   └───────────┘
//! ```
//!
//! Backends plug in through [`backend::SqlExecutor`]; each brings a
//! [`decode::TypeSystem`] that maps its native types onto [`types::CanonicalType`].

pub mod assemble;
pub mod backend;
pub mod column;
pub mod decode;
pub mod dispatch;
pub mod loader;
pub mod partition;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use assemble::{DataFrameResult, PartitionResult, ResultAssembler};
pub use backend::{
    CalendarValue, ClockValue, ColumnMeta, RawResultSet, SqlDialect, SqlExecutor, TypeTag,
    WireValue,
};
pub use column::{ColumnBuilder, TypedColumn};
pub use decode::{DecodeFailure, MySqlTypes, PostgresTypes, SqliteTypes, TypeSystem};
pub use dispatch::{ConnectionDispatcher, RawPartition};
pub use loader::Loader;
pub use partition::{
    partition_queries, Partition, PartitionBounds, PartitionSpec, QueryPartitioner, QuerySource,
    ReadRequest,
};
pub use types::{CanonicalType, ColumnSchema, Value};
