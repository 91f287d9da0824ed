//! Fixed-size-tuple slotted pages for a disk-oriented storage engine.
//!
//! A [`SlottedPage`] owns one page-sized buffer. Its first bytes hold a
//! [`SlotHeader`] (slot bitmap plus capacity bookkeeping); the rest is split
//! into equally sized tuple slots addressed by [`TupleId`].

pub mod errors;
pub mod header;
pub mod identifiers;
pub mod io;
pub mod paging;
pub mod schema;
pub mod types;

pub use errors::{InvalidPageOffsetError, PageError, SchemaError};
pub use header::{FIXED_PREFIX, NO_SLOT, PAGE_SIZE, SlotHeader};
pub use identifiers::{FileId, PageId, TupleId};
pub use paging::{SlottedPage, Tuples};
pub use schema::{Field, FieldType, Record, Schema, Value};
