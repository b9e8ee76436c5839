//! Tag language: header compilation and row materialization.
//!
//! A worksheet block starts with a `#tags` header row whose cells declare how
//! each column maps onto record fields:
//!
//! ```text
//! #tags               | #sample.id | #sample.weight | #%units | *#sample.protocol.id
//! #ignore             | Sample     | Weight         | Units   | Protocols
//!                     | S1         | 5              | mg      | P1;P2
//! ```
//!
//! [`compile_header`] turns the header into [`RecordConstructor`]s and
//! [`Materializer`] runs every following row through them until a blank row.

pub mod fields;
pub mod header;
pub mod lexer;
pub mod materialize;
pub mod record;

pub use fields::{split_list, FieldConstructor, FieldRef, Operand};
pub use header::{compile_header, ParserContext};
pub use lexer::{tokenize, LexError, Token};
pub use materialize::{materialize_sheet, merge_record, MaterializeSummary, Materializer};
pub use record::RecordConstructor;
