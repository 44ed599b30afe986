//! # tessera-filter
//!
//! Filter expressions for collection queries.
//!
//! Filters are written as SQL-style boolean expressions:
//!
//! ```text
//! population > 10000 AND name ILIKE 'ville%'
//! kind IN ('school', 'library') OR BBOX(geom, 2.9, 50.5, 3.2, 50.7)
//! ```
//!
//! [`FilterParser`] turns the text into a [`Filter`] tree. Backends either
//! translate the tree to their own query language or evaluate it against
//! in-memory records with [`Filter::matches`].

pub mod ast;
pub mod error;
pub mod eval;
pub mod parser;

pub use ast::{CompareOp, Filter, Literal};
pub use error::FilterError;
pub use parser::{FilterParser, parse};
