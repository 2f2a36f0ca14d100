//! Mongo-style query language.
//!
//! A query is a [`Value`](shelfdb_codec::Value) mapping. Keys are dotted
//! field paths or the boolean tokens `$and`, `$or`, `$not`; field values
//! are literals (equality) or mappings of operator tokens:
//! `$gt $gte $lt $lte $ne $in $all $exists $regex $not $and $or`.
//!
//! ```
//! use shelfdb_core::query::Expr;
//!
//! let query = serde_json::from_str(r#"{"year": {"$gte": 1930}}"#).unwrap();
//! let expr = Expr::compile(&query).unwrap();
//! assert_eq!(expr.fields().into_iter().collect::<Vec<_>>(), vec!["year"]);
//! ```

mod eval;
mod expr;

pub use eval::{IndexResolver, Resolver};
pub use expr::{Expr, RangeOp};
