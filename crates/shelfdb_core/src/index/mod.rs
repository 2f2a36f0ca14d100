//! Secondary indexes.
//!
//! - [`Index`] - forward and reverse posting lists over one dotted path
//! - [`TransactionalIndex`] - snapshot staging and persistence around an
//!   [`Index`]

mod postings;
mod transactional;

pub use postings::Index;
pub use transactional::{TransactionalIndex, ALL_KEYS_BLOB};
