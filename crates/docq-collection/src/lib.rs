mod adapter;
mod error;
mod selection;

pub use adapter::{AdapterError, QueryAdapter, UpdateOutcome};
pub use error::SelectionError;
pub use selection::Selection;
