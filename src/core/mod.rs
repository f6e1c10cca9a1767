pub mod error;
pub mod value;

pub use error::{DbError, Result};
pub use value::{ColumnType, Value, ValueMap};
