use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    /// A present item-id parameter that is not an integer points at a corrupted link.
    #[error("invalid item id `{value}` in `{key}` parameter")]
    InvalidItemId {
        key: String,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

pub type SelectionResult<T> = std::result::Result<T, SelectionError>;
