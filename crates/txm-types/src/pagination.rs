use serde::{Deserialize, Serialize};

use crate::error::{TmError, ValidationError};

/// Sort direction accepted by every `list_*` persistence operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending
}

/// A validated page request: `limit` is always > 0. `after` is an exclusive
/// cursor — implementations must never re-return the row it names.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub after: Option<C>,
    pub limit: usize,
    pub dir:   SortDirection
}

impl<C> PageRequest<C> {
    pub fn new(after: Option<C>, limit: i64, dir: SortDirection) -> Result<Self, TmError> {
        if limit <= 0 {
            return Err(TmError::Validation(ValidationError::BadPaginationLimit { limit }));
        }
        Ok(Self { after, limit: limit as usize, dir })
    }
}
