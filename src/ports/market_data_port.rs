//! Market data port trait.

use crate::domain::error::CarryError;
use crate::domain::snapshot::MarketSnapshot;

/// Source of snapshot batches, one batch per cycle.
pub trait MarketDataSource {
    /// `Ok(None)` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<Vec<MarketSnapshot>>, CarryError>;
}
