//! Operator override of the next drawn number.

use tracing::warn;

use crate::storage::AdminOverrideStore;
use crate::types::{Digit, WingoError};

/// Force the next settled period to draw `number`. The override is consumed
/// by the first settlement that draws after it is set; setting it again
/// before then replaces the previous value.
pub async fn force_outcome(store: &dyn AdminOverrideStore, number: u8) -> Result<Digit, WingoError> {
    let digit = Digit::new(number).map_err(|e| WingoError::OverrideOutOfRange(e.0))?;
    if let Some(previous) = store.peek().await? {
        warn!(previous = %previous, next = %digit, "Replacing pending forced outcome");
    }
    store.set(digit).await?;
    warn!(number = %digit, "Forced outcome set for next settlement");
    Ok(digit)
}
