//! Extension lifecycle - discovery of extension files and the loader that
//! keeps track of which ones are live

pub mod discovery;
pub mod loader;

pub use loader::ExtensionLoader;

use serde::Serialize;

/// Snapshot result of a bulk load or reload.
///
/// Both lists keep dispatch order, not completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub total: usize,
}

impl BulkOutcome {
    /// Fold `(identifier, succeeded)` pairs, in dispatch order
    pub fn collect(results: impl IntoIterator<Item = (String, bool)>) -> Self {
        let mut outcome = Self::default();
        for (identifier, ok) in results {
            outcome.total += 1;
            if ok {
                outcome.success.push(identifier);
            } else {
                outcome.failed.push(identifier);
            }
        }
        outcome
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
