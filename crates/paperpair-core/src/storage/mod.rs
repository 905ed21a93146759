pub mod ledger;

use crate::error::Result;
use crate::models::{Language, Record, RecordPatch};

/// Persistence seam for the records ledger. The matcher and the CLI only
/// talk to this trait, so tests can swap in an in-memory store.
pub trait RecordStore {
    /// All records in one language partition.
    fn records(&self, language: Language) -> &[Record];

    /// Look up a record by its renamed filename, across both partitions.
    fn get(&self, file_id: &str) -> Option<&Record>;

    /// Add a record; fails if its `file_id` is already present.
    fn insert(&mut self, record: Record) -> Result<()>;

    /// Apply a partial update to a record.
    fn update(&mut self, file_id: &str, patch: &RecordPatch) -> Result<()>;

    /// Overwrite an existing record wholesale (extraction write-back).
    fn replace(&mut self, record: Record) -> Result<()>;

    /// Remove a record; returns the removed record.
    fn remove(&mut self, file_id: &str) -> Result<Record>;

    /// Record a confirmed pairing. The pointer lives on the English record
    /// only; any previous pairing on that record is replaced.
    fn set_pairing(&mut self, english_file: &str, chinese_file: &str, confidence: u8)
    -> Result<()>;

    /// Drop every stored pairing. Returns how many were cleared.
    fn clear_pairings(&mut self) -> usize;

    /// Next free sequential filename for a partition (`c03.pdf`, `e12.pdf`).
    fn next_file_id(&self, language: Language) -> String;

    /// Flush the ledger to its backing store.
    fn save(&self) -> Result<()>;
}
