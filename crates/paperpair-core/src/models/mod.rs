pub mod record;

pub use record::{ExtractionMethod, Language, Pairing, Record, RecordPatch};
