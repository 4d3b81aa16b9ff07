//! Durable state shared across runs: the success ledger, the error journal
//! and per-job name mappings.

pub mod journal;
pub mod ledger;
pub mod mapping;

pub use journal::{ErrorJournal, ErrorRecord, FailedImage, FailedPlaylist, JournalContents, MalformedLine};
pub use ledger::{SuccessLedger, SuccessRecord};
pub use mapping::NameMapping;
