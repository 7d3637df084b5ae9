pub mod ledger;
pub mod store;

pub use ledger::Ledger;
pub use store::{InMemoryLedgerStore, LedgerStore, SupabaseLedgerStore};
