//! Quota accounting: period markers and the pure ledger operations.

mod ledger;
mod refresh;

pub use ledger::{LedgerError, Posting, QuotaKey, QuotaLedger, QuotaState, QuotaView};
pub use refresh::{PeriodMarker, QuotaPolicy};
