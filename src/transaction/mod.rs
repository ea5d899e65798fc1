// ============================================================================
// Transaction Module
// ============================================================================
//
// Row-lock transactions used by the pessimistic strategy. A transaction is
// the only scope in which a counter's exclusive lock may be held.
//
// ============================================================================

pub mod counter_tx;
pub mod state;

pub use counter_tx::CounterTransaction;
pub use state::{TransactionId, TransactionState};
