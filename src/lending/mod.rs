//! Loan lifecycle and copy availability engine
//!
//! - [`ledger`]: derived available-copy counts
//! - [`state`]: loan state transitions and the overdue view
//! - [`policy`]: the ordered checks that authorize a new loan

pub mod ledger;
pub mod policy;
pub mod state;

pub use ledger::available_copies;
pub use policy::BorrowAuthorization;
pub use state::{classify, Transition};
