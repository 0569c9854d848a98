//! Data models for the circulation server

pub mod book;
pub mod loan;
pub mod member;
pub mod setting;

// Re-export commonly used types
pub use book::{Availability, Book};
pub use loan::{Loan, LoanDetails, LoanStatus, NewLoan};
pub use member::{MemberClaims, Role};
pub use setting::LendingSettings;
