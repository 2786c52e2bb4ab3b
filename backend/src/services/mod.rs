//! Ledger services. Handlers stay thin; every multi-row write lives here and
//! runs inside a single transaction.

pub mod absences;
pub mod attendance;
pub mod cancellation;
pub mod classes;
pub mod deferral;
pub mod enrollments;
pub mod makeups;
