mod audit_log;
mod catalog;
mod entitlement;
mod payment_event;
mod payout;
mod processing_job;
mod transaction;
mod user;

pub use audit_log::*;
pub use catalog::*;
pub use entitlement::*;
pub use payment_event::*;
pub use payout::*;
pub use processing_job::*;
pub use transaction::*;
pub use user::*;
