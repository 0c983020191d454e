//! CronJob check-ins.
//!
//! The CronJob informer maintains a [`MonitorIndex`] of monitored CronJobs.
//! The Job informer feeds Job lifecycle changes to the
//! [`CheckinStateMachine`], which sends start and terminal check-ins and
//! tracks in-flight runs inside the index.

mod checkin;
mod error;
mod index;
pub mod informer;
mod record;
mod sync;

pub use checkin::{CheckinStateMachine, JobNotification, Transition, is_finished, is_pending};
pub use error::{MonitorError, Result};
pub use index::{MonitorIndex, SharedRecord};
pub use record::{MonitorKey, MonitorRecord, MonitorSettings, RunRecord};
pub use sync::{SyncGroup, SyncSignal, SyncWaiter};
