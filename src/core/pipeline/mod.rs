//! The stages a run goes through, in order: provisioning, dispatching to a
//! strategy, reporting.

pub mod dispatching;
pub mod provisioning;
pub mod reporting;
