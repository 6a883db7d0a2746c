//! Database queries

pub mod job;
pub mod job_log;
pub mod target;
pub mod template;
pub mod vehicle;
