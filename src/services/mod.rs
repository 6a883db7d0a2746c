//! Services

pub mod events;
pub mod import_service;
pub mod planner;
pub mod processor;
pub mod validation;
pub mod worker;
