pub mod job_store;
pub mod model;
pub mod queue;
pub mod runner;
