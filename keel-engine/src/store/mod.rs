//! Run store
//!
//! SQLite persistence of runs, their ordered step results and logs.
//! Each repository handles database operations for one table.

pub mod db;
pub mod logs;
pub mod runs;
pub mod steps;

pub use db::{create_pool, run_migrations};
pub use logs::{append_logs, logs};
pub use runs::{finalize_run, find_run, insert_run, list_runs, mark_running, next_run_number};
pub use steps::{append_step_result, step_results};
