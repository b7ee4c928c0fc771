//! Application-level orchestration utilities.
//!
//! This module owns batch lifecycle control (run, cancel on Ctrl-C) and post-run
//! processing such as exports. CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::run_controller;
pub(crate) use post_process::process_batch_completion;
