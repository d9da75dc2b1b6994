//! Process exit codes. Part of the CLI contract.

use epistream_core::PipelineError;

pub const SUCCESS: i32 = 0;
pub const NOT_FOUND: i32 = 1; // Missing run, cache entry or document
pub const INTERNAL_ERROR: i32 = 2; // Anything not classified below
pub const BAD_INPUT: i32 = 3; // Malformed or misaligned source streams
pub const STORAGE_ERROR: i32 = 4; // Cache or stats store failure
pub const CANCELLED: i32 = 130; // Interrupted (Ctrl-C)

/// Exit code for a command failure, from the first pipeline error in the chain.
pub fn from_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::exit_code)
        .unwrap_or(INTERNAL_ERROR)
}
