//! GPU Executor.
//!
//! Materializes an invocation (descriptor, staged media), uploads it through
//! the gateway, runs the model container to completion, downloads the
//! output directory and reconciles the artifacts back onto each run. Also
//! probes for and terminates live containers, which is how every process
//! sharing the GPU learns whether it is busy.

pub mod artifacts;
pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod staging;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::ExecutorConfig;
pub use error::ExecutorError;
pub use executor::{GpuExecutor, RunOutcome, Termination};
