//! Remote Execution Gateway.
//!
//! Runs structured commands and transfers files to and from the GPU host.
//! [`LocalGateway`] targets the current machine, [`SshGateway`] shells out
//! to the system `ssh`/`scp` binaries. Neither retries internally: a failure
//! is reported once and the caller decides what it means for its runs.

pub mod error;
pub mod gateway;
pub mod local;
pub mod ssh;
pub mod subprocess;

pub use error::GatewayError;
pub use gateway::{CommandOutput, RemoteGateway};
pub use local::LocalGateway;
pub use ssh::{SshConfig, SshGateway};
