pub mod config;
pub mod frame;
pub mod handler;
pub mod module_cache;
pub mod runtime_error;
pub mod vm;

#[cfg(test)]
mod tests;

pub use config::VmConfig;
pub use runtime_error::{RuntimeError, VmError};
pub use vm::{AbortHandle, RunOptions, Vm};
