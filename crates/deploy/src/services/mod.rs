//! External processes driven by a deployment run.
//!
//! Each service is in its own submodule with:
//! - `cmd.rs` - Command builder for the process arguments
//! - `mod.rs` - Config and the logic that runs the process

pub mod forge;
pub mod node;
