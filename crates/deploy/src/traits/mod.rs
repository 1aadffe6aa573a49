//! Seams between the orchestrator and the outside world.
//!
//! The orchestrator only talks to the node, the deploy tool and the chain through
//! these traits. [`crate::LocalBackend`] is the implementation backed by real
//! processes and JSON-RPC.

mod backend;

pub use backend::{ChainClient, DeployBackend};
