//! Tool-calling execution engine.
//!
//! [`coordinator::ExecutionCoordinator`] drives one session's turns: it asks the
//! completion provider for a reply, extracts tool invocations with [`parser`],
//! checks them against the [`permissions::PermissionGate`], dispatches them
//! through the [`registry::ToolRegistry`], and publishes ordered events on the
//! [`bus::EventBus`]. The built-in shell tools run on a shared
//! [`process::ProcessSupervisor`].

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod parser;
pub mod permissions;
pub mod process;
pub mod registry;
pub mod scripted;
pub mod tools;
pub mod truncate;

pub use coordinator::{CoordinatorConfig, CoordinatorDeps, ExecutionCoordinator, TurnReport};
pub use error::CoordinatorError;
