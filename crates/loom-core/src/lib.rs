//! Core types shared by the loom engine: ids, messages, tool contracts,
//! session events, execution state, and the collaborator traits the
//! coordinator talks to (completion provider, transcript store, confirmer).

pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod permissions;
pub mod provider;
pub mod state;
pub mod tools;
pub mod transcript;
