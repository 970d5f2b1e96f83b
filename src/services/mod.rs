//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own conversation semantics and store access so route
//! handlers can stay focused on protocol translation. Heads change only
//! through [`mutate`]; assistant replies are written only by the task that
//! [`supervisor`] spawned for them.

pub mod chat;
pub mod feed;
pub mod generation;
pub mod messages;
pub mod mutate;
pub mod supervisor;
pub mod workspace;
