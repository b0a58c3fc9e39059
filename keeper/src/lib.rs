// Context Keeper: capture named desktop working contexts and restore them later
//
// A context is the set of open application windows (with per-type detail such
// as browser tabs, terminal directories and IDE projects), the process
// environment, and a little machine state. `keeper::ContextKeeper` is the
// entry point; everything OS-specific sits behind `desktop::Desktop`.

pub mod browser_tabs;
pub mod classify;
pub mod clear;
pub mod clock;
pub mod config;
pub mod desktop;
pub mod environment;
pub mod error;
pub mod handlers;
pub mod inventory;
pub mod keeper;
pub mod logging;
pub mod model;
pub mod outcome;
pub mod process;
pub mod recent;
pub mod restore;
pub mod snapshot;
pub mod store;
pub mod system;
pub mod whitelist;

// Fixtures shared by unit tests
#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{KeeperError, Result};
pub use keeper::{ContextKeeper, KeeperParts};
