//! Host-side loader and remote filesystem/debug server for the target
//! (spec §1). `main` wires a parsed [`config::Cli`] into a [`transport::
//! Transport`] and a [`session::Session`]; everything else is reachable
//! from there.

pub mod config;
pub mod dispatch;
pub mod gdb;
pub mod iso;
pub mod loader;
pub mod logging;
pub mod lzo;
pub mod session;
pub mod transport;
