//! The syscall dispatcher (spec §4.4): decodes a transport-agnostic
//! [`request::Request`] and executes it against [`handlers::SyscallContext`].

pub mod handlers;
pub mod request;
