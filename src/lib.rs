//! jsockd: a line-delimited JSON IPC server over Unix domain sockets.
//!
//! A single process accepts multiple concurrent clients on a well-known
//! socket path, reads newline-framed JSON requests, routes them through a
//! pluggable command registry, and writes newline-framed JSON responses
//! back.
//!
//! Features:
//! - Readiness-multiplexed event loop (mio), zero CPU while idle
//! - Slab-backed connection set safe under removal during dispatch
//! - Explicit request framing with per-connection reassembly
//! - Structured error responses; a misbehaving client never takes the
//!   server down
//! - Configuration via CLI arguments or TOML file

pub mod commands;
pub mod config;
pub mod protocol;
pub mod runtime;
