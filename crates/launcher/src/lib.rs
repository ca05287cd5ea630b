//! The launcher daemon: pre-warms boosters once, then forks a child per
//! invocation that loads the requested unit and jumps to its entry point.

pub mod booster;
pub mod child;
pub mod cli;
pub mod config;
pub mod control_socket;
pub mod daemon;
pub mod defender;
pub mod double_fork;
pub mod kindergarten;
pub mod notify;
pub mod oom;
pub mod pidfile;
pub mod reaper;
pub mod rpc_daemon;
pub mod signals;
pub mod tracing_init;
