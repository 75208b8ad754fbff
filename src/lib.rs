//! Periodic rebase automation for long-lived downstream forks: replay
//! the downstream carry commits onto the upstream tip, push the result
//! to an intermediate remote, and keep a pull request against the
//! downstream branch up to date.

pub mod art;
pub mod auth;
pub mod carry;
pub mod classify;
pub mod cli;
pub mod context;
pub mod error;
pub mod git;
pub mod github;
pub mod hooks;
pub mod notify;
pub mod plan;
pub mod pr;
pub mod remote;
pub mod run;
