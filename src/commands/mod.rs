//! `loadplan` CLI subcommands.
//!
//! Provides `run` (execute a plan), `validate` (check a plan) and `init`
//! (generate a starter plan).

pub mod init;
pub mod run;
pub mod validate;
