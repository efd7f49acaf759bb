#![cfg_attr(target_arch = "bpf", no_std)]

#[doc(hidden)]
pub use cfg_if;

pub mod macros;

pub mod consts;
pub mod errors;
pub mod maps;
pub mod task;

pub mod bpf_events;
pub mod config;

pub mod args;
pub mod discarders;
pub mod erpc;
pub mod process;
pub mod span;

#[cfg(all(test, not(target_arch = "bpf")))]
pub(crate) mod mock;
