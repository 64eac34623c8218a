//! Convoverb Core - real-time multi-channel filter node for host audio graphs
//!
//! The crate registers one mono input and one mono output port per channel in
//! a host audio graph, and on every processing tick exchanges buffers with the
//! graph while running a per-channel [`transform::ChannelTransform`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  create/destroy   ┌─────────────────────┐
//! │  Control Thread  │──────────────────►│    FilterSession    │
//! │                  │◄──── drain ───────│ (context/core/node) │
//! └──────────────────┘  diagnostics      └──────────┬──────────┘
//!         ▲                                         │ connect
//!         │ state notifications                     ▼
//! ┌──────────────────┐                   ┌─────────────────────┐
//! │  StateObserver   │                   │   Host RT Thread    │
//! │  (log + atomics) │                   │  (FilterProcessor)  │
//! └──────────────────┘                   └─────────────────────┘
//! ```
//!
//! The host graph itself is abstracted behind the traits in [`host`]. Two
//! implementations ship with the crate: [`host::memory`] (in-process, used for
//! offline rendering and tests) and, with the `jack-backend` feature on Linux,
//! a JACK binding.

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod host;
pub mod observer;
pub mod port;
pub mod processor;
pub mod session;
pub mod transform;
pub mod types;

pub use config::FilterConfig;
pub use error::{FilterError, FilterResult, HostError, HostResult};
pub use session::FilterSession;
pub use transform::ChannelTransform;
pub use types::*;
