// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A cooperative runtime for compiled flow programs.
//!
//! A flow program is a set of component graphs (see [`template`]). Running it means creating
//! [`FlowState`](flow_state::FlowState) instances of those graphs and letting values travel
//! along their connections: every value that reaches a component input may make that component
//! ready, ready components go onto a bounded queue, and [`Runtime::tick`] drains the queue
//! within a wall-clock budget.
//!
//! ## Layout
//!
//! - [`runtime`]: the [`Runtime`] context, instance lifecycle, the tick loop and error routing.
//! - [`template`]: the immutable program model the runtime executes.
//! - [`flow_state`]: live instances and their generational handles.
//! - [`execution_state`]: per-component state kept across executions.
//! - [`queue`]: the bounded execution queue.
//! - [`registry`]: the type tag to executor table.
//! - [`components`]: built-in executors, plus the opt-in MQTT family.
//! - [`host`]: the [`Host`] trait through which the runtime reaches its collaborators.
//! - [`debugger`]: the line protocol spoken to a remote debugger.
//! - [`trace`]: scope callbacks for profilers.
//!
//! Nothing here blocks. Components that wait on a collaborator (SCPI, dialogs, MQTT) suspend and
//! are resumed by a later tick once the collaborator reports back through the runtime's mailbox
//! methods.
//!
//! ## Example
//! ```ignore
//! use flow_runtime::{Runtime, RuntimeConfig};
//!
//! let mut rt = Runtime::new(host, definition, RuntimeConfig::default())?;
//! rt.start()?;
//! loop {
//!     rt.tick();
//! }
//! ```
//!
//! The crate is `no_std + alloc`. The `std` feature forwards to `flow_expr/std` and `tracing/std`.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod components;
pub mod config;
pub mod debugger;
pub mod execution_state;
pub mod flow_state;
pub mod host;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod template;
pub mod trace;

mod context;
mod propagate;
mod suspend;

pub use config::RuntimeConfig;
pub use flow_state::FlowStateId;
pub use host::Host;
pub use runtime::{FlowError, Runtime, RuntimeError, TickSummary};
