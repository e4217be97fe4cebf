// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Profiling adapters for `flow_runtime` (currently Tracy).
//!
//! This crate is `std`-only and keeps `flow_runtime` itself free of profiling dependencies.
//! It listens for tick and component scope callbacks and emits matching profiling zones.
//!
//! ## Backend
//! This crate currently supports the Tracy backend via `tracy-client`.
//!
//! ## Example
//! ```ignore
//! use flow_runtime_profiling::{ComponentNameResolver, ProfilingTraceSink};
//!
//! let _client = tracy_client::Client::start();
//! rt.set_trace_sink(Box::new(ProfilingTraceSink::with_resolver(ComponentNameResolver::default())));
//! rt.tick();
//! ```

mod resolver;
mod sink;

pub use resolver::{ComponentNameResolver, DefaultLabelResolver, LabelResolver};
pub use sink::ProfilingTraceSink;
