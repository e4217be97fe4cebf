// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Values and expression evaluation for the flow runtime.
//!
//! Flow programs carry their property expressions as compiled instruction streams. This crate
//! owns the pieces needed to turn such a stream into a [`Value`](value::Value):
//!
//! - [`value`]: the tagged, reference-counted value model shared by every slot and stack cell.
//! - [`instruction`]: the 16-bit instruction word encoding.
//! - [`ops`]: the numbered operation table invoked by `operation` instructions.
//! - [`eval`]: the bounded-stack evaluator and the [`EvalContext`](eval::EvalContext) seam that
//!   supplies constants, inputs and variables.
//! - [`asm`]: a small builder for assembling instruction streams (used by tests and tooling).
//!
//! The crate is `no_std + alloc`. Enabling the `std` feature turns on the transcendental math
//! operations, which need the platform float routines.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod asm;
pub mod eval;
pub mod instruction;
pub mod ops;
pub mod value;
