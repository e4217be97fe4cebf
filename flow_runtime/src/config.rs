// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime configuration.

use flow_expr::eval::{DEFAULT_STACK_DEPTH, EvalLimits};

/// Tunables for a [`Runtime`](crate::runtime::Runtime).
///
/// The defaults match the firmware this runtime was written for: a 1000-entry queue, a
/// 20-deep evaluation stack, and a 5 ms tick budget checked every 5 components.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of pending execution queue entries.
    pub queue_capacity: usize,
    /// Expression evaluator stack depth.
    pub stack_depth: usize,
    /// Wall-clock budget for a single tick, in host milliseconds.
    pub tick_budget_ms: u64,
    /// Number of executed components between budget checks.
    pub budget_check_interval: usize,
    /// Size of the debugger's inbound line buffer, in bytes.
    pub debugger_input_capacity: usize,
    /// Maximum number of live flow instances.
    pub max_flow_states: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            stack_depth: DEFAULT_STACK_DEPTH,
            tick_budget_ms: 5,
            budget_check_interval: 5,
            debugger_input_capacity: 64,
            max_flow_states: 256,
        }
    }
}

impl RuntimeConfig {
    /// Sets the execution queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the evaluator stack depth.
    #[must_use]
    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }

    /// Sets the per-tick time budget.
    #[must_use]
    pub fn with_tick_budget_ms(mut self, budget_ms: u64) -> Self {
        self.tick_budget_ms = budget_ms;
        self
    }

    /// Sets how many components run between budget checks. Zero is treated as one.
    #[must_use]
    pub fn with_budget_check_interval(mut self, interval: usize) -> Self {
        self.budget_check_interval = interval;
        self
    }

    /// Sets the debugger input buffer size.
    #[must_use]
    pub fn with_debugger_input_capacity(mut self, capacity: usize) -> Self {
        self.debugger_input_capacity = capacity;
        self
    }

    /// Sets the maximum number of live flow instances.
    #[must_use]
    pub fn with_max_flow_states(mut self, max: usize) -> Self {
        self.max_flow_states = max;
        self
    }

    /// Evaluator limits derived from this configuration.
    #[inline]
    #[must_use]
    pub fn eval_limits(&self) -> EvalLimits {
        EvalLimits {
            stack_depth: self.stack_depth,
        }
    }
}
