// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduler tracing hook.
//!
//! A [`TraceSink`] installed with
//! [`Runtime::set_trace_sink`](crate::runtime::Runtime::set_trace_sink) sees every tick and every
//! component dispatch as a pair of enter/exit callbacks. Scopes nest: component scopes always
//! sit inside a tick scope.

use crate::flow_state::FlowStateId;

/// Kind of a traced scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// One scheduler tick.
    Tick,
    /// One component dispatch.
    Component,
}

/// A traced scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceScope {
    /// One scheduler tick.
    Tick {
        /// Queue length when the tick started.
        queue_len: usize,
    },
    /// One component dispatch.
    Component {
        /// Instance the component runs in.
        flow_state: FlowStateId,
        /// Flow index of that instance.
        flow_index: usize,
        /// Component index.
        component_index: usize,
        /// Component type tag.
        type_tag: u16,
    },
}

impl TraceScope {
    /// The scope's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Tick { .. } => ScopeKind::Tick,
            Self::Component { .. } => ScopeKind::Component,
        }
    }
}

/// Receives scope enter/exit callbacks.
pub trait TraceSink {
    /// A scope was entered.
    fn scope_enter(&mut self, scope: &TraceScope);

    /// The innermost open scope was exited.
    fn scope_exit(&mut self, scope: &TraceScope);
}
