// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::resolver::{
    DefaultLabelResolver, LabelResolver, default_component_label, default_tick_label,
};
use flow_runtime::trace::{ScopeKind, TraceScope, TraceSink};
use std::string::String;
use std::vec::Vec;

type BackendGuard = tracy_client::Span;

struct ScopeEntry {
    kind: ScopeKind,
    // Keep the label alive for backends that may borrow it.
    label: String,
    guard: Option<BackendGuard>,
}

/// A `TraceSink` that emits Tracy zones via `tracy-client`.
pub struct ProfilingTraceSink<R = DefaultLabelResolver> {
    resolver: R,
    stack: Vec<ScopeEntry>,
}

impl ProfilingTraceSink<DefaultLabelResolver> {
    /// Create a new sink with index-based labels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: LabelResolver> ProfilingTraceSink<R> {
    /// Create a new sink with a custom label resolver.
    #[must_use]
    pub fn with_resolver(resolver: R) -> Self {
        Self {
            resolver,
            stack: Vec::new(),
        }
    }

    /// Number of open scopes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn on_scope_enter(&mut self, scope: &TraceScope) {
        let label = self.resolve_label(scope);
        let line = match *scope {
            TraceScope::Tick { .. } => 0,
            TraceScope::Component {
                component_index, ..
            } => u32::try_from(component_index).unwrap_or(u32::MAX),
        };
        let guard = self.start_scope(scope.kind(), &label, line);
        self.stack.push(ScopeEntry {
            kind: scope.kind(),
            label,
            guard,
        });
    }

    fn on_scope_exit(&mut self, kind: ScopeKind) {
        if let Some(top) = self.stack.last()
            && top.kind == kind
        {
            if let Some(entry) = self.stack.pop() {
                let ScopeEntry {
                    label: _label,
                    guard: _guard,
                    ..
                } = entry;
                let _ = (_label, _guard);
            }
            return;
        }
        // If the stack got out of sync, drop any active scopes to avoid leaking.
        self.drop_active_scopes();
    }

    fn resolve_label(&mut self, scope: &TraceScope) -> String {
        match *scope {
            TraceScope::Tick { queue_len } => self
                .resolver
                .tick_label(queue_len)
                .unwrap_or_else(default_tick_label),
            TraceScope::Component {
                flow_index,
                component_index,
                type_tag,
                ..
            } => self
                .resolver
                .component_label(flow_index, component_index, type_tag)
                .unwrap_or_else(|| default_component_label(flow_index, component_index, type_tag)),
        }
    }

    fn start_scope(&self, kind: ScopeKind, label: &str, line: u32) -> Option<BackendGuard> {
        let function_name = match kind {
            ScopeKind::Tick => "flow_runtime.tick",
            ScopeKind::Component => "flow_runtime.component",
        };
        let client = tracy_client::Client::running()?;
        Some(client.span_alloc(Some(label), function_name, "flow_runtime", line, 0))
    }

    // Drop in LIFO order so nested spans close inner-to-outer.
    fn drop_active_scopes(&mut self) {
        while let Some(entry) = self.stack.pop() {
            let ScopeEntry {
                label: _label,
                guard: _guard,
                ..
            } = entry;
            let _ = (_label, _guard);
        }
    }
}

impl<R: LabelResolver> TraceSink for ProfilingTraceSink<R> {
    fn scope_enter(&mut self, scope: &TraceScope) {
        self.on_scope_enter(scope);
    }

    fn scope_exit(&mut self, scope: &TraceScope) {
        self.on_scope_exit(scope.kind());
    }
}

impl<R> Default for ProfilingTraceSink<R>
where
    R: LabelResolver + Default,
{
    fn default() -> Self {
        Self::with_resolver(R::default())
    }
}

impl<R> std::fmt::Debug for ProfilingTraceSink<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingTraceSink")
            .field("stack_depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}
