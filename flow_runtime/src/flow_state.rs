// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Running flow instances.
//!
//! A [`FlowState`] is one live instance of a [`Flow`](crate::template::Flow): its value slots,
//! per-component execution states and its place in the parent/child instance tree. Instances live
//! in a [`FlowStateArena`] and are addressed by [`FlowStateId`], an index plus a generation, so a
//! handle kept past destruction is detected instead of aliasing whatever reuses the slot.

use alloc::vec::Vec;
use core::fmt;

use flow_expr::value::Value;

use crate::execution_state::ComponentExecutionState;
use crate::template::Flow;

/// Handle to a live flow instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowStateId {
    index: u32,
    generation: u32,
}

impl FlowStateId {
    /// Rebuilds a handle from its parts.
    ///
    /// A handle whose generation no longer matches its slot is rejected as stale by every
    /// runtime method.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena index. This is the identity the debugger sees and is reused after destruction.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the arena slot when this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for FlowStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// One running instance of a flow.
#[derive(Debug)]
pub struct FlowState {
    id: FlowStateId,
    flow_index: usize,
    is_action: bool,
    pub(crate) error: bool,
    pub(crate) num_async: u32,
    parent: Option<FlowStateId>,
    parent_component: Option<usize>,
    pub(crate) values: Vec<Value>,
    pub(crate) execution_states: Vec<Option<ComponentExecutionState>>,
    pub(crate) async_flags: Vec<bool>,
    pub(crate) last_run_ms: Vec<Option<u64>>,
    pub(crate) executing_component: Option<usize>,
    pub(crate) children: Vec<FlowStateId>,
    pub(crate) queued: usize,
}

impl FlowState {
    pub(crate) fn new(
        id: FlowStateId,
        flow_index: usize,
        flow: &Flow,
        parent: Option<(FlowStateId, usize)>,
        is_action: bool,
    ) -> Self {
        let mut values = Vec::with_capacity(flow.slot_count());
        values.resize_with(flow.input_count(), Value::default);
        values.extend(flow.local_variables.iter().cloned());
        let component_count = flow.components.len();
        let mut execution_states = Vec::with_capacity(component_count);
        execution_states.resize_with(component_count, || None);
        let mut async_flags = Vec::new();
        async_flags.resize(component_count, false);
        let mut last_run_ms = Vec::new();
        last_run_ms.resize(component_count, None);
        Self {
            id,
            flow_index,
            is_action,
            error: false,
            num_async: 0,
            parent: parent.map(|(p, _)| p),
            parent_component: parent.map(|(_, c)| c),
            values,
            execution_states,
            async_flags,
            last_run_ms,
            executing_component: None,
            children: Vec::new(),
            queued: 0,
        }
    }

    /// This instance's handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FlowStateId {
        self.id
    }

    /// Index of the flow this instance runs.
    #[inline]
    #[must_use]
    pub fn flow_index(&self) -> usize {
        self.flow_index
    }

    /// Whether this instance was created by a call-action component.
    #[inline]
    #[must_use]
    pub fn is_action(&self) -> bool {
        self.is_action
    }

    /// Whether an unhandled error halted this instance.
    #[inline]
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Number of components with outstanding async work.
    #[inline]
    #[must_use]
    pub fn async_count(&self) -> u32 {
        self.num_async
    }

    /// Parent instance, `None` for pages.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<FlowStateId> {
        self.parent
    }

    /// Component of the parent that owns this instance.
    #[inline]
    #[must_use]
    pub fn parent_component(&self) -> Option<usize> {
        self.parent_component
    }

    /// Child instances.
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[FlowStateId] {
        &self.children
    }

    /// All value slots: inputs first, then local variables.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of slot `slot`.
    #[inline]
    #[must_use]
    pub fn value(&self, slot: usize) -> Option<&Value> {
        self.values.get(slot)
    }

    /// Execution state of component `component`, if one is allocated.
    #[inline]
    #[must_use]
    pub fn execution_state(&self, component: usize) -> Option<&ComponentExecutionState> {
        self.execution_states.get(component)?.as_ref()
    }

    /// Component currently being executed, cleared once its sequence inputs are reset.
    #[inline]
    #[must_use]
    pub fn executing_component(&self) -> Option<usize> {
        self.executing_component
    }

    /// Number of queue entries for this instance.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued
    }
}

#[derive(Debug)]
struct ArenaSlot {
    generation: u32,
    state: Option<FlowState>,
}

/// Generational storage for flow instances.
///
/// Freed indices are reused most-recently-freed first, each time with a new generation.
#[derive(Debug)]
pub(crate) struct FlowStateArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
    capacity: usize,
}

impl FlowStateArena {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity,
        }
    }

    /// Number of live instances.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Allocates a slot and stores the state built by `make`.
    ///
    /// Returns `None` when `capacity` instances are already live.
    pub(crate) fn insert(
        &mut self,
        make: impl FnOnce(FlowStateId) -> FlowState,
    ) -> Option<FlowStateId> {
        if self.live >= self.capacity {
            return None;
        }
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                self.slots.push(ArenaSlot {
                    generation: 0,
                    state: None,
                });
                index
            }
        };
        let slot = self.slots.get_mut(index as usize)?;
        let id = FlowStateId {
            index,
            generation: slot.generation,
        };
        slot.state = Some(make(id));
        self.live += 1;
        Some(id)
    }

    /// Removes the state and retires `id`.
    pub(crate) fn remove(&mut self, id: FlowStateId) -> Option<FlowState> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let state = slot.state.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(state)
    }

    pub(crate) fn get(&self, id: FlowStateId) -> Option<&FlowState> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.state.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: FlowStateId) -> Option<&mut FlowState> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.state.as_mut()
    }

    pub(crate) fn contains(&self, id: FlowStateId) -> bool {
        self.get(id).is_some()
    }

    /// Live instances in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &FlowState> {
        self.slots.iter().filter_map(|slot| slot.state.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FlowState> {
        self.slots.iter_mut().filter_map(|slot| slot.state.as_mut())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::template::{Component, InputFlags, component_type};
    use alloc::vec;

    fn flow() -> Flow {
        Flow {
            components: vec![Component::new(component_type::NOOP)],
            component_inputs: vec![InputFlags::SEQUENCE, InputFlags::DATA],
            local_variables: vec![Value::Int32(4)],
        }
    }

    #[test]
    fn new_state_sizes_slots_from_flow() {
        let mut arena = FlowStateArena::new(4);
        let f = flow();
        let id = arena
            .insert(|id| FlowState::new(id, 0, &f, None, false))
            .unwrap();
        let state = arena.get(id).unwrap();
        assert_eq!(
            state.values(),
            &[Value::Undefined, Value::Undefined, Value::Int32(4)]
        );
        assert!(state.execution_state(0).is_none());
        assert_eq!(state.parent(), None);
    }

    #[test]
    fn removed_id_is_stale_and_index_is_reused() {
        let mut arena = FlowStateArena::new(4);
        let f = flow();
        let a = arena
            .insert(|id| FlowState::new(id, 0, &f, None, false))
            .unwrap();
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none(), "double remove is rejected");
        assert!(arena.get(a).is_none());

        let b = arena
            .insert(|id| FlowState::new(id, 0, &f, None, false))
            .unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn capacity_limits_live_instances() {
        let mut arena = FlowStateArena::new(1);
        let f = flow();
        let a = arena
            .insert(|id| FlowState::new(id, 0, &f, None, false))
            .unwrap();
        assert!(
            arena
                .insert(|id| FlowState::new(id, 0, &f, None, false))
                .is_none()
        );
        arena.remove(a);
        assert_eq!(arena.len(), 0);
        assert!(
            arena
                .insert(|id| FlowState::new(id, 0, &f, None, false))
                .is_some()
        );
    }
}
