// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Component dispatch table.
//!
//! Maps type tags to [`ComponentExecutor`]s. The built-in components are registered when a
//! [`Runtime`](crate::runtime::Runtime) is created; optional families (MQTT) and host extensions
//! are added later with [`ComponentRegistry::register`].

use alloc::rc::Rc;
use core::fmt;

use hashbrown::HashMap;

use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::runtime::{FlowError, Runtime};

/// Executes one component type.
///
/// An executor runs to completion without blocking. Work that must wait keeps its progress in
/// the component's execution state and re-queues the component.
pub trait ComponentExecutor<H: Host> {
    /// Executes component `component_index` of `flow_state`.
    fn execute(
        &self,
        runtime: &mut Runtime<H>,
        flow_state: FlowStateId,
        component_index: usize,
    ) -> Result<(), FlowError>;
}

impl<H, F> ComponentExecutor<H> for F
where
    H: Host,
    F: Fn(&mut Runtime<H>, FlowStateId, usize) -> Result<(), FlowError>,
{
    fn execute(
        &self,
        runtime: &mut Runtime<H>,
        flow_state: FlowStateId,
        component_index: usize,
    ) -> Result<(), FlowError> {
        self(runtime, flow_state, component_index)
    }
}

/// Type tag to executor map.
pub struct ComponentRegistry<H: Host> {
    executors: HashMap<u16, Rc<dyn ComponentExecutor<H>>>,
}

impl<H: Host> fmt::Debug for ComponentRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("len", &self.executors.len())
            .finish_non_exhaustive()
    }
}

impl<H: Host> Default for ComponentRegistry<H> {
    fn default() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }
}

impl<H: Host> ComponentRegistry<H> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` for `type_tag`, returning the executor it replaces.
    pub fn register<E>(&mut self, type_tag: u16, executor: E) -> Option<Rc<dyn ComponentExecutor<H>>>
    where
        E: ComponentExecutor<H> + 'static,
    {
        self.executors.insert(type_tag, Rc::new(executor))
    }

    /// Removes the executor of `type_tag`.
    pub fn unregister(&mut self, type_tag: u16) -> Option<Rc<dyn ComponentExecutor<H>>> {
        self.executors.remove(&type_tag)
    }

    /// Executor of `type_tag`.
    #[must_use]
    pub fn get(&self, type_tag: u16) -> Option<Rc<dyn ComponentExecutor<H>>> {
        self.executors.get(&type_tag).cloned()
    }

    /// Whether `type_tag` has an executor.
    #[must_use]
    pub fn contains(&self, type_tag: u16) -> bool {
        self.executors.contains_key(&type_tag)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
