// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-component execution state.
//!
//! Components whose work spans more than one execution keep a [`ComponentExecutionState`] in
//! their instance's slot. The slot is empty while the component is idle; the component clears it
//! again once it is done. Destroying the instance releases whatever is still there.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use core::any::Any;

use flow_expr::value::Value;

use crate::components::mqtt::{MqttEvent, MqttHandle};
use crate::flow_state::FlowStateId;
use crate::host::{DialogResult, DialogTicket};

/// Progress of an SCPI component.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScpiPhase {
    /// Appending parts to the command text.
    Building,
    /// Waiting for the interpreter to finish the issued text.
    AwaitingResult,
}

/// State of an SCPI component between executions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScpiState {
    /// Current phase.
    pub phase: ScpiPhase,
    /// Byte offset of the next part.
    pub cursor: usize,
    /// Command or query text built so far.
    pub text: String,
}

impl Default for ScpiState {
    fn default() -> Self {
        Self {
            phase: ScpiPhase::Building,
            cursor: 0,
            text: String::new(),
        }
    }
}

/// Progress of a dialog component.
#[derive(Clone, Debug, PartialEq)]
pub enum DialogPhase {
    /// The dialog is open.
    Awaiting,
    /// The dialog closed; the component has not observed it yet.
    Completed(DialogResult),
}

/// State of a dialog component between executions.
#[derive(Clone, Debug, PartialEq)]
pub struct DialogState {
    /// Ticket handed to the host.
    pub ticket: DialogTicket,
    /// Current phase.
    pub phase: DialogPhase,
}

/// State of an MQTT event component.
#[derive(Clone, Debug, PartialEq)]
pub struct MqttEventState {
    /// Connection being listened to.
    pub handle: MqttHandle,
    /// Delivered events not yet forwarded.
    pub events: VecDeque<MqttEvent>,
}

/// Execution state of one component of one instance.
#[derive(Debug)]
pub enum ComponentExecutionState {
    /// Input component: the value last forwarded.
    Input(Value),
    /// Loop component between iterations.
    Loop {
        /// Assignment target of the iteration variable.
        target: Value,
        /// Last value.
        to: Value,
        /// Value assigned on the last iteration.
        current: Value,
    },
    /// Counter component.
    Counter {
        /// Sequence outputs still to fire.
        remaining: i32,
    },
    /// Watch-variable component: the value last emitted.
    WatchVariable(Value),
    /// Delay component.
    Delay {
        /// Host time at which the delay elapses.
        wake_at_ms: u64,
    },
    /// Call-action component waiting for its action instance.
    CallAction {
        /// The running action.
        child: FlowStateId,
    },
    /// User widget and the page instance it embeds.
    UserWidget {
        /// The embedded instance.
        child: FlowStateId,
    },
    /// Catch-error component with an error to forward.
    CatchError {
        /// Error message.
        message: Value,
    },
    /// On-event component with an event to forward.
    Event(Value),
    /// SCPI component.
    Scpi(ScpiState),
    /// Keypad, keyboard or message box component.
    Dialog(DialogState),
    /// MQTT event component.
    MqttEvent(MqttEventState),
    /// State of a host-registered component.
    Extension(Box<dyn Any>),
}

impl ComponentExecutionState {
    /// Whether an action instance may be freed while this state is allocated.
    ///
    /// Input, loop and counter states describe finished or resumable work; every other state
    /// means the component is still running.
    #[must_use]
    pub fn allows_free(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::Loop { .. } | Self::Counter { .. }
        )
    }

    /// Child instance owned through this state.
    #[must_use]
    pub fn child(&self) -> Option<FlowStateId> {
        match self {
            Self::CallAction { child } | Self::UserWidget { child } => Some(*child),
            _ => None,
        }
    }

    /// Downcasts an extension state.
    #[must_use]
    pub fn extension<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Extension(state) => state.downcast_ref(),
            _ => None,
        }
    }

    /// Mutably downcasts an extension state.
    #[must_use]
    pub fn extension_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            Self::Extension(state) => state.downcast_mut(),
            _ => None,
        }
    }
}
