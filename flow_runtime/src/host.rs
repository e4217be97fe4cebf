// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host interface.
//!
//! Everything outside the flow core (SCPI interpreter, GUI dialogs, clock, native variables)
//! is reached through [`Host`]. Every hook returns promptly: slow work is started here and its
//! completion is delivered later through the runtime's mailbox methods
//! ([`Runtime::scpi_result_is_ready`](crate::runtime::Runtime::scpi_result_is_ready),
//! [`Runtime::complete_dialog`](crate::runtime::Runtime::complete_dialog)).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use flow_expr::value::Value;

use crate::flow_state::FlowStateId;
use crate::template::FlowEventKind;

/// Outcome of issuing an SCPI command or query.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScpiDispatch {
    /// The result will be signalled later via `Runtime::scpi_result_is_ready`.
    Pending,
    /// The result is already available from [`Host::latest_scpi_result`].
    Completed,
}

/// Error reported by the SCPI interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScpiError {
    /// Interpreter error code.
    pub code: i32,
    /// Translated error text.
    pub message: Box<str>,
}

impl fmt::Display for ScpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl core::error::Error for ScpiError {}

/// Error returned by host hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostError {
    /// The native variable does not exist or is read-only.
    UnknownNativeVariable(u16),
    /// No host action function has this index.
    UnknownActionFunction(usize),
    /// The host does not implement this hook.
    Unsupported(&'static str),
    /// The collaborator failed with an error code.
    Code(i32),
    /// The collaborator failed with a message.
    Message(Box<str>),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNativeVariable(id) => write!(f, "Unknown native variable {id}"),
            Self::UnknownActionFunction(index) => write!(f, "Unknown action function {index}"),
            Self::Unsupported(what) => write!(f, "{what} is not supported"),
            Self::Code(code) => write!(f, "error code: {code}"),
            Self::Message(message) => f.write_str(message),
        }
    }
}

impl core::error::Error for HostError {}

/// Log severity, numbered as on the debugger wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogSeverity {
    /// Unrecoverable.
    Fatal = 0,
    /// Error.
    Error = 1,
    /// Warning.
    Warning = 2,
    /// SCPI traffic.
    Scpi = 3,
    /// Informational.
    Info = 4,
    /// Debug output.
    Debug = 5,
}

/// Identifies an outstanding dialog request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DialogTicket(pub u32);

/// How a dialog was closed.
#[derive(Clone, Debug, PartialEq)]
pub enum DialogResult {
    /// Confirmed with a value (keypad number, keyboard text).
    Value(Value),
    /// A question button was chosen.
    Button(usize),
    /// An info or error box was closed.
    Dismissed,
    /// The user cancelled.
    Cancelled,
}

/// Numeric input request.
#[derive(Clone, Debug, PartialEq)]
pub struct KeypadRequest {
    /// Label shown above the keypad.
    pub label: String,
    /// Starting value.
    pub initial: f32,
    /// Smallest accepted value.
    pub min: f32,
    /// Largest accepted value.
    pub max: f32,
    /// Decimal places shown.
    pub precision: f32,
    /// Unit name, may be empty.
    pub unit: String,
}

/// Text input request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyboardRequest {
    /// Label, already suffixed with `": "` when not empty.
    pub label: String,
    /// Starting text.
    pub initial_text: String,
    /// Minimum accepted length.
    pub min_chars: i32,
    /// Maximum accepted length.
    pub max_chars: i32,
    /// Mask the entered text.
    pub password: bool,
}

/// Message box request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBoxRequest {
    /// Informational message with a close button.
    Info {
        /// Message text.
        message: String,
    },
    /// Error message with a close button.
    Error {
        /// Message text.
        message: String,
    },
    /// Question with one button per label.
    Question {
        /// Message text.
        message: String,
        /// Button labels.
        buttons: Vec<String>,
    },
}

/// An event delivered to on-event components.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowEvent {
    /// The page was opened.
    PageOpen,
    /// The page was closed.
    PageClose,
    /// A key was pressed.
    KeyDown(i32),
}

impl FlowEvent {
    /// The kind on-event components filter on.
    #[must_use]
    pub fn kind(&self) -> FlowEventKind {
        match self {
            Self::PageOpen => FlowEventKind::PageOpen,
            Self::PageClose => FlowEventKind::PageClose,
            Self::KeyDown(_) => FlowEventKind::KeyDown,
        }
    }

    /// Value carried to the component's data output.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::PageOpen | Self::PageClose => Value::Null,
            Self::KeyDown(key) => Value::Int32(*key),
        }
    }
}

/// Hooks into the surrounding firmware.
///
/// Only [`Host::now_ms`] is required; every other hook has a conservative default so hosts
/// implement just the collaborators their flows use.
pub trait Host {
    /// Monotonic milliseconds.
    fn now_ms(&mut self) -> u64;

    /// Reads native variable `id`.
    fn native_variable(&mut self, id: u16) -> Value {
        let _ = id;
        Value::Undefined
    }

    /// Writes native variable `id`.
    fn set_native_variable(&mut self, id: u16, value: Value) -> Result<(), HostError> {
        let _ = value;
        Err(HostError::UnknownNativeVariable(id))
    }

    /// Receives log output of log components and SCPI traffic.
    fn log(&mut self, severity: LogSeverity, text: &str) {
        let _ = (severity, text);
    }

    /// Called once for every error no catch-error component handled.
    fn on_flow_error(&mut self, flow_state: FlowStateId, component_index: usize, message: &str) {
        let _ = (flow_state, component_index, message);
    }

    /// Shows page `page_id`.
    fn replace_page(&mut self, page_id: i32) {
        let _ = page_id;
    }

    /// Runs native action function `index`.
    fn execute_action_function(&mut self, index: usize) -> Result<(), HostError> {
        Err(HostError::UnknownActionFunction(index))
    }

    /// Executes a dashboard component.
    fn execute_dashboard_component(
        &mut self,
        type_tag: u16,
        flow_state: FlowStateId,
        component_index: usize,
    ) -> Result<(), HostError> {
        let _ = (type_tag, flow_state, component_index);
        Err(HostError::Unsupported("Dashboard component"))
    }

    /// Issues an SCPI command or query. `text` ends with a newline.
    fn execute_scpi(&mut self, text: &str) -> ScpiDispatch {
        let _ = text;
        ScpiDispatch::Completed
    }

    /// Result of the last SCPI command or query.
    fn latest_scpi_result(&mut self) -> Result<String, ScpiError> {
        Err(ScpiError {
            code: -1,
            message: "SCPI is not available".into(),
        })
    }

    /// Abandons the in-flight SCPI request. Must be idempotent.
    fn cancel_scpi(&mut self) {}

    /// Opens the numeric keypad.
    fn show_keypad(&mut self, ticket: DialogTicket, request: KeypadRequest) {
        let _ = (ticket, request);
    }

    /// Opens the text keyboard.
    fn show_keyboard(&mut self, ticket: DialogTicket, request: KeyboardRequest) {
        let _ = (ticket, request);
    }

    /// Opens a message box.
    fn show_message_box(&mut self, ticket: DialogTicket, request: MessageBoxRequest) {
        let _ = (ticket, request);
    }

    /// Closes the dialog opened for `ticket`. Must be idempotent.
    fn cancel_dialog(&mut self, ticket: DialogTicket) {
        let _ = ticket;
    }
}
