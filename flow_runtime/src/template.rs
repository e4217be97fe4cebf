// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static flow definitions.
//!
//! A [`FlowDefinition`] is produced by an external design tool and consumed read-only: the
//! runtime never mutates it. Each [`Flow`] lists its components, the flags of every input slot,
//! and the initial values of its local variables. Component properties are compiled instruction
//! streams evaluated by [`flow_expr::eval::Evaluator`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use flow_expr::value::Value;

/// Component type tags.
///
/// Tags below [`FIRST_ACTION_COMPONENT_TYPE`] are widgets, tags at or above
/// [`FIRST_DASHBOARD_COMPONENT_TYPE`] are executed by the host.
pub mod component_type {
    /// First tag that is not a widget.
    pub const FIRST_ACTION_COMPONENT_TYPE: u16 = 1000;
    /// First tag delegated to the host as a dashboard component.
    pub const FIRST_DASHBOARD_COMPONENT_TYPE: u16 = 10000;

    /// Widget that embeds another flow as a child page.
    pub const USER_WIDGET: u16 = 30;

    /// Entry point of a flow.
    pub const START: u16 = 1001;
    /// Exit point of an action flow.
    pub const END: u16 = 1002;
    /// Reads one input of the calling component.
    pub const INPUT: u16 = 1003;
    /// Writes one output of the calling component.
    pub const OUTPUT: u16 = 1004;
    /// Emits an expression's value whenever it changes.
    pub const WATCH_VARIABLE: u16 = 1005;
    /// Emits an expression's value.
    pub const EVAL_EXPR: u16 = 1006;
    /// Assigns expressions to variables.
    pub const SET_VARIABLE: u16 = 1007;
    /// Routes to the first case whose condition holds.
    pub const SWITCH: u16 = 1008;
    /// Compares two values.
    pub const COMPARE: u16 = 1009;
    /// Branches on a boolean.
    pub const IS_TRUE: u16 = 1010;
    /// Emits a constant.
    pub const CONSTANT: u16 = 1011;
    /// Logs a value.
    pub const LOG: u16 = 1012;
    /// Runs another flow as an action.
    pub const CALL_ACTION: u16 = 1013;
    /// Waits for a number of milliseconds.
    pub const DELAY: u16 = 1014;
    /// Raises a flow error.
    pub const ERROR: u16 = 1015;
    /// Receives flow errors raised below it.
    pub const CATCH_ERROR: u16 = 1016;
    /// Fires its sequence output a fixed number of times.
    pub const COUNTER: u16 = 1017;
    /// Iterates a variable over a numeric range.
    pub const LOOP: u16 = 1018;
    /// Replaces the current page.
    pub const SHOW_PAGE: u16 = 1019;
    /// Talks to the SCPI interpreter.
    pub const SCPI: u16 = 1020;
    /// Shows an info, error or question dialog.
    pub const SHOW_MESSAGE_BOX: u16 = 1021;
    /// Asks for text input.
    pub const SHOW_KEYBOARD: u16 = 1022;
    /// Asks for numeric input.
    pub const SHOW_KEYPAD: u16 = 1023;
    /// Passes sequence flow through.
    pub const NOOP: u16 = 1024;
    /// Design-time annotation.
    pub const COMMENT: u16 = 1025;
    /// Fires on page and key events.
    pub const ON_EVENT: u16 = 1026;
    /// Sorts a copy of an array.
    pub const SORT_ARRAY: u16 = 1027;
    /// Waits for a boolean variable to be false, then sets it.
    pub const TEST_AND_SET: u16 = 1028;

    /// Creates an MQTT connection object.
    pub const MQTT_INIT: u16 = 1040;
    /// Connects an MQTT connection.
    pub const MQTT_CONNECT: u16 = 1041;
    /// Disconnects an MQTT connection.
    pub const MQTT_DISCONNECT: u16 = 1042;
    /// Forwards MQTT connection events.
    pub const MQTT_EVENT: u16 = 1043;
    /// Subscribes to an MQTT topic.
    pub const MQTT_SUBSCRIBE: u16 = 1044;
    /// Unsubscribes from an MQTT topic.
    pub const MQTT_UNSUBSCRIBE: u16 = 1045;
    /// Publishes an MQTT message.
    pub const MQTT_PUBLISH: u16 = 1046;

    /// Returns `true` for widget tags.
    #[inline]
    #[must_use]
    pub const fn is_widget(type_tag: u16) -> bool {
        type_tag < FIRST_ACTION_COMPONENT_TYPE
    }

    /// Returns `true` for tags the host executes.
    #[inline]
    #[must_use]
    pub const fn is_dashboard(type_tag: u16) -> bool {
        type_tag >= FIRST_DASHBOARD_COMPONENT_TYPE
    }

    /// Display name of a built-in tag.
    #[must_use]
    pub const fn name(type_tag: u16) -> Option<&'static str> {
        Some(match type_tag {
            USER_WIDGET => "UserWidget",
            START => "Start",
            END => "End",
            INPUT => "Input",
            OUTPUT => "Output",
            WATCH_VARIABLE => "WatchVariable",
            EVAL_EXPR => "EvalExpr",
            SET_VARIABLE => "SetVariable",
            SWITCH => "Switch",
            COMPARE => "Compare",
            IS_TRUE => "IsTrue",
            CONSTANT => "Constant",
            LOG => "Log",
            CALL_ACTION => "CallAction",
            DELAY => "Delay",
            ERROR => "Error",
            CATCH_ERROR => "CatchError",
            COUNTER => "Counter",
            LOOP => "Loop",
            SHOW_PAGE => "ShowPage",
            SCPI => "SCPI",
            SHOW_MESSAGE_BOX => "ShowMessageBox",
            SHOW_KEYBOARD => "ShowKeyboard",
            SHOW_KEYPAD => "ShowKeypad",
            NOOP => "NoOp",
            COMMENT => "Comment",
            ON_EVENT => "OnEvent",
            SORT_ARRAY => "SortArray",
            TEST_AND_SET => "TestAndSet",
            MQTT_INIT => "MQTTInit",
            MQTT_CONNECT => "MQTTConnect",
            MQTT_DISCONNECT => "MQTTDisconnect",
            MQTT_EVENT => "MQTTEvent",
            MQTT_SUBSCRIBE => "MQTTSubscribe",
            MQTT_UNSUBSCRIBE => "MQTTUnsubscribe",
            MQTT_PUBLISH => "MQTTPublish",
            _ => return None,
        })
    }
}

/// Property indices of the built-in components.
pub mod property {
    /// Watched expression.
    pub const WATCH_VARIABLE_EXPRESSION: usize = 0;
    /// Evaluated expression.
    pub const EVAL_EXPR_EXPRESSION: usize = 0;
    /// Left operand.
    pub const COMPARE_A: usize = 0;
    /// Right operand.
    pub const COMPARE_B: usize = 1;
    /// Upper bound for [`CompareOperator::Between`](super::CompareOperator::Between).
    pub const COMPARE_C: usize = 2;
    /// Tested value.
    pub const IS_TRUE_VALUE: usize = 0;
    /// Emitted value.
    pub const CONSTANT_VALUE: usize = 0;
    /// Logged value.
    pub const LOG_VALUE: usize = 0;
    /// Delay length.
    pub const DELAY_MILLISECONDS: usize = 0;
    /// Error message.
    pub const ERROR_MESSAGE: usize = 0;
    /// Number of sequence outputs to fire.
    pub const COUNTER_COUNT: usize = 0;
    /// Iteration variable (assignable).
    pub const LOOP_VARIABLE: usize = 0;
    /// First value.
    pub const LOOP_FROM: usize = 1;
    /// Last value.
    pub const LOOP_TO: usize = 2;
    /// Increment.
    pub const LOOP_STEP: usize = 3;
    /// Page id.
    pub const SHOW_PAGE_PAGE: usize = 0;
    /// Message text.
    pub const SHOW_MESSAGE_BOX_MESSAGE: usize = 0;
    /// Button labels of a question dialog.
    pub const SHOW_MESSAGE_BOX_BUTTONS: usize = 1;
    /// Keyboard label.
    pub const SHOW_KEYBOARD_LABEL: usize = 0;
    /// Initial text.
    pub const SHOW_KEYBOARD_INITIAL_TEXT: usize = 1;
    /// Minimum text length.
    pub const SHOW_KEYBOARD_MIN_CHARS: usize = 2;
    /// Maximum text length.
    pub const SHOW_KEYBOARD_MAX_CHARS: usize = 3;
    /// Keypad label.
    pub const SHOW_KEYPAD_LABEL: usize = 0;
    /// Initial value.
    pub const SHOW_KEYPAD_INITIAL_VALUE: usize = 1;
    /// Minimum value.
    pub const SHOW_KEYPAD_MIN: usize = 2;
    /// Maximum value.
    pub const SHOW_KEYPAD_MAX: usize = 3;
    /// Displayed precision.
    pub const SHOW_KEYPAD_PRECISION: usize = 4;
    /// Unit name.
    pub const SHOW_KEYPAD_UNIT: usize = 5;
    /// Array to sort.
    pub const SORT_ARRAY_ARRAY: usize = 0;
    /// Boolean lock variable (assignable).
    pub const TEST_AND_SET_VARIABLE: usize = 0;
}

/// Part tags of an SCPI component's instruction stream.
///
/// Parts follow each other without padding. A literal is its tag, a little-endian `u16` byte
/// length and the UTF-8 bytes. An expression part is its tag followed by an instruction stream
/// ending in `end`. A query-with-assignment is its tag followed by an assignable instruction
/// stream that receives the parsed result.
pub mod scpi_part {
    /// Literal text.
    pub const LITERAL: u8 = 1;
    /// Embedded expression, appended in its textual form.
    pub const EXPRESSION: u8 = 2;
    /// Issue the text as a query and assign the result.
    pub const QUERY_WITH_ASSIGNMENT: u8 = 3;
    /// Issue the text as a query and discard the result.
    pub const QUERY: u8 = 4;
    /// Issue the text as a command.
    pub const COMMAND: u8 = 5;
    /// End of the stream.
    pub const END: u8 = 6;
}

/// Flags of one input slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InputFlags(pub u8);

impl InputFlags {
    /// Sequence input: carries "run now" rather than data.
    pub const SEQ: u8 = 1;
    /// Data input that need not be defined for the component to run.
    pub const OPTIONAL: u8 = 2;

    /// A required data input.
    pub const DATA: Self = Self(0);
    /// A sequence input.
    pub const SEQUENCE: Self = Self(Self::SEQ);

    /// Returns `true` for sequence inputs.
    #[inline]
    #[must_use]
    pub const fn is_seq(self) -> bool {
        self.0 & Self::SEQ != 0
    }

    /// Returns `true` for optional inputs.
    #[inline]
    #[must_use]
    pub const fn is_optional(self) -> bool {
        self.0 & Self::OPTIONAL != 0
    }
}

/// A wire from an output to an input slot of another component of the same flow.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Target component index.
    pub target_component: u16,
    /// Target input slot (flow-wide index).
    pub target_input: u16,
}

/// One output pin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentOutput {
    /// Wires leaving this pin.
    pub connections: Vec<Connection>,
    /// Whether this is the component's sequence output.
    pub is_seq_out: bool,
}

impl ComponentOutput {
    /// A data output with the given connections.
    #[must_use]
    pub fn data(connections: Vec<Connection>) -> Self {
        Self {
            connections,
            is_seq_out: false,
        }
    }

    /// A sequence output with the given connections.
    #[must_use]
    pub fn seq(connections: Vec<Connection>) -> Self {
        Self {
            connections,
            is_seq_out: true,
        }
    }
}

/// Operator of a compare component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareOperator {
    /// `a == b`
    Equal,
    /// `a != b`
    NotEqual,
    /// `a < b`
    Less,
    /// `a > b`
    Greater,
    /// `a <= b`
    LessOrEqual,
    /// `a >= b`
    GreaterOrEqual,
    /// `b <= a <= c`
    Between,
}

/// Kind of a message box.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageBoxKind {
    /// Informational, single close button.
    Info = 1,
    /// Error, single close button.
    Error = 2,
    /// Question with user-defined buttons.
    Question = 3,
}

/// Event an on-event component listens for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowEventKind {
    /// The page owning the flow was opened.
    PageOpen,
    /// The page owning the flow was closed.
    PageClose,
    /// A key was pressed.
    KeyDown,
}

/// Output indices of an MQTT event component, one per connection event.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MqttEventOutputs {
    /// Connected.
    pub connect: Option<u16>,
    /// Reconnecting.
    pub reconnect: Option<u16>,
    /// Connection closed.
    pub close: Option<u16>,
    /// Broker disconnected.
    pub disconnect: Option<u16>,
    /// Went offline.
    pub offline: Option<u16>,
    /// Client ended.
    pub end: Option<u16>,
    /// Error, carries the message.
    pub error: Option<u16>,
    /// Message received, carries `[topic, payload]`.
    pub message: Option<u16>,
}

/// Sort in ascending order.
pub const SORT_ASCENDING: u32 = 1 << 0;
/// Compare strings case-insensitively.
pub const SORT_IGNORE_CASE: u32 = 1 << 1;

/// Type-specific static data of a component.
#[derive(Debug, Default)]
pub enum ComponentPayload {
    /// Nothing beyond properties.
    #[default]
    None,
    /// Call-action and user-widget target.
    Call {
        /// Called flow. Indices past the flow count name host action functions.
        flow_index: usize,
        /// First input slot forwarded to the callee's input components.
        inputs_start_index: u16,
        /// First output forwarded from the callee's output components.
        outputs_start_index: u16,
    },
    /// Input component.
    Input {
        /// Input of the calling component to read, relative to its start index.
        input_index: u16,
    },
    /// Output component.
    Output {
        /// Output of the calling component to write, relative to its start index.
        output_index: u16,
    },
    /// Switch cases. Case `i` tests property `i` and fires `outputs[i]`.
    Switch {
        /// Output index per case.
        outputs: Vec<u16>,
    },
    /// Compare operator.
    Compare {
        /// Operator applied to properties A, B (and C).
        operator: CompareOperator,
    },
    /// SCPI part stream.
    Scpi {
        /// Encoded parts.
        instructions: Vec<u8>,
    },
    /// Message box kind.
    MessageBox {
        /// Dialog kind.
        kind: MessageBoxKind,
    },
    /// Keyboard options.
    Keyboard {
        /// Mask the entered text.
        password: bool,
    },
    /// On-event filter.
    OnEvent {
        /// Event to react to.
        event: FlowEventKind,
    },
    /// Sort options.
    SortArray {
        /// Expected array type of the input.
        array_type: u32,
        /// Field of struct elements to sort by, or `-1` to sort the elements themselves.
        struct_field_index: i32,
        /// [`SORT_ASCENDING`] and [`SORT_IGNORE_CASE`] bits.
        flags: u32,
    },
    /// MQTT event output routing.
    MqttEvent(MqttEventOutputs),
    /// Data for host-registered components.
    Extension(Box<dyn Any>),
}

/// One node of a flow.
#[derive(Debug, Default)]
pub struct Component {
    /// Type tag, see [`component_type`].
    pub type_tag: u16,
    /// Flow-wide input slot index of each input.
    pub inputs: Vec<u16>,
    /// Output pins.
    pub outputs: Vec<ComponentOutput>,
    /// Compiled property expressions.
    pub properties: Vec<Vec<u8>>,
    /// Output that receives this component's errors instead of the catch-error search.
    pub error_catch_output: Option<u16>,
    /// Type-specific data.
    pub payload: ComponentPayload,
}

impl Component {
    /// Creates a component with no wiring.
    #[must_use]
    pub fn new(type_tag: u16) -> Self {
        Self {
            type_tag,
            ..Self::default()
        }
    }

    /// Sets the input slot indices.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<u16>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Appends an output pin.
    #[must_use]
    pub fn with_output(mut self, output: ComponentOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Appends a property expression.
    #[must_use]
    pub fn with_property(mut self, instructions: Vec<u8>) -> Self {
        self.properties.push(instructions);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: ComponentPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Routes errors to `output`.
    #[must_use]
    pub fn with_error_catch_output(mut self, output: u16) -> Self {
        self.error_catch_output = Some(output);
        self
    }

    /// Index of the sequence output, if any.
    #[must_use]
    pub fn seq_out(&self) -> Option<usize> {
        self.outputs.iter().position(|o| o.is_seq_out)
    }
}

/// One flow: a page, action or user widget body.
#[derive(Debug, Default)]
pub struct Flow {
    /// Components, addressed by index.
    pub components: Vec<Component>,
    /// Flags of every input slot.
    pub component_inputs: Vec<InputFlags>,
    /// Initial values of the local variables.
    pub local_variables: Vec<Value>,
}

impl Flow {
    /// Number of input slots. Local variable slots follow them.
    #[inline]
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.component_inputs.len()
    }

    /// Total number of value slots of an instance of this flow.
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.component_inputs.len() + self.local_variables.len()
    }

    /// Flags of input slot `slot`, or data-input flags if out of range.
    #[must_use]
    pub fn input_flags(&self, slot: u16) -> InputFlags {
        self.component_inputs
            .get(usize::from(slot))
            .copied()
            .unwrap_or_default()
    }
}

/// Structural errors found by [`FlowDefinition::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// A component input names a slot past the flow's input count.
    InputSlotOutOfRange {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
        /// Offending slot.
        slot: u16,
    },
    /// A connection targets a missing component or input slot.
    DanglingConnection {
        /// Flow index.
        flow: usize,
        /// Source component index.
        component: usize,
        /// Offending connection.
        connection: Connection,
    },
    /// The error-catch output is not an output of the component.
    ErrorCatchOutputOutOfRange {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
    },
    /// A component index does not fit the 16-bit wire fields.
    TooManyComponents {
        /// Flow index.
        flow: usize,
    },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputSlotOutOfRange {
                flow,
                component,
                slot,
            } => write!(
                f,
                "input slot out of range: flow={flow} component={component} slot={slot}"
            ),
            Self::DanglingConnection {
                flow,
                component,
                connection,
            } => write!(
                f,
                "dangling connection: flow={flow} component={component} target={}:{}",
                connection.target_component, connection.target_input
            ),
            Self::ErrorCatchOutputOutOfRange { flow, component } => write!(
                f,
                "error catch output out of range: flow={flow} component={component}"
            ),
            Self::TooManyComponents { flow } => write!(f, "too many components: flow={flow}"),
        }
    }
}

impl core::error::Error for TemplateError {}

/// A complete compiled program.
#[derive(Debug, Default)]
pub struct FlowDefinition {
    /// Flows, addressed by index. Flow 0 is the main page.
    pub flows: Vec<Flow>,
    /// Constant pool shared by every flow.
    pub constants: Vec<Value>,
    /// Initial values of the declared global variables.
    pub globals: Vec<Value>,
}

impl FlowDefinition {
    /// Returns flow `index`.
    #[inline]
    #[must_use]
    pub fn flow(&self, index: usize) -> Option<&Flow> {
        self.flows.get(index)
    }

    /// Returns component `component` of flow `flow`.
    #[inline]
    #[must_use]
    pub fn component(&self, flow: usize, component: usize) -> Option<&Component> {
        self.flows.get(flow)?.components.get(component)
    }

    /// Checks that every wire and slot index stays inside its flow.
    pub fn validate(&self) -> Result<(), TemplateError> {
        for (flow_index, flow) in self.flows.iter().enumerate() {
            if flow.components.len() > usize::from(u16::MAX) {
                return Err(TemplateError::TooManyComponents { flow: flow_index });
            }
            let input_count = flow.input_count();
            for (component_index, component) in flow.components.iter().enumerate() {
                if let Some(&slot) = component
                    .inputs
                    .iter()
                    .find(|&&slot| usize::from(slot) >= input_count)
                {
                    return Err(TemplateError::InputSlotOutOfRange {
                        flow: flow_index,
                        component: component_index,
                        slot,
                    });
                }
                for output in &component.outputs {
                    for &connection in &output.connections {
                        let target_ok = flow
                            .components
                            .get(usize::from(connection.target_component))
                            .is_some()
                            && usize::from(connection.target_input) < input_count;
                        if !target_ok {
                            return Err(TemplateError::DanglingConnection {
                                flow: flow_index,
                                component: component_index,
                                connection,
                            });
                        }
                    }
                }
                if let Some(output) = component.error_catch_output
                    && usize::from(output) >= component.outputs.len()
                {
                    return Err(TemplateError::ErrorCatchOutputOutOfRange {
                        flow: flow_index,
                        component: component_index,
                    });
                }
            }
        }
        Ok(())
    }
}
