// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MQTT components.
//!
//! These are not built in. A host that implements [`MqttHost`] installs them with
//! [`register_components`]. An init component stores a connection object (an array of type
//! [`MQTT_CONNECTION_TYPE`]) in a variable; the other components take that object as their
//! first property. Broker events reach the flow through
//! [`Runtime::deliver_mqtt_event`](crate::runtime::Runtime::deliver_mqtt_event).

use alloc::format;
use alloc::string::String;
use alloc::vec;

use flow_expr::value::Value;

use crate::execution_state::{ComponentExecutionState, MqttEventState};
use crate::flow_state::FlowStateId;
use crate::host::{Host, HostError};
use crate::runtime::{FlowError, Runtime};
use crate::template::{ComponentPayload, MqttEventOutputs, component_type as t};

/// Array type of a connection object.
pub const MQTT_CONNECTION_TYPE: u32 = 0x4d51_0001;
/// Array type of a received message, `[topic, payload]`.
pub const MQTT_MESSAGE_TYPE: u32 = 0x4d51_0002;

/// Field indices of a connection object.
pub mod connection_field {
    /// Protocol name.
    pub const PROTOCOL: usize = 0;
    /// Broker host.
    pub const HOST: usize = 1;
    /// Broker port.
    pub const PORT: usize = 2;
    /// User name, undefined when anonymous.
    pub const USER_NAME: usize = 3;
    /// Password, undefined when anonymous.
    pub const PASSWORD: usize = 4;
    /// Set once a connect component succeeds.
    pub const IS_CONNECTED: usize = 5;
    /// The host's connection handle.
    pub const ID: usize = 6;
    /// Number of fields.
    pub const COUNT: usize = 7;
}

/// Field indices of a received message.
pub mod message_field {
    /// Topic the message arrived on.
    pub const TOPIC: usize = 0;
    /// Message payload.
    pub const PAYLOAD: usize = 1;
}

/// Property indices of the MQTT components.
pub mod property {
    /// Connection object; assignable on the init component.
    pub const CONNECTION: usize = 0;
    /// Init: protocol name.
    pub const INIT_PROTOCOL: usize = 1;
    /// Init: broker host.
    pub const INIT_HOST: usize = 2;
    /// Init: broker port.
    pub const INIT_PORT: usize = 3;
    /// Init: user name.
    pub const INIT_USER_NAME: usize = 4;
    /// Init: password.
    pub const INIT_PASSWORD: usize = 5;
    /// Subscribe, unsubscribe and publish: topic.
    pub const TOPIC: usize = 1;
    /// Publish: payload.
    pub const PAYLOAD: usize = 2;
}

/// Host handle of one MQTT connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MqttHandle(pub u32);

/// An event reported by an MQTT connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MqttEvent {
    /// Connected to the broker.
    Connect,
    /// Reconnecting.
    Reconnect,
    /// Connection closed.
    Close,
    /// The broker disconnected the client.
    Disconnect,
    /// The client went offline.
    Offline,
    /// The client ended.
    End,
    /// The connection failed.
    Error(String),
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic.
        topic: String,
        /// Payload.
        payload: String,
    },
}

impl MqttEvent {
    /// Output this event leaves through, if the component routes it.
    #[must_use]
    pub fn output(&self, outputs: &MqttEventOutputs) -> Option<u16> {
        match self {
            Self::Connect => outputs.connect,
            Self::Reconnect => outputs.reconnect,
            Self::Close => outputs.close,
            Self::Disconnect => outputs.disconnect,
            Self::Offline => outputs.offline,
            Self::End => outputs.end,
            Self::Error(_) => outputs.error,
            Self::Message { .. } => outputs.message,
        }
    }

    /// Value carried on the event's output.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Error(message) => Value::string(message),
            Self::Message { topic, payload } => Value::array(
                MQTT_MESSAGE_TYPE,
                vec![Value::string(topic), Value::string(payload)],
            ),
            _ => Value::Null,
        }
    }
}

/// Connection parameters of an init component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttOptions {
    /// Protocol name, e.g. `mqtt`.
    pub protocol: String,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: i32,
    /// User name.
    pub user_name: Option<String>,
    /// Password.
    pub password: Option<String>,
}

/// The MQTT client the components drive.
///
/// Calls return promptly; connection events are reported later through
/// [`Runtime::deliver_mqtt_event`](crate::runtime::Runtime::deliver_mqtt_event).
pub trait MqttHost {
    /// Creates a connection.
    fn init(&mut self, options: &MqttOptions) -> Result<MqttHandle, HostError>;
    /// Connects to the broker.
    fn connect(&mut self, handle: MqttHandle) -> Result<(), HostError>;
    /// Disconnects from the broker.
    fn disconnect(&mut self, handle: MqttHandle) -> Result<(), HostError>;
    /// Subscribes to `topic`.
    fn subscribe(&mut self, handle: MqttHandle, topic: &str) -> Result<(), HostError>;
    /// Unsubscribes from `topic`.
    fn unsubscribe(&mut self, handle: MqttHandle, topic: &str) -> Result<(), HostError>;
    /// Publishes `payload` on `topic`.
    fn publish(&mut self, handle: MqttHandle, topic: &str, payload: &str)
    -> Result<(), HostError>;
}

/// Installs the MQTT executors.
pub fn register_components<H: Host + MqttHost + 'static>(rt: &mut Runtime<H>) {
    rt.register_component(t::MQTT_INIT, execute_init::<H>);
    rt.register_component(t::MQTT_CONNECT, execute_connect::<H>);
    rt.register_component(t::MQTT_DISCONNECT, execute_disconnect::<H>);
    rt.register_component(t::MQTT_EVENT, execute_event::<H>);
    rt.register_component(t::MQTT_SUBSCRIBE, execute_subscribe::<H>);
    rt.register_component(t::MQTT_UNSUBSCRIBE, execute_unsubscribe::<H>);
    rt.register_component(t::MQTT_PUBLISH, execute_publish::<H>);
}

fn failed(action: &str, err: &HostError) -> FlowError {
    FlowError::message(format!("Failed to {action} with {err}"))
}

fn string_property<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    index: usize,
    name: &str,
) -> Result<String, FlowError> {
    rt.eval_property(id, component_index, index)?
        .as_str()
        .map(String::from)
        .ok_or_else(|| FlowError::message(format!("{name} must be a string")))
}

fn optional_string_property<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    index: usize,
    name: &str,
) -> Result<Option<String>, FlowError> {
    let value = rt.eval_property(id, component_index, index)?;
    if value.is_undefined() {
        return Ok(None);
    }
    value
        .as_str()
        .map(|text| Some(String::from(text)))
        .ok_or_else(|| FlowError::message(format!("{name} must be a string")))
}

/// Evaluates the connection property and extracts the host handle.
fn connection<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(Value, MqttHandle), FlowError> {
    let value = rt.eval_property(id, component_index, property::CONNECTION)?;
    let handle = value
        .as_array()
        .filter(|array| array.array_type() == MQTT_CONNECTION_TYPE)
        .and_then(|array| array.get(connection_field::ID))
        .and_then(|id| id.to_int64().ok())
        .and_then(|id| u32::try_from(id).ok())
        .map(MqttHandle)
        .ok_or_else(|| FlowError::message("Connection must be a object:MQTTConnection"))?;
    Ok((value, handle))
}

fn execute_init<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let target = rt.eval_assignable_property(id, component_index, property::CONNECTION)?;
    let protocol = string_property(rt, id, component_index, property::INIT_PROTOCOL, "Protocol")?;
    let host = string_property(rt, id, component_index, property::INIT_HOST, "Host")?;
    let Value::Int32(port) = rt.eval_property(id, component_index, property::INIT_PORT)? else {
        return Err(FlowError::message("Port must be an integer"));
    };
    let user_name =
        optional_string_property(rt, id, component_index, property::INIT_USER_NAME, "Username")?;
    let password =
        optional_string_property(rt, id, component_index, property::INIT_PASSWORD, "Password")?;

    let options = MqttOptions {
        protocol,
        host,
        port,
        user_name,
        password,
    };
    let handle = rt
        .host_mut()
        .init(&options)
        .map_err(|err| failed("initialize MQTT connection", &err))?;
    tracing::debug!(handle = handle.0, host = %options.host, port, "mqtt connection created");

    let optional = |text: Option<String>| text.map_or(Value::Undefined, |t| Value::string(&t));
    let mut fields = vec![Value::Undefined; connection_field::COUNT];
    fields[connection_field::PROTOCOL] = Value::string(&options.protocol);
    fields[connection_field::HOST] = Value::string(&options.host);
    fields[connection_field::PORT] = Value::Int32(options.port);
    fields[connection_field::USER_NAME] = optional(options.user_name);
    fields[connection_field::PASSWORD] = optional(options.password);
    fields[connection_field::IS_CONNECTED] = Value::Bool(false);
    fields[connection_field::ID] = Value::Int64(i64::from(handle.0));
    rt.assign_value(
        id,
        component_index,
        &target,
        Value::array(MQTT_CONNECTION_TYPE, fields),
    )?;
    rt.propagate_through_seqout(id, component_index)
}

fn execute_connect<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let (value, handle) = connection(rt, id, component_index)?;
    rt.host_mut()
        .connect(handle)
        .map_err(|err| failed("connect to MQTT broker", &err))?;
    set_connected(&value, true);
    rt.propagate_through_seqout(id, component_index)
}

fn execute_disconnect<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let (value, handle) = connection(rt, id, component_index)?;
    rt.host_mut()
        .disconnect(handle)
        .map_err(|err| failed("disconnect from MQTT broker", &err))?;
    set_connected(&value, false);
    rt.propagate_through_seqout(id, component_index)
}

fn set_connected(connection: &Value, connected: bool) {
    if let Some(array) = connection.as_array() {
        let _ = array.set(connection_field::IS_CONNECTED, Value::Bool(connected));
    }
}

/// Registers as a listener on first run, then forwards one queued event per run.
fn execute_event<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let ComponentPayload::MqttEvent(outputs) =
        rt.component(&definition, id, component_index)?.payload
    else {
        return Err(FlowError::message("MQTTEvent: missing outputs"));
    };

    let next = match rt.execution_state_mut(id, component_index) {
        Some(ComponentExecutionState::MqttEvent(listener)) => Some(listener.events.pop_front()),
        _ => None,
    };
    match next {
        None => {
            let (_, handle) = connection(rt, id, component_index)?;
            rt.set_execution_state(
                id,
                component_index,
                ComponentExecutionState::MqttEvent(MqttEventState {
                    handle,
                    events: Default::default(),
                }),
            )?;
            rt.propagate_through_seqout(id, component_index)?;
        }
        Some(Some(event)) => {
            if let Some(output) = event.output(&outputs) {
                rt.propagate_value(id, component_index, usize::from(output), event.value())?;
            }
        }
        Some(None) => {}
    }
    rt.add_to_queue(id, component_index, None, None, true)
}

fn execute_subscribe<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let (_, handle) = connection(rt, id, component_index)?;
    let topic = string_property(rt, id, component_index, property::TOPIC, "Topic")?;
    rt.host_mut()
        .subscribe(handle, &topic)
        .map_err(|err| failed("subscribe to MQTT topic", &err))?;
    rt.propagate_through_seqout(id, component_index)
}

fn execute_unsubscribe<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let (_, handle) = connection(rt, id, component_index)?;
    let topic = string_property(rt, id, component_index, property::TOPIC, "Topic")?;
    rt.host_mut()
        .unsubscribe(handle, &topic)
        .map_err(|err| failed("unsubscribe from MQTT topic", &err))?;
    rt.propagate_through_seqout(id, component_index)
}

fn execute_publish<H: Host + MqttHost>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let (_, handle) = connection(rt, id, component_index)?;
    let topic = string_property(rt, id, component_index, property::TOPIC, "Topic")?;
    let payload = string_property(rt, id, component_index, property::PAYLOAD, "Payload")?;
    rt.host_mut()
        .publish(handle, &topic, &payload)
        .map_err(|err| failed("publish to MQTT topic", &err))?;
    rt.propagate_through_seqout(id, component_index)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::components::test_support::{constant, data, expr, local, seq};
    use crate::config::RuntimeConfig;
    use crate::template::{Component, ComponentOutput, Flow, FlowDefinition, InputFlags};
    use alloc::vec::Vec;

    #[derive(Debug, Default)]
    struct Broker {
        now: u64,
        errors: Vec<String>,
        connected: bool,
        refuse_connect: bool,
        published: Vec<(String, String)>,
        subscriptions: Vec<String>,
    }

    impl Host for Broker {
        fn now_ms(&mut self) -> u64 {
            self.now
        }

        fn on_flow_error(&mut self, _flow_state: FlowStateId, _component: usize, message: &str) {
            self.errors.push(message.into());
        }
    }

    impl MqttHost for Broker {
        fn init(&mut self, options: &MqttOptions) -> Result<MqttHandle, HostError> {
            assert_eq!(options.user_name, None);
            Ok(MqttHandle(7))
        }

        fn connect(&mut self, handle: MqttHandle) -> Result<(), HostError> {
            assert_eq!(handle, MqttHandle(7));
            if self.refuse_connect {
                return Err(HostError::Code(3));
            }
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self, _handle: MqttHandle) -> Result<(), HostError> {
            self.connected = false;
            Ok(())
        }

        fn subscribe(&mut self, _handle: MqttHandle, topic: &str) -> Result<(), HostError> {
            self.subscriptions.push(topic.into());
            Ok(())
        }

        fn unsubscribe(&mut self, _handle: MqttHandle, topic: &str) -> Result<(), HostError> {
            self.subscriptions.retain(|t| t != topic);
            Ok(())
        }

        fn publish(
            &mut self,
            _handle: MqttHandle,
            topic: &str,
            payload: &str,
        ) -> Result<(), HostError> {
            self.published.push((topic.into(), payload.into()));
            Ok(())
        }
    }

    /// start -> init -> connect -> event -> subscribe -> publish; event messages land in
    /// input 4 of a comment.
    fn broker_flow() -> FlowDefinition {
        let connection = || local(0);
        FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::START).with_output(seq(1, 0)),
                    Component::new(t::MQTT_INIT)
                        .with_inputs(vec![0])
                        .with_output(seq(2, 1))
                        .with_property(connection())
                        .with_property(constant(0))
                        .with_property(constant(1))
                        .with_property(constant(2))
                        .with_property(constant(5))
                        .with_property(constant(5)),
                    Component::new(t::MQTT_CONNECT)
                        .with_inputs(vec![1])
                        .with_output(seq(3, 2))
                        .with_property(connection()),
                    Component::new(t::MQTT_EVENT)
                        .with_inputs(vec![2])
                        .with_output(seq(4, 3))
                        .with_output(data(6, 5))
                        .with_property(connection())
                        .with_payload(ComponentPayload::MqttEvent(MqttEventOutputs {
                            message: Some(1),
                            error: Some(1),
                            ..MqttEventOutputs::default()
                        })),
                    Component::new(t::MQTT_SUBSCRIBE)
                        .with_inputs(vec![3])
                        .with_output(seq(5, 4))
                        .with_property(connection())
                        .with_property(constant(3)),
                    Component::new(t::MQTT_PUBLISH)
                        .with_inputs(vec![4])
                        .with_output(ComponentOutput::seq(vec![]))
                        .with_property(connection())
                        .with_property(constant(3))
                        .with_property(constant(4)),
                    Component::new(t::COMMENT).with_inputs(vec![5]),
                ],
                component_inputs: vec![
                    InputFlags::SEQUENCE,
                    InputFlags::SEQUENCE,
                    InputFlags::SEQUENCE,
                    InputFlags::SEQUENCE,
                    InputFlags::SEQUENCE,
                    InputFlags::DATA,
                ],
                local_variables: vec![Value::Undefined],
            }],
            constants: vec![
                Value::string("mqtt"),
                Value::string("broker.local"),
                Value::Int32(1883),
                Value::string("psu/out"),
                Value::string("on"),
                Value::Undefined,
            ],
            globals: vec![],
        }
    }

    fn run(rt: &mut Runtime<Broker>, ticks: usize) {
        for _ in 0..ticks {
            rt.host_mut().now += 10;
            rt.tick();
        }
    }

    fn started(broker: Broker) -> (Runtime<Broker>, FlowStateId) {
        let mut rt = Runtime::new(broker, broker_flow(), RuntimeConfig::default()).unwrap();
        register_components(&mut rt);
        let root = rt.start().unwrap().unwrap();
        (rt, root)
    }

    #[test]
    fn connection_lifecycle_and_messages() {
        let (mut rt, root) = started(Broker::default());
        run(&mut rt, 8);
        assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
        assert!(rt.host().connected);
        assert_eq!(rt.host().subscriptions, ["psu/out"]);
        assert_eq!(
            rt.host().published,
            [(String::from("psu/out"), String::from("on"))]
        );

        let connection = rt.flow_state(root).unwrap().value(6).cloned().unwrap();
        let fields = connection.as_array().unwrap();
        assert_eq!(fields.array_type(), MQTT_CONNECTION_TYPE);
        assert_eq!(fields.get(connection_field::PORT), Some(Value::Int32(1883)));
        assert_eq!(
            fields.get(connection_field::IS_CONNECTED),
            Some(Value::Bool(true))
        );

        let message = MqttEvent::Message {
            topic: "psu/in".into(),
            payload: "off".into(),
        };
        assert_eq!(rt.deliver_mqtt_event(MqttHandle(7), &message), 1);
        assert_eq!(rt.deliver_mqtt_event(MqttHandle(8), &message), 0);
        rt.deliver_mqtt_event(MqttHandle(7), &MqttEvent::Connect);
        run(&mut rt, 3);
        let received = rt.flow_state(root).unwrap().value(5).cloned().unwrap();
        let received = received.as_array().unwrap();
        assert_eq!(received.array_type(), MQTT_MESSAGE_TYPE);
        assert_eq!(
            received.to_vec(),
            [Value::string("psu/in"), Value::string("off")]
        );
        assert!(rt.execution_state(root, 3).is_some());
    }

    #[test]
    fn failures_name_the_action() {
        let (mut rt, _) = started(Broker {
            refuse_connect: true,
            ..Broker::default()
        });
        run(&mut rt, 4);
        assert_eq!(
            rt.host().errors,
            ["Failed to connect to MQTT broker with error code: 3"]
        );
    }

    #[test]
    fn connection_must_be_a_connection_object() {
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::MQTT_CONNECT)
                        .with_output(ComponentOutput::seq(vec![]))
                        .with_property(expr(|b| {
                            b.push_constant(0);
                        })),
                ],
                ..Flow::default()
            }],
            constants: vec![Value::string("not a connection")],
            globals: vec![],
        };
        let mut rt = Runtime::new(Broker::default(), def, RuntimeConfig::default()).unwrap();
        register_components(&mut rt);
        rt.start().unwrap();
        rt.tick();
        assert_eq!(
            rt.host().errors,
            ["Connection must be a object:MQTTConnection"]
        );
    }
}
