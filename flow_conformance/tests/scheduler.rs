// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tick semantics: fairness, the wall-clock budget and queue capacity.

use flow_conformance::{MockHost, constant, scpi_literal, seq};
use flow_expr::value::Value;
use flow_runtime::host::LogSeverity;
use flow_runtime::template::{
    Component, ComponentOutput, ComponentPayload, Connection, Flow, FlowDefinition, InputFlags,
    component_type as t, scpi_part,
};
use flow_runtime::{Runtime, RuntimeConfig};

/// A start component fanned out to `count` log components, each logging constant 0.
fn fan_out(count: u16) -> FlowDefinition {
    let mut components = vec![Component::new(t::START).with_output(ComponentOutput::seq(
        (0..count)
            .map(|i| Connection {
                target_component: i + 1,
                target_input: i,
            })
            .collect(),
    ))];
    for i in 0..count {
        components.push(
            Component::new(t::LOG)
                .with_inputs(vec![i])
                .with_property(constant(0)),
        );
    }
    FlowDefinition {
        flows: vec![Flow {
            components,
            component_inputs: vec![InputFlags::SEQUENCE; usize::from(count)],
            local_variables: vec![],
        }],
        constants: vec![Value::string("hit")],
        globals: vec![],
    }
}

fn runtime(def: FlowDefinition, host: MockHost, config: RuntimeConfig) -> Runtime<MockHost> {
    let mut rt = Runtime::new(host, def, config).unwrap();
    rt.start().unwrap();
    rt
}

#[test]
fn work_queued_during_a_tick_waits_for_the_next() {
    let mut rt = runtime(fan_out(3), MockHost::default(), RuntimeConfig::default());
    let first = rt.tick();
    assert_eq!(first.executed, 1);
    assert_eq!(first.remaining, 3);
    assert!(rt.host().logs.is_empty());

    let second = rt.tick();
    assert_eq!(second.executed, 3);
    assert_eq!(second.remaining, 0);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["hit", "hit", "hit"]);
}

#[test]
fn tick_yields_once_the_budget_is_spent() {
    let host = MockHost {
        clock_step: 3,
        ..MockHost::default()
    };
    let config = RuntimeConfig::default()
        .with_tick_budget_ms(5)
        .with_budget_check_interval(1);
    let mut rt = runtime(fan_out(10), host, config);
    rt.tick();

    let summary = rt.tick();
    assert!(summary.executed < 10, "{summary:?}");
    assert!(summary.remaining > 0);

    for _ in 0..10 {
        rt.tick();
    }
    assert_eq!(rt.host().logged(LogSeverity::Info).len(), 10);
    assert!(rt.queue().is_empty());
}

#[test]
fn pending_scpi_does_not_block_other_components() {
    let mut parts = scpi_literal("*OPC?");
    parts.extend([scpi_part::QUERY, scpi_part::END]);
    let def = FlowDefinition {
        flows: vec![Flow {
            components: vec![
                Component::new(t::START).with_output(ComponentOutput::seq(vec![
                    Connection {
                        target_component: 1,
                        target_input: 0,
                    },
                    Connection {
                        target_component: 2,
                        target_input: 1,
                    },
                ])),
                Component::new(t::SCPI)
                    .with_inputs(vec![0])
                    .with_output(seq(3, 2))
                    .with_payload(ComponentPayload::Scpi {
                        instructions: parts,
                    }),
                Component::new(t::LOG)
                    .with_inputs(vec![1])
                    .with_property(constant(0)),
                Component::new(t::LOG)
                    .with_inputs(vec![2])
                    .with_property(constant(1)),
            ],
            component_inputs: vec![InputFlags::SEQUENCE; 3],
            local_variables: vec![],
        }],
        constants: vec![Value::string("other"), Value::string("after")],
        globals: vec![],
    };
    let host = MockHost {
        scpi_pending: true,
        ..MockHost::default()
    };
    let mut rt = runtime(def, host, RuntimeConfig::default());
    for _ in 0..4 {
        rt.tick();
    }
    assert_eq!(rt.host().logged(LogSeverity::Info), ["other"]);
    assert!(rt.scpi_waiter().is_some());
    assert_eq!(rt.queue().len(), 1, "the waiting component stays queued");

    rt.scpi_result_is_ready();
    for _ in 0..3 {
        rt.tick();
    }
    assert_eq!(rt.host().logged(LogSeverity::Info), ["other", "after"]);
    assert_eq!(rt.scpi_waiter(), None);
    assert_eq!(rt.host().scpi_sent.len(), 1);
}

#[test]
fn overflowing_the_queue_is_a_flow_error() {
    let config = RuntimeConfig::default().with_queue_capacity(2);
    let mut rt = runtime(fan_out(3), MockHost::default(), config);
    rt.tick();
    assert_eq!(rt.host().error_messages(), ["Execution queue is full"]);
    assert!(rt.is_running(), "only the instance halts");
}
