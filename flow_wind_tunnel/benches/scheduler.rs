// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use flow_expr::asm::InstructionBuilder;
use flow_expr::ops::op;
use flow_expr::value::Value;
use flow_runtime::host::Host;
use flow_runtime::template::{
    Component, ComponentOutput, Connection, Flow, FlowDefinition, InputFlags, component_type as t,
};
use flow_runtime::{Runtime, RuntimeConfig};

/// Entry point for scheduler benchmarks.
///
/// Each iteration restarts the program and ticks until the queue drains, so the numbers include
/// instance creation and teardown.
fn bench_scheduler(c: &mut Criterion) {
    bench_chain(c);
    bench_fanout(c);
}

/// A host whose clock never advances, so ticks are never cut short by the budget.
#[derive(Debug, Default)]
struct FrozenClock;

impl Host for FrozenClock {
    fn now_ms(&mut self) -> u64 {
        0
    }
}

fn increment_local() -> (Vec<u8>, Vec<u8>) {
    let mut target = InstructionBuilder::new();
    target.push_local(0).end();
    let mut value = InstructionBuilder::new();
    value
        .push_local(0)
        .push_constant(0)
        .operation(op::ADD)
        .end();
    (target.finish().unwrap(), value.finish().unwrap())
}

fn connection(target_component: usize, target_input: usize) -> ComponentOutput {
    ComponentOutput::seq(vec![Connection {
        target_component: u16::try_from(target_component).unwrap(),
        target_input: u16::try_from(target_input).unwrap(),
    }])
}

/// Start followed by `len` set-variable components, each incrementing one local.
fn chain(len: usize) -> FlowDefinition {
    let (target, value) = increment_local();
    let mut components = vec![Component::new(t::START).with_output(connection(1, 0))];
    for i in 0..len {
        let input = u16::try_from(i).unwrap();
        let mut component = Component::new(t::SET_VARIABLE)
            .with_inputs(vec![input])
            .with_property(target.clone())
            .with_property(value.clone());
        if i + 1 < len {
            component = component.with_output(connection(i + 2, i + 1));
        } else {
            component = component.with_output(ComponentOutput::seq(vec![]));
        }
        components.push(component);
    }
    FlowDefinition {
        flows: vec![Flow {
            components,
            component_inputs: vec![InputFlags::SEQUENCE; len],
            local_variables: vec![Value::Int32(0)],
        }],
        constants: vec![Value::Int32(1)],
        globals: vec![],
    }
}

/// Start fanned out to `width` no-op components.
fn fanout(width: usize) -> FlowDefinition {
    let connections = (0..width)
        .map(|i| Connection {
            target_component: u16::try_from(i + 1).unwrap(),
            target_input: u16::try_from(i).unwrap(),
        })
        .collect();
    let mut components = vec![Component::new(t::START).with_output(ComponentOutput::seq(connections))];
    for i in 0..width {
        components.push(
            Component::new(t::NOOP)
                .with_inputs(vec![u16::try_from(i).unwrap()])
                .with_output(ComponentOutput::seq(vec![])),
        );
    }
    FlowDefinition {
        flows: vec![Flow {
            components,
            component_inputs: vec![InputFlags::SEQUENCE; width],
            local_variables: vec![],
        }],
        constants: vec![],
        globals: vec![],
    }
}

fn run_to_idle(rt: &mut Runtime<FrozenClock>) {
    rt.start().unwrap();
    while !rt.queue().is_empty() {
        rt.tick();
    }
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_chain");
    for &len in &[10_usize, 100, 500] {
        let mut rt = Runtime::new(FrozenClock, chain(len), RuntimeConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| run_to_idle(&mut rt));
        });
    }
    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_fanout");
    for &width in &[10_usize, 100, 500] {
        let mut rt = Runtime::new(FrozenClock, fanout(width), RuntimeConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| run_to_idle(&mut rt));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scheduler);
criterion_main!(benches);
