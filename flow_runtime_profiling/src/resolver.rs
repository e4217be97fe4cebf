// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use flow_runtime::template::component_type;
use std::collections::HashMap;
use std::string::String;

/// Optional label resolver for profiling scopes.
///
/// Return `None` to fall back to the default index-based labels.
pub trait LabelResolver {
    /// Resolve a label for a tick scope.
    fn tick_label(&mut self, _queue_len: usize) -> Option<String> {
        None
    }

    /// Resolve a label for a component scope.
    fn component_label(
        &mut self,
        _flow_index: usize,
        _component_index: usize,
        _type_tag: u16,
    ) -> Option<String> {
        None
    }
}

/// Default resolver that keeps stable index-based labels.
#[derive(Default, Debug)]
pub struct DefaultLabelResolver;

impl LabelResolver for DefaultLabelResolver {}

/// Resolver that names components by their built-in type.
#[derive(Default, Debug)]
pub struct ComponentNameResolver {
    cache: HashMap<(usize, usize), String>,
}

impl LabelResolver for ComponentNameResolver {
    fn component_label(
        &mut self,
        flow_index: usize,
        component_index: usize,
        type_tag: u16,
    ) -> Option<String> {
        if let Some(label) = self.cache.get(&(flow_index, component_index)) {
            return Some(label.clone());
        }
        let name = component_type::name(type_tag)?;
        let label = format!("{name}@flow{flow_index}#{component_index}");
        self.cache
            .insert((flow_index, component_index), label.clone());
        Some(label)
    }
}

pub(crate) fn default_tick_label() -> String {
    String::from("tick")
}

pub(crate) fn default_component_label(
    flow_index: usize,
    component_index: usize,
    type_tag: u16,
) -> String {
    format!("component:flow={flow_index} index={component_index} type={type_tag}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_components_get_named_labels() {
        let mut resolver = ComponentNameResolver::default();
        assert_eq!(
            resolver.component_label(2, 5, component_type::DELAY).as_deref(),
            Some("Delay@flow2#5")
        );
        assert_eq!(resolver.component_label(0, 1, 10_500), None);
        assert_eq!(
            default_component_label(0, 1, 10_500),
            "component:flow=0 index=1 type=10500"
        );
    }
}
