//! Tree builder: expands declared elements through component render logic.
//!
//! A build pass turns an [`Element`] tree into a [`BuiltNode`] tree in which
//! every composite tag has been rendered and every component position is
//! bound to a persistent instance. Instance reuse follows the same child
//! matching plan as the differ, so the two phases can never disagree about
//! which logical component a position belongs to.
//!
//! Builds perform no native side effects. Render failures unwind to the
//! nearest ancestor registered as an error boundary; with no boundary on
//! the path the build fails and the scheduler aborts the generation.

use std::sync::Arc;

use crate::diff::{plan_children, SlotDesc};
use crate::element::{Element, PropValue, Props};
use crate::error::{BuildError, CoreError, RenderError, RenderFailure};
use crate::registry::{ComponentDef, Registry};
use crate::state::{CellError, InstanceId, StateHandle, StateStore};
use crate::store::{NodeRecord, NodeStore};

/// One node of a fully expanded subtree, ready for diffing.
#[derive(Debug)]
pub(crate) struct BuiltNode {
    pub tag: Arc<str>,
    pub key: Option<Arc<str>>,
    pub props: Props,
    pub children: Vec<BuiltNode>,
    /// Bound component instance, when this node wraps one.
    pub instance: Option<InstanceId>,
    /// Children elements passed by the parent, retained on component nodes.
    pub input_children: Vec<Element>,
    /// Subtree node count, used for the parallel-diff threshold.
    pub size: usize,
}

#[cfg(test)]
impl BuiltNode {
    pub(crate) fn for_tests(
        tag: &str,
        key: Option<&str>,
        props: Props,
        children: Vec<BuiltNode>,
    ) -> Self {
        let size = 1 + children.iter().map(|c| c.size).sum::<usize>();
        Self {
            tag: Arc::from(tag),
            key: key.map(Arc::from),
            props,
            children,
            instance: None,
            input_children: Vec::new(),
            size,
        }
    }
}

/// Result of one build pass.
#[derive(Debug)]
pub(crate) struct BuiltTree {
    pub root: BuiltNode,
    /// Instances created during this pass. They are destroyed again if the
    /// generation aborts before commit.
    pub created: Vec<InstanceId>,
}

/// Hook access handed to component render logic.
///
/// State cells are addressed by hook call order, which must be stable
/// across renders of the same component.
pub struct RenderScope<'a> {
    tag: &'a Arc<str>,
    props: &'a Props,
    children: &'a [Element],
    state: &'a mut StateStore,
    instance: InstanceId,
    cursor: usize,
    hook_mismatch: Option<usize>,
}

impl RenderScope<'_> {
    pub fn props(&self) -> &Props {
        self.props
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    /// Children elements the parent passed into this component.
    pub fn children(&self) -> &[Element] {
        self.children
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Reads the next state cell, creating it with `init` on first render.
    ///
    /// Returns the current value and a stable handle for later updates.
    pub fn use_state<T: Clone + Send + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(T, StateHandle<T>), RenderError> {
        let index = self.cursor;
        self.cursor += 1;
        match self.state.cell_read_or_init(self.instance, index, init) {
            Ok(value) => Ok((value, StateHandle::new(self.instance, index))),
            Err(CellError::TypeMismatch) | Err(CellError::Missing) => {
                self.hook_mismatch = Some(index);
                Err(RenderError::new(format!(
                    "hook {index} of `{}` does not match its previous type or order",
                    self.tag
                )))
            }
        }
    }
}

/// Expands one subtree root. Consumed by [`TreeBuilder::build`].
pub(crate) struct TreeBuilder<'a> {
    registry: &'a Registry,
    nodes: &'a NodeStore,
    state: &'a mut StateStore,
    created: Vec<InstanceId>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(registry: &'a Registry, nodes: &'a NodeStore, state: &'a mut StateStore) -> Self {
        Self {
            registry,
            nodes,
            state,
            created: Vec::new(),
        }
    }

    /// Builds the subtree declared by `element`, reusing instances from the
    /// committed subtree under `old` where identity matches. On failure all
    /// instances created by this pass are destroyed again.
    pub fn build(
        mut self,
        old: Option<&Arc<NodeRecord>>,
        element: &Element,
    ) -> Result<BuiltTree, CoreError> {
        let old = old.filter(|record| {
            record.tag == *element.tag_arc() && record.key.as_ref() == element.key_arc()
        });
        match self.expand(old, element) {
            Ok(root) => Ok(BuiltTree {
                root,
                created: self.created,
            }),
            Err(err) => {
                for id in self.created.drain(..) {
                    let _ = self.state.destroy(id);
                }
                Err(err)
            }
        }
    }

    fn expand(
        &mut self,
        old: Option<&Arc<NodeRecord>>,
        element: &Element,
    ) -> Result<BuiltNode, CoreError> {
        let registry = self.registry;
        match registry.get(element.tag()) {
            Some(def) => self.expand_component(def, old, element),
            None => self.expand_primitive(old, element),
        }
    }

    fn expand_component(
        &mut self,
        def: &ComponentDef,
        old: Option<&Arc<NodeRecord>>,
        element: &Element,
    ) -> Result<BuiltNode, CoreError> {
        let instance = match old.and_then(|record| record.instance) {
            Some(id) if self.state.get(id).is_ok() => id,
            _ => {
                let id = self.state.create();
                self.created.push(id);
                id
            }
        };

        let mut scope = RenderScope {
            tag: element.tag_arc(),
            props: element.props(),
            children: element.children(),
            state: &mut *self.state,
            instance,
            cursor: 0,
            hook_mismatch: None,
        };
        let rendered = (def.render_fn())(&mut scope);
        let hook_mismatch = scope.hook_mismatch;
        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(error) => {
                if let Some(index) = hook_mismatch {
                    return Err(BuildError::HookTypeMismatch {
                        tag: Arc::clone(element.tag_arc()),
                        index,
                    }
                    .into());
                }
                return Err(BuildError::Render(RenderFailure {
                    tag: Arc::clone(element.tag_arc()),
                    error,
                    node: old.map(|record| record.id),
                })
                .into());
            }
        };
        let _ = self.state.set_dirty(instance, false);

        // A component node always wraps exactly its rendered output.
        let old_output = match old.and_then(|record| record.children.first()) {
            Some(child_id) => Some(self.nodes.get(*child_id)?.clone()),
            None => None,
        };
        let matched_output = old_output.as_ref().filter(|record| {
            record.tag == *rendered.tag_arc() && record.key.as_ref() == rendered.key_arc()
        });

        let checkpoint = self.created.len();
        let child = match self.expand(matched_output, &rendered) {
            Ok(child) => child,
            Err(CoreError::Build(BuildError::Render(failure))) => {
                let Some(fallback) = def.fallback_fn() else {
                    return Err(BuildError::Render(failure).into());
                };
                // Roll back instances created by the failed sub-expansion;
                // the fallback subtree starts from scratch.
                for id in self.created.drain(checkpoint..) {
                    let _ = self.state.destroy(id);
                }
                log::warn!(
                    "render of `{}` failed ({}); substituting `{}` fallback",
                    failure.tag,
                    failure.error,
                    def.name()
                );
                let fallback_element = fallback(&failure);
                self.expand(None, &fallback_element)?
            }
            Err(err) => return Err(err),
        };

        Ok(BuiltNode {
            tag: Arc::clone(element.tag_arc()),
            key: element.key_arc().cloned(),
            props: element.props().clone(),
            size: 1 + child.size,
            children: vec![child],
            instance: Some(instance),
            input_children: element.children().to_vec(),
        })
    }

    fn expand_primitive(
        &mut self,
        old: Option<&Arc<NodeRecord>>,
        element: &Element,
    ) -> Result<BuiltNode, CoreError> {
        let old_children: Vec<Arc<NodeRecord>> = match old {
            Some(record) => {
                let mut children = Vec::with_capacity(record.children.len());
                for child_id in &record.children {
                    children.push(self.nodes.get(*child_id)?.clone());
                }
                children
            }
            None => Vec::new(),
        };

        let plan = {
            let old_slots: Vec<SlotDesc<'_>> = old_children
                .iter()
                .map(|record| SlotDesc {
                    tag: &record.tag,
                    key: record.key.as_ref(),
                })
                .collect();
            let new_slots: Vec<SlotDesc<'_>> = element
                .children()
                .iter()
                .map(|child| SlotDesc {
                    tag: child.tag_arc(),
                    key: child.key_arc(),
                })
                .collect();
            plan_children(&old_slots, &new_slots)
        };

        let mut children = Vec::with_capacity(element.children().len());
        let mut size = 1;
        for (j, child_element) in element.children().iter().enumerate() {
            let matched = plan.matches[j].map(|old_index| &old_children[old_index]);
            let child = self.expand(matched, child_element)?;
            size += child.size;
            children.push(child);
        }

        Ok(BuiltNode {
            tag: Arc::clone(element.tag_arc()),
            key: element.key_arc().cloned(),
            props: element.props().clone(),
            children,
            instance: None,
            input_children: Vec::new(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn stores() -> (NodeStore, StateStore) {
        (NodeStore::new(), StateStore::new())
    }

    #[test]
    fn primitives_pass_through_unexpanded() {
        let registry = Registry::builder().build();
        let (nodes, mut state) = stores();
        let element = Element::new("view")
            .child(Element::new("text").prop("t", 1).build())
            .build();
        let built = TreeBuilder::new(&registry, &nodes, &mut state)
            .build(None, &element)
            .unwrap();
        assert_eq!(&*built.root.tag, "view");
        assert_eq!(built.root.children.len(), 1);
        assert_eq!(built.root.size, 2);
        assert!(built.created.is_empty());
        assert!(built.root.instance.is_none());
    }

    #[test]
    fn component_expands_to_wrapped_output() {
        let registry = Registry::builder()
            .component("label", |scope| {
                let text = scope
                    .prop("text")
                    .cloned()
                    .unwrap_or(PropValue::Str(Arc::from("")));
                Ok(Element::new("text").prop("content", text).build())
            })
            .build();
        let (nodes, mut state) = stores();
        let element = Element::new("label").prop("text", "hi").build();
        let built = TreeBuilder::new(&registry, &nodes, &mut state)
            .build(None, &element)
            .unwrap();
        assert_eq!(&*built.root.tag, "label");
        assert!(built.root.instance.is_some());
        assert_eq!(built.created.len(), 1);
        assert_eq!(&*built.root.children[0].tag, "text");
        assert_eq!(
            built.root.children[0].props.get("content"),
            Some(&PropValue::Str(Arc::from("hi")))
        );
    }

    #[test]
    fn hooks_initialize_once() {
        let registry = Registry::builder()
            .component("counter", |scope| {
                let (count, _handle) = scope.use_state(|| 41i64)?;
                Ok(Element::new("text").prop("count", count).build())
            })
            .build();
        let (nodes, mut state) = stores();
        let element = Element::new("counter").build();
        let built = TreeBuilder::new(&registry, &nodes, &mut state)
            .build(None, &element)
            .unwrap();
        let instance = built.root.instance.unwrap();
        assert_eq!(state.get(instance).unwrap().cell_count(), 1);
        assert_eq!(
            built.root.children[0].props.get("count"),
            Some(&PropValue::Int(41))
        );
    }

    #[test]
    fn failed_build_destroys_created_instances() {
        let registry = Registry::builder()
            .component("broken", |_scope| Err(RenderError::new("boom")))
            .build();
        let (nodes, mut state) = stores();
        let element = Element::new("broken").build();
        let err = TreeBuilder::new(&registry, &nodes, &mut state)
            .build(None, &element)
            .unwrap_err();
        assert!(matches!(err, CoreError::Build(BuildError::Render(_))));
        assert!(state.is_empty());
    }

    #[test]
    fn boundary_substitutes_fallback_subtree() {
        let registry = Registry::builder()
            .component("broken", |_scope| Err(RenderError::new("boom")))
            .boundary(
                "guard",
                |_scope| Ok(Element::new("broken").build()),
                |failure| {
                    Element::new("text")
                        .prop("error", failure.error.message())
                        .build()
                },
            )
            .build();
        let (nodes, mut state) = stores();
        let element = Element::new("guard").build();
        let built = TreeBuilder::new(&registry, &nodes, &mut state)
            .build(None, &element)
            .unwrap();
        // The fallback replaces the entire failing subtree.
        let output = &built.root.children[0];
        assert_eq!(&*output.tag, "text");
        assert_eq!(
            output.props.get("error"),
            Some(&PropValue::Str(Arc::from("boom")))
        );
        // The failed component's instance was rolled back; only the guard's
        // instance survives.
        assert_eq!(state.len(), 1);
    }
}
