//! Immutable element descriptions produced by render passes.
//!
//! An [`Element`] describes one position in the declared tree: a tag naming a
//! native primitive or a registered composite component, an optional stable
//! key, an ordered prop map, and an ordered list of child elements. Elements
//! are built fresh on every render pass and never mutated afterwards.

use std::sync::Arc;

use indexmap::IndexMap;

/// Ordered prop map. Insertion order is preserved so bridge output is stable
/// across identical renders.
pub type Props = IndexMap<Arc<str>, PropValue, ahash::RandomState>;

/// Opaque reference to a host-side callback. The core never invokes
/// callbacks; it only diffs them by identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// Tagged prop value. Diffing compares by value, so dynamic prop maps stay
/// strongly typed without losing the ability to detect changes.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// Explicit absence. A delta maps a removed prop to `Null`.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Vec<PropValue>),
    Map(Props),
    Callback(CallbackId),
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Arc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Arc::from(value.as_str()))
    }
}

impl From<CallbackId> for PropValue {
    fn from(value: CallbackId) -> Self {
        PropValue::Callback(value)
    }
}

/// Immutable description of one node in the declared tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    tag: Arc<str>,
    key: Option<Arc<str>>,
    props: Props,
    children: Vec<Element>,
}

impl Element {
    /// Starts building an element for the given tag.
    pub fn new(tag: impl Into<Arc<str>>) -> ElementBuilder {
        ElementBuilder {
            tag: tag.into(),
            key: None,
            props: Props::default(),
            children: Vec::new(),
        }
    }

    /// Reassembles an element from committed parts, used when a dirty
    /// component re-renders without involving its parent.
    pub(crate) fn from_parts(
        tag: Arc<str>,
        key: Option<Arc<str>>,
        props: Props,
        children: Vec<Element>,
    ) -> Element {
        Element {
            tag,
            key,
            props,
            children,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn tag_arc(&self) -> &Arc<str> {
        &self.tag
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub(crate) fn key_arc(&self) -> Option<&Arc<str>> {
        self.key.as_ref()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Total node count of this element subtree, counting this element.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Element::size).sum::<usize>()
    }
}

/// Builder for [`Element`]. Consumed by [`ElementBuilder::build`].
#[derive(Debug)]
pub struct ElementBuilder {
    tag: Arc<str>,
    key: Option<Arc<str>>,
    props: Props,
    children: Vec<Element>,
}

impl ElementBuilder {
    pub fn key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<Arc<str>>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> Element {
        Element {
            tag: self.tag,
            key: self.key,
            props: self.props,
            children: self.children,
        }
    }
}

/// Shallow key-by-key value comparison between two prop maps.
///
/// The returned delta contains exactly the keys whose values differ: new or
/// changed keys map to their new value, removed keys map to
/// [`PropValue::Null`]. An empty delta means the maps are value-equal.
pub fn prop_delta(old: &Props, new: &Props) -> Props {
    let mut delta = Props::default();
    for (name, value) in new {
        if old.get(name) != Some(value) {
            delta.insert(name.clone(), value.clone());
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            delta.insert(name.clone(), PropValue::Null);
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, PropValue)]) -> Props {
        pairs
            .iter()
            .map(|(name, value)| (Arc::from(*name), value.clone()))
            .collect()
    }

    #[test]
    fn builder_preserves_prop_order() {
        let element = Element::new("view")
            .prop("width", 10)
            .prop("height", 20)
            .prop("label", "hello")
            .build();
        let names: Vec<&str> = element.props().keys().map(|k| k.as_ref()).collect();
        assert_eq!(names, ["width", "height", "label"]);
    }

    #[test]
    fn delta_contains_only_changed_keys() {
        let old = props(&[("a", PropValue::Int(1)), ("b", PropValue::Int(2))]);
        let new = props(&[("a", PropValue::Int(1)), ("b", PropValue::Int(3))]);
        let delta = prop_delta(&old, &new);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("b"), Some(&PropValue::Int(3)));
    }

    #[test]
    fn delta_is_empty_for_equal_maps() {
        let old = props(&[("a", PropValue::Int(1)), ("s", PropValue::from("x"))]);
        let new = old.clone();
        assert!(prop_delta(&old, &new).is_empty());
    }

    #[test]
    fn removed_key_maps_to_null() {
        let old = props(&[("a", PropValue::Int(1)), ("b", PropValue::Int(2))]);
        let new = props(&[("a", PropValue::Int(1))]);
        let delta = prop_delta(&old, &new);
        assert_eq!(delta.get("b"), Some(&PropValue::Null));
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let old = props(&[("on_press", PropValue::Callback(CallbackId(1)))]);
        let new = props(&[("on_press", PropValue::Callback(CallbackId(2)))]);
        assert_eq!(prop_delta(&old, &new).len(), 1);
        let same = props(&[("on_press", PropValue::Callback(CallbackId(1)))]);
        assert!(prop_delta(&old, &same).is_empty());
    }

    #[test]
    fn nested_maps_compare_by_value() {
        let inner_old = props(&[("x", PropValue::Int(1))]);
        let inner_new = props(&[("x", PropValue::Int(1))]);
        let old = props(&[("style", PropValue::Map(inner_old))]);
        let new = props(&[("style", PropValue::Map(inner_new))]);
        assert!(prop_delta(&old, &new).is_empty());
    }
}
