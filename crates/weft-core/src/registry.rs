//! Component dispatch table.
//!
//! Composite tags are resolved through a registry built once at startup.
//! Any tag not present in the registry is treated as a native primitive and
//! passed through to the bridge unchanged.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::builder::RenderScope;
use crate::element::Element;
use crate::error::{RenderError, RenderFailure};

/// Declarative render logic for one component type.
pub type RenderFn =
    Arc<dyn Fn(&mut RenderScope<'_>) -> Result<Element, RenderError> + Send + Sync>;

/// Fallback subtree factory for an error boundary.
pub type FallbackFn = Arc<dyn Fn(&RenderFailure) -> Element + Send + Sync>;

/// One registered component: render logic plus an optional boundary
/// fallback.
pub struct ComponentDef {
    name: Arc<str>,
    render: RenderFn,
    fallback: Option<FallbackFn>,
}

impl ComponentDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render_fn(&self) -> &RenderFn {
        &self.render
    }

    pub(crate) fn fallback_fn(&self) -> Option<&FallbackFn> {
        self.fallback.as_ref()
    }

    /// Whether this component catches render failures in its subtree.
    pub fn is_boundary(&self) -> bool {
        self.fallback.is_some()
    }
}

impl std::fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name)
            .field("boundary", &self.fallback.is_some())
            .finish()
    }
}

/// Closed dispatch table mapping component tags to their definitions,
/// resolved once at startup.
#[derive(Debug, Default)]
pub struct Registry {
    components: HashMap<Arc<str>, ComponentDef, ahash::RandomState>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, tag: &str) -> Option<&ComponentDef> {
        self.components.get(tag)
    }

    pub fn is_component(&self, tag: &str) -> bool {
        self.components.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Builder for [`Registry`]. Later registrations under the same name win.
#[derive(Default)]
pub struct RegistryBuilder {
    components: HashMap<Arc<str>, ComponentDef, ahash::RandomState>,
}

impl RegistryBuilder {
    pub fn component(
        mut self,
        name: impl Into<Arc<str>>,
        render: impl Fn(&mut RenderScope<'_>) -> Result<Element, RenderError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.components.insert(
            Arc::clone(&name),
            ComponentDef {
                name,
                render: Arc::new(render),
                fallback: None,
            },
        );
        self
    }

    /// Registers a component that also acts as an error boundary: render
    /// failures anywhere in its output subtree are replaced by the fallback
    /// element.
    pub fn boundary(
        mut self,
        name: impl Into<Arc<str>>,
        render: impl Fn(&mut RenderScope<'_>) -> Result<Element, RenderError> + Send + Sync + 'static,
        fallback: impl Fn(&RenderFailure) -> Element + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.components.insert(
            Arc::clone(&name),
            ComponentDef {
                name,
                render: Arc::new(render),
                fallback: Some(Arc::new(fallback)),
            },
        );
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            components: self.components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_tags_are_primitives() {
        let registry = Registry::builder()
            .component("counter", |_scope| Ok(Element::new("text").build()))
            .build();
        assert!(registry.is_component("counter"));
        assert!(!registry.is_component("view"));
        assert!(!registry.get("counter").unwrap().is_boundary());
    }

    #[test]
    fn boundary_registration_is_marked() {
        let registry = Registry::builder()
            .boundary(
                "guard",
                |_scope| Ok(Element::new("view").build()),
                |_failure| Element::new("text").build(),
            )
            .build();
        assert!(registry.get("guard").unwrap().is_boundary());
    }
}
