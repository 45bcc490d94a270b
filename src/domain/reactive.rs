//! Stateful components and their change tracking.
//!
//! A reactive component moves through `Initialized -> Rendered <-> Mutated`.
//! Any state mutation marks it changed; a successful render clears the flag.

use serde_json::Value;

use super::{
    actions::ActionTable,
    component::Component,
    error::{ActionError, ActionTableError, RenderError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// State seeded, never rendered.
    Initialized,
    /// Markup reflects the current state.
    Rendered,
    /// State changed since the last render.
    Mutated,
}

/// State holder that records mutations.
#[derive(Debug, Clone)]
pub struct StateCell<S> {
    value: S,
    lifecycle: Lifecycle,
}

impl<S> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            value: initial,
            lifecycle: Lifecycle::Initialized,
        }
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    pub fn set(&mut self, value: S) {
        self.value = value;
        self.lifecycle = Lifecycle::Mutated;
    }

    pub fn update<R>(&mut self, mutate: impl FnOnce(&mut S) -> R) -> R {
        let result = mutate(&mut self.value);
        self.lifecycle = Lifecycle::Mutated;
        result
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// True until the current state has been rendered.
    pub fn is_changed(&self) -> bool {
        self.lifecycle != Lifecycle::Rendered
    }

    pub fn mark_rendered(&mut self) {
        self.lifecycle = Lifecycle::Rendered;
    }
}

/// Implemented by component types that accept client actions.
pub trait Reactive: Component + Sized + 'static {
    type State;

    fn actions() -> &'static ActionTable<Self>;

    fn state(&self) -> &StateCell<Self::State>;

    fn state_mut(&mut self) -> &mut StateCell<Self::State>;
}

/// Object-safe view of a [`Reactive`] component, as stored in registries.
pub trait LiveComponent: Component {
    fn as_component(&self) -> &dyn Component;

    fn action_names(&self) -> Vec<&'static str>;

    fn validate_actions(&self) -> Result<(), ActionTableError>;

    fn has_action(&self, name: &str) -> bool;

    fn invoke(&mut self, name: &str, event: &Value) -> Result<(), ActionError>;

    fn is_changed(&self) -> bool;

    /// Render and, on success, clear the changed flag.
    fn render_live(&mut self) -> Result<String, RenderError>;
}

impl<T: Reactive> LiveComponent for T {
    fn as_component(&self) -> &dyn Component {
        self
    }

    fn action_names(&self) -> Vec<&'static str> {
        T::actions().names()
    }

    fn validate_actions(&self) -> Result<(), ActionTableError> {
        T::actions().validate()
    }

    fn has_action(&self, name: &str) -> bool {
        T::actions().contains(name)
    }

    fn invoke(&mut self, name: &str, event: &Value) -> Result<(), ActionError> {
        let handler = T::actions()
            .get(name)
            .ok_or_else(|| ActionError::failed(format!("unknown action `{name}`")))?;
        handler(self, event)
    }

    fn is_changed(&self) -> bool {
        self.state().is_changed()
    }

    fn render_live(&mut self) -> Result<String, RenderError> {
        let html = self.render()?;
        self.state_mut().mark_rendered();
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;

    use super::*;
    use crate::domain::component::{Attributes, ComponentId};

    struct Toggle {
        id: ComponentId,
        attributes: Attributes,
        state: StateCell<bool>,
    }

    static TOGGLE_ACTIONS: Lazy<ActionTable<Toggle>> =
        Lazy::new(|| ActionTable::new("Toggle").action("flip", Toggle::flip));

    impl Toggle {
        fn flip(&mut self, _event: &Value) -> Result<(), ActionError> {
            self.state.update(|on| *on = !*on);
            Ok(())
        }
    }

    impl Component for Toggle {
        fn id(&self) -> &ComponentId {
            &self.id
        }

        fn type_name(&self) -> &'static str {
            "Toggle"
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn render_content(&self) -> Result<String, RenderError> {
            Ok(format!("<i>{}</i>", self.state.get()))
        }
    }

    impl Reactive for Toggle {
        type State = bool;

        fn actions() -> &'static ActionTable<Self> {
            &TOGGLE_ACTIONS
        }

        fn state(&self) -> &StateCell<bool> {
            &self.state
        }

        fn state_mut(&mut self) -> &mut StateCell<bool> {
            &mut self.state
        }
    }

    fn toggle() -> Toggle {
        Toggle {
            id: ComponentId::from("toggle-1"),
            attributes: Attributes::new(),
            state: StateCell::new(false),
        }
    }

    #[test]
    fn fresh_state_counts_as_changed() {
        let cell = StateCell::new(0);
        assert_eq!(cell.lifecycle(), Lifecycle::Initialized);
        assert!(cell.is_changed());
    }

    #[test]
    fn render_clears_and_mutation_sets_changed() {
        let mut component = toggle();

        let html = component.render_live().expect("render");
        assert_eq!(html, "<i>false</i>");
        assert!(!component.is_changed());
        assert_eq!(component.state().lifecycle(), Lifecycle::Rendered);

        component.invoke("flip", &Value::Null).expect("flip");
        assert!(component.is_changed());
        assert_eq!(component.state().lifecycle(), Lifecycle::Mutated);

        assert_eq!(component.render_live().expect("render"), "<i>true</i>");
        assert!(!component.is_changed());
    }

    #[test]
    fn set_marks_mutated_even_with_equal_value() {
        let mut cell = StateCell::new(1);
        cell.mark_rendered();
        cell.set(1);
        assert!(cell.is_changed());
    }

    #[test]
    fn unknown_action_is_an_error() {
        let mut component = toggle();
        assert!(!component.has_action("explode"));
        assert!(component.invoke("explode", &Value::Null).is_err());
        assert_eq!(component.action_names(), vec!["flip"]);
    }
}
