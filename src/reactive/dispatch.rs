//! Transport-independent action execution.

use tracing::{debug, instrument};

use crate::cache::lock::{LockExt, LockSite};

use super::{
    protocol::{ActionRequest, DispatchError},
    registry::SharedComponent,
};

const SOURCE: &str = "reactive::dispatch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub html: String,
    /// Whether the component was marked changed before the re-render.
    pub changed: bool,
}

/// Invoke `request.method` on `component` and re-render it.
///
/// The component lock is held for the whole invoke-and-render step, so two
/// actions on the same instance never interleave. Unknown methods are
/// rejected before anything runs.
#[instrument(
    level = "debug",
    skip(component, request),
    fields(component_id = %request.component_id, method = %request.method)
)]
pub fn dispatch(
    component: &SharedComponent,
    request: &ActionRequest,
) -> Result<DispatchOutcome, DispatchError> {
    let site = LockSite::new(SOURCE, "dispatch").component(&request.component_id);
    let mut guard = component.lock_at(site);

    if !guard.has_action(&request.method) {
        return Err(DispatchError::UnknownAction {
            component: guard.type_name(),
            method: request.method.clone(),
        });
    }

    guard
        .invoke(&request.method, &request.event)
        .map_err(|source| DispatchError::Action {
            method: request.method.clone(),
            source,
        })?;

    let changed = guard.is_changed();
    let html = guard.render_live()?;
    debug!(changed, "action dispatched");

    Ok(DispatchOutcome { html, changed })
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;
    use serde_json::{Value, json};

    use super::*;
    use crate::domain::{
        actions::ActionTable,
        component::{Attributes, Component, ComponentId},
        error::{ActionError, RenderError},
        reactive::{Reactive, StateCell},
    };
    use crate::reactive::registry::share;

    struct Tally {
        id: ComponentId,
        attributes: Attributes,
        state: StateCell<i64>,
    }

    fn add(tally: &mut Tally, event: &Value) -> Result<(), ActionError> {
        let by = event
            .get("by")
            .and_then(Value::as_i64)
            .ok_or_else(|| ActionError::invalid_event("`by` must be an integer"))?;
        tally.state.update(|n| *n += by);
        Ok(())
    }

    fn peek(_tally: &mut Tally, _event: &Value) -> Result<(), ActionError> {
        Ok(())
    }

    static TALLY_ACTIONS: Lazy<ActionTable<Tally>> = Lazy::new(|| {
        ActionTable::new("Tally")
            .action("add", add)
            .action("peek", peek)
    });

    impl Component for Tally {
        fn id(&self) -> &ComponentId {
            &self.id
        }

        fn type_name(&self) -> &'static str {
            "Tally"
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn render_content(&self) -> Result<String, RenderError> {
            Ok(format!("<span>{}</span>", self.state.get()))
        }
    }

    impl Reactive for Tally {
        type State = i64;

        fn actions() -> &'static ActionTable<Self> {
            &TALLY_ACTIONS
        }

        fn state(&self) -> &StateCell<i64> {
            &self.state
        }

        fn state_mut(&mut self) -> &mut StateCell<i64> {
            &mut self.state
        }
    }

    fn tally() -> SharedComponent {
        share(Tally {
            id: ComponentId::from("tally"),
            attributes: Attributes::new(),
            state: StateCell::new(0),
        })
    }

    fn request(method: &str, event: Value) -> ActionRequest {
        ActionRequest {
            component_id: ComponentId::from("tally"),
            method: method.to_string(),
            event,
        }
    }

    #[test]
    fn mutating_action_reports_change() {
        let component = tally();

        let first = dispatch(&component, &request("add", json!({"by": 2}))).expect("dispatch");
        assert_eq!(first.html, "<span>2</span>");
        assert!(first.changed);

        let second = dispatch(&component, &request("peek", json!({}))).expect("dispatch");
        assert_eq!(second.html, "<span>2</span>");
        assert!(!second.changed);
    }

    #[test]
    fn unknown_method_is_rejected_without_render() {
        let component = tally();
        let err = dispatch(&component, &request("explode", json!({}))).expect_err("unknown");
        assert_eq!(err.kind(), "invocation");

        // Still untouched: the fresh state has never been rendered.
        assert!(component.lock_at(LockSite::new(SOURCE, "test")).is_changed());
    }

    #[test]
    fn failing_action_maps_to_invocation_error() {
        let component = tally();
        let err = dispatch(&component, &request("add", json!({"by": "two"}))).expect_err("bad");
        assert!(matches!(err, DispatchError::Action { .. }));
        assert_eq!(err.status().as_u16(), 422);
    }
}
