//! Demo components backed by askama templates.
//!
//! `Counter` is reactive and reachable through the action protocol. `Badge`
//! and `Card` cache their output through a [`CacheClient`]; `Clock` opts out
//! of caching altogether.

use std::sync::Arc;

use askama::Template;
use once_cell::sync::Lazy;
use serde_json::Value;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    cache::CacheClient,
    domain::{
        actions::ActionTable,
        component::{Attributes, Child, Component, ComponentId, render_children},
        error::{ActionError, RenderError},
        reactive::{Reactive, StateCell},
    },
};

use super::views::render_markup;

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<div class="counter" id="{{ id }}"><span class="counter-label">{{ label }}</span> <output>{{ count }}</output></div>"#
)]
struct CounterMarkup<'a> {
    id: &'a str,
    label: &'a str,
    count: i64,
}

pub struct Counter {
    id: ComponentId,
    attributes: Attributes,
    state: StateCell<i64>,
}

impl Counter {
    pub fn new(id: impl Into<ComponentId>, label: &str) -> Self {
        Self::starting_at(id, label, 0)
    }

    pub fn starting_at(id: impl Into<ComponentId>, label: &str, count: i64) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new().with("label", label),
            state: StateCell::new(count),
        }
    }

    pub fn count(&self) -> i64 {
        *self.state.get()
    }

    fn increment(&mut self, event: &Value) -> Result<(), ActionError> {
        let by = step(event)?;
        self.state.update(|count| *count += by);
        Ok(())
    }

    fn decrement(&mut self, event: &Value) -> Result<(), ActionError> {
        let by = step(event)?;
        self.state.update(|count| *count -= by);
        Ok(())
    }

    fn reset(&mut self, _event: &Value) -> Result<(), ActionError> {
        self.state.set(0);
        Ok(())
    }
}

/// `event.by`, defaulting to one.
fn step(event: &Value) -> Result<i64, ActionError> {
    match event.get("by") {
        None | Some(Value::Null) => Ok(1),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| ActionError::invalid_event("`by` must be an integer")),
    }
}

static COUNTER_ACTIONS: Lazy<ActionTable<Counter>> = Lazy::new(|| {
    ActionTable::new("Counter")
        .action("increment", Counter::increment)
        .action("decrement", Counter::decrement)
        .action("reset", Counter::reset)
});

impl Component for Counter {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        "Counter"
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn render_content(&self) -> Result<String, RenderError> {
        render_markup(
            "Counter",
            CounterMarkup {
                id: self.id.as_str(),
                label: self.attributes.get("label").unwrap_or_default(),
                count: self.count(),
            },
        )
    }

    // Live state is never cached.
    fn cacheable(&self) -> bool {
        false
    }
}

impl Reactive for Counter {
    type State = i64;

    fn actions() -> &'static ActionTable<Self> {
        &COUNTER_ACTIONS
    }

    fn state(&self) -> &StateCell<i64> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StateCell<i64> {
        &mut self.state
    }
}

#[derive(Template)]
#[template(ext = "html", source = r#"<span class="badge badge-{{ tone }}">{{ label }}</span>"#)]
struct BadgeMarkup<'a> {
    tone: &'a str,
    label: &'a str,
}

#[derive(Clone)]
pub struct Badge {
    id: ComponentId,
    attributes: Attributes,
    cache: CacheClient,
}

impl Badge {
    pub fn new(label: &str, tone: &str, cache: CacheClient) -> Self {
        Self {
            id: ComponentId::generate("badge"),
            attributes: Attributes::new().with("label", label).with("tone", tone),
            cache,
        }
    }
}

impl Component for Badge {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        "Badge"
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn render_content(&self) -> Result<String, RenderError> {
        render_markup(
            "Badge",
            BadgeMarkup {
                tone: self.attributes.get("tone").unwrap_or("neutral"),
                label: self.attributes.get("label").unwrap_or_default(),
            },
        )
    }

    fn render(&self) -> Result<String, RenderError> {
        self.cache.cache(self, None, || self.render_content())
    }
}

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<article class="card"><h2>{{ title }}</h2><div class="card-body">{{ body|safe }}</div></article>"#
)]
struct CardMarkup<'a> {
    title: &'a str,
    body: &'a str,
}

/// A titled container whose cached output depends on its child badges.
pub struct Card {
    id: ComponentId,
    attributes: Attributes,
    children: Vec<Child>,
    cache: CacheClient,
}

impl Card {
    pub fn new(title: &str, badges: Vec<Badge>, cache: CacheClient) -> Self {
        Self {
            id: ComponentId::generate("card"),
            attributes: Attributes::new().with("title", title),
            children: badges.into_iter().map(Child::component).collect(),
            cache,
        }
    }

    fn dependencies(&self) -> Vec<&dyn Component> {
        self.children
            .iter()
            .filter_map(|child| match child {
                Child::Component(component) => Some(component.as_ref()),
                Child::Text(_) => None,
            })
            .collect()
    }

    /// Drop the composite entry so the next render rebuilds the card body.
    pub fn invalidate(&self) -> bool {
        self.cache
            .invalidate_dependencies(self, &self.dependencies())
    }
}

impl Component for Card {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        "Card"
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn children(&self) -> &[Child] {
        &self.children
    }

    fn render_content(&self) -> Result<String, RenderError> {
        let body = render_children(&self.children)?;
        render_markup(
            "Card",
            CardMarkup {
                title: self.attributes.get("title").unwrap_or_default(),
                body: &body,
            },
        )
    }

    fn render(&self) -> Result<String, RenderError> {
        let dependencies = self.dependencies();
        self.cache
            .cache_with_dependencies(self, &dependencies, None, || self.render_content())
    }
}

static CLOCK_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second] UTC");

#[derive(Template)]
#[template(ext = "html", source = r#"<time class="clock">{{ now }}</time>"#)]
struct ClockMarkup<'a> {
    now: &'a str,
}

/// Wall-clock readout. Its output changes every second, so it never caches.
pub struct Clock {
    id: ComponentId,
    attributes: Attributes,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            id: ComponentId::generate("clock"),
            attributes: Attributes::new(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Clock {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        "Clock"
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn render_content(&self) -> Result<String, RenderError> {
        let now = OffsetDateTime::now_utc()
            .format(CLOCK_FORMAT)
            .map_err(|err| RenderError::failed("Clock", err.to_string()))?;
        render_markup("Clock", ClockMarkup { now: &now })
    }

    fn cacheable(&self) -> bool {
        false
    }
}

/// The component set shown on the demo page and warmed at startup.
pub fn demo_components(cache: &CacheClient) -> Vec<Arc<dyn Component>> {
    let stable = Badge::new("stable", "success", cache.clone());
    let beta = Badge::new("beta", "warning", cache.clone());
    vec![
        Arc::new(stable.clone()),
        Arc::new(beta.clone()),
        Arc::new(Card::new("Release channels", vec![stable, beta], cache.clone())),
        Arc::new(Clock::new()),
    ]
}
