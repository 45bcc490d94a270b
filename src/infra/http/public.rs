use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::instrument;

use crate::{
    application::{context::AppContext, error::HttpError},
    cache::{
        CacheClient,
        lock::{LockExt, LockSite},
    },
    infra::cache_warmer::CacheWarmer,
    presentation::views::{
        PageTemplate, SectionView, render_not_found_response, render_template_response,
    },
    reactive::{ReactiveHandler, SharedComponent},
};

use super::{
    middleware::{log_responses, set_request_context},
    reactive::reactive_layer,
};

const SOURCE: &str = "infra::http::public";

#[derive(Clone)]
pub struct HttpState {
    pub cache: CacheClient,
    pub warmer: Arc<CacheWarmer>,
    pub counter: SharedComponent,
    pub handler: Arc<ReactiveHandler>,
}

impl From<&AppContext> for HttpState {
    fn from(ctx: &AppContext) -> Self {
        Self {
            cache: ctx.cache.clone(),
            warmer: ctx.warmer.clone(),
            counter: ctx.counter.clone(),
            handler: ctx.handler.clone(),
        }
    }
}

/// Demo routes behind the reactive layer. Requests the reactive layer does not
/// own fall through to these handlers.
pub fn build_router(state: HttpState) -> Router {
    let handler = state.handler.clone();

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn_with_state(handler, reactive_layer))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[instrument(skip(state))]
async fn index(State(state): State<HttpState>) -> Response {
    match render_sections(&state) {
        Ok(sections) => render_template_response(
            PageTemplate {
                title: "Tessera",
                sections,
            },
            StatusCode::OK,
        ),
        Err(err) => err.into_response(),
    }
}

fn render_sections(state: &HttpState) -> Result<Vec<SectionView>, HttpError> {
    let mut sections = Vec::new();

    for component in state.warmer.components() {
        let html = state
            .cache
            .cache(component.as_ref(), None, || component.render_content())?;
        sections.push(SectionView {
            component_id: component.id().to_string(),
            html,
        });
    }

    // The page shows the counter as it now is, so it counts as rendered.
    let mut counter = state.counter.lock_at(LockSite::new(SOURCE, "index"));
    let html = counter.render_live()?;
    sections.push(SectionView {
        component_id: counter.id().to_string(),
        html,
    });

    Ok(sections)
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback() -> Response {
    render_not_found_response()
}
