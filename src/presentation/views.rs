use crate::application::error::{ErrorReport, HttpError};
use crate::domain::error::RenderError;
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        HttpError::from_error(
            "presentation::views::render_template",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
            &err,
        )
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Render a component-level template, tagging failures with the component type.
pub fn render_markup<T: Template>(component: &'static str, template: T) -> Result<String, RenderError> {
    template
        .render()
        .map_err(|err: AskamaError| RenderError::template(component, err))
}

pub fn render_not_found_response() -> Response {
    let mut response = render_template_response(
        PageTemplate {
            title: "Not found",
            sections: Vec::new(),
        },
        StatusCode::NOT_FOUND,
    );
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Pre-rendered component markup placed on the demo page.
#[derive(Clone, Debug)]
pub struct SectionView {
    pub component_id: String,
    pub html: String,
}

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>{{ title }}</title></head>
<body>
<main>
{% for section in sections %}<section data-component-id="{{ section.component_id }}">{{ section.html|safe }}</section>
{% endfor %}</main>
</body>
</html>
"#
)]
pub struct PageTemplate<'a> {
    pub title: &'a str,
    pub sections: Vec<SectionView>,
}
