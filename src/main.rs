use std::process;

use tessera::{
    application::{context::AppContext, error::AppError},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Warm(_) => run_warm(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let ctx = AppContext::init(&settings)?;

    if settings.warmer.warm_on_startup {
        let report = ctx.warm().await;
        if !report.is_clean() {
            warn!(
                target: "tessera::bootstrap",
                failed = report.failures.len(),
                "startup warming finished with failures"
            );
        }
    }

    let router = http::build_router(HttpState::from(&ctx));
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target: "tessera::bootstrap",
        addr = %settings.server.addr,
        websocket_path = %settings.reactive.websocket_path,
        action_path_prefix = %settings.reactive.action_path_prefix,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    if tokio::time::timeout(settings.server.graceful_shutdown, ctx.shutdown())
        .await
        .is_err()
    {
        warn!(
            target: "tessera::bootstrap",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "context shutdown timed out"
        );
    }

    Ok(())
}

async fn run_warm(settings: config::Settings) -> Result<(), AppError> {
    let ctx = AppContext::init(&settings)?;
    let report = ctx.warm().await;

    let output = serde_json::json!({
        "report": report,
        "components": ctx.warmer.stats(),
        "store": ctx.store_stats(),
    });
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to encode stats: {err}")))?;
    println!("{rendered}");

    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target: "tessera::bootstrap", "shutdown signal received"),
        Err(err) => {
            error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
