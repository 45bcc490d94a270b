use super::*;

#[test]
fn defaults_resolve() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.max_entries, 10_000);
    assert!(settings.cache.default_ttl.is_none());
    assert_eq!(settings.reactive.websocket_path, "/_reactive/ws");
    assert_eq!(settings.reactive.action_path_prefix, "/_reactive/actions");
    assert!(settings.reactive.enable_http_fallback);
    assert_eq!(settings.reactive.max_pending_components, 64);
    assert_eq!(settings.warmer.batch_size.get(), 8);
    assert!(settings.warmer.warm_on_startup);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.enabled = Some(true);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        cache_enabled: Some(false),
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            log_json: Some(true),
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
    assert!(!settings.cache.enabled);
}

#[test]
fn warm_command_overrides_batch_size() {
    let mut raw = RawSettings::default();
    raw.apply_warm_overrides(&WarmArgs {
        batch_size: Some(3),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.warmer.batch_size.get(), 3);
}

#[test]
fn zero_ttl_means_no_expiry() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(0);
    raw.warmer.ttl_seconds = Some(90);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cache.default_ttl.is_none());
    assert_eq!(settings.warmer.ttl, Some(Duration::from_secs(90)));
}

#[test]
fn route_paths_are_normalized() {
    let mut raw = RawSettings::default();
    raw.reactive.action_path_prefix = Some("/rpc/actions/".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.reactive.action_path_prefix, "/rpc/actions");
}

#[test]
fn invalid_values_are_rejected() {
    let cases: Vec<(&str, Box<dyn Fn(&mut RawSettings)>)> = vec![
        ("server.port", Box::new(|raw| raw.server.port = Some(0))),
        (
            "logging.level",
            Box::new(|raw| raw.logging.level = Some("loud".to_string())),
        ),
        (
            "reactive.websocket_path",
            Box::new(|raw| raw.reactive.websocket_path = Some("ws".to_string())),
        ),
        (
            "reactive.action_path_prefix",
            Box::new(|raw| raw.reactive.action_path_prefix = Some("/_reactive/ws".to_string())),
        ),
        (
            "reactive.max_payload_bytes",
            Box::new(|raw| raw.reactive.max_payload_bytes = Some(0)),
        ),
        (
            "reactive.max_pending_components",
            Box::new(|raw| raw.reactive.max_pending_components = Some(0)),
        ),
        (
            "warmer.batch_size",
            Box::new(|raw| raw.warmer.batch_size = Some(0)),
        ),
    ];

    for (expected_key, mutate) in cases {
        let mut raw = RawSettings::default();
        mutate(&mut raw);
        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, expected_key),
            other => panic!("expected invalid `{expected_key}`, got {other:?}"),
        }
    }
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["tessera"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_warm_arguments() {
    let args = CliArgs::parse_from(["tessera", "warm", "--batch-size", "5", "--log-json", "yes"]);

    match args.command.expect("warm command") {
        Command::Warm(warm) => {
            assert_eq!(warm.batch_size, Some(5));
            assert_eq!(warm.logging.log_json, Some(true));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_serve_arguments() {
    let args = CliArgs::parse_from([
        "tessera",
        "serve",
        "--server-port",
        "8080",
        "--reactive-http-fallback",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.enable_http_fallback, Some(false));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
