use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        common: CommonOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.content.root, PathBuf::from(DEFAULT_CONTENT_ROOT));
    assert_eq!(settings.content.base_path, "");
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.render_limit.get(), DEFAULT_RENDER_LIMIT);
    assert_eq!(settings.cache.max_include_depth, DEFAULT_MAX_INCLUDE_DEPTH);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        common: CommonOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);

    let err = Settings::from_raw(raw).expect_err("port 0 must fail");
    assert!(matches!(err, LoadError::Invalid { key: "server.port", .. }));
}

#[test]
fn zero_cache_limits_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.menu_limit = Some(0);

    let err = Settings::from_raw(raw).expect_err("limit 0 must fail");
    assert!(matches!(err, LoadError::Invalid { key: "cache.menu_limit", .. }));
}

#[test]
fn base_path_is_normalized() {
    let mut raw = RawSettings::default();
    raw.content.base_path = Some("/wiki/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.content.base_path, "/wiki");

    let mut raw = RawSettings::default();
    raw.content.base_path = Some("wiki".to_string());
    let err = Settings::from_raw(raw).expect_err("relative base path must fail");
    assert!(matches!(err, LoadError::Invalid { key: "content.base_path", .. }));
}

#[test]
fn cache_settings_feed_cache_config() {
    let mut raw = RawSettings::default();
    raw.cache.enabled = Some(false);
    raw.cache.include_limit = Some(7);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let config = crate::cache::CacheConfig::from(&settings.cache);
    assert!(!config.enabled);
    assert_eq!(config.include_limit, 7);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["folio"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "folio",
        "render",
        "docs/intro",
        "--output",
        "source",
        "--param",
        "theme=dark",
        "--param",
        "q=a=b",
        "--locale",
        "de",
        "--no-cache",
        "--content-root",
        "/srv/wiki",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.path, "docs/intro");
            assert_eq!(render.output.as_deref(), Some("source"));
            assert_eq!(
                render.params,
                [
                    ("theme".to_string(), "dark".to_string()),
                    ("q".to_string(), "a=b".to_string())
                ]
            );
            assert_eq!(render.locale.as_deref(), Some("de"));
            assert!(render.no_cache);
            assert_eq!(
                render.overrides.content_root.as_deref(),
                Some(std::path::Path::new("/srv/wiki"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn malformed_params_are_rejected() {
    let result = CliArgs::try_parse_from(["folio", "render", "Home", "--param", "novalue"]);
    assert!(result.is_err());
}

#[test]
fn parse_engines_arguments() {
    let args = CliArgs::parse_from(["folio", "engines", "Home"]);
    match args.command.expect("engines command") {
        Command::Engines(engines) => assert_eq!(engines.path, "Home"),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "folio",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--base-path",
        "/wiki",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.base_path.as_deref(), Some("/wiki"));
            assert_eq!(serve.overrides.common.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}
