use std::{
    io::{self, Write},
    process,
    sync::Arc,
};

use folio::{
    application::{Dispatcher, RenderOptions, error::AppError},
    cache::CacheConfig,
    config,
    context::RequestState,
    domain::ResourceStore,
    engine::{builtin::builtin_registry, registry},
    infra::{
        error::InfraError,
        fs_store::FsResourceStore,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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

    let dispatcher = build_dispatcher(&settings)?;

    match command {
        config::Command::Serve(_) => run_serve(settings, dispatcher).await,
        config::Command::Render(args) => run_render(dispatcher, args).await,
        config::Command::Engines(args) => run_engines(dispatcher, args),
    }
}

fn build_dispatcher(settings: &config::Settings) -> Result<Dispatcher, AppError> {
    let root = &settings.content.root;
    if !root.is_dir() {
        return Err(AppError::from(InfraError::configuration(format!(
            "content root `{}` is not a directory",
            root.display()
        ))));
    }

    let engines = registry::install(builtin_registry()?)?;
    info!(
        target = "folio::bootstrap",
        engines = engines.len(),
        root = %root.display(),
        cache_enabled = settings.cache.enabled,
        "dispatcher ready"
    );

    let store: Arc<dyn ResourceStore> = Arc::new(FsResourceStore::new(root.clone()));
    Ok(Dispatcher::builder(engines, store)
        .cache(CacheConfig::from(&settings.cache))
        .base_path(settings.content.base_path.clone())
        .build())
}

async fn run_serve(settings: config::Settings, dispatcher: Dispatcher) -> Result<(), AppError> {
    let router = http::build_router(HttpState { dispatcher });
    http::serve(&settings.server, router)
        .await
        .map_err(AppError::from)
}

async fn run_render(dispatcher: Dispatcher, args: config::RenderArgs) -> Result<(), AppError> {
    let config::RenderArgs {
        path,
        output,
        params,
        locale,
        no_cache,
        ..
    } = args;

    let request = Arc::new(
        RequestState::new()
            .with_query(params)
            .with_no_cache(no_cache)
            .with_locale(locale),
    );
    let mut options = RenderOptions::new().request(request);
    if let Some(output) = output {
        options = options.engine(output);
    }

    let outcome =
        tokio::task::spawn_blocking(move || dispatcher.render_path(&path, options))
            .await
            .map_err(|err| AppError::unexpected(format!("render worker failed: {err}")))??;

    info!(
        target = "folio::render",
        engine = %outcome.engine,
        content_type = outcome.content_type().unwrap_or(""),
        bytes = outcome.artifact.len(),
        cache = outcome.cache_status.as_str(),
        "rendered"
    );

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(&outcome.artifact)
        .and_then(|()| stdout.flush())
        .map_err(|err| AppError::from(InfraError::from(err)))
}

fn run_engines(dispatcher: Dispatcher, args: config::EnginesArgs) -> Result<(), AppError> {
    let resource = dispatcher
        .store()
        .find(&args.path)
        .map_err(|err| AppError::Dispatch(err.into()))?;
    let preferred = dispatcher
        .registry()
        .find_exact(&resource, resource.output(), false)
        .ok();

    let mut stdout = io::stdout().lock();
    let mut print = |line: String| {
        writeln!(stdout, "{line}").map_err(|err| AppError::from(InfraError::from(err)))
    };

    print(format!("{} ({})", resource.path(), resource.mime()))?;
    for engine in dispatcher.registry().find_all(&resource) {
        let spec = engine.spec();
        let marker = match &preferred {
            Some(best) if Arc::ptr_eq(best, &engine) => "*",
            _ => " ",
        };
        print(format!(
            "{marker} {:<12} {:>4}  {:<8} {}",
            spec.name(),
            spec.priority(),
            if spec.layout() { "layout" } else { "download" },
            spec.description()
        ))?;
    }
    Ok(())
}
