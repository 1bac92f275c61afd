use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod settings;
pub mod validation;

pub use settings::ServerConfig;

/// Initialize logging system with structured output and environment-based level filtering
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with_level(None)
}

/// Same as [`init_logging`], with the `cloudwright` target level taken from the CLI when given
pub fn init_logging_with_level(level: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.unwrap_or("info");
        EnvFilter::new(format!(
            "cloudwright={},tower_http=info,tokio=warn,hyper=warn",
            level
        ))
    });

    // Logs go to stderr so the stdio transport keeps stdout for protocol frames.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(false)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .compact(),
        )
        .try_init()?;

    tracing::info!("Structured logging initialized");
    Ok(())
}

/// Initialize logging for testing with reduced verbosity
pub fn init_test_logging() -> anyhow::Result<()> {
    let env_filter = EnvFilter::new("cloudwright=debug");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer().compact())
        .try_init()
        .or_else(|_| Ok(()))
}

/// Log structured events with consistent formatting
#[macro_export]
macro_rules! log_event {
    (request = $request_id:expr, resource = $resource:expr, $level:ident, $($field:tt)*) => {
        tracing::$level!(
            request_id = %$request_id,
            resource = %$resource,
            $($field)*
        );
    };
    (request = $request_id:expr, $level:ident, $($field:tt)*) => {
        tracing::$level!(
            request_id = %$request_id,
            $($field)*
        );
    };
}
