//! ShopIntent service entry point
//!
//! Reads settings from the environment, wires the application context, and
//! serves HTTP until interrupted. Failures bubble to the edge as `anyhow`
//! errors; only here are they rendered and mapped to exit codes.
//!
//! Exit codes: 0 on clean shutdown, 1 when startup validation fails, 2 when
//! a required dependency is unavailable.

use anyhow::Context;
use shopintent::config::Settings;
use shopintent::{AppContext, BootstrapError};
use tracing_subscriber::EnvFilter;

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    let context = AppContext::bootstrap(settings)
        .await
        .context("startup failed")?;
    context.serve().await.context("server failed")?;
    Ok(())
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<BootstrapError>()
        .map(BootstrapError::exit_code)
        .unwrap_or(2)
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        version = shopintent::VERSION,
        "starting {}",
        shopintent::NAME
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(2);
        }
    };

    let exit_code = match runtime.block_on(run()) {
        Ok(()) => 0,
        Err(error) => {
            // "{:#}" renders the whole context chain on one line.
            tracing::error!(error = %format!("{error:#}"), "fatal");
            exit_code_for(&error)
        }
    };

    std::process::exit(exit_code);
}
