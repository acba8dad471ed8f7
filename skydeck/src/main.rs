//! Skydeck - Entry Point
//!
//! One binary for every component, selected with `--component=<name>`.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use skydeck::app::options::{
    log_options, BroadcasterOptions, BuilderOptions, DispatcherOptions, Env, RouterOptions,
};
use skydeck::app::preflight::{check, Component};
use skydeck::app::run::{run_broadcaster, run_builder, run_dispatcher, run_router};
use skydeck::errors::PlatformError;
use skydeck::logs::init_logging;
use skydeck::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to encode version: {}", e),
        }
        return ExitCode::SUCCESS;
    }

    let component = match cli_args
        .get("component")
        .map(String::as_str)
        .unwrap_or_default()
        .parse::<Component>()
    {
        Ok(component) => component,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: skydeck --component=<dispatcher|builder|broadcaster|router> [--check-env]");
            return ExitCode::from(2);
        }
    };

    let env = Env::from_process();

    // Environment preflight
    let report = check(component, &env);
    if cli_args.contains_key("check-env") {
        print!("{}", report.render());
        return if report.is_ok() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }
    if !report.is_ok() {
        eprint!("{}", report.render());
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let _log_guard = match init_logging(log_options(&env, component.name())) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("Starting skydeck {} ({})", version_info().version, component);
    match run(component, &env).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the {}: {e}", component);
            ExitCode::FAILURE
        }
    }
}

async fn run(component: Component, env: &Env) -> Result<(), PlatformError> {
    match component {
        Component::Dispatcher => {
            run_dispatcher(DispatcherOptions::from_env(env)?, await_shutdown_signal()).await
        }
        Component::Builder => {
            let report = run_builder(BuilderOptions::from_env(env)?).await?;
            info!(
                "Build finished with exit code {:?}, {} file(s) uploaded",
                report.exit_code,
                report.uploaded.len()
            );
            Ok(())
        }
        Component::Broadcaster => {
            run_broadcaster(BroadcasterOptions::from_env(env)?, await_shutdown_signal()).await
        }
        Component::Router => {
            run_router(RouterOptions::from_env(env)?, await_shutdown_signal()).await
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
