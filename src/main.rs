use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pinchtab::cdp::{CdpClient, CdpConfig};
use pinchtab::chrome::{self, LaunchOptions};
use pinchtab::cli::{Cli, Command, ConfigCommand};
use pinchtab::config::{self, Config};
use pinchtab::handlers::AppState;
use pinchtab::registry::Bridge;
use pinchtab::server::create_router;
use pinchtab::{state, stealth};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pinchtab=info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Some(Command::Config(args)) => run_config(&args.command),
        None => serve().await,
    };
    std::process::exit(exit_code);
}

fn run_config(command: &ConfigCommand) -> i32 {
    match command {
        ConfigCommand::Init => match config::init_config_file(None) {
            Ok(path) => {
                println!("{}", path.display());
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        ConfigCommand::Show => {
            let config = Config::load();
            match serde_json::to_string_pretty(&config) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(e) => {
                    eprintln!("{e}");
                    1
                }
            }
        }
    }
}

async fn serve() -> i32 {
    let config = Arc::new(Config::load());

    if let Err(e) = std::fs::create_dir_all(&config.state_dir) {
        tracing::error!(error = %e, "cannot create state dir");
        return 1;
    }

    // Resolve the browser endpoint: an external one when CDP_URL is set,
    // otherwise launch Chrome ourselves.
    let mut chrome_process = None;
    let ws_url = if config.cdp_url.is_empty() {
        let executable = match chrome::find_chrome_executable(config.chrome_binary.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "cannot find Chrome");
                return 1;
            }
        };
        tracing::info!(
            profile = %config.profile_dir.display(),
            headless = config.headless,
            "launching Chrome"
        );
        state::mark_clean_exit(&config.profile_dir);
        let process = match chrome::launch_chrome(
            LaunchOptions {
                executable,
                profile_dir: config.profile_dir.clone(),
                headless: config.headless,
                extra_flags: config.chrome_flags.clone(),
            },
            Duration::from_secs(30),
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "cannot start Chrome");
                return 1;
            }
        };
        let url = match chrome::query_version("127.0.0.1", process.port()).await {
            Ok(version) => version.ws_debugger_url,
            Err(e) => {
                tracing::error!(error = %e, "cannot resolve Chrome endpoint");
                return 1;
            }
        };
        chrome_process = Some(process);
        url
    } else {
        tracing::info!(url = %config.cdp_url, "connecting to Chrome");
        match chrome::resolve_ws_url(&config.cdp_url).await {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "cannot resolve CDP_URL");
                return 1;
            }
        }
    };

    let cdp_config = CdpConfig {
        command_timeout: config.action_timeout,
        ..CdpConfig::default()
    };
    let client = match CdpClient::connect(&ws_url, cdp_config).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "cannot connect to Chrome");
            return 1;
        }
    };

    let bridge = Arc::new(Bridge::new(client));

    // Instrument the initial tab; scripts registered via
    // Page.addScriptToEvaluateOnNewDocument persist across navigations.
    match bridge.resolve_tab(None).await {
        Ok((entry, id)) => {
            tracing::info!(tab = %id, "initial tab");
            if let Err(e) = stealth::inject_stealth(&entry.session).await {
                tracing::error!(error = %e, "cannot start Chrome");
                return 1;
            }
            if config.no_animations {
                stealth::inject_no_animations(&entry.session).await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "no initial tab"),
    }

    if !config.no_restore {
        // Restore in the background so it doesn't block the HTTP server.
        let bridge_clone = Arc::clone(&bridge);
        let config_clone = Arc::clone(&config);
        tokio::spawn(async move {
            state::restore_state(&bridge_clone, &config_clone).await;
        });
    }

    let (reaper_stop_tx, reaper_stop_rx) = watch::channel(false);
    {
        let bridge = Arc::clone(&bridge);
        let interval = config.reaper_interval();
        tokio::spawn(async move {
            bridge.run_reaper(interval, reaper_stop_rx).await;
        });
    }

    let app_state = Arc::new(AppState::new(Arc::clone(&bridge), Arc::clone(&config)));
    let app = create_router(Arc::clone(&app_state));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(port = config.port, error = %e, "cannot bind");
            return 1;
        }
    };

    tracing::info!(port = config.port, cdp = %ws_url, "🦀 PINCH! PINCH!");
    if config.token.is_empty() {
        tracing::info!("auth disabled (set BRIDGE_TOKEN to enable)");
    } else {
        tracing::info!("auth enabled");
    }

    let (drain_tx, drain_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut drain_rx = drain_rx;
                let _ = drain_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutting down, saving state...");

    app_state.begin_shutdown();
    let _ = reaper_stop_tx.send(true);
    state::save_state(&bridge, &config).await;
    state::mark_clean_exit(&config.profile_dir);
    let _ = drain_tx.send(true);

    // Give in-flight requests a bounded drain window, then force-close.
    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "server");
            return 1;
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "server task");
            return 1;
        }
        Err(_) => tracing::warn!("drain timeout; forcing shutdown"),
    }

    if let Some(mut process) = chrome_process {
        process.kill();
    }
    0
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
