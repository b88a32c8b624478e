use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use canary_core::config::CanaryConfig;
use canary_daemon::cli::DaemonCli;
use canary_daemon::server::{self, AppState};
use canary_daemon::{logging, metrics_server};
use canary_engine::{HttpPlatform, MetricsRecorder, MqttTransport, Orchestrator, RunGate};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일 -> 환경변수 -> CLI 순서로 덮어씀
    let mut config = CanaryConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(config = %cli.config.display(), "canary-daemon starting");

    let handle = metrics_server::install_metrics_recorder()?;

    let platform = HttpPlatform::from_config(&config)
        .map_err(|e| anyhow::anyhow!("failed to build platform client: {}", e))?;
    let transport = MqttTransport::from_config(&config)
        .map_err(|e| anyhow::anyhow!("failed to build broker transport: {}", e))?;
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        Arc::new(platform),
        Arc::new(transport),
        Arc::new(MetricsRecorder),
        RunGate::new(),
    ));

    if cli.once {
        orchestrator.run().await;
        tracing::info!("single run finished");
        print!("{}", handle.render());
        return Ok(());
    }

    let addr: SocketAddr = format!("{}:{}", config.server.listen_addr, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;

    let state = AppState {
        exposition: Arc::new(handle),
        trigger: Arc::new(Arc::clone(&orchestrator)),
    };
    server::serve(addr, state, shutdown_signal()).await?;

    // 진행 중인 실행이 있으면 정리(teardown)가 끝날 때까지 기다림
    while orchestrator.gate().is_running() {
        tracing::info!("waiting for the active run to finish");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    tracing::info!("canary-daemon shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
