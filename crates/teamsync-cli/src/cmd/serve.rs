use anyhow::Context;
use std::path::Path;
use teamsync_server::AppState;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let state = AppState::open(root).context("failed to open teamsync project")?;
    let port = port.unwrap_or(state.service.config().server.port);
    if let Some(file) = state.store().data_file() {
        tracing::info!(file = %file.display(), "serving data file");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        let actual_port = listener.local_addr()?.port();
        println!("teamsync API → http://localhost:{actual_port}");

        tokio::select! {
            res = teamsync_server::serve_on(state, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
