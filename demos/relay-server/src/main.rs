use std::process::ExitCode;

use switchboard::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// One log line per server event.
fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::ClientConnected { client, secure } => {
            let transport = if *secure { "wss" } else { "ws" };
            format!("+ {} ({transport})", client.id)
        }
        ServerEvent::ClientDisconnected { client_id } => format!("- {client_id}"),
        ServerEvent::Message {
            client_id, content, ..
        } => format!("{client_id}: {content}"),
        ServerEvent::Error(error) => format!("! {error}"),
    }
}

fn log_events(server: &SwitchboardServer) {
    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event @ ServerEvent::Error(_)) => tracing::warn!("{}", describe(&event)),
                Ok(event) => tracing::info!("{}", describe(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

async fn serve(config: ServerConfig) -> Result<(), SwitchboardError> {
    let server = SwitchboardServerBuilder::from_config(&config)?.build().await?;
    tracing::info!(
        plain = %config.plain_addr(),
        secure = ?config.tls.as_ref().map(|_| config.secure_addr()),
        echo_to_sender = config.relay.echo_to_sender,
        "relay server listening"
    );
    log_events(&server);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match ServerConfig::from_env() {
        Ok(config) => serve(config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "relay server stopped");
            ExitCode::FAILURE
        }
    }
}
