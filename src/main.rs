//! Agent Chat terminal client
//!
//! Reads one message per line from stdin, sends it to the configured backend
//! and prints the assistant's reply as it streams in.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Stdout;

use agent_chat_client::config::AppConfig;
use agent_chat_client::render::TerminalRenderer;
use agent_chat_client::{ChatController, SendOutcome};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = AppConfig::load()?;

    // Initialize tracing (M-LOG-STRUCTURED); stdout belongs to the transcript.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let controller = ChatController::from_config(&config)?;

    info!(
        name: "client.started",
        base_url = %config.backend.base_url,
        user_id = %controller.user_id(),
        "Chat client started"
    );

    let mut renderer = TerminalRenderer::new(std::io::stdout());
    renderer.render(controller.transcript())?;
    renderer.finish()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        exchange(&controller, &mut renderer, &line).await?;
    }

    info!(name: "client.stopped", "Input closed, exiting");
    Ok(())
}

/// Run one send while rendering transcript and progress changes live.
async fn exchange(
    controller: &ChatController,
    renderer: &mut TerminalRenderer<Stdout>,
    line: &str,
) -> anyhow::Result<()> {
    let mut changes = controller.transcript().subscribe();
    let mut indicators = controller.subscribe_indicators();
    let mut last_progress = None;

    let send = controller.send(line);
    tokio::pin!(send);

    loop {
        tokio::select! {
            outcome = &mut send => {
                renderer.render(controller.transcript())?;
                renderer.finish()?;
                if let SendOutcome::Ignored(reason) = outcome {
                    debug!(reason = ?reason, "Input not sent");
                }
                return Ok(());
            }
            Ok(()) = changes.changed() => {
                renderer.render(controller.transcript())?;
            }
            Ok(()) = indicators.changed() => {
                let progress = indicators.borrow_and_update().progress_display();
                if progress != last_progress {
                    if let Some(pct) = progress {
                        eprintln!("[{pct:>3}%]");
                    }
                    last_progress = progress;
                }
            }
        }
    }
}
