use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use splex::config::{Args, Config, FileOrigin};
use splex::{merge, Formatter, GeometryTracker, Message, Sink, SourceRegistry};

const BANNER: [&str; 3] = [
    "-------------------",
    "  Starting SpleX   ",
    "----- 🦈  🦈 ------",
];

/// Diagnostics go to stderr so they never mix with the multiplexed output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::resolve(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "Error:".red());
            eprintln!(
                "{} splex [options] file1 file2 file3...",
                "Usage example:".yellow()
            );
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "Error:".red());
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let formatter = Formatter::new(config.mode, config.styled(std::io::stdout().is_terminal()));

    if let FileOrigin::RcFile(rc) = &config.origin {
        let notice = format!(
            "INFO: File names not provided, reading from {} file",
            rc.display()
        );
        println!("{}", formatter.info(&notice));
    }

    let mut sink = match &config.output {
        Some(path) => Sink::file(path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?,
        None => Sink::stdout(),
    };

    for line in BANNER {
        sink.write(line).await?;
    }

    let (feed, mut merger) = merge::channel();
    let mut registry = SourceRegistry::new(config.palette.clone());
    registry.register(&config.files);
    registry
        .start_all(&feed)
        .context("failed to start watching files")?;
    // Only followers hold a feed from here on.
    drop(feed);

    for source in registry.sources() {
        sink.write(&formatter.announce(source)).await?;
    }

    let geometry = GeometryTracker::spawn();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut following = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = merger.next_message(), if following => match message {
                Some(Message::Line(line)) => {
                    let rendered = formatter.render(&line, &geometry.current());
                    for text in rendered.lines() {
                        sink.write(text).await?;
                    }
                }
                Some(Message::Failed(err)) => {
                    tracing::warn!(file = err.origin().name(), error = %err.error(), "stopped following");
                    sink.write(&formatter.error(&err)).await?;
                }
                None => {
                    tracing::warn!("no files left to follow, waiting for interrupt");
                    following = false;
                }
            },
            change = sink.next_change() => sink.handle_change(change).await?,
        }
    }

    tracing::debug!("shutting down");
    registry.stop_all();
    sink.close().await.context("failed to close output")?;

    Ok(())
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
