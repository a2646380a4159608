use crate::cli::run::Services;
use crate::config::parse::load_config;
use crate::dispatch::{BatchRequest, BatchSnapshot, PacingTier, Recipient};
use std::path::PathBuf;
use tokio::signal;

/// Arguments for a one-off batch sent from the command line
pub struct SendArgs {
    pub to: String,
    pub count: i64,
    pub speed: String,
    pub message: Option<String>,
}

/// Send one batch without the HTTP server and print progress until it
/// finishes. Ctrl+C cancels the batch.
pub async fn send(config_path: Option<PathBuf>, args: SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .ok_or("No config file found. Use --config to specify a path, or run 'smsbatch config init'.")?;
    let config = load_config(&path)?;
    let services = Services::build(&config).await?;

    let recipient = Recipient::parse(&args.to)?;
    let mut request = BatchRequest::new(recipient, args.count, PacingTier::lenient(&args.speed))?;
    if let Some(content) = args.message {
        request = request.with_custom_message(content)?;
    }

    let mut progress = services.engine.publisher().subscribe();
    let ack = services.engine.start_batch(request)?;
    println!(
        "Batch {} accepted, estimated duration {} seconds",
        ack.batch_id, ack.estimated_duration_seconds
    );

    let finished = services.engine.wait(ack.batch_id);
    tokio::pin!(finished);

    let last = loop {
        tokio::select! {
            done = &mut finished => break done,
            _ = signal::ctrl_c() => {
                println!("Cancelling...");
                services.engine.cancel(ack.batch_id)?;
            }
            Some(snapshot) = progress.recv() => {
                if snapshot.batch_id == ack.batch_id && !snapshot.status.is_terminal() {
                    print_progress(&snapshot);
                }
            }
        }
    };

    let last = last.ok_or("batch disappeared before finishing")?;
    services.recorder.flush().await;
    print_progress(&last);
    if let Some(error) = &last.error {
        eprintln!("Batch error: {}", error);
    }
    println!(
        "Finished: {} ({} sent, {} failed of {})",
        last.status.as_str(),
        last.success_count,
        last.failure_count,
        last.total
    );

    Ok(())
}

fn print_progress(snapshot: &BatchSnapshot) {
    let latest = snapshot
        .messages
        .last()
        .map(|m| match &m.error {
            Some(error) => format!(" | #{} failed: {}", m.index, error),
            None => format!(" | #{} {}", m.index, m.outcome.as_str()),
        })
        .unwrap_or_default();

    println!(
        "[{}/{}] {} ok={} failed={}{}",
        snapshot.sent_count,
        snapshot.total,
        snapshot.status.as_str(),
        snapshot.success_count,
        snapshot.failure_count,
        latest
    );
}
