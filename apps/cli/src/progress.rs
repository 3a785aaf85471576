//! Progress bar for a running download

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use parget_types::{CoreEvent, ResourceInfo};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Drive an indicatif bar from engine events until the download ends.
pub fn render(info: &ResourceInfo, mut events: broadcast::Receiver<CoreEvent>) -> JoinHandle<()> {
    let bar = ProgressBar::new(info.size);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
            .unwrap()
            .progress_chars("█▓▒░  "),
    );
    bar.set_message(info.filename.clone());

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoreEvent::Progress { stats }) => {
                    bar.set_position(stats.bytes_downloaded);
                }
                Ok(CoreEvent::Completed { .. }) => {
                    bar.finish_with_message(format!("{} complete", style("✓").green().bold()));
                    break;
                }
                Ok(CoreEvent::Failed { message }) => {
                    bar.abandon_with_message(format!("{} {message}", style("✗").red().bold()));
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
