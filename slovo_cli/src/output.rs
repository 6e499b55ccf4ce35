use slovo_core::{AppEvent, Direction};
use std::io::Write;
use tokio::sync::mpsc;

/// Print engine events until the channel closes
pub async fn print_events(mut event_rx: mpsc::Receiver<AppEvent>) {
    // Redraw the progress line only when the percentage moves
    let mut last_percent: Option<u8> = None;

    while let Some(event) = event_rx.recv().await {
        match event {
            AppEvent::Status(msg) => {
                end_progress_line(&mut last_percent);
                println!("{}", msg);
            }
            AppEvent::Error(msg) => {
                end_progress_line(&mut last_percent);
                eprintln!("error: {}", msg);
            }
            AppEvent::PeerFound(peer) => {
                println!("  {} ({})", peer.display_name, peer.address.ip());
            }
            AppEvent::ScanFinished { peers } => {
                println!("Scan finished: {} device(s)", peers.len());
            }
            AppEvent::TransferProgress(progress) => {
                if last_percent == Some(progress.percent) {
                    continue;
                }
                last_percent = Some(progress.percent);
                let arrow = match progress.direction {
                    Direction::Sending => "->",
                    Direction::Receiving => "<-",
                };
                print!(
                    "\r{} {} {:>3}%  {}",
                    arrow,
                    progress.file_name,
                    progress.percent,
                    progress.speed()
                );
                let _ = std::io::stdout().flush();
            }
            AppEvent::ProgressReset => end_progress_line(&mut last_percent),
            AppEvent::TransferCompleted { file_name, direction } => {
                end_progress_line(&mut last_percent);
                match direction {
                    Direction::Sending => println!("Sent: {}", file_name),
                    Direction::Receiving => println!("Received: {}", file_name),
                }
            }
        }
    }
    end_progress_line(&mut last_percent);
}

fn end_progress_line(last_percent: &mut Option<u8>) {
    if last_percent.take().is_some() {
        println!();
    }
}
