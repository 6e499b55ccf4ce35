use crate::{AppEvent, Direction, TransferProgress};
use crate::transfer::constants::{ELAPSED_EPSILON_SECS, MAX_FILENAME_LENGTH};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Percentage of `done` over `total`, floored and clamped to 100.
/// An empty transfer counts as complete.
pub fn percent_complete(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Average throughput in bytes/second since `start_time`
pub fn throughput_bps(bytes_done: u64, start_time: Instant) -> f64 {
    bytes_done as f64 / (start_time.elapsed().as_secs_f64() + ELAPSED_EPSILON_SECS)
}

/// Format transfer speed for display
pub fn format_transfer_speed(speed_bps: f64) -> String {
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Tracks bytes moved during one transfer and reports progress events
pub struct ProgressTracker<'a> {
    event_tx: &'a mpsc::Sender<AppEvent>,
    file_name: String,
    direction: Direction,
    total: u64,
    done: u64,
    last_percent: u8,
    start_time: Instant,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        event_tx: &'a mpsc::Sender<AppEvent>,
        file_name: &str,
        direction: Direction,
        total: u64,
    ) -> Self {
        Self {
            event_tx,
            file_name: file_name.to_string(),
            direction,
            total,
            done: 0,
            last_percent: 0,
            start_time: Instant::now(),
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    /// Record `n` more bytes and emit one progress event
    pub async fn advance(&mut self, n: usize) {
        self.done += n as u64;
        self.report().await;
    }

    /// Emit a progress event for the current byte count
    pub async fn report(&mut self) {
        // Never let a UI observe the bar moving backwards
        let percent = percent_complete(self.done, self.total).max(self.last_percent);
        self.last_percent = percent;

        let _ = self
            .event_tx
            .send(AppEvent::TransferProgress(TransferProgress {
                file_name: self.file_name.clone(),
                direction: self.direction,
                percent,
                throughput_bps: throughput_bps(self.done, self.start_time),
            }))
            .await;
    }
}

/// Fill `buf` from `reader` until it is full or EOF; returns bytes read
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Sanitize file name to prevent path traversal attacks and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Keep only the last component of either separator style
    let file_name = file_name
        .split(['/', '\\'])
        .next_back()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        // Preserve a short extension when truncating
        let ext = clean_name
            .rfind('.')
            .map(|idx| clean_name[idx..].to_string())
            .filter(|ext| ext.len() < 20);
        let keep = MAX_FILENAME_LENGTH - ext.as_ref().map_or(0, |e| e.len());
        let mut cutoff = keep;
        while !clean_name.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean_name.truncate(cutoff);
        if let Some(ext) = ext {
            clean_name.push_str(&ext);
        }
    }

    clean_name
}
