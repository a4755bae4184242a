//! Terminal spinner shown while a strategy runs or probes are in flight.

use std::io::Write;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Braille spinner frames.
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Frame interval.
const INTERVAL: Duration = Duration::from_millis(100);

fn render(frame: &str, label: &str, elapsed: Duration) -> String {
    format!("{frame} {label} [{}s]", elapsed.as_secs())
}

/// A spinner on stderr with a label and elapsed seconds, e.g.
/// `⠹ migrating with rsync-local [42s]`.
pub struct Spinner {
    handle: JoinHandle<()>,
    label: watch::Sender<String>,
    stop: watch::Sender<bool>,
}

impl Spinner {
    pub fn start(label: &str) -> Self {
        let (label_tx, label_rx) = watch::channel(label.to_string());
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let started = Instant::now();

        let handle = tokio::spawn(async move {
            let mut i = 0;
            loop {
                let frame = FRAMES[i % FRAMES.len()];
                let line = render(frame, &label_rx.borrow(), started.elapsed());
                // \x1b[2K clears the line, \r returns to its start
                eprint!("\x1b[2K\r{line}");
                let _ = std::io::stderr().flush();

                tokio::select! {
                    _ = tokio::time::sleep(INTERVAL) => {}
                    _ = stop_rx.changed() => break,
                }
                i += 1;
            }
            eprint!("\x1b[2K\r");
            let _ = std::io::stderr().flush();
        });

        Self {
            handle,
            label: label_tx,
            stop: stop_tx,
        }
    }

    /// Change the label without restarting the clock.
    pub fn relabel(&self, label: &str) {
        let _ = self.label.send(label.to_string());
    }

    /// Stop the spinner and clear its line.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
