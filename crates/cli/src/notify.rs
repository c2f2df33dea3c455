#![forbid(unsafe_code)]

//! Desktop notification dispatch via `notify-send`.

use config::Urgency;
use std::process::{Command, Stdio};
use tracing::{debug, error};

/// Fire off one desktop notification in the background.
///
/// Delivery is best-effort: the consumer loop must not stall on a slow or
/// missing notification daemon, so the spawn-and-wait happens on a
/// blocking task and failures are only logged.
pub fn send(title: String, body: String, urgency: Urgency) {
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            let output = Command::new("notify-send")
                .arg("-u")
                .arg(urgency.to_string())
                .arg("-a")
                .arg("procwatch")
                .arg("--")
                .arg(&title)
                .arg(&body)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()?;
            if !output.status.success() {
                return Err(std::io::Error::other(format!(
                    "notify-send exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr),
                )));
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => debug!("desktop notification sent"),
            Ok(Err(err)) => error!(%err, "failed to send desktop notification"),
            Err(err) => error!(%err, "notification task panicked"),
        }
    });
}
