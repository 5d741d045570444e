//! Desktop notifications (macOS only; silently skipped elsewhere).

use tracing::debug;

/// Show a notification via `osascript`. Absence of the binary or a failed
/// spawn is not an error.
pub async fn send_macos_notification(title: &str, message: &str) {
    if std::env::consts::OS != "macos" {
        return;
    }
    let script = format!(
        "display notification {} with title {}",
        applescript_quote(message),
        applescript_quote(title)
    );
    match tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .status()
        .await
    {
        Ok(_) => {}
        Err(err) => debug!("failed to send macOS notification: {err}"),
    }
}

/// Failure toast shown when a snapshot run dies.
pub async fn send_failure_notification(message: &str) {
    send_macos_notification("cmux snapshot failed", message).await;
}

fn applescript_quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}
