#![cfg(unix)]

use std::time::Duration;

use media_sync::shutdown::shutdown_signal;

#[tokio::test]
async fn sigterm_resolves_shutdown() {
    let signal = shutdown_signal().unwrap();

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), signal)
        .await
        .expect("SIGTERM should resolve the shutdown future");
}
