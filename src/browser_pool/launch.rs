//! Browser process launching and lifecycle ownership.
//!
//! Handles locating a Chrome/Chromium executable, launching it with a
//! hardened argument set, and owning the CDP event-handler task for the
//! lifetime of the process.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use crate::config::ScrapeConfig;
use crate::utils::constants::{CHROME_USER_AGENT, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};

/// Counter to keep concurrently-launched profile directories unique within
/// one process.
static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Wrapper owning a Browser, its CDP event-handler task, and the temp
/// profile directory.
///
/// The handler MUST be aborted when the browser goes away, otherwise it
/// runs indefinitely against a dead websocket. The profile directory can
/// only be removed after the Chrome process has exited and released its
/// file locks.
#[derive(Debug)]
pub struct BrowserHandle {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    disconnect_rx: watch::Receiver<bool>,
}

impl BrowserHandle {
    /// Get reference to the inner browser.
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Get Arc-wrapped browser for sharing across concurrent tasks.
    pub fn browser_arc(&self) -> Arc<Browser> {
        Arc::clone(&self.browser)
    }

    /// Receiver that flips to `true` when the CDP connection ends.
    pub fn disconnect_receiver(&self) -> watch::Receiver<bool> {
        self.disconnect_rx.clone()
    }

    /// Close the browser gracefully and remove its profile directory.
    ///
    /// Consumes the handle: this is the explicit shutdown path; `Drop`
    /// covers the unwind path with best-effort cleanup.
    pub async fn close(mut self) {
        self.handler.abort();

        match Arc::get_mut(&mut self.browser) {
            Some(browser) => {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser cleanly: {e}");
                }
                if let Err(e) = browser.wait().await {
                    warn!("Failed to wait for browser exit: {e}");
                }
            }
            None => {
                warn!(
                    "Browser still has {} outstanding references, relying on drop for teardown",
                    Arc::strong_count(&self.browser)
                );
            }
        }

        self.cleanup_temp_dir();
    }

    /// Remove the temp profile directory (blocking; callable from Drop).
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up browser profile directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up profile directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop kills the Chrome process if close() was not called.
        if self.user_data_dir.is_some() {
            self.cleanup_temp_dir();
        }
    }
}

/// Find a Chrome/Chromium executable with platform-specific search paths.
///
/// `CHROMIUM_PATH` overrides everything; then common install locations are
/// probed; finally `which` is consulted on Unix systems.
pub async fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(
                "Using browser from CHROMIUM_PATH environment variable: {}",
                path.display()
            );
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH environment variable points to non-existent file: {}",
            path.display()
        );
    }

    let paths: Vec<&str> = if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
            r"C:\Program Files (x86)\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            let output = Command::new("which").arg(cmd).output();
            if let Ok(output) = output {
                if output.status.success() {
                    let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path_str.is_empty() {
                        let path = PathBuf::from(path_str);
                        info!("Found browser using 'which' command: {}", path.display());
                        return Ok(path);
                    }
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Chrome/Chromium executable not found; set CHROMIUM_PATH"
    ))
}

/// Launch a browser configured for pooled scraping.
///
/// Every launch gets a unique profile directory to prevent profile lock
/// contention between restarts in a long-running server.
pub async fn launch_browser(config: &ScrapeConfig) -> Result<BrowserHandle> {
    let chrome_path = match config.chrome_executable.clone() {
        Some(path) => path,
        None => find_browser_executable().await?,
    };

    let user_data_dir = std::env::temp_dir().join(format!(
        "sitesift_chrome_{}_{}",
        std::process::id(),
        PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&user_data_dir).context("Failed to create user data directory")?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(chrome_path);

    if config.headless {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    config_builder = config_builder
        .arg(format!("--user-agent={CHROME_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-print-preview")
        .arg("--disable-software-rasterizer")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--ignore-certificate-errors")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--disable-ipc-flooding-protection")
        .arg("--disable-prompt-on-repost")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    let browser_config = config_builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    info!("Launching browser");
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    let (disconnect_tx, disconnect_rx) = watch::channel(false);

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                let error_msg = e.to_string();

                // Chrome sends CDP events chromiumoxide does not recognize;
                // those deserialization failures are noise, not faults.
                // Reference: https://github.com/mattsse/chromiumoxide/issues/167
                let is_benign_serialization_error = error_msg
                    .contains("data did not match any variant of untagged enum Message")
                    || error_msg.contains("Failed to deserialize WS response");

                if is_benign_serialization_error {
                    trace!("Suppressed benign CDP serialization error: {error_msg}");
                } else {
                    error!("Browser handler error: {e:?}");
                }
            }
        }
        info!("Browser handler task completed");
        let _ = disconnect_tx.send(true);
    });

    Ok(BrowserHandle {
        browser: Arc::new(browser),
        handler: handler_task,
        user_data_dir: Some(user_data_dir),
        disconnect_rx,
    })
}
