use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use super::discovery::query_version;
use super::error::ChromeError;

/// Desktop user agent presented by launched browsers.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

/// Options for launching a Chrome process.
pub struct LaunchOptions {
    /// Path to the Chrome executable.
    pub executable: PathBuf,
    /// Persistent user data directory.
    pub profile_dir: PathBuf,
    /// Whether to launch headless.
    pub headless: bool,
    /// Extra command-line flags (from `CHROME_FLAGS`).
    pub extra_flags: Vec<String>,
}

/// A handle to a launched Chrome process.
pub struct ChromeProcess {
    child: Option<std::process::Child>,
    port: u16,
}

impl ChromeProcess {
    /// The remote debugging port Chrome was started with.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kill the Chrome process.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Locate a Chrome executable.
///
/// An explicit binary (from `CHROME_BINARY`) wins; otherwise well-known
/// install locations are probed per platform.
///
/// # Errors
///
/// Returns `ChromeError::ExecutableNotFound` when nothing is found.
pub fn find_chrome_executable(explicit: Option<&str>) -> Result<PathBuf, ChromeError> {
    if let Some(binary) = explicit {
        let path = PathBuf::from(binary);
        if path.exists() {
            return Ok(path);
        }
        return Err(ChromeError::LaunchFailed(format!(
            "CHROME_BINARY {binary} does not exist"
        )));
    }

    for candidate in default_candidates() {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }
    Err(ChromeError::ExecutableNotFound)
}

#[cfg(target_os = "macos")]
fn default_candidates() -> &'static [&'static str] {
    &[
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ]
}

#[cfg(not(target_os = "macos"))]
fn default_candidates() -> &'static [&'static str] {
    &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ]
}

/// Find an available TCP port on localhost for the debug endpoint.
///
/// # Errors
///
/// Returns `ChromeError::LaunchFailed` if binding fails.
pub fn find_available_port() -> Result<u16, ChromeError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| {
        ChromeError::LaunchFailed(format!("could not bind to find a free port: {e}"))
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| ChromeError::LaunchFailed(format!("could not get local address: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

/// Launch Chrome with the bridge's flag set and wait for the debug
/// endpoint to come up.
///
/// The flag set hides automation indicators, suppresses the crash-restore
/// bar, and pins a desktop identity, mirroring what interactive agents
/// expect from a long-lived shared browser.
///
/// # Errors
///
/// Returns `ChromeError::LaunchFailed` if the process cannot be spawned,
/// or `ChromeError::StartupTimeout` if Chrome does not become ready.
pub async fn launch_chrome(
    options: LaunchOptions,
    timeout: Duration,
) -> Result<ChromeProcess, ChromeError> {
    std::fs::create_dir_all(&options.profile_dir)
        .map_err(|e| ChromeError::LaunchFailed(format!("cannot create profile dir: {e}")))?;

    let port = find_available_port()?;

    let mut cmd = Command::new(&options.executable);
    cmd.arg(format!("--remote-debugging-port={port}"))
        .arg(format!("--user-data-dir={}", options.profile_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-session-crashed-bubble")
        .arg("--hide-crash-restore-bubble")
        .arg("--disable-popup-blocking")
        .arg("--window-size=1440,900")
        .arg(format!("--user-agent={USER_AGENT}"));

    if options.headless {
        cmd.arg("--headless=new");
    }

    for flag in &options.extra_flags {
        cmd.arg(flag);
    }

    cmd.stdout(Stdio::null()).stderr(Stdio::null());

    let child = cmd.spawn().map_err(|e| {
        ChromeError::LaunchFailed(format!(
            "failed to spawn {}: {e}",
            options.executable.display()
        ))
    })?;

    let mut process = ChromeProcess {
        child: Some(child),
        port,
    };

    // Poll until the debug endpoint answers or the timeout expires.
    let start = tokio::time::Instant::now();
    let poll_interval = Duration::from_millis(100);

    loop {
        if start.elapsed() > timeout {
            process.kill();
            return Err(ChromeError::StartupTimeout { port });
        }

        if let Some(child) = process.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ChromeError::LaunchFailed(format!(
                    "Chrome exited with status {status} before becoming ready"
                )));
            }
        }

        if query_version("127.0.0.1", port).await.is_ok() {
            return Ok(process);
        }

        tokio::time::sleep(poll_interval).await;
    }
}
