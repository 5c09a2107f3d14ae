use std::fmt;

/// Errors from browser discovery and launch.
#[derive(Debug)]
pub enum ChromeError {
    /// No Chrome executable could be located.
    ExecutableNotFound,
    /// The Chrome process could not be spawned.
    LaunchFailed(String),
    /// Chrome did not expose its debug endpoint in time.
    StartupTimeout {
        port: u16,
    },
    /// HTTP request to the debug endpoint failed.
    Http(String),
    /// The debug endpoint returned something unparseable.
    Parse(String),
    /// `CDP_URL` is not a usable ws:// or http:// URL.
    BadCdpUrl(String),
}

impl fmt::Display for ChromeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutableNotFound => {
                write!(f, "no Chrome executable found (set CHROME_BINARY)")
            }
            Self::LaunchFailed(msg) => write!(f, "failed to launch Chrome: {msg}"),
            Self::StartupTimeout { port } => {
                write!(f, "Chrome did not become ready on port {port}")
            }
            Self::Http(msg) => write!(f, "debug endpoint request failed: {msg}"),
            Self::Parse(msg) => write!(f, "debug endpoint response invalid: {msg}"),
            Self::BadCdpUrl(url) => write!(f, "unusable CDP URL: {url}"),
        }
    }
}

impl std::error::Error for ChromeError {}

impl From<std::io::Error> for ChromeError {
    fn from(e: std::io::Error) -> Self {
        Self::Http(e.to_string())
    }
}
