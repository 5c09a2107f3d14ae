pub mod discovery;
pub mod error;
pub mod launcher;

pub use discovery::{BrowserVersion, query_version, resolve_ws_url};
pub use error::ChromeError;
pub use launcher::{ChromeProcess, LaunchOptions, find_chrome_executable, launch_chrome};
