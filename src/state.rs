use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::registry::Bridge;

/// A saved tab for session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabState {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// On-disk format of `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub tabs: Vec<TabState>,
    #[serde(rename = "savedAt")]
    pub saved_at: String,
}

fn sessions_path(state_dir: &Path) -> PathBuf {
    state_dir.join("sessions.json")
}

/// Whether a URL is worth saving or restoring. Blank pages and
/// bot-interstitial (`/sorry/`) URLs are skipped.
fn is_restorable_url(url: &str) -> bool {
    !url.is_empty()
        && url != "about:blank"
        && url != "chrome://newtab/"
        && !url.contains("/sorry/")
}

/// Write all open non-blank tab URLs to `sessions.json`.
///
/// Failures are logged and swallowed — persistence must never block
/// shutdown.
pub async fn save_state(bridge: &Bridge, config: &Config) {
    let targets = match bridge.list_targets().await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "save state: list targets");
            return;
        }
    };

    let tabs: Vec<TabState> = targets
        .into_iter()
        .filter(|t| is_restorable_url(&t.url))
        .map(|t| TabState {
            id: t.id,
            url: t.url,
            title: t.title,
        })
        .collect();

    let state = SessionState {
        tabs,
        saved_at: now_rfc3339(),
    };

    let path = sessions_path(&config.state_dir);
    match write_json_atomic(&path, &state) {
        Ok(()) => {
            tracing::info!(count = state.tabs.len(), path = %path.display(), "saved tabs");
        }
        Err(e) => tracing::error!(error = %e, "save state: write"),
    }
}

/// Reopen tabs from the last saved session. Per-tab failures are logged
/// and skipped.
pub async fn restore_state(bridge: &Bridge, config: &Config) {
    let path = sessions_path(&config.state_dir);
    let Ok(data) = std::fs::read_to_string(&path) else {
        return;
    };
    let Ok(state) = serde_json::from_str::<SessionState>(&data) else {
        tracing::warn!(path = %path.display(), "ignoring invalid sessions.json");
        return;
    };

    let mut restored = 0;
    for tab in &state.tabs {
        if !is_restorable_url(&tab.url) {
            continue;
        }
        // Target.createTarget navigates the fresh tab itself; no separate
        // navigation round-trip is needed.
        match bridge.new_tab(Some(&tab.url)).await {
            Ok(_) => restored += 1,
            Err(e) => {
                tracing::warn!(url = %tab.url, error = %e, "restore tab failed");
            }
        }
    }
    if restored > 0 {
        tracing::info!(count = restored, "restored tabs");
    }
}

/// Read the saved session, if any (test support).
///
/// # Errors
///
/// Returns an error string for unreadable or unparseable files other
/// than a missing one.
pub fn read_state(state_dir: &Path) -> Result<Option<SessionState>, String> {
    match std::fs::read_to_string(sessions_path(state_dir)) {
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| format!("invalid sessions.json: {e}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("sessions.json: {e}")),
    }
}

/// Atomic JSON write: temp file then rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Patch Chrome's preferences so the next launch does not show the
/// "didn't shut down correctly" bar.
pub fn mark_clean_exit(profile_dir: &Path) {
    let prefs_path = profile_dir.join("Default").join("Preferences");
    let Ok(data) = std::fs::read_to_string(&prefs_path) else {
        return;
    };
    let patched = data
        .replace(r#""exit_type":"Crashed""#, r#""exit_type":"Normal""#)
        .replace(r#""exited_cleanly":false"#, r#""exited_cleanly":true"#);
    if patched != data {
        if let Err(e) = std::fs::write(&prefs_path, patched) {
            tracing::error!(error = %e, "patch preferences");
        }
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Current time as RFC 3339 (e.g., `"2026-02-11T12:00:00Z"`).
#[must_use]
pub fn now_rfc3339() -> String {
    let (y, m, d, hh, mm, ss) = civil_now();
    format!("{y:04}-{m:02}-{d:02}T{hh:02}:{mm:02}:{ss:02}Z")
}

/// Current time as a filename-safe stamp (e.g., `"20260211-120000"`).
#[must_use]
pub fn now_file_stamp() -> String {
    let (y, m, d, hh, mm, ss) = civil_now();
    format!("{y:04}{m:02}{d:02}-{hh:02}{mm:02}{ss:02}")
}

fn civil_now() -> (i64, u32, u32, u64, u64, u64) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    civil_from_unix(secs)
}

fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Split Unix seconds into `(year, month, day, hour, minute, second)`.
///
/// Walks whole years from 1970, then month lengths. Two timestamp shapes
/// do not justify a calendar dependency.
#[allow(clippy::cast_possible_truncation)]
fn civil_from_unix(secs: u64) -> (i64, u32, u32, u64, u64, u64) {
    let wall = secs % 86_400;
    let hour = wall / 3_600;
    let minute = (wall % 3_600) / 60;
    let second = wall % 60;

    let mut remaining = secs / 86_400;
    let mut year: i64 = 1970;
    loop {
        let year_len: u64 = if is_leap_year(year) { 366 } else { 365 };
        if remaining < year_len {
            break;
        }
        remaining -= year_len;
        year += 1;
    }

    let february: u64 = if is_leap_year(year) { 29 } else { 28 };
    let month_lengths: [u64; 12] = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month: u32 = 1;
    for month_len in month_lengths {
        if remaining < month_len {
            break;
        }
        remaining -= month_len;
        month += 1;
    }

    (year, month, remaining as u32 + 1, hour, minute, second)
}
