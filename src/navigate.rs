use serde_json::json;
use tokio::time::Duration;

use crate::cdp::CdpSession;
use crate::error::ApiError;

/// How long navigation waits for rendering to begin before returning.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the post-navigation `document.title` poll.
const TITLE_POLL_BOUND: Duration = Duration::from_secs(2);

/// Navigate a tab and give rendering a moment to begin.
///
/// Deliberately does NOT wait for the load event — SPAs often never fire
/// it. Agents poll `/snapshot` to confirm readiness. The caller is
/// responsible for evicting the tab's ref cache on success.
///
/// # Errors
///
/// Surfaces `Page.navigate`'s `errorText` and transport failures as
/// `cdp-error` / `action-timeout`.
pub async fn navigate(
    session: &CdpSession,
    url: &str,
    navigate_timeout: Duration,
) -> Result<(), ApiError> {
    let result = session
        .send_command_with_timeout("Page.navigate", Some(json!({"url": url})), navigate_timeout)
        .await?;

    if let Some(error_text) = result["errorText"].as_str() {
        if !error_text.is_empty() {
            return Err(ApiError::new(
                crate::error::ErrorKind::Cdp,
                format!("navigate: {error_text}"),
            ));
        }
    }

    tokio::time::sleep(SETTLE_DELAY).await;
    Ok(())
}

/// The tab's current URL, empty when it cannot be read.
pub async fn current_url(session: &CdpSession) -> String {
    evaluate_string(session, "location.href").await.unwrap_or_default()
}

/// Poll `document.title` until it is non-empty or the bound elapses.
/// Returns the last observed value — empty on timeout.
pub async fn poll_title(session: &CdpSession) -> String {
    let deadline = tokio::time::Instant::now() + TITLE_POLL_BOUND;
    let mut title = String::new();

    loop {
        if let Some(t) = evaluate_string(session, "document.title").await {
            title = t;
            if !title.is_empty() {
                return title;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return title;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn evaluate_string(session: &CdpSession, expression: &str) -> Option<String> {
    let result = session
        .send_command(
            "Runtime.evaluate",
            Some(json!({"expression": expression, "returnByValue": true})),
        )
        .await
        .ok()?;
    result["result"]["value"].as_str().map(String::from)
}
