use serde_json::json;

use crate::cdp::CdpSession;
use crate::error::ApiError;

/// Script injected on every new document to hide automation indicators.
const STEALTH_SCRIPT: &str = include_str!("../assets/stealth.js");

/// CSS/JS that force-disables animations, transitions, and smooth scroll.
const DISABLE_ANIMATIONS_SCRIPT: &str = r"
(function() {
  const style = document.createElement('style');
  style.setAttribute('data-pinchtab', 'no-animations');
  style.textContent = '*, *::before, *::after { animation: none !important; animation-duration: 0s !important; transition: none !important; transition-duration: 0s !important; scroll-behavior: auto !important; }';
  (document.head || document.documentElement).appendChild(style);
})();
";

/// Install the stealth script on every future document of this target.
///
/// # Errors
///
/// Surfaces CDP failures; callers at startup treat this as fatal.
pub async fn inject_stealth(session: &CdpSession) -> Result<(), ApiError> {
    session
        .send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            Some(json!({"source": STEALTH_SCRIPT})),
        )
        .await?;
    Ok(())
}

/// Install animation suppression persistently (every new document) and
/// emulate `prefers-reduced-motion`. Used when `BRIDGE_NO_ANIMATIONS` is
/// set.
pub async fn inject_no_animations(session: &CdpSession) {
    let _ = session
        .send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            Some(json!({"source": DISABLE_ANIMATIONS_SCRIPT})),
        )
        .await;
    let _ = emulate_reduced_motion(session).await;
}

/// Run the animation-disabling CSS on the current page only (one-shot,
/// for a single `?noAnimations=true` snapshot).
pub async fn disable_animations_once(session: &CdpSession) {
    let _ = session
        .send_command(
            "Runtime.evaluate",
            Some(json!({"expression": DISABLE_ANIMATIONS_SCRIPT})),
        )
        .await;
    let _ = emulate_reduced_motion(session).await;
}

async fn emulate_reduced_motion(session: &CdpSession) -> Result<(), ApiError> {
    session
        .send_command(
            "Emulation.setEmulatedMedia",
            Some(json!({
                "features": [{"name": "prefers-reduced-motion", "value": "reduce"}]
            })),
        )
        .await?;
    Ok(())
}
