use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{RwLock, watch};

use crate::cdp::{CdpClient, CdpSession};
use crate::error::ApiError;
use crate::snapshot::A11yNode;

/// A debuggable page target as reported by `Target.getTargets`.
#[derive(Debug, Clone, Serialize)]
pub struct TargetInfo {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(rename = "type")]
    pub target_type: String,
}

/// An attached CDP session bound to one page target.
#[derive(Debug)]
pub struct TabSession {
    tab_id: String,
    pub session: CdpSession,
}

impl TabSession {
    #[must_use]
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }
}

/// Per-tab snapshot artifact: the ref→backendNodeId map used by `/action`
/// plus the flattened node list retained for diffing.
///
/// Replaced atomically on each snapshot; evicted on navigate and close.
#[derive(Debug, Default)]
pub struct RefCache {
    pub refs: HashMap<String, i64>,
    pub nodes: Vec<A11yNode>,
}

#[derive(Default)]
struct BridgeInner {
    tabs: HashMap<String, Arc<TabSession>>,
    snapshots: HashMap<String, RefCache>,
}

/// Central state holder: the browser connection, per-tab sessions, and
/// per-tab snapshot caches.
///
/// One lock guards both maps; it is never held across CDP I/O on the read
/// path. Attach (rare, expensive) holds the write lock through
/// verification so concurrent agents referencing the same fresh tab share
/// one session.
pub struct Bridge {
    client: CdpClient,
    inner: RwLock<BridgeInner>,
}

impl Bridge {
    #[must_use]
    pub fn new(client: CdpClient) -> Self {
        Self {
            client,
            inner: RwLock::new(BridgeInner::default()),
        }
    }

    #[must_use]
    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    /// List open page targets. Pure read, no registry mutation.
    ///
    /// # Errors
    ///
    /// Returns an error when the CDP transport fails.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>, ApiError> {
        let result = self.client.send_command("Target.getTargets", None).await?;
        Ok(parse_page_targets(&result))
    }

    /// Resolve an optional tab id to an attached session.
    ///
    /// An empty id picks the first page target in enumeration order.
    /// Attaches lazily on first reference: shared-lock fast path, then a
    /// double-checked write-lock slow path that verifies the new session
    /// with one trivial round-trip before registering it.
    ///
    /// # Errors
    ///
    /// `no-tabs-open` when no page targets exist and no id was given;
    /// `tab-not-found` when the id matches nothing attachable.
    pub async fn resolve_tab(
        &self,
        tab_id: Option<&str>,
    ) -> Result<(Arc<TabSession>, String), ApiError> {
        let tab_id = match tab_id {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => {
                let targets = self.list_targets().await?;
                targets
                    .first()
                    .map(|t| t.id.clone())
                    .ok_or_else(ApiError::no_tabs_open)?
            }
        };

        {
            let inner = self.inner.read().await;
            if let Some(entry) = inner.tabs.get(&tab_id) {
                return Ok((Arc::clone(entry), tab_id));
            }
        }

        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.tabs.get(&tab_id) {
            return Ok((Arc::clone(entry), tab_id));
        }

        let session = self.attach_verified(&tab_id).await?;
        let entry = Arc::new(TabSession {
            tab_id: tab_id.clone(),
            session,
        });
        inner.tabs.insert(tab_id.clone(), Arc::clone(&entry));
        tracing::debug!(tab = %tab_id, "attached session");
        Ok((entry, tab_id))
    }

    /// Attach to a target and confirm the session answers.
    async fn attach_verified(&self, tab_id: &str) -> Result<CdpSession, ApiError> {
        let session = self
            .client
            .attach(tab_id)
            .await
            .map_err(|e| ApiError::tab_not_found(tab_id).context(&e))?;

        let probe = json!({"expression": "1", "returnByValue": true});
        session
            .send_command("Runtime.evaluate", Some(probe))
            .await
            .map_err(|e| ApiError::tab_not_found(tab_id).context(&e))?;

        Ok(session)
    }

    /// Open a new tab, attach to it, and register it before returning.
    ///
    /// # Errors
    ///
    /// `tab-open-failed` when the target cannot be created or attached.
    pub async fn new_tab(&self, url: Option<&str>) -> Result<(String, String, String), ApiError> {
        let url = match url {
            Some(u) if !u.is_empty() => u,
            _ => "about:blank",
        };

        let result = self
            .client
            .send_command("Target.createTarget", Some(json!({"url": url})))
            .await
            .map_err(|e| ApiError::tab_open_failed(&e.to_string()))?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| ApiError::tab_open_failed("no targetId in createTarget response"))?
            .to_owned();

        {
            let mut inner = self.inner.write().await;
            let session = match self.attach_verified(&target_id).await {
                Ok(s) => s,
                Err(e) => {
                    return Err(ApiError::tab_open_failed(&e.message));
                }
            };
            inner.tabs.insert(
                target_id.clone(),
                Arc::new(TabSession {
                    tab_id: target_id.clone(),
                    session,
                }),
            );
        }

        // Best-effort metadata; the tab is already usable if this fails.
        let (url, title) = match self
            .client
            .send_command("Target.getTargetInfo", Some(json!({"targetId": target_id})))
            .await
        {
            Ok(info) => (
                info["targetInfo"]["url"].as_str().unwrap_or(url).to_owned(),
                info["targetInfo"]["title"].as_str().unwrap_or_default().to_owned(),
            ),
            Err(_) => (url.to_owned(), String::new()),
        };

        Ok((target_id, url, title))
    }

    /// Close a tab: evict its session and ref cache, then issue
    /// `Page.close` on a transient session. Idempotent — closing an
    /// absent tab succeeds.
    pub async fn close_tab(&self, tab_id: &str) {
        {
            let mut inner = self.inner.write().await;
            inner.tabs.remove(tab_id);
            inner.snapshots.remove(tab_id);
        }

        if let Ok(session) = self.client.attach(tab_id).await {
            let _ = session.send_command("Page.close", None).await;
        }
    }

    /// Resolve a snapshot ref to a backend node id from the tab's cache.
    pub async fn resolve_ref(&self, tab_id: &str, ref_id: &str) -> Option<i64> {
        let inner = self.inner.read().await;
        inner
            .snapshots
            .get(tab_id)
            .and_then(|cache| cache.refs.get(ref_id).copied())
    }

    /// Atomically replace a tab's ref cache, returning the previous node
    /// list (the caller diffs against it before anyone can observe the
    /// new cache).
    ///
    /// The cache is only stored while the tab is registered, so a ref
    /// cache never outlives its session.
    pub async fn replace_ref_cache(
        &self,
        tab_id: &str,
        cache: RefCache,
    ) -> Option<Vec<A11yNode>> {
        let mut inner = self.inner.write().await;
        if !inner.tabs.contains_key(tab_id) {
            return None;
        }
        inner
            .snapshots
            .insert(tab_id.to_owned(), cache)
            .map(|old| old.nodes)
    }

    /// Drop a tab's ref cache (navigation invalidates refs).
    pub async fn evict_ref_cache(&self, tab_id: &str) {
        let mut inner = self.inner.write().await;
        inner.snapshots.remove(tab_id);
    }

    /// Number of registered sessions (diagnostics).
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.tabs.len()
    }

    /// Whether a tab currently has a session entry (test support).
    pub async fn has_session(&self, tab_id: &str) -> bool {
        self.inner.read().await.tabs.contains_key(tab_id)
    }

    /// Whether a tab currently has a ref cache (test support).
    pub async fn has_ref_cache(&self, tab_id: &str) -> bool {
        self.inner.read().await.snapshots.contains_key(tab_id)
    }

    /// Periodically reconcile the registry with live targets, evicting
    /// sessions whose target is gone. Never touches entries whose target
    /// is still alive, even if idle. Exits on the shutdown signal.
    ///
    /// Enumeration failures are swallowed: the registry conservatively
    /// keeps its entries until the browser answers again.
    pub async fn run_reaper(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }

            let Ok(targets) = self.list_targets().await else {
                continue;
            };
            let alive: HashSet<&str> = targets.iter().map(|t| t.id.as_str()).collect();

            let mut inner = self.inner.write().await;
            let stale: Vec<String> = inner
                .tabs
                .keys()
                .filter(|id| !alive.contains(id.as_str()))
                .cloned()
                .collect();
            for id in stale {
                inner.tabs.remove(&id);
                inner.snapshots.remove(&id);
                tracing::info!(tab = %id, "reaped stale tab");
            }
        }
    }
}

/// Extract page targets from a `Target.getTargets` response.
#[must_use]
pub fn parse_page_targets(result: &Value) -> Vec<TargetInfo> {
    result["targetInfos"]
        .as_array()
        .map(|infos| {
            infos
                .iter()
                .filter(|t| t["type"].as_str() == Some("page"))
                .map(|t| TargetInfo {
                    id: t["targetId"].as_str().unwrap_or_default().to_owned(),
                    url: t["url"].as_str().unwrap_or_default().to_owned(),
                    title: t["title"].as_str().unwrap_or_default().to_owned(),
                    target_type: "page".to_owned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_targets_filters_non_pages() {
        let result = json!({
            "targetInfos": [
                {"targetId": "A", "type": "page", "url": "https://example.com", "title": "Example"},
                {"targetId": "B", "type": "service_worker", "url": "https://sw.example.com", "title": ""},
                {"targetId": "C", "type": "page", "url": "about:blank", "title": ""},
            ]
        });
        let targets = parse_page_targets(&result);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "A");
        assert_eq!(targets[1].id, "C");
    }

    #[test]
    fn parse_page_targets_preserves_enumeration_order() {
        let result = json!({
            "targetInfos": [
                {"targetId": "Z", "type": "page", "url": "", "title": ""},
                {"targetId": "A", "type": "page", "url": "", "title": ""},
            ]
        });
        let targets = parse_page_targets(&result);
        let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["Z", "A"]);
    }

    #[test]
    fn parse_page_targets_handles_missing_list() {
        let targets = parse_page_targets(&json!({}));
        assert!(targets.is_empty());
    }

    #[test]
    fn target_info_serializes_with_type_field() {
        let info = TargetInfo {
            id: "A".into(),
            url: "https://example.com".into(),
            title: "Example".into(),
            target_type: "page".into(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "page");
        assert_eq!(json["id"], "A");
    }
}
