//! Push payloads to notification descriptors, and notification clicks to
//! navigation intents. Nothing here touches the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// Values used for any field a push payload leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Navigation target when the payload carries no url
    pub url: String,
}

impl Default for PushDefaults {
    fn default() -> Self {
        Self {
            title: "New update".to_string(),
            body: "Open the app to see what changed.".to_string(),
            icon: "/static/icons/icon-192.png".to_string(),
            badge: "/static/icons/badge-72.png".to_string(),
            url: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// What the host should display for one push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Replaces an earlier notification with the same tag
    pub tag: Option<String>,
    /// Opened by the `view` action
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "intent", content = "target", rename_all = "snake_case")]
pub enum NavigationIntent {
    Navigate(String),
    /// Close the notification, no navigation
    Dismiss,
}

/// Fields a JSON push payload may carry. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    badge: Option<String>,
    url: Option<String>,
    tag: Option<String>,
}

impl PushPayload {
    /// Only a JSON object is structured; arrays, scalars and plain text are
    /// all shown verbatim as the body.
    fn parse(text: &str) -> Self {
        let structured = match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        };
        structured.unwrap_or_else(|| {
            debug!("Push payload is not a JSON object, using it as body");
            PushPayload {
                body: Some(text.to_string()),
                ..Default::default()
            }
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushRouter {
    defaults: PushDefaults,
}

impl PushRouter {
    pub fn new(defaults: PushDefaults) -> Self {
        Self { defaults }
    }

    /// Build the notification for a push payload.
    ///
    /// A JSON object supplies any subset of the fields; any other non-empty
    /// text becomes the body under the default title.
    pub fn on_push(&self, payload: &[u8]) -> NotificationDescriptor {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();

        let parsed = if text.is_empty() {
            PushPayload::default()
        } else {
            PushPayload::parse(text)
        };

        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        NotificationDescriptor {
            title: pick(parsed.title, &self.defaults.title),
            body: pick(parsed.body, &self.defaults.body),
            icon: pick(parsed.icon, &self.defaults.icon),
            badge: pick(parsed.badge, &self.defaults.badge),
            tag: parsed.tag.filter(|t| !t.trim().is_empty()),
            url: pick(parsed.url, &self.defaults.url),
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }

    /// Map a notification click to where the host should go.
    pub fn on_notification_action(
        &self,
        action: &str,
        notification: &NotificationDescriptor,
    ) -> NavigationIntent {
        match action.trim() {
            ACTION_VIEW => NavigationIntent::Navigate(notification.url.clone()),
            ACTION_DISMISS => NavigationIntent::Dismiss,
            other => {
                debug!(action = other, "Unknown notification action, dismissing");
                NavigationIntent::Dismiss
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_payload_overrides_defaults() {
        let router = PushRouter::default();
        let n = router.on_push(br#"{"title":"Build done","url":"/reports/7","tag":"build"}"#);
        assert_eq!(n.title, "Build done");
        assert_eq!(n.body, PushDefaults::default().body);
        assert_eq!(n.url, "/reports/7");
        assert_eq!(n.tag.as_deref(), Some("build"));
        assert_eq!(n.actions.len(), 2);
    }

    #[test]
    fn test_plain_text_becomes_body() {
        let router = PushRouter::default();
        let n = router.on_push(b"Server restarted");
        assert_eq!(n.title, "New update");
        assert_eq!(n.body, "Server restarted");

        // Valid JSON that is not an object is still just text
        let n = router.on_push(b"42");
        assert_eq!(n.body, "42");
    }

    #[test]
    fn test_json_array_is_not_read_positionally() {
        let router = PushRouter::default();
        let payload = r#"["a","b","c","d","e","f"]"#;
        let n = router.on_push(payload.as_bytes());
        assert_eq!(n.title, "New update");
        assert_eq!(n.body, payload);
        assert_eq!(n.url, "/");
        assert_eq!(n.tag, None);
    }

    #[test]
    fn test_empty_payload_uses_defaults() {
        let router = PushRouter::new(PushDefaults {
            title: "Ops".to_string(),
            ..Default::default()
        });
        let n = router.on_push(b"   ");
        assert_eq!(n.title, "Ops");
        assert_eq!(n.url, "/");
        assert!(n.tag.is_none());
    }

    #[test]
    fn test_actions_map_to_intents() {
        let router = PushRouter::default();
        let n = router.on_push(br#"{"url":"/alerts"}"#);
        assert_eq!(
            router.on_notification_action("view", &n),
            NavigationIntent::Navigate("/alerts".to_string())
        );
        assert_eq!(router.on_notification_action("dismiss", &n), NavigationIntent::Dismiss);
        assert_eq!(router.on_notification_action("explode", &n), NavigationIntent::Dismiss);
    }

    #[test]
    fn test_intent_wire_format() {
        let json = serde_json::to_string(&NavigationIntent::Navigate("/x".to_string())).unwrap();
        assert_eq!(json, r#"{"intent":"navigate","target":"/x"}"#);
        let json = serde_json::to_string(&NavigationIntent::Dismiss).unwrap();
        assert_eq!(json, r#"{"intent":"dismiss"}"#);
    }
}
