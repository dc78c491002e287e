use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A notification as classified off the wire, before its params are interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct RawNotification {
    pub method: String,
    pub params: Option<Value>,
}

impl RawNotification {
    /// Interpret the params as a [`Notification`].
    ///
    /// Fails when `params`, `params.data` or `params.data.item` is present but not an
    /// object.
    pub fn decode(self) -> Result<Notification, serde_json::Error> {
        let params = match self.params {
            Some(params) => serde_json::from_value(params)?,
            None => NotificationParams::default(),
        };
        Ok(Notification {
            method: self.method,
            params,
        })
    }
}

/// A server-pushed notification, e.g. `Player.OnPlay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: NotificationParams,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: NotificationParams::default(),
        }
    }

    /// `params.data.item.type`, when the notification concerns a library item
    pub fn item_type(&self) -> Option<&str> {
        self.params
            .data
            .item
            .as_ref()
            .map(|item| item.kind.as_str())
    }

    /// `params.sender`, usually `"xbmc"`
    pub fn sender(&self) -> Option<&str> {
        self.params.other.get("sender").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationParams {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: NotificationData,
    /// Everything besides `data`
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<NotificationItem>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(method: &str, params: Value) -> RawNotification {
        RawNotification {
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[test]
    fn test_item_type_recognized() {
        let notification = raw(
            "Player.OnPlay",
            json!({
                "data": {"item": {"id": 12, "type": "song"}, "player": {"playerid": 0, "speed": 1}},
                "sender": "xbmc"
            }),
        )
        .decode()
        .unwrap();

        assert_eq!(notification.item_type(), Some("song"));
        assert_eq!(notification.sender(), Some("xbmc"));

        // Unrecognized fields pass through untouched
        assert_eq!(
            notification.params.data.other.get("player"),
            Some(&json!({"playerid": 0, "speed": 1}))
        );
        let item = notification.params.data.item.as_ref().unwrap();
        assert_eq!(item.other.get("id"), Some(&json!(12)));
    }

    #[test]
    fn test_missing_and_null_params() {
        let notification = RawNotification {
            method: "System.OnQuit".to_string(),
            params: None,
        }
        .decode()
        .unwrap();
        assert_eq!(notification.item_type(), None);

        let notification = raw("GUI.OnScreensaverActivated", json!({"data": null, "sender": "xbmc"}))
            .decode()
            .unwrap();
        assert_eq!(notification.params.data, NotificationData::default());
    }

    #[test]
    fn test_non_object_data_fails() {
        assert!(raw("Other.OnThing", json!({"data": 5})).decode().is_err());
        assert!(raw("Other.OnThing", json!("text")).decode().is_err());
    }
}
