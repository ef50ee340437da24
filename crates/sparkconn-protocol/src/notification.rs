//! Inbound notifications sent from the backend to the panel.
//!
//! Every notification is a JSON object with a `msgtype` field. The open reply
//! (`sparkconn-action-open`) comes in two shapes: a configuration page when no
//! cluster session exists yet, or the description of the running session.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `page` value of an open reply asking the panel to show the configuration form.
pub const CONFIG_PAGE: &str = "sparkconn-config";

const MSG_OPEN: &str = "sparkconn-action-open";
const MSG_CONNECTED: &str = "sparkconn-connected";
const MSG_CONFIG: &str = "sparkconn-config";
const MSG_DISCONNECTED: &str = "sparkconn-disconnected";
const MSG_CONNECT_ERROR: &str = "sparkconn-connect-error";
const MSG_FOLLOW_LOG: &str = "sparkconn-action-follow-log";

/// Error type for notifications that cannot be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("notification has no msgtype")]
    MissingMsgType,

    #[error("invalid {msgtype} payload: {source}")]
    Payload {
        msgtype: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Open reply asking for configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPage {
    #[serde(rename = "maxmemory", default, deserialize_with = "lenient_string")]
    pub max_memory: Option<String>,
    #[serde(rename = "sparkversion", default, deserialize_with = "lenient_string")]
    pub spark_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cluster: Option<String>,
    /// Raw option catalog (`{"spark_options": [...]}`), validated by the consumer.
    #[serde(rename = "availableoptions", default)]
    pub available_options: Option<Value>,
    /// Raw bundle catalog (`{"bundled_options": {...}}`), validated by the consumer.
    #[serde(rename = "availablebundles", default)]
    pub available_bundles: Option<Value>,
}

/// Open reply describing an already running cluster session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "sparkversion", default, deserialize_with = "lenient_string")]
    pub spark_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cluster: Option<String>,
    #[serde(default)]
    pub session: Option<Value>,
}

/// Which state-change notification triggered a resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    Connected,
    Config,
    Disconnected,
}

/// A notification received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Open reply: no session yet, show the configuration form.
    ConfigurationNeeded(ConfigPage),
    /// Open reply: a session is already running.
    AlreadyConnected(SessionInfo),
    /// The backend changed state on its own; the panel should re-open.
    Resync(ResyncReason),
    /// The connect attempt failed.
    ConnectError { error: String },
    /// New connection log lines.
    FollowLog { logs: Vec<String> },
    /// A msgtype this panel does not understand.
    Unknown { msgtype: String },
}

#[derive(Deserialize)]
struct ConnectErrorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct FollowLogPayload {
    #[serde(default)]
    logs: Vec<String>,
}

impl Notification {
    /// Interpret the `data` of a comm message.
    pub fn from_value(data: &Value) -> Result<Self, ProtocolError> {
        let msgtype = data
            .get("msgtype")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingMsgType)?;

        let notification = match msgtype {
            MSG_OPEN => {
                if data.get("page").and_then(Value::as_str) == Some(CONFIG_PAGE) {
                    Notification::ConfigurationNeeded(payload(msgtype, data)?)
                } else {
                    Notification::AlreadyConnected(payload(msgtype, data)?)
                }
            }
            MSG_CONNECTED => Notification::Resync(ResyncReason::Connected),
            MSG_CONFIG => Notification::Resync(ResyncReason::Config),
            MSG_DISCONNECTED => Notification::Resync(ResyncReason::Disconnected),
            MSG_CONNECT_ERROR => {
                let p: ConnectErrorPayload = payload(msgtype, data)?;
                Notification::ConnectError {
                    error: p.error.unwrap_or_default(),
                }
            }
            MSG_FOLLOW_LOG => {
                let p: FollowLogPayload = payload(msgtype, data)?;
                Notification::FollowLog { logs: p.logs }
            }
            other => Notification::Unknown {
                msgtype: other.to_string(),
            },
        };
        Ok(notification)
    }

    /// The msgtype this notification was parsed from.
    pub fn msgtype(&self) -> &str {
        match self {
            Notification::ConfigurationNeeded(_) | Notification::AlreadyConnected(_) => MSG_OPEN,
            Notification::Resync(ResyncReason::Connected) => MSG_CONNECTED,
            Notification::Resync(ResyncReason::Config) => MSG_CONFIG,
            Notification::Resync(ResyncReason::Disconnected) => MSG_DISCONNECTED,
            Notification::ConnectError { .. } => MSG_CONNECT_ERROR,
            Notification::FollowLog { .. } => MSG_FOLLOW_LOG,
            Notification::Unknown { msgtype } => msgtype,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(msgtype: &str, data: &Value) -> Result<T, ProtocolError> {
    T::deserialize(data).map_err(|source| ProtocolError::Payload {
        msgtype: msgtype.to_string(),
        source,
    })
}

/// Accept strings, numbers and booleans for display fields the backend
/// does not type consistently (e.g. `maxmemory`).
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string, got {other}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_reply_config_page() {
        let n = Notification::from_value(&json!({
            "msgtype": "sparkconn-action-open",
            "page": "sparkconn-config",
            "maxmemory": 8,
            "sparkversion": "3.3.1",
            "cluster": "analytix",
            "availableoptions": {"spark_options": []},
            "availablebundles": {"bundled_options": {}}
        }))
        .unwrap();

        match n {
            Notification::ConfigurationNeeded(page) => {
                assert_eq!(page.max_memory.as_deref(), Some("8"));
                assert_eq!(page.spark_version.as_deref(), Some("3.3.1"));
                assert_eq!(page.cluster.as_deref(), Some("analytix"));
                assert!(page.available_options.is_some());
                assert!(page.available_bundles.is_some());
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_open_reply_already_connected() {
        let n = Notification::from_value(&json!({
            "msgtype": "sparkconn-action-open",
            "page": "sparkconn-connected",
            "sparkversion": "3.3.1",
            "cluster": "k8s",
            "session": {"sparkui": "https://spark.example/ui"}
        }))
        .unwrap();

        match n {
            Notification::AlreadyConnected(info) => {
                assert_eq!(info.cluster.as_deref(), Some("k8s"));
                assert_eq!(info.session.unwrap()["sparkui"], "https://spark.example/ui");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_state_changes_resync() {
        for (msgtype, reason) in [
            ("sparkconn-connected", ResyncReason::Connected),
            ("sparkconn-config", ResyncReason::Config),
            ("sparkconn-disconnected", ResyncReason::Disconnected),
        ] {
            let n = Notification::from_value(&json!({ "msgtype": msgtype })).unwrap();
            assert_eq!(n, Notification::Resync(reason));
            assert_eq!(n.msgtype(), msgtype);
        }
    }

    #[test]
    fn test_connect_error_text() {
        let n = Notification::from_value(&json!({
            "msgtype": "sparkconn-connect-error",
            "error": "Kerberos ticket expired"
        }))
        .unwrap();
        assert_eq!(
            n,
            Notification::ConnectError {
                error: "Kerberos ticket expired".to_string()
            }
        );
    }

    #[test]
    fn test_follow_log_lines() {
        let n = Notification::from_value(&json!({
            "msgtype": "sparkconn-action-follow-log",
            "logs": ["line 1", "line 2"]
        }))
        .unwrap();
        assert_eq!(
            n,
            Notification::FollowLog {
                logs: vec!["line 1".to_string(), "line 2".to_string()]
            }
        );
    }

    #[test]
    fn test_follow_log_with_bad_lines_is_an_error() {
        let err = Notification::from_value(&json!({
            "msgtype": "sparkconn-action-follow-log",
            "logs": [1, 2]
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { .. }));
    }

    #[test]
    fn test_missing_msgtype() {
        let err = Notification::from_value(&json!({"page": "x"})).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingMsgType));
    }

    #[test]
    fn test_unknown_msgtype_is_preserved() {
        let n = Notification::from_value(&json!({"msgtype": "sparkconn-future"})).unwrap();
        assert_eq!(n.msgtype(), "sparkconn-future");
    }
}
