//! Outbound actions sent from the panel to the backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator carried in the `type` field of every outbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Action,
}

/// An action the panel asks the backend to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    /// Ask the backend which page to show (configuration or connected session).
    #[serde(rename = "sparkconn-action-open")]
    Open,

    /// Start a cluster session with the merged option set.
    #[serde(rename = "sparkconn-action-connect")]
    Connect {
        #[serde(rename = "action-data")]
        data: ConnectData,
    },

    /// Tear down the current cluster session.
    #[serde(rename = "sparkconn-action-disconnect")]
    Disconnect,
}

/// Payload of [`Action::Connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectData {
    pub options: BTreeMap<String, String>,
}

/// Wire envelope: `{"type": "action", "action": <name>, "action-data"?: {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(flatten)]
    pub action: Action,
}

impl Action {
    /// Build a connect action from a merged option map.
    pub fn connect(options: BTreeMap<String, String>) -> Self {
        Action::Connect {
            data: ConnectData { options },
        }
    }

    /// The wire name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Open => "sparkconn-action-open",
            Action::Connect { .. } => "sparkconn-action-connect",
            Action::Disconnect => "sparkconn-action-disconnect",
        }
    }

    /// Serialize this action inside its wire envelope.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(OutboundMessage::from(self.clone()))
    }

    /// Parse an action from its wire envelope.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value::<OutboundMessage>(value).map(|m| m.action)
    }
}

impl From<Action> for OutboundMessage {
    fn from(action: Action) -> Self {
        OutboundMessage {
            kind: MessageKind::Action,
            action,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
