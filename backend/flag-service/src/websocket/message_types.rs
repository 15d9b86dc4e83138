//! WebSocket protocol for push-style flag consumption
//!
//! Subscribing to a flag key immediately yields the current state and then
//! a `flag_update` on every invalidation-triggered re-fetch until the
//! client unsubscribes or disconnects.

use serde::{Deserialize, Serialize};

use crate::models::{EvaluationContext, EvaluationResult, FlagWithRules};

/// Inbound WebSocket events from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Start receiving updates for a flag key
    #[serde(rename = "subscribe")]
    Subscribe { flag_key: String },

    /// Stop receiving updates for a flag key
    #[serde(rename = "unsubscribe")]
    Unsubscribe { flag_key: String },

    /// One-shot fetch of the current definition
    #[serde(rename = "get")]
    Get { flag_key: String },

    /// One-shot evaluation against a supplied context
    #[serde(rename = "evaluate")]
    Evaluate {
        flag_key: String,
        #[serde(default)]
        context: EvaluationContext,
    },
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    /// Current definition, sent on subscribe and on `get`
    #[serde(rename = "flag_state")]
    FlagState { flag_key: String, flag: FlagWithRules },

    /// Definition changed; sent after each invalidation-triggered re-fetch
    #[serde(rename = "flag_update")]
    FlagUpdate { flag_key: String, flag: FlagWithRules },

    /// Flag was soft-deleted
    #[serde(rename = "flag_removed")]
    FlagRemoved { flag_key: String },

    /// Result of an `evaluate` request
    #[serde(rename = "evaluation")]
    Evaluation {
        flag_key: String,
        result: EvaluationResult,
    },

    /// Subscription acknowledged
    #[serde(rename = "subscribed")]
    Subscribed { flag_key: String },

    /// Unsubscription acknowledged
    #[serde(rename = "unsubscribed")]
    Unsubscribed { flag_key: String },

    /// Request failed
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_subscribe_parses() {
        let evt: WsInboundEvent =
            serde_json::from_str(r#"{"type":"subscribe","flag_key":"new-ui"}"#).unwrap();
        assert!(matches!(evt, WsInboundEvent::Subscribe { flag_key } if flag_key == "new-ui"));
    }

    #[test]
    fn test_inbound_evaluate_defaults_context() {
        let evt: WsInboundEvent =
            serde_json::from_str(r#"{"type":"evaluate","flag_key":"beta"}"#).unwrap();
        match evt {
            WsInboundEvent::Evaluate { flag_key, context } => {
                assert_eq!(flag_key, "beta");
                assert!(context.user_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_outbound_error_serializes_with_tag() {
        let evt = WsOutboundEvent::Error {
            message: "nope".to_string(),
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains(r#""type":"error""#));
    }
}
