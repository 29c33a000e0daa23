//! Monitor event types.
//!
//! Events serialize to the compact trace format subscribers and tests
//! compare against, e.g. `{"op": "next", "action": {...}, "nextAction": {...},
//! "name": "L(DEC)-0", "shouldProcess": true}`. Emission metadata (chain id,
//! sequence number, timestamp) rides along on the struct but is not part of
//! the serialized trace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;

/// Identifies one chain (one top-level pass through the pipeline).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(Uuid);

impl ChainId {
    /// Create a new random chain id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identifies a monitor subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle transition reported by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorOp {
    /// An action entered the pipeline.
    Top,
    /// A descriptor started intercepting an action.
    Begin,
    /// A descriptor let an action (possibly replaced) through.
    Next,
    /// A descriptor rejected an action in favour of a substitute.
    NextDisp,
    /// A substitute action is being dispatched from the top.
    Dispatch,
    /// An action was forwarded to the store.
    Bottom,
    /// A descriptor finished with an action.
    End,
    /// A chain was cancelled before reaching the store.
    Cancelled,
    /// A chain or descriptor failed.
    Error,
}

/// One published lifecycle record.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub op: MonitorOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disp_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_process: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Chain that produced the event.
    #[serde(skip)]
    pub chain: Option<ChainId>,
    /// Position in the pipeline's emission order, assigned on publication.
    #[serde(skip)]
    pub seq: u64,
    /// Publication time, stamped together with `seq`.
    #[serde(skip, default = "Utc::now")]
    pub at: DateTime<Utc>,
}

impl MonitorEvent {
    fn bare(op: MonitorOp, chain: ChainId) -> Self {
        Self {
            op,
            action: None,
            next_action: None,
            disp_action: None,
            name: None,
            should_process: None,
            cancelled: None,
            error: None,
            chain: Some(chain),
            seq: 0,
            at: Utc::now(),
        }
    }

    pub(crate) fn top(chain: ChainId, action: &Action) -> Self {
        Self {
            action: Some(action.clone()),
            ..Self::bare(MonitorOp::Top, chain)
        }
    }

    pub(crate) fn begin(chain: ChainId, action: &Action, name: &str) -> Self {
        Self {
            action: Some(action.clone()),
            name: Some(name.to_string()),
            ..Self::bare(MonitorOp::Begin, chain)
        }
    }

    pub(crate) fn next(chain: ChainId, action: &Action, next_action: &Action, name: &str) -> Self {
        Self {
            action: Some(action.clone()),
            next_action: Some(next_action.clone()),
            name: Some(name.to_string()),
            should_process: Some(true),
            ..Self::bare(MonitorOp::Next, chain)
        }
    }

    pub(crate) fn next_disp(chain: ChainId, action: &Action, disp_action: &Action, name: &str) -> Self {
        Self {
            action: Some(action.clone()),
            disp_action: Some(disp_action.clone()),
            name: Some(name.to_string()),
            should_process: Some(false),
            ..Self::bare(MonitorOp::NextDisp, chain)
        }
    }

    pub(crate) fn dispatch(chain: ChainId, action: &Action, disp_action: &Action) -> Self {
        Self {
            action: Some(action.clone()),
            disp_action: Some(disp_action.clone()),
            ..Self::bare(MonitorOp::Dispatch, chain)
        }
    }

    pub(crate) fn bottom(chain: ChainId, next_action: &Action) -> Self {
        Self {
            next_action: Some(next_action.clone()),
            ..Self::bare(MonitorOp::Bottom, chain)
        }
    }

    pub(crate) fn end(chain: ChainId, action: &Action, name: &str, cancelled: bool) -> Self {
        Self {
            action: Some(action.clone()),
            name: Some(name.to_string()),
            cancelled: cancelled.then_some(true),
            ..Self::bare(MonitorOp::End, chain)
        }
    }

    pub(crate) fn cancelled(chain: ChainId, action: &Action) -> Self {
        Self {
            action: Some(action.clone()),
            ..Self::bare(MonitorOp::Cancelled, chain)
        }
    }

    pub(crate) fn error(chain: ChainId, action: &Action, name: Option<&str>, error: impl fmt::Display) -> Self {
        Self {
            action: Some(action.clone()),
            name: name.map(str::to_string),
            error: Some(error.to_string()),
            ..Self::bare(MonitorOp::Error, chain)
        }
    }

    /// The event in trace form, without emission metadata.
    #[must_use]
    pub fn to_trace(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// True for `end` events carrying the cancellation marker.
    #[must_use]
    pub fn is_cancelled_end(&self) -> bool {
        self.op == MonitorOp::End && self.cancelled == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_event_trace_shape() {
        let chain = ChainId::new();
        let dec = Action::new("DEC");
        let ev = MonitorEvent::next(chain, &dec, &dec, "L(DEC)-0");
        assert_eq!(
            ev.to_trace(),
            json!({
                "action": {"type": "DEC"},
                "nextAction": {"type": "DEC"},
                "name": "L(DEC)-0",
                "shouldProcess": true,
                "op": "next"
            })
        );
        assert_eq!(ev.chain, Some(chain));
    }

    #[test]
    fn test_next_disp_uses_camel_case_op() {
        let chain = ChainId::new();
        let ev = MonitorEvent::next_disp(chain, &Action::new("DEC"), &Action::new("NOOP"), "L(DEC)-0");
        let v = ev.to_trace();
        assert_eq!(v["op"], json!("nextDisp"));
        assert_eq!(v["dispAction"], json!({"type": "NOOP"}));
        assert_eq!(v["shouldProcess"], json!(false));
    }

    #[test]
    fn test_end_only_marks_cancellation_when_cancelled() {
        let chain = ChainId::new();
        let a = Action::new("A");
        assert_eq!(
            MonitorEvent::end(chain, &a, "L(A)-0", false).to_trace(),
            json!({"action": {"type": "A"}, "name": "L(A)-0", "op": "end"})
        );
        let ev = MonitorEvent::end(chain, &a, "L(A)-0", true);
        assert!(ev.is_cancelled_end());
        assert_eq!(ev.to_trace()["cancelled"], json!(true));
    }

    #[test]
    fn test_bottom_has_only_next_action() {
        let ev = MonitorEvent::bottom(ChainId::new(), &Action::new("NOOP"));
        assert_eq!(ev.to_trace(), json!({"nextAction": {"type": "NOOP"}, "op": "bottom"}));
    }

    #[test]
    fn test_event_deserializes_without_metadata() {
        let v = json!({"action": {"type": "DEC"}, "op": "top"});
        let ev: MonitorEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev.op, MonitorOp::Top);
        assert!(ev.chain.is_none());
        assert_eq!(ev.seq, 0);
    }
}
