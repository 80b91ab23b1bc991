//! Staleness is derived at query time; the registry itself never expires entries.

use crate::models::NodeDescriptor;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

pub fn is_stale(last_heartbeat: OffsetDateTime, now: OffsetDateTime, threshold: Duration) -> bool {
    now - last_heartbeat > threshold
}

/// Descriptor plus the derived liveness fields, for the API
#[derive(Debug, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub descriptor: NodeDescriptor,
    pub stale: bool,
    pub stale_for_seconds: i64,
}

pub fn to_view(descriptor: &NodeDescriptor, now: OffsetDateTime, threshold: Duration) -> NodeView {
    let age = now - descriptor.last_heartbeat;
    NodeView {
        descriptor: descriptor.clone(),
        stale: is_stale(descriptor.last_heartbeat, now, threshold),
        stale_for_seconds: age.whole_seconds().max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HeartbeatIn;
    use time::macros::datetime;

    #[test]
    fn test_stale_boundary() {
        let last = datetime!(2025-03-01 12:00:00 UTC);
        let threshold = Duration::seconds(90);

        assert!(!is_stale(last, last + Duration::seconds(90), threshold));
        assert!(is_stale(last, last + Duration::seconds(91), threshold));
        // clock going backwards is not stale
        assert!(!is_stale(last, last - Duration::seconds(5), threshold));
    }

    #[test]
    fn test_view_reports_age() {
        let hb: HeartbeatIn = serde_json::from_value(serde_json::json!({"node": "pumpkin"})).unwrap();
        let seen = datetime!(2025-03-01 12:00:00 UTC);
        let desc = NodeDescriptor::from_heartbeat(hb, seen);

        let view = to_view(&desc, seen + Duration::seconds(120), Duration::seconds(90));
        assert!(view.stale);
        assert_eq!(view.stale_for_seconds, 120);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["node"], "pumpkin");
        assert_eq!(json["stale"], true);
    }
}
