/*!
# Orchard DevKit - test stubs for fleet components

- Mock node agent server (answer / hang) for relay tests
- Loopback helpers for router tests
- Heartbeat payload builders
*/

pub mod node_stub;
pub mod test_utils;

pub use node_stub::{MockNode, NodeBehavior, RecordedRequest};
pub use test_utils::{init_test_logging, refused_address, serve_router, HeartbeatBuilder};
