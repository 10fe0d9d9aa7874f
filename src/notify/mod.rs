//! Outbound notification transport and recipient routing
pub mod routing;
pub mod transport;

pub use routing::{MarkerSet, RouteMatch, RoutingRule, RoutingTable};
pub use transport::{send_logged, Email, MockTransport, SendmailTransport, Transport};
