//! Client-facing connection plumbing
//!
//! * [`ConnectionInfo`]: descriptor parsing (keyword/value and URL forms)
//! * [`Connector`]: open/ping/close seam used by the manager
//! * [`PgConnector`]: native wire-protocol implementation

pub mod connector;
pub mod descriptor;

pub use connector::{Connector, PgConnector};
pub use descriptor::{ConnectionInfo, TransportType};
