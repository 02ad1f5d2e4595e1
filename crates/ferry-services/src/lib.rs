//! ferry-services — delivery tracking and the transport loops built on it.

pub mod error;
pub mod receive_window;
pub mod receiver;
pub mod sender;
pub mod tracker;

pub use error::TransportError;
pub use receive_window::{ReceiveWindow, Recorded, DEFAULT_RECEIVE_WINDOW};
pub use receiver::{new_connection_table, ConnectionTable, Delivery, Receiver, DEFAULT_PEER_IDLE_TIMEOUT};
pub use sender::Sender;
pub use tracker::{DeliveryTracker, InFlightEntry, InFlightSet, RetransmitPolicy, TrackerError};
