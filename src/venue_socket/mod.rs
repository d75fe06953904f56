pub mod manager;
pub mod socket;
pub mod types;

pub use manager::VenueSocketManager;
pub use socket::UserSocket;
pub use types::{Credentials, Fill, FillStatus, OrderEvent, OrderEventKind, SocketState, VenueSocketError};
