pub mod events;
pub mod session;

pub use events::{ClientEvent, PopulatedMessage, ServerEvent};
pub use session::WsSession;
