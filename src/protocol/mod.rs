//! PostgreSQL v3 wire protocol, limited to startup, authentication and ping

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage};
