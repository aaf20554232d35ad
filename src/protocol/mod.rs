//! PostgreSQL frontend/backend protocol (v3), limited to what an
//! administrative session needs: startup, authentication, simple query.

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{
    AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage,
};
