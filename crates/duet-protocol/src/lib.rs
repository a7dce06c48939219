//! Duet wire protocol
//!
//! JSON text envelopes exchanged over one WebSocket per client. The `msg`
//! field selects the message; binary payloads are standard base64.
//!
//! ## Messages
//! ```text
//! {"msg":"Get Document"}                                  client -> relay
//! {"msg":"Get Document","document":"<snapshot>"}          relay -> client
//! {"msg":"Update","update":"<delta>","from":<origin>}     both ways
//! {"msg":"Awareness","from":<origin>,"color":"#rrggbb",
//!  "anchor":{"sticky":"<anchor>"},"head":{"sticky":"<anchor>"}}
//! ```

pub mod error;
pub mod message;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{Message, MAX_MESSAGE_SIZE};
