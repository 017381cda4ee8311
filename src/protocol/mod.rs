//! C1 Transport + C2 Protocol Codec: wire types, request/reply framing, and the
//! TCP connection that carries them.

pub mod codec;
pub mod transport;
pub mod types;

pub use codec::{parse_array, parse_reply};
pub use transport::Transport;
pub use types::{Reply, ReplyStatus, Request, RequestId, Value};
