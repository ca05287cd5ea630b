//! Pieces shared by the launcher daemon, the invoker and booster plugins.

pub mod booster_abi;
pub mod child_status;
pub mod paths;
pub mod protocol_common;

// control-socket framing; fd passing is unix only
pub mod rpc;

pub use child_status::ChildStatus;
pub use protocol_common::{
    Opcode, PROTOCOL_VERSION, ProtocolError, SessionOptions,
};
pub use rpc::WireCodec;
