//! Wire protocol: framing, message schemas, and protocol errors.
//!
//! The protocol layer is pure data. It never touches a socket; sessions own
//! the transport and feed frames through these codecs.

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{MAX_FRAME_SIZE, PROTOCOL_VERSION, ProtocolError, ProtocolResult};
pub use framing::{FRAME_HEADER_SIZE, Frame, FrameCodec};
pub use messages::{
    ConfChgEvent, ConnectRequest, ConnectionRole, DaemonStatus, DeliverEvent, FlowControlEvent,
    GROUP_NAME_MAX, GroupName, GroupRequest, GroupsGetResponse, GroupsResultEvent, Guarantee,
    InvalidGroupName, LocalGetResponse, MAX_MESSAGE_SIZE, McastRequest, McastResponse,
    MembershipGetResponse, MembershipRequest, MessageId, SERVICE_CPG, StatusResponse,
};
