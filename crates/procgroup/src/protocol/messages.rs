//! Wire message schemas for the daemon protocol.
//!
//! Each [`MessageId`] selects a fixed payload schema. Requests and replies
//! share an id: the reply to a `Join` request is a `Join` frame carrying a
//! status. Notifications (`Deliver`, `ConfChg`, `GroupsResult`,
//! `FlowControl`) only ever travel daemon-to-client on the dispatch
//! connection.
//!
//! All integers are host-native byte order; the transport is local-only.
//! Every decode is bounded: declared counts and lengths are validated against
//! protocol capacities before anything is copied.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
use super::framing::FRAME_HEADER_SIZE;
use crate::membership::{
    FlowControlState, MemberAddress, MembershipChange, check_member_count, decode_member_records,
};

/// Service id for the closed-process-group service, carried in the connect
/// exchange so the daemon can route the connection to the right subsystem.
pub const SERVICE_CPG: u32 = 8;

/// Maximum group name length in bytes.
pub const GROUP_NAME_MAX: usize = 128;

/// Wire size of a group name field: length prefix plus fixed buffer.
const GROUP_NAME_WIRE_SIZE: usize = 4 + GROUP_NAME_MAX;

/// Fixed (non-payload) portion of a multicast request.
const MCAST_FIXED_SIZE: usize = 8;

/// Maximum total multicast payload across all caller buffers.
pub const MAX_MESSAGE_SIZE: usize = MAX_FRAME_SIZE - FRAME_HEADER_SIZE - MCAST_FIXED_SIZE;

// ============================================================================
// Message ids
// ============================================================================

/// Message id catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageId {
    /// Service negotiation, sent once per connection at initialize time.
    Connect       = 1,
    /// Begin membership-change notifications for a group.
    TrackStart    = 2,
    /// Join a named group.
    Join          = 3,
    /// Leave a named group.
    Leave         = 4,
    /// Multicast a payload to all current group members.
    Mcast         = 5,
    /// Snapshot of the current member list for a group.
    MembershipGet = 6,
    /// Local node id query.
    LocalGet      = 7,
    /// Enumerate known groups (count in the reply, entries async).
    GroupsGet     = 8,

    /// A payload delivered from some group member.
    Deliver       = 16,
    /// Membership change set for a tracked group.
    ConfChg       = 17,
    /// One entry of a groups-get enumeration.
    GroupsResult  = 18,
    /// Flow-control state changed.
    FlowControl   = 19,
}

impl MessageId {
    /// Attempts to parse a message id from a frame header.
    #[must_use]
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::Connect),
            2 => Some(Self::TrackStart),
            3 => Some(Self::Join),
            4 => Some(Self::Leave),
            5 => Some(Self::Mcast),
            6 => Some(Self::MembershipGet),
            7 => Some(Self::LocalGet),
            8 => Some(Self::GroupsGet),
            16 => Some(Self::Deliver),
            17 => Some(Self::ConfChg),
            18 => Some(Self::GroupsResult),
            19 => Some(Self::FlowControl),
            _ => None,
        }
    }

    /// Returns the wire id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }
}

// ============================================================================
// Status codes
// ============================================================================

/// Status code embedded in every reply.
///
/// Remote statuses are handed back to the caller exactly as received; the
/// library never translates or retries them. `TryAgain` in particular means
/// the daemon is synchronizing and the caller may retry later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DaemonStatus {
    /// Operation succeeded.
    Ok           = 0,
    /// Generic failure.
    Error        = 1,
    /// Transient failure, retry later.
    TryAgain     = 2,
    /// The daemon did not recognize the referenced handle or subscription.
    BadHandle    = 3,
    /// A request argument was rejected.
    InvalidParam = 4,
    /// The daemon could not allocate resources.
    NoMemory     = 5,
    /// The referenced group or member does not exist.
    NotExist     = 6,
    /// The request exceeded a size limit.
    TooBig       = 7,
    /// The caller is not allowed to perform the operation.
    AccessDenied = 8,
    /// Internal library/daemon inconsistency.
    Library      = 9,
}

impl DaemonStatus {
    /// Parses a wire status value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::TryAgain),
            3 => Some(Self::BadHandle),
            4 => Some(Self::InvalidParam),
            5 => Some(Self::NoMemory),
            6 => Some(Self::NotExist),
            7 => Some(Self::TooBig),
            8 => Some(Self::AccessDenied),
            9 => Some(Self::Library),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::TryAgain => "try again",
            Self::BadHandle => "bad handle",
            Self::InvalidParam => "invalid parameter",
            Self::NoMemory => "out of memory",
            Self::NotExist => "does not exist",
            Self::TooBig => "too big",
            Self::AccessDenied => "access denied",
            Self::Library => "library error",
        }
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Group names
// ============================================================================

/// Group name exceeds [`GROUP_NAME_MAX`] bytes.
#[derive(Debug, Error)]
#[error("group name too long: {len} bytes exceeds maximum {GROUP_NAME_MAX}")]
pub struct InvalidGroupName {
    /// Length of the rejected name.
    pub len: usize,
}

/// A bounded-length group name.
///
/// Names are compared by exact byte equality including length; the unused
/// tail of the fixed buffer is always zero so derived equality is byte-exact.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupName {
    len: u8,
    bytes: [u8; GROUP_NAME_MAX],
}

impl GroupName {
    /// Creates a group name from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidGroupName`] if `name` is longer than
    /// [`GROUP_NAME_MAX`].
    pub fn new(name: &[u8]) -> Result<Self, InvalidGroupName> {
        if name.len() > GROUP_NAME_MAX {
            return Err(InvalidGroupName { len: name.len() });
        }
        let mut bytes = [0u8; GROUP_NAME_MAX];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            len: name.len() as u8,
            bytes,
        })
    }

    /// The name bytes, without padding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Name length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_ne(u32::from(self.len));
        buf.extend_from_slice(&self.bytes);
    }

    pub(crate) fn get(buf: &mut impl Buf) -> ProtocolResult<Self> {
        if buf.remaining() < GROUP_NAME_WIRE_SIZE {
            return Err(ProtocolError::invalid("truncated group name"));
        }
        let len = buf.get_u32_ne() as usize;
        if len > GROUP_NAME_MAX {
            return Err(ProtocolError::invalid(format!(
                "group name length {len} exceeds maximum {GROUP_NAME_MAX}"
            )));
        }
        let mut raw = [0u8; GROUP_NAME_MAX];
        buf.copy_to_slice(&mut raw);
        // Only the declared prefix is meaningful; re-zero the tail so
        // equality stays byte-exact even against a sloppy sender.
        let mut bytes = [0u8; GROUP_NAME_MAX];
        bytes[..len].copy_from_slice(&raw[..len]);
        Ok(Self {
            len: len as u8,
            bytes,
        })
    }
}

impl TryFrom<&str> for GroupName {
    type Error = InvalidGroupName;

    fn try_from(name: &str) -> Result<Self, InvalidGroupName> {
        Self::new(name.as_bytes())
    }
}

impl std::fmt::Debug for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupName({})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

// ============================================================================
// Multicast guarantees
// ============================================================================

/// Ordering/reliability class requested for a multicast.
///
/// The ordering itself is enforced by the daemon's membership engine; the
/// client only forwards the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Guarantee {
    /// No ordering guarantee.
    Unordered = 0,
    /// FIFO per sender.
    Fifo      = 1,
    /// Totally ordered ("agreed") delivery.
    Agreed    = 2,
}

impl Guarantee {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Unordered),
            1 => Some(Self::Fifo),
            2 => Some(Self::Agreed),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }
}

/// Role a connection declares in the connect exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConnectionRole {
    /// Synchronous request/reply connection.
    Response = 0,
    /// Asynchronous delivery connection.
    Dispatch = 1,
}

impl ConnectionRole {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Response),
            1 => Some(Self::Dispatch),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }
}

// ============================================================================
// Decode helpers
// ============================================================================

fn get_u32(buf: &mut impl Buf, what: &str) -> ProtocolResult<u32> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::invalid(format!("truncated {what}")));
    }
    Ok(buf.get_u32_ne())
}

fn get_status(buf: &mut impl Buf) -> ProtocolResult<DaemonStatus> {
    let raw = get_u32(buf, "status")?;
    DaemonStatus::from_wire(raw)
        .ok_or_else(|| ProtocolError::invalid(format!("unknown status code {raw}")))
}

fn expect_consumed(buf: &impl Buf, what: &str) -> ProtocolResult<()> {
    if buf.has_remaining() {
        return Err(ProtocolError::invalid(format!(
            "{} trailing bytes after {what}",
            buf.remaining()
        )));
    }
    Ok(())
}

// ============================================================================
// Requests
// ============================================================================

/// Connect exchange request: `{ service, role, version }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Service the connection is for ([`SERVICE_CPG`]).
    pub service: u32,
    /// Declared connection role.
    pub role: ConnectionRole,
    /// Client protocol version.
    pub version: u32,
}

impl ConnectRequest {
    /// Encodes the request payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u32_ne(self.service);
        buf.put_u32_ne(self.role.wire());
        buf.put_u32_ne(self.version);
        buf.freeze()
    }

    /// Decodes a request payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or an unknown role.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let service = get_u32(&mut payload, "connect service")?;
        let role_raw = get_u32(&mut payload, "connect role")?;
        let role = ConnectionRole::from_wire(role_raw)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown connection role {role_raw}")))?;
        let version = get_u32(&mut payload, "connect version")?;
        expect_consumed(&payload, "connect request")?;
        Ok(Self {
            service,
            role,
            version,
        })
    }
}

/// Request carrying only a group name (`TrackStart`, `MembershipGet`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRequest {
    /// Target group.
    pub group: GroupName,
}

impl GroupRequest {
    /// Encodes the request payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GROUP_NAME_WIRE_SIZE);
        self.group.put(&mut buf);
        buf.freeze()
    }

    /// Decodes a request payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or a malformed name.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let group = GroupName::get(&mut payload)?;
        expect_consumed(&payload, "group request")?;
        Ok(Self { group })
    }
}

/// `Join` / `Leave` request: group plus the caller's process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipRequest {
    /// Target group.
    pub group: GroupName,
    /// Caller process id.
    pub process_id: u32,
}

impl MembershipRequest {
    /// Encodes the request payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GROUP_NAME_WIRE_SIZE + 4);
        self.group.put(&mut buf);
        buf.put_u32_ne(self.process_id);
        buf.freeze()
    }

    /// Decodes a request payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or a malformed name.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let group = GroupName::get(&mut payload)?;
        let process_id = get_u32(&mut payload, "process id")?;
        expect_consumed(&payload, "membership request")?;
        Ok(Self { group, process_id })
    }
}

/// Multicast request: guarantee, declared length, then the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McastRequest {
    /// Requested ordering class.
    pub guarantee: Guarantee,
    /// Reassembled payload.
    pub payload: Bytes,
}

impl McastRequest {
    /// Encodes a multicast from caller buffers, concatenated in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when the total payload across
    /// all buffers exceeds [`MAX_MESSAGE_SIZE`].
    pub fn encode_parts(guarantee: Guarantee, parts: &[&[u8]]) -> ProtocolResult<Bytes> {
        let msg_len: usize = parts.iter().map(|part| part.len()).sum();
        if msg_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: msg_len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(MCAST_FIXED_SIZE + msg_len);
        buf.put_u32_ne(guarantee.wire());
        buf.put_u32_ne(msg_len as u32);
        for part in parts {
            buf.extend_from_slice(part);
        }
        Ok(buf.freeze())
    }

    /// Decodes a request payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the declared length disagrees with the
    /// frame size.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let guarantee_raw = get_u32(&mut payload, "guarantee")?;
        let guarantee = Guarantee::from_wire(guarantee_raw)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown guarantee {guarantee_raw}")))?;
        let msg_len = get_u32(&mut payload, "multicast length")? as usize;
        if msg_len != payload.remaining() {
            return Err(ProtocolError::invalid(format!(
                "multicast declares {msg_len} bytes but frame carries {}",
                payload.remaining()
            )));
        }
        Ok(Self { guarantee, payload })
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Reply carrying only a status (`Connect`, `TrackStart`, `Join`, `Leave`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    /// Embedded status code.
    pub status: DaemonStatus,
}

impl StatusResponse {
    /// Encodes the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32_ne(self.status.wire());
        buf.freeze()
    }

    /// Decodes a reply payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or an unknown status code.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let status = get_status(&mut payload)?;
        expect_consumed(&payload, "status reply")?;
        Ok(Self { status })
    }
}

/// Multicast reply: status plus the daemon's current flow-control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McastResponse {
    /// Embedded status code.
    pub status: DaemonStatus,
    /// Flow-control state as of this reply.
    pub flow_control: FlowControlState,
}

impl McastResponse {
    /// Encodes the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_ne(self.status.wire());
        buf.put_u32_ne(self.flow_control.wire());
        buf.freeze()
    }

    /// Decodes a reply payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or unknown enum values.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let status = get_status(&mut payload)?;
        let flow_raw = get_u32(&mut payload, "flow control state")?;
        let flow_control = FlowControlState::from_wire(flow_raw)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown flow state {flow_raw}")))?;
        expect_consumed(&payload, "multicast reply")?;
        Ok(Self {
            status,
            flow_control,
        })
    }
}

/// Membership snapshot reply: status plus the current member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipGetResponse {
    /// Embedded status code.
    pub status: DaemonStatus,
    /// Current members of the queried group.
    pub members: Vec<MemberAddress>,
}

impl MembershipGetResponse {
    /// Encodes the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_ne(self.status.wire());
        buf.put_u32_ne(self.members.len() as u32);
        for member in &self.members {
            member.put(&mut buf);
        }
        buf.freeze()
    }

    /// Decodes a reply payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the declared count exceeds the member
    /// capacity or disagrees with the frame size.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let status = get_status(&mut payload)?;
        let count = check_member_count(get_u32(&mut payload, "member count")?)?;
        let members = decode_member_records(&mut payload, count)?;
        expect_consumed(&payload, "membership reply")?;
        Ok(Self { status, members })
    }
}

/// Local node id reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGetResponse {
    /// Embedded status code.
    pub status: DaemonStatus,
    /// Node id of the local node.
    pub node_id: u32,
}

impl LocalGetResponse {
    /// Encodes the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_ne(self.status.wire());
        buf.put_u32_ne(self.node_id);
        buf.freeze()
    }

    /// Decodes a reply payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or an unknown status code.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let status = get_status(&mut payload)?;
        let node_id = get_u32(&mut payload, "node id")?;
        expect_consumed(&payload, "local-get reply")?;
        Ok(Self { status, node_id })
    }
}

/// Groups enumeration reply: status plus the count of groups that will be
/// reported through [`GroupsResultEvent`] notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupsGetResponse {
    /// Embedded status code.
    pub status: DaemonStatus,
    /// Number of groups the daemon will enumerate.
    pub group_count: u32,
}

impl GroupsGetResponse {
    /// Encodes the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_ne(self.status.wire());
        buf.put_u32_ne(self.group_count);
        buf.freeze()
    }

    /// Decodes a reply payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or an unknown status code.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let status = get_status(&mut payload)?;
        let group_count = get_u32(&mut payload, "group count")?;
        expect_consumed(&payload, "groups-get reply")?;
        Ok(Self {
            status,
            group_count,
        })
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// A multicast delivered from some group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverEvent {
    /// Group the message belongs to.
    pub group: GroupName,
    /// Sender node id.
    pub node_id: u32,
    /// Sender process id.
    pub process_id: u32,
    /// Flow-control state piggybacked on the delivery.
    pub flow_control: FlowControlState,
    /// Message payload.
    pub payload: Bytes,
}

impl DeliverEvent {
    /// Encodes the notification payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GROUP_NAME_WIRE_SIZE + 16 + self.payload.len());
        self.group.put(&mut buf);
        buf.put_u32_ne(self.node_id);
        buf.put_u32_ne(self.process_id);
        buf.put_u32_ne(self.flow_control.wire());
        buf.put_u32_ne(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the declared message length disagrees
    /// with the frame size.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let group = GroupName::get(&mut payload)?;
        let node_id = get_u32(&mut payload, "sender node id")?;
        let process_id = get_u32(&mut payload, "sender process id")?;
        let flow_raw = get_u32(&mut payload, "flow control state")?;
        let flow_control = FlowControlState::from_wire(flow_raw)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown flow state {flow_raw}")))?;
        let msg_len = get_u32(&mut payload, "message length")? as usize;
        if msg_len != payload.remaining() {
            return Err(ProtocolError::invalid(format!(
                "delivery declares {msg_len} bytes but frame carries {}",
                payload.remaining()
            )));
        }
        Ok(Self {
            group,
            node_id,
            process_id,
            flow_control,
            payload,
        })
    }
}

/// Membership change notification.
///
/// The wire layout is the group name, three counts, then a single flat array
/// of `member + left + joined` records in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfChgEvent {
    /// Group the change applies to.
    pub group: GroupName,
    /// Decoded change set.
    pub change: MembershipChange,
}

impl ConfChgEvent {
    /// Encodes the notification payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.group.put(&mut buf);
        buf.put_u32_ne(self.change.members.len() as u32);
        buf.put_u32_ne(self.change.left.len() as u32);
        buf.put_u32_ne(self.change.joined.len() as u32);
        for member in self
            .change
            .members
            .iter()
            .chain(&self.change.left)
            .chain(&self.change.joined)
        {
            member.put(&mut buf);
        }
        buf.freeze()
    }

    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when any declared count exceeds the member
    /// capacity or the counts disagree with the frame size.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let group = GroupName::get(&mut payload)?;
        let member_count = check_member_count(get_u32(&mut payload, "member count")?)?;
        let left_count = check_member_count(get_u32(&mut payload, "left count")?)?;
        let joined_count = check_member_count(get_u32(&mut payload, "joined count")?)?;

        let members = decode_member_records(&mut payload, member_count)?;
        let left = decode_member_records(&mut payload, left_count)?;
        let joined = decode_member_records(&mut payload, joined_count)?;
        expect_consumed(&payload, "membership change")?;

        Ok(Self {
            group,
            change: MembershipChange {
                members,
                left,
                joined,
            },
        })
    }
}

/// One entry of a groups-get enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupsResultEvent {
    /// The enumerated group.
    pub group: GroupName,
    /// Zero-based index of this entry.
    pub index: u32,
    /// Total number of entries in the enumeration.
    pub total: u32,
    /// Current members of the group.
    pub members: Vec<MemberAddress>,
}

impl GroupsResultEvent {
    /// Encodes the notification payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.group.put(&mut buf);
        buf.put_u32_ne(self.index);
        buf.put_u32_ne(self.total);
        buf.put_u32_ne(self.members.len() as u32);
        for member in &self.members {
            member.put(&mut buf);
        }
        buf.freeze()
    }

    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the declared count exceeds the member
    /// capacity or disagrees with the frame size.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let group = GroupName::get(&mut payload)?;
        let index = get_u32(&mut payload, "group index")?;
        let total = get_u32(&mut payload, "group total")?;
        let count = check_member_count(get_u32(&mut payload, "member count")?)?;
        let members = decode_member_records(&mut payload, count)?;
        expect_consumed(&payload, "groups result")?;
        Ok(Self {
            group,
            index,
            total,
            members,
        })
    }
}

/// Flow-control state change notification. Consumed internally; never
/// surfaced as a user callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlEvent {
    /// New flow-control state.
    pub state: FlowControlState,
}

impl FlowControlEvent {
    /// Encodes the notification payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32_ne(self.state.wire());
        buf.freeze()
    }

    /// Decodes a notification payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on truncation or an unknown state value.
    pub fn decode(mut payload: Bytes) -> ProtocolResult<Self> {
        let raw = get_u32(&mut payload, "flow control state")?;
        let state = FlowControlState::from_wire(raw)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown flow state {raw}")))?;
        expect_consumed(&payload, "flow control notice")?;
        Ok(Self { state })
    }
}
