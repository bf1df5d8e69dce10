//! Membership change sets and the advisory flow-control state.
//!
//! A configuration-change ("confchg") notification carries the group's full
//! current membership plus the delta that produced it: the members that left
//! and the members that joined. On the wire the three lists are a single flat
//! record array; [`decode_member_records`] is the validated projection that
//! splits it, bounded by [`MAX_GROUP_MEMBERS`] so corrupt counts become a
//! protocol error rather than an overrun.

use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::error::{ProtocolError, ProtocolResult};

/// Maximum number of members in one group.
///
/// This is a protocol-level capacity, not an implementation detail: the
/// daemon never sends a list longer than this, and any frame claiming
/// otherwise is rejected as corrupt.
pub const MAX_GROUP_MEMBERS: usize = 128;

/// Wire size of one member address record.
pub(crate) const MEMBER_RECORD_SIZE: usize = 12;

/// Why a member appears in a membership delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChangeReason {
    /// No reason recorded (steady-state member list entries).
    Unspecified = 0,
    /// The process joined the group.
    Join        = 1,
    /// The process left the group voluntarily.
    Leave       = 2,
    /// The member's node left the cluster.
    NodeDown    = 3,
    /// The member's node rejoined the cluster.
    NodeUp      = 4,
    /// The member process exited without leaving.
    ProcDown    = 5,
}

impl ChangeReason {
    /// Parses a wire value into a reason.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Unspecified),
            1 => Some(Self::Join),
            2 => Some(Self::Leave),
            3 => Some(Self::NodeDown),
            4 => Some(Self::NodeUp),
            5 => Some(Self::ProcDown),
            _ => None,
        }
    }

    /// Returns the wire value for this reason.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }
}

/// One group member: the node it runs on, its process id, and the reason it
/// appears in the list it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberAddress {
    /// Cluster node identifier.
    pub node_id: u32,
    /// Process id on that node.
    pub process_id: u32,
    /// Reason this member appears in its list.
    pub reason: ChangeReason,
}

impl MemberAddress {
    pub(crate) fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_ne(self.node_id);
        buf.put_u32_ne(self.process_id);
        buf.put_u32_ne(self.reason.wire());
    }

    pub(crate) fn get(buf: &mut impl Buf) -> ProtocolResult<Self> {
        if buf.remaining() < MEMBER_RECORD_SIZE {
            return Err(ProtocolError::invalid("truncated member record"));
        }
        let node_id = buf.get_u32_ne();
        let process_id = buf.get_u32_ne();
        let reason_raw = buf.get_u32_ne();
        let reason = ChangeReason::from_wire(reason_raw)
            .ok_or_else(|| ProtocolError::invalid(format!("bad change reason {reason_raw}")))?;
        Ok(Self {
            node_id,
            process_id,
            reason,
        })
    }
}

/// Decodes `count` contiguous member records.
///
/// The count must already have been validated against [`MAX_GROUP_MEMBERS`];
/// this function still checks the buffer has enough bytes for every record.
pub(crate) fn decode_member_records(
    buf: &mut impl Buf,
    count: usize,
) -> ProtocolResult<Vec<MemberAddress>> {
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        members.push(MemberAddress::get(buf)?);
    }
    Ok(members)
}

/// Validates a declared member list length.
pub(crate) fn check_member_count(count: u32) -> ProtocolResult<usize> {
    let count = count as usize;
    if count > MAX_GROUP_MEMBERS {
        return Err(ProtocolError::TooManyMembers {
            count,
            max: MAX_GROUP_MEMBERS,
        });
    }
    Ok(count)
}

/// A decoded membership change: the new steady-state member list plus the
/// delta that produced this notification.
///
/// `left` and `joined` are disjoint; `members` is the membership after the
/// delta has been applied. Instances are transient: decoded fresh from each
/// confchg frame and handed to the membership callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipChange {
    /// Full membership after the change.
    pub members: Vec<MemberAddress>,
    /// Members that departed in this change.
    pub left: Vec<MemberAddress>,
    /// Members that arrived in this change.
    pub joined: Vec<MemberAddress>,
}

/// Advisory flow-control signal returned to multicast callers.
///
/// When `Enabled`, the daemon is asking senders to throttle; nothing stops a
/// caller from sending anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FlowControlState {
    /// No throttling requested.
    Disabled = 0,
    /// The daemon requests that senders back off.
    Enabled  = 1,
}

impl FlowControlState {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabled),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;

    fn member(node_id: u32, process_id: u32, reason: ChangeReason) -> MemberAddress {
        MemberAddress {
            node_id,
            process_id,
            reason,
        }
    }

    #[test]
    fn record_round_trip() {
        let original = member(3, 4242, ChangeReason::Join);
        let mut buf = BytesMut::new();
        original.put(&mut buf);
        assert_eq!(buf.len(), MEMBER_RECORD_SIZE);

        let mut bytes: Bytes = buf.freeze();
        let decoded = MemberAddress::get(&mut bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn truncated_record_rejected() {
        let mut bytes = Bytes::from_static(&[0u8; MEMBER_RECORD_SIZE - 1]);
        let err = MemberAddress::get(&mut bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame { .. }));
    }

    #[test]
    fn bad_reason_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_ne(1);
        buf.put_u32_ne(2);
        buf.put_u32_ne(99);
        let mut bytes = buf.freeze();
        let err = MemberAddress::get(&mut bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame { .. }));
    }

    #[test]
    fn count_above_capacity_rejected() {
        let err = check_member_count(MAX_GROUP_MEMBERS as u32 + 1).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TooManyMembers { count, max }
                if count == MAX_GROUP_MEMBERS + 1 && max == MAX_GROUP_MEMBERS
        ));
    }

    #[test]
    fn count_at_capacity_accepted() {
        assert_eq!(
            check_member_count(MAX_GROUP_MEMBERS as u32).unwrap(),
            MAX_GROUP_MEMBERS
        );
    }

    proptest! {
        #[test]
        fn record_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut bytes = Bytes::from(data);
            let _ = MemberAddress::get(&mut bytes);
        }

        #[test]
        fn record_list_round_trips(
            records in proptest::collection::vec((any::<u32>(), any::<u32>(), 0u32..=5), 0..MAX_GROUP_MEMBERS)
        ) {
            let originals: Vec<MemberAddress> = records
                .iter()
                .map(|&(node_id, process_id, reason)| MemberAddress {
                    node_id,
                    process_id,
                    reason: ChangeReason::from_wire(reason).unwrap(),
                })
                .collect();

            let mut buf = BytesMut::new();
            for record in &originals {
                record.put(&mut buf);
            }

            let mut bytes = buf.freeze();
            let decoded = decode_member_records(&mut bytes, originals.len()).unwrap();
            prop_assert_eq!(decoded, originals);
        }
    }
}
