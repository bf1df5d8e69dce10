//! User callback surface.

use bytes::Bytes;

use crate::handle::Handle;
use crate::membership::{MemberAddress, MembershipChange};
use crate::protocol::messages::GroupName;

/// Callbacks invoked from [`dispatch`](crate::GroupClient::dispatch).
///
/// All methods default to no-ops so implementors only override what they
/// care about. Callbacks run on the task that called `dispatch`, with no
/// library lock held, so they may call back into the client. A session
/// dispatched from several tasks at once may run callbacks concurrently.
pub trait GroupEvents: Send + Sync {
    /// A multicast payload arrived for a group this session joined.
    fn deliver(
        &self,
        handle: Handle,
        group: &GroupName,
        node_id: u32,
        process_id: u32,
        payload: &Bytes,
    ) {
        let _ = (handle, group, node_id, process_id, payload);
    }

    /// The membership of a tracked group changed.
    fn membership_changed(&self, handle: Handle, group: &GroupName, change: &MembershipChange) {
        let _ = (handle, group, change);
    }

    /// One entry of a groups enumeration requested via
    /// [`groups_get`](crate::GroupClient::groups_get).
    ///
    /// `index` runs from zero to `total - 1`; the entry with
    /// `index == total - 1` is the last.
    fn groups_listed(
        &self,
        handle: Handle,
        group: &GroupName,
        members: &[MemberAddress],
        index: u32,
        total: u32,
    ) {
        let _ = (handle, group, members, index, total);
    }
}
