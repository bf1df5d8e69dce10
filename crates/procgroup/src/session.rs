//! Session lifecycle and the request/reply engine.
//!
//! A session is two Unix-socket connections to the daemon. The response
//! connection carries strictly alternating request/reply traffic and is
//! guarded by an async mutex, so every request sees its own reply. The
//! dispatch connection is read only by the session's reader task, which
//! feeds the event queue drained by [`GroupClient::dispatch`].

use std::any::Any;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::dispatch::{CloseReason, DispatchMode, EventQueue, Pop, run_reader};
use crate::error::{Error, Result, check_status};
use crate::events::GroupEvents;
use crate::handle::{Handle, HandleRef, OnLastRelease, Registry};
use crate::membership::{FlowControlState, MemberAddress};
use crate::protocol::framing::{Frame, FrameCodec};
use crate::protocol::messages::{
    ConfChgEvent, ConnectRequest, ConnectionRole, DaemonStatus, DeliverEvent, FlowControlEvent,
    GroupName, GroupRequest, GroupsGetResponse, GroupsResultEvent, Guarantee, LocalGetResponse,
    MAX_MESSAGE_SIZE, McastRequest, McastResponse, MembershipGetResponse, MembershipRequest,
    MessageId, SERVICE_CPG, StatusResponse,
};
use crate::protocol::{PROTOCOL_VERSION, ProtocolError};

type Transport = Framed<UnixStream, FrameCodec>;

// Flow-control snapshot encoding for the atomic.
const FLOW_UNKNOWN: u8 = 0;
const FLOW_DISABLED: u8 = 1;
const FLOW_ENABLED: u8 = 2;

/// Per-session state shared between callers, the reader task, and the
/// registry.
pub(crate) struct Session {
    response: Mutex<Transport>,
    queue: Arc<EventQueue>,
    /// Serializes queue pops across concurrent dispatchers.
    dispatch_lock: Mutex<()>,
    events: Arc<dyn GroupEvents>,
    context: StdMutex<Option<Arc<dyn Any + Send + Sync>>>,
    finalized: AtomicBool,
    flow: AtomicU8,
    cancel: CancellationToken,
    dispatch_fd: RawFd,
}

impl Session {
    fn set_flow(&self, state: FlowControlState) {
        let encoded = match state {
            FlowControlState::Disabled => FLOW_DISABLED,
            FlowControlState::Enabled => FLOW_ENABLED,
        };
        // Advisory value, last write wins; relaxed is enough.
        self.flow.store(encoded, Ordering::Relaxed);
    }

    fn flow_state(&self) -> Option<FlowControlState> {
        match self.flow.load(Ordering::Relaxed) {
            FLOW_DISABLED => Some(FlowControlState::Disabled),
            FLOW_ENABLED => Some(FlowControlState::Enabled),
            _ => None,
        }
    }

    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }
}

impl OnLastRelease for Session {
    fn on_last_release(&self) {
        // Stops the reader task; the queue close wakes any parked
        // dispatcher. Idempotent, so racing with finalize is harmless.
        self.cancel.cancel();
    }
}

/// Sends one request and waits for its reply on the response connection.
///
/// The caller holds the response lock, so the next inbound frame is
/// necessarily the reply to this request. A reply with a different message
/// id means the daemon and client have lost framing agreement, which is
/// fatal to the request.
async fn round_trip(framed: &mut Transport, id: MessageId, payload: Bytes) -> Result<Bytes> {
    framed.send(Frame::new(id.id(), payload)).await?;
    let frame = match framed.next().await {
        Some(frame) => frame?,
        None => return Err(Error::ConnectionClosed),
    };
    if frame.id != id.id() {
        return Err(ProtocolError::UnexpectedReply {
            expected: id.id(),
            got: frame.id,
        }
        .into());
    }
    Ok(frame.payload)
}

async fn negotiate(framed: &mut Transport, role: ConnectionRole) -> Result<()> {
    let request = ConnectRequest {
        service: SERVICE_CPG,
        role,
        version: PROTOCOL_VERSION,
    };
    let payload = round_trip(framed, MessageId::Connect, request.encode()).await?;
    let reply = StatusResponse::decode(payload)?;
    check_status(reply.status)
}

/// Client for the closed-process-group daemon.
///
/// One client can carry many independent sessions; each
/// [`initialize`](Self::initialize) call opens a fresh daemon connection
/// pair and returns a [`Handle`] that names it until
/// [`finalize`](Self::finalize).
pub struct GroupClient {
    registry: Registry<Session>,
    config: ClientConfig,
}

impl GroupClient {
    /// Client using the default socket path resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Client using explicit connection settings.
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
        }
    }

    /// Opens a new session: connects both daemon connections, negotiates the
    /// service on each, and starts the session's reader task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TryAgain`] when the daemon socket is absent or
    /// refusing connections, [`Error::Daemon`] when the daemon rejects the
    /// negotiation, or an I/O / protocol error from the exchange itself.
    pub async fn initialize(&self, events: Arc<dyn GroupEvents>) -> Result<Handle> {
        let path = &self.config.socket_path;
        let response_stream = UnixStream::connect(path)
            .await
            .map_err(Error::from_connect_io)?;
        let dispatch_stream = UnixStream::connect(path)
            .await
            .map_err(Error::from_connect_io)?;
        let dispatch_fd = dispatch_stream.as_raw_fd();

        let mut response = Framed::new(response_stream, FrameCodec::new());
        negotiate(&mut response, ConnectionRole::Response).await?;
        let mut dispatch = Framed::new(dispatch_stream, FrameCodec::new());
        negotiate(&mut dispatch, ConnectionRole::Dispatch).await?;

        let queue = EventQueue::new();
        let cancel = CancellationToken::new();
        let session = Arc::new(Session {
            response: Mutex::new(response),
            queue: Arc::clone(&queue),
            dispatch_lock: Mutex::new(()),
            events,
            context: StdMutex::new(None),
            finalized: AtomicBool::new(false),
            flow: AtomicU8::new(FLOW_UNKNOWN),
            cancel: cancel.clone(),
            dispatch_fd,
        });

        let handle = self.registry.create(session);
        tokio::spawn(run_reader(dispatch, queue, cancel));

        info!(handle = handle.raw(), "session initialized");
        Ok(handle)
    }

    /// Closes a session.
    ///
    /// Idempotency is strict: the first call wins, every later call (and
    /// every other operation on the handle) fails with
    /// [`Error::BadHandle`]. The reader task is cancelled and the response
    /// connection is shut down; a dispatcher blocked on the session wakes
    /// and returns cleanly.
    pub async fn finalize(&self, handle: Handle) -> Result<()> {
        let session = self.registry.get(handle)?;
        {
            let mut framed = session.response.lock().await;
            // The flag is flipped under the response lock so finalize
            // cannot interleave with an in-flight request on the same
            // session.
            if session.finalized.swap(true, Ordering::SeqCst) {
                return Err(Error::BadHandle);
            }
            self.registry.destroy(handle)?;
            session.cancel.cancel();
            // The daemon treats the shutdown as an implicit leave of every
            // joined group; nothing to say on the wire first.
            let _ = framed.get_mut().shutdown().await;
        }
        info!(handle = handle.raw(), "session finalized");
        Ok(())
    }

    /// Joins a group and starts membership tracking for it.
    ///
    /// Tracking is subscribed before the join in one response-lock section,
    /// so the confirming membership change (which lists this process in
    /// `joined`) is never missed.
    pub async fn join(&self, handle: Handle, group: &GroupName) -> Result<()> {
        let session = self.get_live(handle)?;
        let mut framed = session.response.lock().await;

        let track = GroupRequest { group: *group };
        let payload = round_trip(&mut framed, MessageId::TrackStart, track.encode()).await?;
        check_status(StatusResponse::decode(payload)?.status)?;

        let join = MembershipRequest {
            group: *group,
            process_id: std::process::id(),
        };
        let payload = round_trip(&mut framed, MessageId::Join, join.encode()).await?;
        check_status(StatusResponse::decode(payload)?.status)?;

        info!(%group, "joined group");
        Ok(())
    }

    /// Leaves a group.
    pub async fn leave(&self, handle: Handle, group: &GroupName) -> Result<()> {
        let session = self.get_live(handle)?;
        let mut framed = session.response.lock().await;

        let request = MembershipRequest {
            group: *group,
            process_id: std::process::id(),
        };
        let payload = round_trip(&mut framed, MessageId::Leave, request.encode()).await?;
        check_status(StatusResponse::decode(payload)?.status)?;

        info!(%group, "left group");
        Ok(())
    }

    /// Multicasts a payload, gathered from `parts` in order, to all current
    /// members of every group this session has joined.
    ///
    /// The flow-control snapshot reported by
    /// [`flow_control_state`](Self::flow_control_state) is refreshed from
    /// the reply, but only when the daemon accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooBig`] when the total payload exceeds
    /// [`MAX_MESSAGE_SIZE`], before anything is sent.
    pub async fn mcast(&self, handle: Handle, guarantee: Guarantee, parts: &[&[u8]]) -> Result<()> {
        let size: usize = parts.iter().map(|part| part.len()).sum();
        if size > MAX_MESSAGE_SIZE {
            return Err(Error::TooBig { size });
        }

        let session = self.get_live(handle)?;
        let request = McastRequest::encode_parts(guarantee, parts)?;

        let mut framed = session.response.lock().await;
        let payload = round_trip(&mut framed, MessageId::Mcast, request).await?;
        let reply = McastResponse::decode(payload)?;
        if reply.status == DaemonStatus::Ok {
            session.set_flow(reply.flow_control);
        }
        check_status(reply.status)
    }

    /// Fetches the current member list of a group.
    ///
    /// A group nobody has joined yet is not an error; the list is simply
    /// empty.
    pub async fn membership_get(
        &self,
        handle: Handle,
        group: &GroupName,
    ) -> Result<Vec<MemberAddress>> {
        let session = self.get_live(handle)?;
        let mut framed = session.response.lock().await;

        let request = GroupRequest { group: *group };
        let payload = round_trip(&mut framed, MessageId::MembershipGet, request.encode()).await?;
        let reply = MembershipGetResponse::decode(payload)?;
        check_status(reply.status)?;
        Ok(reply.members)
    }

    /// Returns the node id of the local node.
    pub async fn local_get(&self, handle: Handle) -> Result<u32> {
        let session = self.get_live(handle)?;
        let mut framed = session.response.lock().await;

        let payload = round_trip(&mut framed, MessageId::LocalGet, Bytes::new()).await?;
        let reply = LocalGetResponse::decode(payload)?;
        check_status(reply.status)?;
        Ok(reply.node_id)
    }

    /// Starts a groups enumeration and returns how many groups the daemon
    /// will report.
    ///
    /// The entries themselves arrive asynchronously through
    /// [`GroupEvents::groups_listed`] as the session is dispatched.
    pub async fn groups_get(&self, handle: Handle) -> Result<u32> {
        let session = self.get_live(handle)?;
        let mut framed = session.response.lock().await;

        let payload = round_trip(&mut framed, MessageId::GroupsGet, Bytes::new()).await?;
        let reply = GroupsGetResponse::decode(payload)?;
        check_status(reply.status)?;
        Ok(reply.group_count)
    }

    /// Last flow-control state reported by the daemon, or `None` if no
    /// reply or delivery has carried one yet.
    pub fn flow_control_state(&self, handle: Handle) -> Result<Option<FlowControlState>> {
        let session = self.get_live(handle)?;
        Ok(session.flow_state())
    }

    /// Raw file descriptor of the dispatch connection, for callers that
    /// integrate with an external poll loop.
    ///
    /// The descriptor stays owned by the session; it becomes invalid at
    /// finalize.
    pub fn fd_get(&self, handle: Handle) -> Result<RawFd> {
        let session = self.get_live(handle)?;
        Ok(session.dispatch_fd)
    }

    /// Attaches an opaque context value to the session, replacing any
    /// previous one.
    pub fn context_set(&self, handle: Handle, context: Arc<dyn Any + Send + Sync>) -> Result<()> {
        let session = self.get_live(handle)?;
        *session
            .context
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(context);
        Ok(())
    }

    /// Returns the session's context value, if one was set.
    pub fn context_get(&self, handle: Handle) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let session = self.get_live(handle)?;
        let context = session
            .context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(context)
    }

    /// Pulls queued events and runs the session's callbacks.
    ///
    /// `One` waits for a single callback-bearing event; `All` drains what is
    /// already queued and returns; `Blocking` keeps dispatching until the
    /// session ends. Flow-control notices refresh the snapshot without
    /// invoking a callback and do not satisfy `One`.
    ///
    /// A session finalized concurrently makes `dispatch` return `Ok(())`;
    /// a dispatch connection dropped by the daemon is
    /// [`Error::ConnectionClosed`].
    pub async fn dispatch(&self, handle: Handle, mode: DispatchMode) -> Result<()> {
        let session = self.registry.get(handle)?;

        loop {
            if session.is_finalized() {
                return Ok(());
            }
            // The lock covers only the pop itself. Waiting for the next
            // event and running callbacks both happen with no library lock
            // held, so a parked dispatcher never blocks another one and
            // callbacks are free to call back into the client. The wakeup
            // is armed before the pop so a frame landing right after an
            // empty pop is not missed.
            let notified = session.queue.notified();
            let popped = {
                let _serial = session.dispatch_lock.lock().await;
                session.queue.try_pop()
            };
            match popped {
                Pop::Empty => match mode {
                    DispatchMode::All => return Ok(()),
                    DispatchMode::One | DispatchMode::Blocking => notified.await,
                },
                Pop::Closed(CloseReason::Finalized) => return Ok(()),
                Pop::Closed(CloseReason::Disconnected) => return Err(Error::ConnectionClosed),
                Pop::Closed(CloseReason::Io(message)) => {
                    return Err(Error::Io(std::io::Error::other(message)));
                }
                Pop::Item(frame) => {
                    let counted = dispatch_event(handle, &session, frame)?;
                    if counted && mode == DispatchMode::One {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn get_live(&self, handle: Handle) -> Result<HandleRef<'_, Session>> {
        let session = self.registry.get(handle)?;
        if session.is_finalized() {
            return Err(Error::BadHandle);
        }
        Ok(session)
    }
}

impl Default for GroupClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes one dispatch frame and runs the matching callback.
///
/// Returns whether the event counts toward [`DispatchMode::One`]. Any frame
/// that fails to decode, or that has no business on the dispatch connection,
/// aborts the dispatch call with a protocol error.
fn dispatch_event(handle: Handle, session: &Session, frame: Frame) -> Result<bool> {
    match MessageId::from_id(frame.id) {
        Some(MessageId::Deliver) => {
            let event = DeliverEvent::decode(frame.payload)?;
            session.set_flow(event.flow_control);
            session.events.deliver(
                handle,
                &event.group,
                event.node_id,
                event.process_id,
                &event.payload,
            );
            Ok(true)
        }
        Some(MessageId::ConfChg) => {
            let event = ConfChgEvent::decode(frame.payload)?;
            debug!(
                group = %event.group,
                members = event.change.members.len(),
                joined = event.change.joined.len(),
                left = event.change.left.len(),
                "membership changed"
            );
            session
                .events
                .membership_changed(handle, &event.group, &event.change);
            Ok(true)
        }
        Some(MessageId::GroupsResult) => {
            let event = GroupsResultEvent::decode(frame.payload)?;
            session.events.groups_listed(
                handle,
                &event.group,
                &event.members,
                event.index,
                event.total,
            );
            Ok(true)
        }
        Some(MessageId::FlowControl) => {
            let event = FlowControlEvent::decode(frame.payload)?;
            debug!(state = ?event.state, "flow control state changed");
            session.set_flow(event.state);
            Ok(false)
        }
        Some(other) => Err(ProtocolError::invalid(format!(
            "request message id {} on dispatch connection",
            other.id()
        ))
        .into()),
        None => Err(ProtocolError::UnknownMessage { id: frame.id }.into()),
    }
}
