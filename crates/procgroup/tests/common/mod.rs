//! In-process fake daemon for exercising the client end to end over real
//! Unix sockets.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use procgroup::membership::{ChangeReason, FlowControlState, MemberAddress, MembershipChange};
use procgroup::protocol::framing::{Frame, FrameCodec};
use procgroup::protocol::messages::{
    ConfChgEvent, ConnectRequest, ConnectionRole, DaemonStatus, DeliverEvent, GroupRequest,
    GroupName, GroupsGetResponse, GroupsResultEvent, LocalGetResponse, McastRequest,
    McastResponse, MembershipGetResponse, MembershipRequest, MessageId, StatusResponse,
};
use procgroup::{ClientConfig, GroupEvents, Handle};

/// Node id the fake daemon reports for itself.
pub const NODE_ID: u32 = 7;

type Transport = Framed<UnixStream, FrameCodec>;

struct DaemonState {
    members: StdMutex<HashMap<GroupName, Vec<MemberAddress>>>,
    last_joined: StdMutex<Option<GroupName>>,
    mcast_script: StdMutex<VecDeque<(DaemonStatus, FlowControlState)>>,
    reject_connects: AtomicBool,
    dispatch: Mutex<Option<Transport>>,
}

impl DaemonState {
    async fn send_dispatch(&self, frame: Frame) {
        // The dispatch connection is stashed by the accept task shortly
        // after the connect reply; wait for it rather than racing it.
        for _ in 0..200 {
            let mut slot = self.dispatch.lock().await;
            if let Some(framed) = slot.as_mut() {
                framed.send(frame.clone()).await.expect("dispatch send");
                return;
            }
            drop(slot);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no dispatch connection established");
    }
}

/// A fake daemon listening on a socket in a fresh temp directory.
pub struct MockDaemon {
    _dir: TempDir,
    socket_path: PathBuf,
    state: Arc<DaemonState>,
}

impl MockDaemon {
    pub async fn start() -> Self {
        init_tracing();
        let dir = TempDir::new().expect("temp dir");
        let socket_path = dir.path().join("procgroup.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind mock socket");

        let state = Arc::new(DaemonState {
            members: StdMutex::new(HashMap::new()),
            last_joined: StdMutex::new(None),
            mcast_script: StdMutex::new(VecDeque::new()),
            reject_connects: AtomicBool::new(false),
            dispatch: Mutex::new(None),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(Arc::clone(&accept_state), stream));
            }
        });

        Self {
            _dir: dir,
            socket_path,
            state,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::with_socket_path(&self.socket_path)
    }

    /// Makes every subsequent connect exchange fail with `TryAgain`.
    pub fn reject_connects(&self) {
        self.state.reject_connects.store(true, Ordering::SeqCst);
    }

    /// Queues the reply to the next multicast request. Unscripted requests
    /// get `(Ok, Enabled)` and an echoed delivery.
    pub fn script_mcast(&self, status: DaemonStatus, flow: FlowControlState) {
        self.state
            .mcast_script
            .lock()
            .unwrap()
            .push_back((status, flow));
    }

    /// Pushes a delivery notification onto the dispatch connection.
    pub async fn send_deliver(&self, group: &GroupName, node_id: u32, process_id: u32, payload: &[u8]) {
        let event = DeliverEvent {
            group: *group,
            node_id,
            process_id,
            flow_control: FlowControlState::Disabled,
            payload: Bytes::copy_from_slice(payload),
        };
        self.state
            .send_dispatch(Frame::new(MessageId::Deliver.id(), event.encode()))
            .await;
    }

    /// Pushes an arbitrary frame onto the dispatch connection.
    pub async fn send_raw(&self, frame: Frame) {
        self.state.send_dispatch(frame).await;
    }

    /// Drops the dispatch connection, as a crashing daemon would.
    pub async fn close_dispatch(&self) {
        let framed = self.state.dispatch.lock().await.take();
        drop(framed);
    }
}

async fn handle_connection(state: Arc<DaemonState>, stream: UnixStream) {
    let mut framed = Framed::new(stream, FrameCodec::new());

    let Some(Ok(frame)) = framed.next().await else {
        return;
    };
    assert_eq!(frame.id, MessageId::Connect.id());
    let connect = ConnectRequest::decode(frame.payload).expect("connect request");

    let status = if state.reject_connects.load(Ordering::SeqCst) {
        DaemonStatus::TryAgain
    } else {
        DaemonStatus::Ok
    };
    let reply = StatusResponse { status };
    framed
        .send(Frame::new(MessageId::Connect.id(), reply.encode()))
        .await
        .expect("connect reply");
    if status != DaemonStatus::Ok {
        return;
    }

    match connect.role {
        ConnectionRole::Dispatch => {
            *state.dispatch.lock().await = Some(framed);
        }
        ConnectionRole::Response => {
            serve_requests(state, framed).await;
        }
    }
}

async fn serve_requests(state: Arc<DaemonState>, mut framed: Transport) {
    while let Some(Ok(frame)) = framed.next().await {
        match MessageId::from_id(frame.id) {
            Some(MessageId::TrackStart) => {
                GroupRequest::decode(frame.payload).expect("track-start request");
                reply_status(&mut framed, MessageId::TrackStart, DaemonStatus::Ok).await;
            }
            Some(MessageId::Join) => {
                let request = MembershipRequest::decode(frame.payload).expect("join request");
                let joined = MemberAddress {
                    node_id: NODE_ID,
                    process_id: request.process_id,
                    reason: ChangeReason::Join,
                };
                let members = {
                    let mut map = state.members.lock().unwrap();
                    let list = map.entry(request.group).or_default();
                    list.push(MemberAddress {
                        reason: ChangeReason::Unspecified,
                        ..joined
                    });
                    list.clone()
                };
                *state.last_joined.lock().unwrap() = Some(request.group);

                // Reply first so the change notification never precedes the
                // join confirmation.
                reply_status(&mut framed, MessageId::Join, DaemonStatus::Ok).await;

                let event = ConfChgEvent {
                    group: request.group,
                    change: MembershipChange {
                        members,
                        left: vec![],
                        joined: vec![joined],
                    },
                };
                state
                    .send_dispatch(Frame::new(MessageId::ConfChg.id(), event.encode()))
                    .await;
            }
            Some(MessageId::Leave) => {
                let request = MembershipRequest::decode(frame.payload).expect("leave request");
                let left = MemberAddress {
                    node_id: NODE_ID,
                    process_id: request.process_id,
                    reason: ChangeReason::Leave,
                };
                let members = {
                    let mut map = state.members.lock().unwrap();
                    let list = map.entry(request.group).or_default();
                    list.retain(|member| member.process_id != request.process_id);
                    list.clone()
                };

                reply_status(&mut framed, MessageId::Leave, DaemonStatus::Ok).await;

                let event = ConfChgEvent {
                    group: request.group,
                    change: MembershipChange {
                        members,
                        left: vec![left],
                        joined: vec![],
                    },
                };
                state
                    .send_dispatch(Frame::new(MessageId::ConfChg.id(), event.encode()))
                    .await;
            }
            Some(MessageId::Mcast) => {
                let request = McastRequest::decode(frame.payload).expect("mcast request");
                let (status, flow) = state
                    .mcast_script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or((DaemonStatus::Ok, FlowControlState::Enabled));

                let reply = McastResponse {
                    status,
                    flow_control: flow,
                };
                framed
                    .send(Frame::new(MessageId::Mcast.id(), reply.encode()))
                    .await
                    .expect("mcast reply");

                // An accepted multicast is echoed back to the sender's own
                // most recently joined group.
                let group = *state.last_joined.lock().unwrap();
                if status == DaemonStatus::Ok {
                    if let Some(group) = group {
                        let event = DeliverEvent {
                            group,
                            node_id: NODE_ID,
                            process_id: 4242,
                            flow_control: flow,
                            payload: request.payload,
                        };
                        state
                            .send_dispatch(Frame::new(MessageId::Deliver.id(), event.encode()))
                            .await;
                    }
                }
            }
            Some(MessageId::MembershipGet) => {
                let request = GroupRequest::decode(frame.payload).expect("membership request");
                let members = state
                    .members
                    .lock()
                    .unwrap()
                    .get(&request.group)
                    .cloned()
                    .unwrap_or_default();
                let reply = MembershipGetResponse {
                    status: DaemonStatus::Ok,
                    members,
                };
                framed
                    .send(Frame::new(MessageId::MembershipGet.id(), reply.encode()))
                    .await
                    .expect("membership reply");
            }
            Some(MessageId::LocalGet) => {
                let reply = LocalGetResponse {
                    status: DaemonStatus::Ok,
                    node_id: NODE_ID,
                };
                framed
                    .send(Frame::new(MessageId::LocalGet.id(), reply.encode()))
                    .await
                    .expect("local-get reply");
            }
            Some(MessageId::GroupsGet) => {
                let snapshot: Vec<(GroupName, Vec<MemberAddress>)> = state
                    .members
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(group, members)| (*group, members.clone()))
                    .collect();
                let total = snapshot.len() as u32;

                let reply = GroupsGetResponse {
                    status: DaemonStatus::Ok,
                    group_count: total,
                };
                framed
                    .send(Frame::new(MessageId::GroupsGet.id(), reply.encode()))
                    .await
                    .expect("groups-get reply");

                for (index, (group, members)) in snapshot.into_iter().enumerate() {
                    let event = GroupsResultEvent {
                        group,
                        index: index as u32,
                        total,
                        members,
                    };
                    state
                        .send_dispatch(Frame::new(MessageId::GroupsResult.id(), event.encode()))
                        .await;
                }
            }
            other => panic!("unexpected request {other:?} on response connection"),
        }
    }
}

async fn reply_status(framed: &mut Transport, id: MessageId, status: DaemonStatus) {
    let reply = StatusResponse { status };
    framed
        .send(Frame::new(id.id(), reply.encode()))
        .await
        .expect("status reply");
}

/// Recorded delivery: group, sender node, sender process, payload.
pub type Delivered = (GroupName, u32, u32, Vec<u8>);

/// Callback recorder used by the integration tests.
#[derive(Default)]
pub struct TestEvents {
    delivered: StdMutex<Vec<Delivered>>,
    changes: StdMutex<Vec<(GroupName, MembershipChange)>>,
    groups: StdMutex<Vec<(GroupName, Vec<MemberAddress>, u32, u32)>>,
}

impl TestEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn changes(&self) -> Vec<(GroupName, MembershipChange)> {
        self.changes.lock().unwrap().clone()
    }

    pub fn groups(&self) -> Vec<(GroupName, Vec<MemberAddress>, u32, u32)> {
        self.groups.lock().unwrap().clone()
    }
}

impl GroupEvents for TestEvents {
    fn deliver(
        &self,
        _handle: Handle,
        group: &GroupName,
        node_id: u32,
        process_id: u32,
        payload: &Bytes,
    ) {
        self.delivered
            .lock()
            .unwrap()
            .push((*group, node_id, process_id, payload.to_vec()));
    }

    fn membership_changed(&self, _handle: Handle, group: &GroupName, change: &MembershipChange) {
        self.changes.lock().unwrap().push((*group, change.clone()));
    }

    fn groups_listed(
        &self,
        _handle: Handle,
        group: &GroupName,
        members: &[MemberAddress],
        index: u32,
        total: u32,
    ) {
        self.groups
            .lock()
            .unwrap()
            .push((*group, members.to_vec(), index, total));
    }
}

/// Gives in-flight frames time to cross the sockets and land in the
/// session's event queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Honors `RUST_LOG` when set; quiet otherwise.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
