//! Relay connection
//!
//! [`VerseConnection`] joins one relay room. A single driver task owns the
//! [`Negotiator`], both peer sessions and the RPC engine; everything that
//! happens elsewhere (relay notifications, `join` responses, peer state
//! callbacks, `close()`) reaches it as a message on its queue, so negotiation
//! steps never run concurrently.

use super::negotiator::{Action, NegotiationEvent, Negotiator};
use super::protocol::{
    AnswerParams, JoinParams, JoinResult, OfferParams, SessionDescription, SessionRole,
    TrickleParams, METHOD_ANSWER, METHOD_JOIN, METHOD_OFFER, METHOD_TRICKLE,
};
use crate::config::VerseConfig;
use crate::media::MediaSinks;
use crate::peer::{
    PeerEvent, PeerSession, PeerSessionFactory, WebRtcSessionFactory, PUBLISH_DATA_CHANNEL,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use passage_core::channel::{Channel, WebSocketChannel, CLOSE_NORMAL};
use passage_core::events::{EventBus, GlobalEvent};
use passage_core::rpc::{EmptyHandler, JsonRpc, RpcResponse};
use passage_core::{ConnectionState, ConnectionStatus, Delegate};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

enum LinkState {
    Idle,
    /// Socket handshake in flight
    Opening,
    Running(mpsc::UnboundedSender<NegotiationEvent>),
    Closed,
}

/// One publish/subscribe pair negotiated with the media relay
pub struct VerseConnection {
    uid: String,
    factory: Arc<dyn PeerSessionFactory>,
    join_timeout: Duration,
    status: Arc<ConnectionStatus>,
    on_video_ready: Arc<Delegate<()>>,
    link: Mutex<LinkState>,
}

impl VerseConnection {
    pub fn new(factory: Arc<dyn PeerSessionFactory>, join_timeout: Duration) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            factory,
            join_timeout,
            status: Arc::new(ConnectionStatus::new()),
            on_video_ready: Arc::new(Delegate::new()),
            link: Mutex::new(LinkState::Idle),
        }
    }

    /// Connection backed by webrtc-rs sessions delivering into `sinks`
    pub fn from_config(config: &VerseConfig, sinks: MediaSinks) -> Self {
        let factory = WebRtcSessionFactory::new(config.clone(), sinks);
        Self::new(Arc::new(factory), config.join_timeout())
    }

    /// Identifier sent as `uid` in `join` and `answer`
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Fires when the subscribe session starts receiving video
    pub fn on_video_ready(&self) -> &Delegate<()> {
        &self.on_video_ready
    }

    /// Open a WebSocket to the relay and negotiate `channel_name`
    ///
    /// Status is `Connecting` while the handshake runs and `Failed` if it
    /// does not complete.
    pub async fn connect(&self, url: &str, channel_name: &str) -> Result<()> {
        self.begin()?;
        info!("Connecting to relay '{}' with sid '{}'", url, channel_name);
        self.status.set_status(ConnectionState::Connecting);

        let (events, queue) = mpsc::unbounded_channel();
        let socket = Arc::new(WebSocketChannel::new(url));

        let closed_events = events.clone();
        socket.on_closed().add(move |(code, reason)| {
            let _ = closed_events.send(NegotiationEvent::ChannelClosed(format!("{} {}", code, reason)));
        });
        let failed_events = events.clone();
        socket.on_error().add(move |e| {
            warn!("Relay socket error: {}", e);
            let _ = failed_events.send(NegotiationEvent::ChannelFailed(e.clone()));
        });

        if let Err(e) = socket.open().await {
            let still_opening = {
                let mut link = self.link.lock();
                let opening = matches!(*link, LinkState::Opening);
                if opening {
                    *link = LinkState::Idle;
                }
                opening
            };
            // A close() during the handshake already settled the status
            if still_opening {
                self.status.set_status(ConnectionState::Failed);
            }
            return Err(Error::SignalingError(format!("Failed to open relay channel: {}", e)));
        }

        self.start(socket, channel_name, events, queue)
    }

    /// Negotiate `channel_name` over an already open channel
    pub fn connect_over(&self, channel: Arc<dyn Channel>, channel_name: &str) -> Result<()> {
        self.begin()?;
        debug!("Negotiating sid '{}' over a supplied channel", channel_name);
        self.status.set_status(ConnectionState::Connecting);

        let (events, queue) = mpsc::unbounded_channel();
        self.start(channel, channel_name, events, queue)
    }

    /// Tear down the RPC engine, channel and both sessions
    ///
    /// Safe to call any number of times; status ends at `Closed`.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.link.lock(), LinkState::Closed);
        match previous {
            LinkState::Running(events) => {
                if events.send(NegotiationEvent::Close).is_err() {
                    self.status.set_status(ConnectionState::Closed);
                }
            }
            LinkState::Idle | LinkState::Opening => {
                self.status.set_status(ConnectionState::Closed);
            }
            LinkState::Closed => {}
        }
    }

    fn begin(&self) -> Result<()> {
        let mut link = self.link.lock();
        match *link {
            LinkState::Idle => {
                *link = LinkState::Opening;
                Ok(())
            }
            LinkState::Closed => Err(Error::SignalingError("Connection is closed".to_string())),
            _ => Err(Error::SignalingError("Already connected".to_string())),
        }
    }

    fn start(
        &self,
        channel: Arc<dyn Channel>,
        channel_name: &str,
        events: mpsc::UnboundedSender<NegotiationEvent>,
        queue: mpsc::UnboundedReceiver<NegotiationEvent>,
    ) -> Result<()> {
        {
            let mut link = self.link.lock();
            if !matches!(*link, LinkState::Opening) {
                drop(link);
                channel.close(CLOSE_NORMAL, "Connection closed while opening");
                return Err(Error::SignalingError("Closed while connecting".to_string()));
            }
            *link = LinkState::Running(events.clone());
        }

        let rpc = JsonRpc::new(Arc::clone(&channel), Arc::new(EmptyHandler));
        let notify_events = events.clone();
        rpc.on_notify()
            .add(move |(method, params)| route_notification(&notify_events, method, params));

        let setup = DriverSetup {
            factory: Arc::clone(&self.factory),
            rpc,
            channel,
            sid: channel_name.to_string(),
            uid: self.uid.clone(),
            join_timeout: self.join_timeout,
            status: Arc::clone(&self.status),
            on_video_ready: Arc::clone(&self.on_video_ready),
            events: events.clone(),
        };
        tokio::spawn(setup.run(queue));

        let _ = events.send(NegotiationEvent::ChannelOpened);
        Ok(())
    }
}

impl Drop for VerseConnection {
    fn drop(&mut self) {
        let running = matches!(*self.link.lock(), LinkState::Running(_));
        if running {
            self.close();
        }
    }
}

/// Turn a relay notification into a negotiation event
fn route_notification(
    events: &mpsc::UnboundedSender<NegotiationEvent>,
    method: &str,
    params: &Value,
) {
    let event = match method {
        METHOD_OFFER => serde_json::from_value::<OfferParams>(params.clone())
            .map(|p| NegotiationEvent::SubscribeOffer(SessionDescription::offer(p.sdp))),
        METHOD_TRICKLE => serde_json::from_value::<TrickleParams>(params.clone())
            .map(|p| NegotiationEvent::Trickle(p.target, p.candidate)),
        other => {
            debug!("Ignoring relay notification '{}'", other);
            return;
        }
    };

    match event {
        Ok(event) => {
            let _ = events.send(event);
        }
        Err(e) => error!("Malformed '{}' params: {}", method, e),
    }
}

struct DriverSetup {
    factory: Arc<dyn PeerSessionFactory>,
    rpc: JsonRpc,
    channel: Arc<dyn Channel>,
    sid: String,
    uid: String,
    join_timeout: Duration,
    status: Arc<ConnectionStatus>,
    on_video_ready: Arc<Delegate<()>>,
    events: mpsc::UnboundedSender<NegotiationEvent>,
}

impl DriverSetup {
    async fn run(self, queue: mpsc::UnboundedReceiver<NegotiationEvent>) {
        let (peer_events, peer_queue) = mpsc::unbounded_channel();

        let sessions = match self.create_sessions(peer_events).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Failed to create peer sessions: {}", e);
                self.rpc.close();
                self.channel.close(CLOSE_NORMAL, "Client failed to start");
                self.status.set_status(ConnectionState::Failed);
                return;
            }
        };

        let driver = Driver {
            negotiator: Negotiator::new(),
            publish: sessions.0,
            subscribe: sessions.1,
            setup: self,
        };
        driver.run(queue, peer_queue).await;
    }

    async fn create_sessions(
        &self,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(Arc<dyn PeerSession>, Arc<dyn PeerSession>)> {
        let publish = self
            .factory
            .create(SessionRole::Publish, peer_events.clone())
            .await?;
        let subscribe = self
            .factory
            .create(SessionRole::Subscribe, peer_events)
            .await?;
        Ok((publish, subscribe))
    }
}

struct Driver {
    negotiator: Negotiator,
    publish: Arc<dyn PeerSession>,
    subscribe: Arc<dyn PeerSession>,
    setup: DriverSetup,
}

impl Driver {
    async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<NegotiationEvent>,
        mut peer_queue: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        loop {
            let event = tokio::select! {
                Some(event) = queue.recv() => event,
                Some(peer) = peer_queue.recv() => match peer {
                    PeerEvent::StateChanged(role, state) => NegotiationEvent::PeerStateChanged(role, state),
                    PeerEvent::TrackAdded(role, kind) => NegotiationEvent::TrackAdded(role, kind),
                },
                else => break,
            };

            self.dispatch(event).await;
            if self.negotiator.is_closed() {
                break;
            }
        }
        debug!("Relay driver for sid '{}' stopped", self.setup.sid);
    }

    async fn dispatch(&mut self, event: NegotiationEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for action in self.negotiator.handle(event) {
                if let Some(outcome) = self.perform(action).await {
                    pending.push_back(outcome);
                }
            }
        }
    }

    fn session(&self, role: SessionRole) -> &Arc<dyn PeerSession> {
        match role {
            SessionRole::Publish => &self.publish,
            SessionRole::Subscribe => &self.subscribe,
        }
    }

    async fn perform(&mut self, action: Action) -> Option<NegotiationEvent> {
        match action {
            Action::CreatePublishOffer => Some(match publish_offer(&self.publish).await {
                Ok(offer) => NegotiationEvent::OfferCreated(offer),
                Err(e) => NegotiationEvent::OperationFailed(SessionRole::Publish, e.to_string()),
            }),
            Action::SetLocalDescription(role, desc) => {
                let session = self.session(role);
                Some(match session.set_local_description(desc.clone()).await {
                    Ok(()) => {
                        let applied = session.local_description().await.unwrap_or(desc);
                        NegotiationEvent::LocalDescriptionSet(role, applied)
                    }
                    Err(e) => NegotiationEvent::OperationFailed(role, e.to_string()),
                })
            }
            Action::SetRemoteDescription(role, desc) => {
                Some(match self.session(role).set_remote_description(desc).await {
                    Ok(()) => NegotiationEvent::RemoteDescriptionSet(role),
                    Err(e) => NegotiationEvent::OperationFailed(role, e.to_string()),
                })
            }
            Action::CreateAnswer => Some(match self.subscribe.create_answer().await {
                Ok(answer) => NegotiationEvent::AnswerCreated(answer),
                Err(e) => NegotiationEvent::OperationFailed(SessionRole::Subscribe, e.to_string()),
            }),
            Action::SendJoin(offer) => {
                self.send_join(offer);
                None
            }
            Action::SendAnswer(desc) => {
                self.send_answer(desc);
                None
            }
            Action::AddIceCandidate(role, candidate) => {
                if let Err(e) = self.session(role).add_ice_candidate(candidate).await {
                    warn!("Dropping {} candidate: {}", role, e);
                }
                None
            }
            Action::SetStatus(state) => {
                self.setup.status.set_status(state);
                None
            }
            Action::VideoReady => {
                info!("Video ready for sid '{}'", self.setup.sid);
                self.setup.on_video_ready.broadcast(&());
                EventBus::broadcast_global(GlobalEvent::VideoChatReady);
                None
            }
            Action::Teardown => {
                self.teardown().await;
                None
            }
        }
    }

    /// Call `join`; the response comes back through the queue
    fn send_join(&self, offer: SessionDescription) {
        let params = JoinParams {
            sid: self.setup.sid.clone(),
            uid: self.setup.uid.clone(),
            offer,
        };
        let events = self.setup.events.clone();

        let params = match serde_json::to_value(&params) {
            Ok(params) => params,
            Err(e) => {
                let _ = events.send(NegotiationEvent::JoinFailed(e.to_string()));
                return;
            }
        };

        debug!("Sending join for sid '{}'", self.setup.sid);
        let response = self.setup.rpc.call(METHOD_JOIN, params);
        let timeout = self.setup.join_timeout;

        tokio::spawn(async move {
            let event = match response.wait(timeout).await {
                Ok(RpcResponse::Success(result)) => {
                    match serde_json::from_value::<JoinResult>(result) {
                        Ok(JoinResult { sdp }) => {
                            NegotiationEvent::JoinAnswered(SessionDescription::answer(sdp))
                        }
                        Err(_) => NegotiationEvent::JoinFailed(
                            "no sdp field in join response".to_string(),
                        ),
                    }
                }
                Ok(RpcResponse::Failure(error)) => NegotiationEvent::JoinFailed(format!(
                    "relay answered {}: {}",
                    error.code, error.message
                )),
                Err(e) => NegotiationEvent::JoinFailed(e.to_string()),
            };
            let _ = events.send(event);
        });
    }

    fn send_answer(&self, desc: SessionDescription) {
        let params = AnswerParams {
            sid: self.setup.sid.clone(),
            uid: self.setup.uid.clone(),
            desc,
        };
        let sent = serde_json::to_value(&params)
            .map_err(Error::from)
            .and_then(|params| {
                self.setup
                    .rpc
                    .notify(METHOD_ANSWER, params)
                    .map_err(Error::from)
            });
        if let Err(e) = sent {
            error!("Failed to send subscribe answer: {}", e);
        }
    }

    async fn teardown(&self) {
        info!("Closing relay connection for sid '{}'", self.setup.sid);
        self.setup.rpc.close();
        self.setup.channel.close(CLOSE_NORMAL, "Client is disconnecting");
        for session in [&self.publish, &self.subscribe] {
            if let Err(e) = session.close().await {
                warn!("Failed to close {} session: {}", session.role(), e);
            }
        }
    }
}

async fn publish_offer(session: &Arc<dyn PeerSession>) -> Result<SessionDescription> {
    session.create_data_channel(PUBLISH_DATA_CHANNEL).await?;
    session.create_offer().await
}
