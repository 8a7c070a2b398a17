//! Publish/subscribe negotiation state machine
//!
//! [`Negotiator`] owns no I/O. Every inbound event (relay notifications,
//! outcomes of peer-session operations, peer state changes) goes through
//! [`Negotiator::handle`], which returns the actions the driver performs in
//! order. Outcomes of those actions come back in as further events.
//!
//! Publish: `ChannelOpened → CreatePublishOffer → SetLocalDescription →
//! SendJoin → SetRemoteDescription → stable`.
//!
//! Subscribe: `offer → SetRemoteDescription → CreateAnswer →
//! SetLocalDescription → SendAnswer → stable`.
//!
//! Trickle candidates for a role are held until that role's remote
//! description is applied, then released in arrival order.

use super::protocol::{IceCandidate, SessionDescription, SessionRole};
use crate::peer::{PeerState, TrackKind};
use passage_core::ConnectionState;
use tracing::{debug, error, info, warn};

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// The signaling channel is open
    ChannelOpened,
    /// The signaling channel went away underneath us
    ChannelClosed(String),
    /// The signaling channel reported a transport error
    ChannelFailed(String),
    /// The publish session produced its offer
    OfferCreated(SessionDescription),
    /// The subscribe session produced its answer
    AnswerCreated(SessionDescription),
    /// A local description is applied; carries the description to send
    LocalDescriptionSet(SessionRole, SessionDescription),
    RemoteDescriptionSet(SessionRole),
    /// The relay answered `join`
    JoinAnswered(SessionDescription),
    JoinFailed(String),
    /// The relay sent an `offer` notify
    SubscribeOffer(SessionDescription),
    /// The relay sent a `trickle` notify
    Trickle(SessionRole, IceCandidate),
    /// A peer-session operation failed
    OperationFailed(SessionRole, String),
    PeerStateChanged(SessionRole, PeerState),
    TrackAdded(SessionRole, TrackKind),
    Close,
}

/// Work for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open the publish data channel and create an offer
    CreatePublishOffer,
    SetLocalDescription(SessionRole, SessionDescription),
    /// Call `join` with the publish offer
    SendJoin(SessionDescription),
    SetRemoteDescription(SessionRole, SessionDescription),
    /// Create the subscribe answer
    CreateAnswer,
    /// Notify `answer` with the subscribe answer
    SendAnswer(SessionDescription),
    AddIceCandidate(SessionRole, IceCandidate),
    SetStatus(ConnectionState),
    /// The subscribe session has a video track
    VideoReady,
    /// Close the RPC engine, the channel and both sessions
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishPhase {
    Idle,
    CreatingOffer,
    SettingLocal,
    Joining,
    SettingRemote,
    Stable,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscribePhase {
    Idle,
    SettingRemote,
    CreatingAnswer,
    SettingLocal,
    Stable,
}

impl SubscribePhase {
    fn accepts_offer(self) -> bool {
        matches!(self, SubscribePhase::Idle | SubscribePhase::Stable)
    }
}

#[derive(Debug, Default)]
struct TrickleQueue {
    remote_set: bool,
    pending: Vec<IceCandidate>,
}

/// Negotiation state for one relay connection
#[derive(Debug)]
pub struct Negotiator {
    publish: PublishPhase,
    subscribe: SubscribePhase,
    trickle: [TrickleQueue; 2],
    /// Subscribe offer that arrived mid-negotiation; latest wins
    held_offer: Option<SessionDescription>,
    closed: bool,
}

impl Negotiator {
    pub fn new() -> Self {
        Self {
            publish: PublishPhase::Idle,
            subscribe: SubscribePhase::Idle,
            trickle: Default::default(),
            held_offer: None,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Candidates waiting for `role`'s remote description
    pub fn queued_candidates(&self, role: SessionRole) -> usize {
        self.trickle[role.index()].pending.len()
    }

    /// True once the publish session has the relay's answer applied
    pub fn is_published(&self) -> bool {
        self.publish == PublishPhase::Stable
    }

    pub fn handle(&mut self, event: NegotiationEvent) -> Vec<Action> {
        if self.closed {
            debug!("Negotiation closed, ignoring {:?}", event);
            return Vec::new();
        }

        match event {
            NegotiationEvent::ChannelOpened => self.on_channel_opened(),
            NegotiationEvent::ChannelClosed(reason) => {
                info!("Signaling channel closed: {}", reason);
                self.close()
            }
            NegotiationEvent::ChannelFailed(reason) => {
                error!("Signaling channel failed: {}", reason);
                self.close_with(ConnectionState::Failed)
            }
            NegotiationEvent::OfferCreated(offer) => self.on_offer_created(offer),
            NegotiationEvent::AnswerCreated(answer) => self.on_answer_created(answer),
            NegotiationEvent::LocalDescriptionSet(role, desc) => self.on_local_set(role, desc),
            NegotiationEvent::RemoteDescriptionSet(role) => self.on_remote_set(role),
            NegotiationEvent::JoinAnswered(answer) => self.on_join_answered(answer),
            NegotiationEvent::JoinFailed(reason) => {
                error!("join failed: {}", reason);
                if self.publish == PublishPhase::Joining {
                    self.publish = PublishPhase::Failed;
                }
                Vec::new()
            }
            NegotiationEvent::SubscribeOffer(offer) => self.on_subscribe_offer(offer),
            NegotiationEvent::Trickle(role, candidate) => self.on_trickle(role, candidate),
            NegotiationEvent::OperationFailed(role, reason) => self.on_operation_failed(role, reason),
            NegotiationEvent::PeerStateChanged(role, state) => self.on_peer_state(role, state),
            NegotiationEvent::TrackAdded(role, kind) => {
                if role == SessionRole::Subscribe && kind == TrackKind::Video {
                    vec![Action::VideoReady]
                } else {
                    Vec::new()
                }
            }
            NegotiationEvent::Close => self.close(),
        }
    }

    fn close(&mut self) -> Vec<Action> {
        self.close_with(ConnectionState::Closed)
    }

    fn close_with(&mut self, state: ConnectionState) -> Vec<Action> {
        self.closed = true;
        self.held_offer = None;
        vec![Action::Teardown, Action::SetStatus(state)]
    }

    fn on_channel_opened(&mut self) -> Vec<Action> {
        if self.publish != PublishPhase::Idle {
            warn!("Channel opened twice, publish negotiation already {:?}", self.publish);
            return Vec::new();
        }
        self.publish = PublishPhase::CreatingOffer;
        vec![Action::CreatePublishOffer]
    }

    fn on_offer_created(&mut self, offer: SessionDescription) -> Vec<Action> {
        if self.publish != PublishPhase::CreatingOffer {
            warn!("Unexpected publish offer in {:?}", self.publish);
            return Vec::new();
        }
        self.publish = PublishPhase::SettingLocal;
        vec![Action::SetLocalDescription(SessionRole::Publish, offer)]
    }

    fn on_answer_created(&mut self, answer: SessionDescription) -> Vec<Action> {
        if self.subscribe != SubscribePhase::CreatingAnswer {
            warn!("Unexpected subscribe answer in {:?}", self.subscribe);
            return Vec::new();
        }
        self.subscribe = SubscribePhase::SettingLocal;
        vec![Action::SetLocalDescription(SessionRole::Subscribe, answer)]
    }

    fn on_local_set(&mut self, role: SessionRole, desc: SessionDescription) -> Vec<Action> {
        match role {
            SessionRole::Publish => {
                if self.publish != PublishPhase::SettingLocal {
                    warn!("Unexpected publish local description in {:?}", self.publish);
                    return Vec::new();
                }
                self.publish = PublishPhase::Joining;
                vec![Action::SendJoin(desc)]
            }
            SessionRole::Subscribe => {
                if self.subscribe != SubscribePhase::SettingLocal {
                    warn!("Unexpected subscribe local description in {:?}", self.subscribe);
                    return Vec::new();
                }
                self.subscribe = SubscribePhase::Stable;
                let mut actions = vec![Action::SendAnswer(desc)];
                actions.extend(self.take_held_offer());
                actions
            }
        }
    }

    fn on_join_answered(&mut self, answer: SessionDescription) -> Vec<Action> {
        if self.publish != PublishPhase::Joining {
            warn!("Ignoring join answer in {:?}", self.publish);
            return Vec::new();
        }
        self.publish = PublishPhase::SettingRemote;
        vec![Action::SetRemoteDescription(SessionRole::Publish, answer)]
    }

    fn on_remote_set(&mut self, role: SessionRole) -> Vec<Action> {
        match role {
            SessionRole::Publish => {
                if self.publish != PublishPhase::SettingRemote {
                    warn!("Unexpected publish remote description in {:?}", self.publish);
                    return Vec::new();
                }
                self.publish = PublishPhase::Stable;
                info!("Publish session negotiated");
                self.release_candidates(role)
            }
            SessionRole::Subscribe => {
                if self.subscribe != SubscribePhase::SettingRemote {
                    warn!("Unexpected subscribe remote description in {:?}", self.subscribe);
                    return Vec::new();
                }
                self.subscribe = SubscribePhase::CreatingAnswer;
                let mut actions = self.release_candidates(role);
                actions.push(Action::CreateAnswer);
                actions
            }
        }
    }

    fn on_subscribe_offer(&mut self, offer: SessionDescription) -> Vec<Action> {
        if !self.subscribe.accepts_offer() {
            if self.held_offer.replace(offer).is_some() {
                debug!("Replacing held subscribe offer with a newer one");
            } else {
                debug!("Holding subscribe offer until {:?} finishes", self.subscribe);
            }
            return Vec::new();
        }
        self.subscribe = SubscribePhase::SettingRemote;
        self.trickle[SessionRole::Subscribe.index()].remote_set = false;
        vec![Action::SetRemoteDescription(SessionRole::Subscribe, offer)]
    }

    fn take_held_offer(&mut self) -> Vec<Action> {
        match self.held_offer.take() {
            Some(offer) => self.on_subscribe_offer(offer),
            None => Vec::new(),
        }
    }

    fn on_trickle(&mut self, role: SessionRole, candidate: IceCandidate) -> Vec<Action> {
        let queue = &mut self.trickle[role.index()];
        if queue.remote_set {
            vec![Action::AddIceCandidate(role, candidate)]
        } else {
            debug!("Queueing {} candidate until remote description is set", role);
            queue.pending.push(candidate);
            Vec::new()
        }
    }

    fn release_candidates(&mut self, role: SessionRole) -> Vec<Action> {
        let queue = &mut self.trickle[role.index()];
        queue.remote_set = true;
        queue
            .pending
            .drain(..)
            .map(|candidate| Action::AddIceCandidate(role, candidate))
            .collect()
    }

    fn on_operation_failed(&mut self, role: SessionRole, reason: String) -> Vec<Action> {
        error!("{} negotiation step failed: {}", role, reason);
        match role {
            SessionRole::Publish => {
                self.publish = PublishPhase::Failed;
                Vec::new()
            }
            SessionRole::Subscribe => {
                self.subscribe = SubscribePhase::Idle;
                self.take_held_offer()
            }
        }
    }

    fn on_peer_state(&mut self, role: SessionRole, state: PeerState) -> Vec<Action> {
        match (role, state) {
            (SessionRole::Subscribe, PeerState::Connected) => {
                vec![Action::SetStatus(ConnectionState::Connected)]
            }
            (SessionRole::Subscribe, PeerState::Failed) => {
                vec![Action::SetStatus(ConnectionState::Failed)]
            }
            _ => {
                debug!("{} session is {:?}", role, state);
                Vec::new()
            }
        }
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}
