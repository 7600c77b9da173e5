//! The owning session object.
//!
//! [`RemoteSession`] binds a [`SessionEngine`] to a transport and a [`Role`].
//! It decodes inbound envelopes into events, drives the negotiation reply and
//! the key-exchange handshake, and exposes the user commands. The engine
//! itself never decodes bytes; everything wire-shaped happens here.
//!
//! # Handshake
//!
//! ```text
//! Client                                   Server
//!   │ connect(): CreateSession,              │ connect(): NegotiationPending
//!   │            NegotiationSending          │
//!   │ ───────────── CAPABILITY ───────────>  │ NegotiationReceived -> Established
//!   │ <──────────── CAPABILITY ────────────  │
//!   │ NegotiationReceived -> Established     │
//!   │ <──────────── KEY_REQUEST ───────────  │ KeyRequested      (require_key_exchange)
//!   │ ───────────── PUBLIC_KEY ───────────>  │ KeyReceived
//!   │ KeySent                                │
//!   │ <──────────── PUBLIC_KEY ────────────  │ KeySent
//!   │ KeyReceived -> KeyExchanged            │ -> KeyExchanged
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::crypto::{KeyExchange, PublicKey, SessionKey, SESSION_KEY_CONTEXT};
use crate::engine::{SessionEngine, TimerService};
use crate::error::{RemotingError, Result};
use crate::protocol::{
    CapabilityDescriptor, EnvelopePayload, SessionEnvelope, SessionEvent, SessionEventKind,
    SessionState, StateInfo,
};
use crate::transport::SessionTransport;

/// Which end of the connection this session is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the session and sends its capability first
    Client,
    /// Waits for the client's capability and answers it
    Server,
}

#[derive(Debug, Default)]
struct KeyState {
    exchange: KeyExchange,
    sent: bool,
}

/// A remote session over one transport
pub struct RemoteSession {
    role: Role,
    engine: SessionEngine,
    transport: Arc<dyn SessionTransport>,
    keys: Mutex<KeyState>,
    require_key_exchange: bool,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("role", &self.role)
            .field("engine", &self.engine)
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    /// Create a session using tokio timers (needs a runtime)
    pub fn new(role: Role, transport: Arc<dyn SessionTransport>, config: &Config) -> Result<Self> {
        Self::build(role, transport, config, None)
    }

    /// Create a session with an explicit timer service
    pub fn with_timers(
        role: Role,
        transport: Arc<dyn SessionTransport>,
        config: &Config,
        timers: Arc<dyn TimerService>,
    ) -> Result<Self> {
        Self::build(role, transport, config, Some(timers))
    }

    fn build(
        role: Role,
        transport: Arc<dyn SessionTransport>,
        config: &Config,
        timers: Option<Arc<dyn TimerService>>,
    ) -> Result<Self> {
        let mut builder = SessionEngine::builder()
            .config(config)?
            .transport(Arc::clone(&transport));
        if let Some(timers) = timers {
            builder = builder.timers(timers);
        }

        Ok(Self {
            role,
            engine: builder.build()?,
            transport,
            keys: Mutex::new(KeyState::default()),
            require_key_exchange: config.session.require_key_exchange,
        })
    }

    /// Role of this end
    pub fn role(&self) -> Role {
        self.role
    }

    /// Session ID
    pub fn id(&self) -> &str {
        self.engine.id()
    }

    /// Underlying state machine
    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    /// Open the session.
    ///
    /// A client starts connecting and sends its capability; a server starts
    /// waiting for the client's capability.
    pub fn connect(&self) -> Result<StateInfo> {
        match self.role {
            Role::Client => {
                self.engine.submit(SessionEventKind::CreateSession)?;
                self.engine.submit(SessionEventKind::NegotiationSending)
            },
            Role::Server => self.engine.submit(SessionEventKind::NegotiationPending),
        }
    }

    /// Open the session against a session the server already hosts.
    ///
    /// Same handshake as [`connect`](Self::connect); a server waits the same
    /// way for either.
    pub fn connect_existing(&self) -> Result<StateInfo> {
        match self.role {
            Role::Client => {
                self.engine.submit(SessionEventKind::ConnectSession)?;
                self.engine.submit(SessionEventKind::NegotiationSendingOnConnect)
            },
            Role::Server => self.engine.submit(SessionEventKind::NegotiationPending),
        }
    }

    /// Decode and apply one inbound envelope
    pub fn handle_inbound(&self, bytes: &[u8]) -> Result<StateInfo> {
        let envelope = match SessionEnvelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(session = %self.id(), %err, "undecodable inbound envelope");
                return self
                    .engine
                    .submit(SessionEvent::failed(SessionEventKind::ReceiveFailed, err.to_string()));
            },
        };

        tracing::trace!(session = %self.id(), kind = envelope.payload.name(), "inbound envelope");

        match envelope.payload {
            EnvelopePayload::Capability(remote) => self.on_capability(remote),
            EnvelopePayload::KeyRequest => self.on_key_request(),
            EnvelopePayload::PublicKey(ref key) => self.on_public_key(key),
            EnvelopePayload::Data(_) => self.engine.submit(SessionEvent::with_payload(
                SessionEventKind::MessageReceived,
                envelope,
            )),
            EnvelopePayload::Failure(reason) => self
                .engine
                .submit(SessionEvent::with_reason(SessionEventKind::FatalError, reason)),
            EnvelopePayload::Close => {
                if self.state() != SessionState::ClosingConnection {
                    self.engine.submit(SessionEventKind::Close)?;
                }
                self.engine.submit(SessionEventKind::CloseCompleted)
            },
        }
    }

    /// Apply inbound bytes until the channel ends or the session closes
    pub async fn serve(&self, mut inbound: UnboundedReceiver<Bytes>) {
        while let Some(bytes) = inbound.recv().await {
            match self.handle_inbound(&bytes) {
                Ok(info) if info.state.is_terminal() => break,
                Ok(_) => {},
                Err(err) if err.is_recoverable() => {
                    tracing::debug!(session = %self.id(), %err, "inbound event refused");
                },
                Err(err) => {
                    tracing::error!(session = %self.id(), %err, "inbound processing failed");
                    break;
                },
            }
        }
    }

    /// Send application data
    pub fn send_data(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(RemotingError::SessionClosed);
        }
        if !state.is_established() {
            return Err(RemotingError::InvalidEvent(format!(
                "cannot send data in {state}"
            )));
        }

        self.send(SessionEnvelope::data(data)).map_err(|err| {
            let _ = self
                .engine
                .submit(SessionEvent::failed(SessionEventKind::SendFailed, err.to_string()));
            err
        })
    }

    /// Client side: send our public key unprompted
    pub fn start_key_exchange(&self) -> Result<StateInfo> {
        let mut keys = self.keys();
        *keys = KeyState::default();
        self.send_public_key(&mut keys)
    }

    /// Server side: ask the client for its public key
    pub fn request_key_exchange(&self) -> Result<StateInfo> {
        let mut keys = self.keys();
        *keys = KeyState::default();
        match self.send(SessionEnvelope::key_request()) {
            Ok(()) => self.engine.submit(SessionEventKind::KeyRequested),
            Err(err) => self
                .engine
                .submit(SessionEvent::failed(SessionEventKind::KeyRequestFailed, err.to_string())),
        }
    }

    /// Session key agreed by the exchange
    pub fn session_key(&self) -> Result<SessionKey> {
        Ok(self.keys().exchange.derive_session_key(SESSION_KEY_CONTEXT)?)
    }

    /// User-requested disconnect
    pub fn disconnect(&self) -> Result<StateInfo> {
        self.engine.submit(SessionEventKind::DisconnectStart)?;
        self.engine.submit(SessionEventKind::DisconnectCompleted)
    }

    /// The transport dropped underneath the session
    pub fn connection_lost(&self) -> Result<StateInfo> {
        self.engine.submit(SessionEventKind::RCDisconnectStarted)
    }

    /// Reconnect after a disconnect or a transport drop.
    ///
    /// A session that lost its transport mid-negotiation resumes at
    /// `Connected` and sends its capability again. One that lost it
    /// mid-exchange resumes at `Established`; a server that requires key
    /// exchange then asks for the client's key again.
    pub fn reconnect(&self) -> Result<StateInfo> {
        self.engine.submit(SessionEventKind::ReconnectStart)?;
        let info = self.engine.submit(SessionEventKind::ReconnectCompleted)?;
        match info.state {
            SessionState::Connected => self.engine.submit(SessionEventKind::NegotiationSending),
            SessionState::Established => {
                self.reset_keys();
                if self.role == Role::Server && self.require_key_exchange {
                    tracing::debug!(session = %self.id(), "restarting interrupted key exchange");
                    return self.request_key_exchange();
                }
                Ok(info)
            },
            _ => Ok(info),
        }
    }

    /// Close the session, telling the peer
    pub fn close(&self) -> Result<StateInfo> {
        if self.state().is_terminal() {
            return Err(RemotingError::SessionClosed);
        }

        self.engine.submit(SessionEventKind::Close)?;
        match self.send(SessionEnvelope::close()) {
            Ok(()) => self.engine.submit(SessionEventKind::CloseCompleted),
            Err(err) => self
                .engine
                .submit(SessionEvent::failed(SessionEventKind::CloseFailed, err.to_string())),
        }
    }

    fn on_capability(&self, remote: CapabilityDescriptor) -> Result<StateInfo> {
        let previous = self.state();
        let info = self.engine.submit(SessionEvent::negotiation_received(remote))?;

        if info.state.is_terminal() {
            if let Some(reason) = &info.reason {
                // Best effort; the session is already closed
                let _ = self.send(SessionEnvelope::failure(reason.clone()));
            }
            return Ok(info);
        }

        if self.role == Role::Server
            && previous == SessionState::NegotiationPending
            && info.state == SessionState::Established
        {
            if let Err(err) = self.send(SessionEnvelope::capability(self.engine.local_capability())) {
                return self
                    .engine
                    .submit(SessionEvent::failed(SessionEventKind::SendFailed, err.to_string()));
            }
            if self.require_key_exchange {
                return self.request_key_exchange();
            }
        }

        Ok(info)
    }

    fn on_key_request(&self) -> Result<StateInfo> {
        self.start_key_exchange()
    }

    fn on_public_key(&self, bytes: &[u8]) -> Result<StateInfo> {
        let peer = match PublicKey::from_slice(bytes) {
            Ok(peer) => peer,
            Err(err) => {
                return self.engine.submit(SessionEvent::failed(
                    SessionEventKind::KeyReceiveFailed,
                    err.to_string(),
                ))
            },
        };

        // Held until our own key is recorded as sent, so a reply racing our
        // send sees the exchange in progress
        let mut keys = self.keys();
        let fresh = self.state() == SessionState::Established;
        let info = self.engine.submit(SessionEventKind::KeyReceived)?;

        if fresh {
            // Peer started the exchange
            *keys = KeyState::default();
        }
        keys.exchange.set_peer_public(peer);
        let info = if keys.sent {
            info
        } else {
            self.send_public_key(&mut keys)?
        };
        drop(keys);

        if info.state == SessionState::EstablishedAndKeyExchanged {
            tracing::info!(session = %self.id(), "session key agreed");
        }
        Ok(info)
    }

    fn send_public_key(&self, keys: &mut KeyState) -> Result<StateInfo> {
        keys.sent = true;
        let public = *keys.exchange.public_key();

        match self.send(SessionEnvelope::public_key(public.as_bytes())) {
            Ok(()) => self.engine.submit(SessionEventKind::KeySent),
            Err(err) => self
                .engine
                .submit(SessionEvent::failed(SessionEventKind::KeySendFailed, err.to_string())),
        }
    }

    fn send(&self, envelope: SessionEnvelope) -> Result<()> {
        let bytes = envelope.with_session(self.id()).to_bytes()?;
        self.transport.send_bytes(&bytes)
    }

    fn reset_keys(&self) {
        *self.keys() = KeyState::default();
    }

    fn keys(&self) -> MutexGuard<'_, KeyState> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ManualTimers;
    use crate::protocol::{FailureCategory, FeatureFlags};
    use crate::transport::{channel_pair, ChannelEndpoint, ChannelTransport};

    struct Side {
        session: RemoteSession,
        link: Arc<ChannelTransport>,
        inbound: UnboundedReceiver<Bytes>,
    }

    fn side(role: Role, endpoint: ChannelEndpoint, config: &Config) -> Side {
        let session = RemoteSession::with_timers(
            role,
            endpoint.transport.clone(),
            config,
            Arc::new(ManualTimers::default()),
        )
        .unwrap();
        Side {
            session,
            link: endpoint.transport,
            inbound: endpoint.inbound,
        }
    }

    fn pair(client_config: &Config, server_config: &Config) -> (Side, Side) {
        let (a, b) = channel_pair();
        (
            side(Role::Client, a, client_config),
            side(Role::Server, b, server_config),
        )
    }

    /// Deliver queued bytes both ways until both queues are empty
    fn pump(client: &mut Side, server: &mut Side) {
        loop {
            let mut moved = false;
            while let Ok(bytes) = server.inbound.try_recv() {
                let _ = server.session.handle_inbound(&bytes);
                moved = true;
            }
            while let Ok(bytes) = client.inbound.try_recv() {
                let _ = client.session.handle_inbound(&bytes);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    fn key_exchange_config() -> Config {
        let mut config = Config::default();
        config.session.require_key_exchange = true;
        config
    }

    #[test]
    fn test_negotiation_reaches_established() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());

        assert_eq!(server.session.connect().unwrap().state, SessionState::NegotiationPending);
        assert_eq!(client.session.connect().unwrap().state, SessionState::NegotiationSent);
        pump(&mut client, &mut server);

        assert_eq!(client.session.state(), SessionState::Established);
        assert_eq!(server.session.state(), SessionState::Established);
        assert!(client.session.engine().capability().is_some());
    }

    #[test]
    fn test_server_requests_key() {
        let (mut client, mut server) = pair(&Config::default(), &key_exchange_config());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);

        assert_eq!(client.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(server.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(
            client.session.session_key().unwrap(),
            server.session.session_key().unwrap()
        );
    }

    #[test]
    fn test_client_started_key_exchange() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);

        assert_eq!(
            client.session.start_key_exchange().unwrap().state,
            SessionState::EstablishedAndKeySent
        );
        pump(&mut client, &mut server);

        assert_eq!(client.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(server.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(
            client.session.session_key().unwrap(),
            server.session.session_key().unwrap()
        );
    }

    #[test]
    fn test_required_feature_missing_closes_both() {
        let mut strict = Config::default();
        strict.capability.required_features = vec!["compression".to_string()];
        let mut bare = Config::default();
        bare.capability.features = vec!["key_exchange".to_string()];

        let (mut client, mut server) = pair(&bare, &strict);
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);

        let info = server.session.engine().current_state();
        assert_eq!(info.state, SessionState::Closed);
        assert_eq!(info.reason.unwrap().category, FailureCategory::Negotiation);

        // Client learns through the failure envelope
        let info = client.session.engine().current_state();
        assert_eq!(info.state, SessionState::Closed);
        assert!(info.reason.unwrap().message.contains("compression"));
    }

    #[test]
    fn test_data_delivery() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);

        let mut sub = server.session.engine().subscribe();
        client.session.send_data(b"Get-Date".to_vec()).unwrap();
        pump(&mut client, &mut server);

        let notifications = sub.drain();
        let change = notifications[0].as_state_change().unwrap();
        assert_eq!(change.event, SessionEventKind::MessageReceived);
        assert_eq!(
            change.payload.as_ref().and_then(SessionEnvelope::get_data),
            Some(&b"Get-Date"[..])
        );
    }

    #[test]
    fn test_send_data_before_established() {
        let (client, _server) = pair(&Config::default(), &Config::default());
        assert!(matches!(
            client.session.send_data(b"early".to_vec()),
            Err(RemotingError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_garbage_inbound_fails_receive() {
        let (client, _server) = pair(&Config::default(), &Config::default());
        client.session.connect().unwrap();

        let info = client.session.handle_inbound(b"not json").unwrap();
        assert_eq!(info.state, SessionState::Closed);
        assert_eq!(info.reason.unwrap().category, FailureCategory::Transport);
    }

    #[test]
    fn test_short_public_key_fails_key_receive() {
        let (client, _server) = pair(&Config::default(), &Config::default());
        client.session.engine().submit(SessionEventKind::NegotiationPending).unwrap();
        client
            .session
            .engine()
            .submit(SessionEvent::negotiation_received(
                client.session.engine().local_capability(),
            ))
            .unwrap();

        let bytes = SessionEnvelope::public_key(&[1, 2, 3]).to_bytes().unwrap();
        let info = client.session.handle_inbound(&bytes).unwrap();
        assert_eq!(info.state, SessionState::Closed);
        assert_eq!(info.reason.unwrap().category, FailureCategory::KeyExchange);
    }

    #[test]
    fn test_severed_link_fails_negotiation_send() {
        let (client, _server) = pair(&Config::default(), &Config::default());
        client.link.sever();

        let info = client.session.connect().unwrap();
        assert_eq!(info.state, SessionState::Closed);
        assert!(info.reason.unwrap().message.contains("severed"));
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let (mut client, mut server) = pair(&Config::default(), &key_exchange_config());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);
        let negotiated = client.session.engine().capability();

        assert_eq!(client.session.disconnect().unwrap().state, SessionState::Disconnected);
        assert_eq!(
            client.session.reconnect().unwrap().state,
            SessionState::EstablishedAndKeyExchanged
        );
        assert_eq!(client.session.engine().capability(), negotiated);
    }

    #[test]
    fn test_transport_drop_mid_negotiation_renegotiates() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        // Capability lost in flight
        while server.inbound.try_recv().is_ok() {}

        client.link.sever();
        assert_eq!(
            client.session.connection_lost().unwrap().state,
            SessionState::RCDisconnecting
        );
        client.link.restore();

        assert_eq!(client.session.reconnect().unwrap().state, SessionState::NegotiationSent);
        pump(&mut client, &mut server);
        assert_eq!(client.session.state(), SessionState::Established);
        assert_eq!(server.session.state(), SessionState::Established);
    }

    #[test]
    fn test_reconnect_restarts_interrupted_key_exchange() {
        let (mut client, mut server) = pair(&Config::default(), &key_exchange_config());
        server.session.connect().unwrap();
        client.session.connect().unwrap();

        while let Ok(bytes) = server.inbound.try_recv() {
            server.session.handle_inbound(&bytes).unwrap();
        }
        assert_eq!(server.session.state(), SessionState::EstablishedAndKeyRequested);

        // Capability arrives, key request is lost with the transport
        let capability = client.inbound.try_recv().unwrap();
        client.session.handle_inbound(&capability).unwrap();
        while client.inbound.try_recv().is_ok() {}
        assert_eq!(client.session.state(), SessionState::Established);

        server.session.connection_lost().unwrap();
        assert_eq!(
            server.session.reconnect().unwrap().state,
            SessionState::EstablishedAndKeyRequested
        );
        pump(&mut client, &mut server);

        assert_eq!(client.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(server.session.state(), SessionState::EstablishedAndKeyExchanged);
        assert_eq!(
            client.session.session_key().unwrap(),
            server.session.session_key().unwrap()
        );
    }

    #[test]
    fn test_peer_key_during_our_send_keeps_one_key_pair() {
        struct Stalling {
            sent: Mutex<Vec<Vec<u8>>>,
            entered: Mutex<std::sync::mpsc::Sender<()>>,
        }
        impl SessionTransport for Stalling {
            fn send_bytes(&self, payload: &[u8]) -> Result<()> {
                self.sent.lock().unwrap().push(payload.to_vec());
                let _ = self.entered.lock().unwrap().send(());
                std::thread::sleep(std::time::Duration::from_millis(100));
                Ok(())
            }
            fn name(&self) -> &'static str {
                "stalling"
            }
        }

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let link = Arc::new(Stalling {
            sent: Mutex::new(Vec::new()),
            entered: Mutex::new(entered_tx),
        });
        let session = RemoteSession::with_timers(
            Role::Client,
            link.clone(),
            &Config::default(),
            Arc::new(ManualTimers::default()),
        )
        .unwrap();
        session.engine().submit(SessionEventKind::NegotiationPending).unwrap();
        session
            .engine()
            .submit(SessionEvent::negotiation_received(session.engine().local_capability()))
            .unwrap();

        let mut peer = KeyExchange::new();
        let reply = SessionEnvelope::public_key(peer.public_key().as_bytes())
            .to_bytes()
            .unwrap();

        let (started, answered) = std::thread::scope(|scope| {
            let started = scope.spawn(|| session.start_key_exchange());
            // Our key is on the wire when the peer's arrives
            entered_rx.recv().unwrap();
            let answered = scope.spawn(|| session.handle_inbound(&reply));
            (started.join().unwrap(), answered.join().unwrap())
        });

        assert_eq!(started.unwrap().state, SessionState::EstablishedAndKeySent);
        assert_eq!(answered.unwrap().state, SessionState::EstablishedAndKeyExchanged);

        let sent = link.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let ours = SessionEnvelope::from_bytes(&sent[0]).unwrap();
        peer.set_peer_public(PublicKey::from_slice(ours.get_public_key().unwrap()).unwrap());
        assert_eq!(
            session.session_key().unwrap(),
            peer.derive_session_key(SESSION_KEY_CONTEXT).unwrap()
        );
    }

    #[test]
    fn test_refused_public_key_leaves_keys_untouched() {
        let (client, _server) = pair(&Config::default(), &Config::default());
        client.session.engine().submit(SessionEventKind::NegotiationPending).unwrap();

        let peer = KeyExchange::new();
        let bytes = SessionEnvelope::public_key(peer.public_key().as_bytes())
            .to_bytes()
            .unwrap();
        assert!(matches!(
            client.session.handle_inbound(&bytes),
            Err(RemotingError::ProtocolViolation { .. })
        ));
        assert_eq!(client.session.state(), SessionState::NegotiationPending);
        assert!(client.session.session_key().is_err());
    }

    #[test]
    fn test_connect_existing_negotiates() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());
        let mut sub = client.session.engine().subscribe();

        server.session.connect().unwrap();
        assert_eq!(
            client.session.connect_existing().unwrap().state,
            SessionState::NegotiationSent
        );
        pump(&mut client, &mut server);

        assert_eq!(client.session.state(), SessionState::Established);
        assert_eq!(server.session.state(), SessionState::Established);
        let states: Vec<_> = sub
            .drain()
            .iter()
            .filter_map(|n| n.as_state_change().map(|c| c.current.state))
            .collect();
        assert!(states.contains(&SessionState::NegotiationSendingOnConnect));
    }

    #[test]
    fn test_close_notifies_peer() {
        let (mut client, mut server) = pair(&Config::default(), &Config::default());
        server.session.connect().unwrap();
        client.session.connect().unwrap();
        pump(&mut client, &mut server);

        let info = client.session.close().unwrap();
        assert_eq!(info.state, SessionState::Closed);
        assert!(info.reason.is_none());
        pump(&mut client, &mut server);
        assert_eq!(server.session.state(), SessionState::Closed);

        assert!(matches!(client.session.close(), Err(RemotingError::SessionClosed)));
    }

    #[test]
    fn test_close_with_dead_peer_still_closes() {
        let (client, server) = pair(&Config::default(), &Config::default());
        drop(server);

        let info = client.session.close().unwrap();
        assert_eq!(info.state, SessionState::Closed);
        assert_eq!(info.reason.unwrap().category, FailureCategory::Close);
    }

    #[test]
    fn test_capability_carries_configured_features() {
        let mut config = Config::default();
        config.capability.features = vec!["robust_connection".to_string()];
        let (client, _server) = pair(&config, &Config::default());
        let local = client.session.engine().local_capability();
        assert!(local.feature_flags.has(FeatureFlags::ROBUST_CONNECTION));
        assert!(!local.feature_flags.has(FeatureFlags::KEY_EXCHANGE));
    }
}
