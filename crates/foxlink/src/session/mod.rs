// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session core.
//!
//! A [`Session`] owns one connection and the tables layered on it:
//! - directory of advertised channels and services
//! - pending resolution table for names not advertised yet
//! - registration multiplexer (one protocol registration per name)
//! - call correlator for services and parameters
//! - codec cache
//!
//! All tables sit behind one mutex. Inbound events are applied in delivery
//! order by a single event task; user callbacks run after the lock is
//! released.

mod correlator;
mod directory;
mod handles;
mod lifecycle;
mod pending;
mod registry;

pub use handles::{Publisher, Subscription};
pub use lifecycle::SessionState;
pub use registry::{HandlerId, MessageHandler};

use crate::codec::{CodecCache, CodecFactory, Encoding, RosCodecFactory};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    self, Channel, CloseInfo, Connection, Parameter, ProtocolClient, RemoteService, ServerEvent,
    ServerInfo, StatusLevel, Transport,
};
use correlator::Correlator;
use directory::Directory;
use lifecycle::Lifecycle;
use parking_lot::{Mutex, MutexGuard};
use pending::{PendingKind, PendingTable, Waiter};
use registry::{Attach, Detached, Registry};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport open and server info received.
    Connected,
    Closed(CloseInfo),
    Error(String),
}

/// Advertised topics and their types, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicList {
    pub topics: Vec<String>,
    pub types: Vec<String>,
}

struct State {
    protocol: ProtocolClient,
    directory: Directory,
    pending: PendingTable,
    registry: Registry,
    correlator: Correlator,
    /// Set by the server info; cleared on close.
    codecs: Option<CodecCache>,
}

impl State {
    fn codecs(&mut self) -> Result<&mut CodecCache> {
        self.codecs.as_mut().ok_or(Error::Closed)
    }
}

struct Inner {
    id: String,
    name: String,
    state: Mutex<State>,
    lifecycle: Lifecycle,
    events: broadcast::Sender<SessionEvent>,
    factory: Arc<dyn CodecFactory>,
    transport: Arc<dyn Transport>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    factory: Arc<dyn CodecFactory>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            factory: Arc::new(RosCodecFactory),
        }
    }
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Replace the default `.msg` codec factory.
    pub fn codec_factory(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Connect over WebSocket. Must be called within a tokio runtime.
    pub fn connect(self) -> Result<Session> {
        self.config.validate()?;
        let connection = protocol::ws::connect(&self.config)?;
        Ok(self.open(connection))
    }

    /// Run a session over an already opened connection.
    pub fn open(self, connection: Connection) -> Session {
        Session::start(self.config, self.factory, connection)
    }
}

/// Client session over one connection. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.inner.lifecycle.state())
            .finish()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Connect to `url` with default settings.
    pub fn connect(url: impl Into<String>) -> Result<Self> {
        Self::builder().url(url).connect()
    }

    fn start(config: SessionConfig, factory: Arc<dyn CodecFactory>, connection: Connection) -> Self {
        let id = Uuid::new_v4().to_string()[..8].to_string();
        let Connection { transport, events } = connection;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Arc::new(Inner {
            id,
            name: config.name,
            state: Mutex::new(State {
                protocol: ProtocolClient::new(Arc::clone(&transport)),
                directory: Directory::default(),
                pending: PendingTable::default(),
                registry: Registry::default(),
                correlator: Correlator::default(),
                codecs: None,
            }),
            lifecycle: Lifecycle::new(),
            events: event_tx,
            factory,
            transport,
            event_task: Mutex::new(None),
        });

        let task = tokio::spawn(run_events(Arc::downgrade(&inner), events));
        *inner.event_task.lock() = Some(task);
        info!("[{}] Session '{}' started", inner.id, inner.name);

        Self { inner }
    }

    /// Short identifier used in log lines.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    /// Subscribe to connection notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the transport is open and the server info arrived.
    ///
    /// If the transport closes before that, this never completes.
    pub async fn ready(&self) -> Result<()> {
        self.inner.lifecycle.wait_ready().await
    }

    /// Message encoding chosen from the server info.
    pub async fn encoding(&self) -> Result<Encoding> {
        self.ready().await?;
        Ok(self.inner.lock_checked()?.codecs()?.encoding())
    }

    pub fn topics(&self) -> Result<TopicList> {
        let state = self.inner.lock_open()?;
        let (topics, types) = state.directory.topics().into_iter().unzip();
        Ok(TopicList { topics, types })
    }

    pub fn services(&self) -> Result<Vec<String>> {
        let state = self.inner.lock_open()?;
        Ok(state
            .directory
            .services()
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    pub fn topic_type(&self, topic: &str) -> Result<Option<String>> {
        let state = self.inner.lock_open()?;
        Ok(state
            .directory
            .channel_by_name(topic)
            .map(|c| c.schema_name.clone()))
    }

    pub fn service_type(&self, service: &str) -> Result<Option<String>> {
        let state = self.inner.lock_open()?;
        Ok(state
            .directory
            .service_by_name(service)
            .map(|s| s.service_type.clone()))
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Waits for the topic to be advertised. Subscribers on the same topic
    /// share one protocol subscription.
    pub async fn create_subscription<F>(&self, topic: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.ready().await?;
        let handler: MessageHandler = Arc::new(handler);
        // Held past the lock so a rejected attach never drops the handler
        // while the session is locked.
        let held = Arc::clone(&handler);
        let (handler_id, waiter) = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let channel = state.directory.channel_by_name(topic);
            let (handler_id, attach) = state.registry.attach_subscriber(
                &mut state.protocol,
                topic,
                channel,
                handler,
            )?;
            let waiter = match attach {
                Attach::Bound => None,
                Attach::Deferred => {
                    let (tx, rx) = oneshot::channel();
                    state
                        .pending
                        .defer(PendingKind::Subscribe, topic, Waiter::Channel(tx));
                    Some(rx)
                }
            };
            (handler_id, waiter)
        };
        drop(held);

        // Dropping this (including on cancellation) detaches the handler.
        let subscription = Subscription::new(self.clone(), topic, handler_id);
        if let Some(rx) = waiter {
            debug!("[{}] Waiting for topic '{}'", self.inner.id, topic);
            rx.await.map_err(|_| Error::Closed)??;
        }
        Ok(subscription)
    }

    /// Advertise `topic` with `message_type`.
    ///
    /// Waits until the server advertises the topic back, since messages are
    /// encoded with the server's schema.
    pub async fn create_publisher(&self, topic: &str, message_type: &str) -> Result<Publisher> {
        self.ready().await?;
        let (publisher_id, waiter) = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let encoding = state.codecs()?.encoding();
            let channel = state.directory.channel_by_name(topic);
            let (publisher_id, attach) = state.registry.attach_publisher(
                &mut state.protocol,
                topic,
                message_type,
                encoding.as_str(),
                channel,
            )?;
            let waiter = match attach {
                Attach::Bound => None,
                Attach::Deferred => {
                    let (tx, rx) = oneshot::channel();
                    state
                        .pending
                        .defer(PendingKind::Publish, topic, Waiter::Channel(tx));
                    Some(rx)
                }
            };
            (publisher_id, waiter)
        };

        // Dropping this (including on cancellation) releases the advertisement.
        let publisher = Publisher::new(self.clone(), topic, message_type, publisher_id);
        if let Some(rx) = waiter {
            debug!("[{}] Waiting for topic '{}'", self.inner.id, topic);
            rx.await.map_err(|_| Error::Closed)??;
        }
        Ok(publisher)
    }

    /// Call `service` and wait for its response.
    ///
    /// Waits for the service to be advertised. There is no timeout; wrap the
    /// call in `tokio::time::timeout` if needed.
    pub async fn send_service_request(&self, service: &str, request: &Value) -> Result<Value> {
        self.ready().await?;
        let known = {
            let mut state = self.inner.lock_checked()?;
            match state.directory.service_by_name(service) {
                Some(remote) => Ok(remote),
                None => {
                    let (tx, rx) = oneshot::channel();
                    state
                        .pending
                        .defer(PendingKind::Call, service, Waiter::Service(tx));
                    Err(rx)
                }
            }
        };
        let remote: Arc<RemoteService> = match known {
            Ok(remote) => remote,
            Err(rx) => {
                debug!("[{}] Waiting for service '{}'", self.inner.id, service);
                rx.await.map_err(|_| Error::Closed)??
            }
        };

        let (writer, reader, encoding) = {
            let mut state = self.inner.lock_checked()?;
            let codecs = state.codecs()?;
            (
                codecs.writer(remote.request_source())?,
                codecs.reader(remote.response_source())?,
                codecs.encoding(),
            )
        };
        let data = writer.write_message(request)?;

        let rx = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let (call_id, rx) = state.correlator.begin_call(remote.id, &remote.name, reader)?;
            if let Err(e) = state.protocol.send_service_call_request(
                remote.id,
                call_id,
                encoding.as_str(),
                data,
            ) {
                state.correlator.abandon_call(remote.id, call_id);
                return Err(e.into());
            }
            debug!(
                "[{}] Calling '{}' (service {}, call {})",
                self.inner.id, remote.name, remote.id, call_id
            );
            rx
        };
        rx.await.map_err(|_| Error::Closed)?
    }

    pub async fn get_parameter(&self, name: &str) -> Result<Value> {
        self.ready().await?;
        let rx = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let (id, rx) = state.correlator.begin_param(name);
            if let Err(e) = state
                .protocol
                .get_parameters(vec![name.to_string()], id.clone())
            {
                state.correlator.abandon_param(&id);
                return Err(e.into());
            }
            rx
        };
        Ok(rx.await.map_err(|_| Error::Closed)??.value)
    }

    /// Set a parameter, returning the value the server echoes back.
    pub async fn set_parameter(&self, name: &str, value: Value) -> Result<Parameter> {
        self.ready().await?;
        let rx = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let (id, rx) = state.correlator.begin_param(name);
            if let Err(e) = state
                .protocol
                .set_parameters(vec![Parameter::new(name, value)], id.clone())
            {
                state.correlator.abandon_param(&id);
                return Err(e.into());
            }
            rx
        };
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Logical subscribers attached to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.state.lock().registry.subscriber_count(topic)
    }

    /// Live publisher handles sharing the advertisement of `topic`.
    pub fn publisher_count(&self, topic: &str) -> usize {
        self.inner.state.lock().registry.publisher_count(topic)
    }

    /// (service calls, parameter requests) awaiting a response.
    pub fn outstanding_requests(&self) -> (usize, usize) {
        self.inner.state.lock().correlator.outstanding()
    }

    /// Close the transport and drop all session state. Idempotent.
    ///
    /// Everything still waiting on this session fails with `Error::Closed`.
    pub fn close(&self) {
        if !self.inner.lifecycle.mark_closed() {
            return;
        }
        let (waiters, registry) = {
            let mut state = self.inner.state.lock();
            state.correlator.close_all();
            let registry = std::mem::take(&mut state.registry);
            state.directory.clear();
            state.codecs = None;
            state.protocol.close();
            (state.pending.drain(), registry)
        };
        for waiter in waiters {
            waiter.close();
        }
        // Subscriber handlers are dropped here, outside the lock.
        drop(registry);
        if let Some(task) = self.inner.event_task.lock().take() {
            task.abort();
        }
        info!("[{}] Session closed", self.inner.id);
        let _ = self
            .inner
            .events
            .send(SessionEvent::Closed(CloseInfo::local()));
    }

    pub(crate) fn publish(&self, topic: &str, message: &Value) -> Result<()> {
        let (publisher_id, writer) = {
            let mut guard = self.inner.lock_checked()?;
            let state = &mut *guard;
            let (publisher_id, channel) = state.registry.publisher_channel(topic)?;
            let writer = state.codecs()?.writer(channel.schema_source())?;
            (publisher_id, writer)
        };
        let data = writer.write_message(message)?;
        let state = self.inner.lock_checked()?;
        state.protocol.send_message(publisher_id, data)?;
        Ok(())
    }

    pub(crate) fn detach_subscriber(&self, topic: &str, handler_id: HandlerId) -> Result<()> {
        let detached = {
            let mut guard = self.inner.state.lock();
            if self.inner.lifecycle.is_closed() {
                return Ok(());
            }
            let state = &mut *guard;
            let detached = state
                .registry
                .detach_subscriber(&state.protocol, topic, handler_id);
            state.pending.prune(PendingKind::Subscribe, topic);
            detached
        };
        // Handlers may own publishers or subscriptions; drop them unlocked.
        let Detached {
            last,
            released,
            result,
        } = detached;
        drop(released);
        if last && result.is_ok() {
            debug!("[{}] Last subscriber left '{}'", self.inner.id, topic);
        }
        result
    }

    pub(crate) fn detach_publisher(&self, topic: &str) -> Result<()> {
        let mut guard = self.inner.state.lock();
        if self.inner.lifecycle.is_closed() {
            return Ok(());
        }
        let state = &mut *guard;
        let result = state.registry.detach_publisher(&state.protocol, topic);
        state.pending.prune(PendingKind::Publish, topic);
        if let Ok(true) = result {
            debug!("[{}] Unadvertised '{}'", self.inner.id, topic);
        }
        result.map(|_| ())
    }
}

impl Inner {
    /// Lock for an operation: fails fast once closed or disconnected.
    fn lock_checked(&self) -> Result<MutexGuard<'_, State>> {
        let guard = self.state.lock();
        self.lifecycle.check()?;
        Ok(guard)
    }

    /// Lock for a read: fails only once closed.
    fn lock_open(&self) -> Result<MutexGuard<'_, State>> {
        let guard = self.state.lock();
        if self.lifecycle.is_closed() {
            return Err(Error::Closed);
        }
        Ok(guard)
    }

    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Open => {
                debug!("[{}] Transport open", self.id);
                if self.lifecycle.mark_open() {
                    self.on_ready();
                }
            }
            ServerEvent::ServerInfo(info) => self.on_server_info(info),
            ServerEvent::Status { level, message } => match level {
                StatusLevel::Info => info!("[{}] Server status: {}", self.id, message),
                StatusLevel::Warning => warn!("[{}] Server status: {}", self.id, message),
                StatusLevel::Error => error!("[{}] Server status: {}", self.id, message),
            },
            ServerEvent::Advertise(channels) => self.on_advertise(channels),
            ServerEvent::Unadvertise(ids) => self.on_unadvertise(&ids),
            ServerEvent::AdvertiseServices(services) => self.on_advertise_services(services),
            ServerEvent::UnadvertiseServices(ids) => self.on_unadvertise_services(&ids),
            ServerEvent::Message {
                subscription_id,
                data,
                ..
            } => self.on_message(subscription_id, &data),
            ServerEvent::ServiceCallResponse {
                service_id,
                call_id,
                data,
                ..
            } => {
                let call = self.state.lock().correlator.take_call(service_id, call_id);
                match call {
                    Some(call) => call.resolve(&data),
                    None => debug!(
                        "[{}] Dropping unmatched response (service {}, call {})",
                        self.id, service_id, call_id
                    ),
                }
            }
            ServerEvent::ServiceCallFailure {
                service_id,
                call_id,
                message,
            } => {
                let call = self.state.lock().correlator.take_call(service_id, call_id);
                match call {
                    Some(call) => call.fail(message),
                    None => debug!(
                        "[{}] Dropping unmatched failure (service {}, call {}): {}",
                        self.id, service_id, call_id, message
                    ),
                }
            }
            ServerEvent::ParameterValues { id, parameters } => {
                let matched = self
                    .state
                    .lock()
                    .correlator
                    .complete_param(id.as_deref(), parameters);
                if !matched {
                    debug!("[{}] Dropping unmatched parameter values {:?}", self.id, id);
                }
            }
            ServerEvent::Close(info) => self.transport_closed(info),
            ServerEvent::Error(message) => {
                warn!("[{}] Transport error: {}", self.id, message);
                let _ = self.events.send(SessionEvent::Error(message));
            }
        }
    }

    fn on_ready(&self) {
        info!("[{}] Session ready", self.id);
        let _ = self.events.send(SessionEvent::Connected);
    }

    fn on_server_info(&self, info: ServerInfo) {
        {
            let Ok(mut state) = self.lock_open() else {
                return;
            };
            if state.codecs.is_some() {
                debug!("[{}] Ignoring repeated server info", self.id);
                return;
            }
            let encoding = Encoding::from_supported(&info.supported_encodings);
            info!(
                "[{}] Server '{}' (capabilities: {:?}, encoding: {})",
                self.id, info.name, info.capabilities, encoding
            );
            state.codecs = Some(CodecCache::new(Arc::clone(&self.factory), encoding));
        }
        if self.lifecycle.mark_server_info() {
            self.on_ready();
        }
    }

    fn on_advertise(&self, channels: Vec<Channel>) {
        let mut released = Vec::new();
        {
            let Ok(mut guard) = self.lock_open() else {
                return;
            };
            let state = &mut *guard;
            for channel in channels {
                debug!(
                    "[{}] Channel {} advertised: {} ({})",
                    self.id, channel.id, channel.topic, channel.schema_name
                );
                let (channel, displaced) = state.directory.upsert_channel(channel);
                if let Some(displaced) = displaced {
                    debug!(
                        "[{}] Channel {} reused for '{}', dropping '{}'",
                        self.id, channel.id, channel.topic, displaced.topic
                    );
                    state.registry.channel_removed(&displaced);
                }
                if let Err(e) = state
                    .registry
                    .channel_advertised(&mut state.protocol, &channel)
                {
                    warn!("[{}] Failed to bind '{}': {}", self.id, channel.topic, e);
                }
                for waiter in state.pending.take_for_channel(&channel) {
                    released.push((waiter, Arc::clone(&channel)));
                }
            }
        }
        for (waiter, channel) in released {
            pending::release_channel(waiter, &channel);
        }
    }

    fn on_unadvertise(&self, ids: &[u32]) {
        let Ok(mut guard) = self.lock_open() else {
            return;
        };
        let state = &mut *guard;
        for id in ids {
            if let Some(channel) = state.directory.remove_channel(*id) {
                debug!(
                    "[{}] Channel {} unadvertised: {}",
                    self.id, channel.id, channel.topic
                );
                state.registry.channel_removed(&channel);
            }
        }
    }

    fn on_advertise_services(&self, services: Vec<RemoteService>) {
        let mut released = Vec::new();
        {
            let Ok(mut guard) = self.lock_open() else {
                return;
            };
            let state = &mut *guard;
            for service in services {
                debug!(
                    "[{}] Service {} advertised: {} ({})",
                    self.id, service.id, service.name, service.service_type
                );
                let service = state.directory.upsert_service(service);
                for waiter in state.pending.take_for_service(&service.name) {
                    released.push((waiter, Arc::clone(&service)));
                }
            }
        }
        for (waiter, service) in released {
            pending::release_service(waiter, &service);
        }
    }

    fn on_unadvertise_services(&self, ids: &[u32]) {
        let Ok(mut state) = self.lock_open() else {
            return;
        };
        for id in ids {
            if let Some(service) = state.directory.remove_service(*id) {
                debug!(
                    "[{}] Service {} unadvertised: {}",
                    self.id, service.id, service.name
                );
            }
        }
    }

    fn on_message(&self, subscription_id: u32, data: &[u8]) {
        let (channel, handlers, reader) = {
            let Ok(mut guard) = self.lock_open() else {
                return;
            };
            let state = &mut *guard;
            let Some((channel, handlers)) = state.registry.dispatch_target(subscription_id) else {
                debug!(
                    "[{}] Dropping message for unknown subscription {}",
                    self.id, subscription_id
                );
                return;
            };
            let reader = state
                .codecs()
                .and_then(|codecs| codecs.reader(channel.schema_source()).map_err(Error::from));
            (channel, handlers, reader)
        };

        let message = match reader.and_then(|r| r.read_message(data).map_err(Error::from)) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "[{}] Failed to decode message on '{}': {}",
                    self.id, channel.topic, e
                );
                return;
            }
        };
        for handler in handlers {
            handler(message.clone());
        }
    }

    fn transport_closed(&self, info: CloseInfo) {
        if self.lifecycle.is_closed() {
            return;
        }
        if self.lifecycle.mark_transport_lost() {
            warn!(
                "[{}] Connection lost ({}: {})",
                self.id, info.code, info.reason
            );
        } else {
            warn!(
                "[{}] Connection closed before the session became ready ({}: {})",
                self.id, info.code, info.reason
            );
        }
        let _ = self.events.send(SessionEvent::Closed(info));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.transport.close();
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_events(session: Weak<Inner>, mut events: mpsc::Receiver<ServerEvent>) {
    let mut closed = false;
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        closed |= matches!(event, ServerEvent::Close(_));
        if !inner.lifecycle.is_closed() {
            inner.handle_event(event);
        }
    }
    if !closed {
        if let Some(inner) = session.upgrade() {
            inner.transport_closed(CloseInfo::abnormal("event stream ended"));
        }
    }
}
