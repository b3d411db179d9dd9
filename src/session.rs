//! Session management: connection lifecycle, deferred command queuing,
//! subscription replay, and the command facade.
//!
//! An [`EslSession`] can be used before `connect()` resolves, or before it
//! is called at all. Operations issued while the session is not ready are
//! buffered and replayed in submission order exactly once when the
//! connection comes up; operations issued afterwards execute immediately.
//! Callers never track readiness themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::commands::{
    Endpoint, HoldAction, Originate, ShowTable, SofiaRegistrations, SofiaStatus, UuidHold,
    UuidKill,
};
use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_ESL_PASSWORD,
    DEFAULT_ESL_PORT,
};
use crate::error::{EslError, EslResult};
use crate::event::EslEvent;
use crate::listing::{self, Call, Channel, Profile, UserListing};
use crate::queue::{self, CommandQueue, QueuedAction};
use crate::subscriptions::{validate_event_names, SubscriptionSet};
use crate::transport::{Connector, TcpConnector, Transport};

/// Connection parameters for a session.
///
/// All fields beyond the host carry the conventional defaults; set them
/// directly to override.
#[derive(Clone)]
pub struct SessionConfig {
    /// Switch hostname or address.
    pub host: String,
    /// ESL port.
    pub port: u16,
    /// ESL password.
    pub password: String,
    /// Timeout for TCP connect and the auth handshake.
    pub connect_timeout: Duration,
    /// Timeout for each command round-trip.
    pub command_timeout: Duration,
}

impl SessionConfig {
    /// Configuration with conventional defaults for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_ESL_PORT,
            password: DEFAULT_ESL_PASSWORD.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// Optional parameters for [`EslSession::originate`].
#[derive(Debug, Clone, Default)]
pub struct OriginateOptions {
    /// Domain qualifier for the user endpoint.
    pub domain: Option<String>,
    /// `origination_caller_id_name`.
    pub cid_name: Option<String>,
    /// `origination_caller_id_number`.
    pub cid_num: Option<String>,
    /// `originate_timeout` in seconds.
    pub timeout: Option<u32>,
    /// Extra origination variables.
    pub variables: Vec<(String, String)>,
}

type EventHandler = Arc<dyn Fn(&EslEvent) + Send + Sync>;
type HandlerMap = Arc<Mutex<HashMap<String, Vec<EventHandler>>>>;

/// One logical session to a switch. Cheap to clone; all clones share the
/// same connection, queue, subscription set, and handler registry.
pub struct EslSession<C: Connector = TcpConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for EslSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for EslSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslSession")
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct SessionInner<C: Connector> {
    config: SessionConfig,
    connector: C,
    handlers: HandlerMap,
    state: Mutex<SessionState<C::Transport>>,
}

/// Mutable session state. Guarded by a synchronous mutex that is never
/// held across an await; transport I/O always happens outside the lock.
struct SessionState<T> {
    transport: Option<Arc<T>>,
    queue: CommandQueue,
    subscriptions: SubscriptionSet,
}

impl<C: Connector> SessionInner<C> {
    fn locked(&self) -> MutexGuard<'_, SessionState<C::Transport>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EslSession {
    /// Session over the default TCP transport.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> EslSession<C> {
    /// Session over a custom connector (used by tests to substitute a fake
    /// transport).
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                handlers: Arc::new(Mutex::new(HashMap::new())),
                state: Mutex::new(SessionState {
                    transport: None,
                    queue: CommandQueue::new(),
                    subscriptions: SubscriptionSet::new(),
                }),
            }),
        }
    }

    /// Connect and authenticate, then bring the session to ready: replay
    /// the subscription set, drain every deferred operation in submission
    /// order, and return.
    ///
    /// Connection failures are returned without retrying; deferred
    /// operations and the subscription set stay intact for a later attempt.
    /// Connecting an already-connected session is an error.
    pub async fn connect(&self) -> EslResult<()> {
        if self.is_connected() {
            return Err(EslError::AlreadyConnected);
        }

        let (transport, events) = self
            .inner
            .connector
            .connect(&self.inner.config)
            .await?;
        let transport = Arc::new(transport);

        tokio::spawn(dispatch_events(
            events,
            self.inner
                .handlers
                .clone(),
        ));

        // Store the handle first: readiness is observable from here on, and
        // the replayed subscribe below runs against a live transport.
        let replay = {
            let mut state = self
                .inner
                .locked();
            state.transport = Some(transport.clone());
            state
                .subscriptions
                .names()
                .to_vec()
        };

        if !replay.is_empty() {
            if let Err(e) = transport
                .subscribe(&replay)
                .await
            {
                // Subscription replay is part of bringing the session up;
                // tear back down so the caller sees a failed connect with
                // deferred operations still buffered.
                warn!("Connect-time subscribe failed: {}", e);
                self.inner
                    .locked()
                    .transport = None;
                let _ = transport
                    .close()
                    .await;
                return Err(e);
            }
        }

        // Flip the queue to pass-through and run what accumulated. The flip
        // happens inside take_buffered(), so operations submitted by a
        // draining action execute immediately rather than re-entering the
        // buffer.
        let buffered = {
            self.inner
                .locked()
                .queue
                .take_buffered()
        };
        if !buffered.is_empty() {
            debug!("Draining {} deferred operation(s)", buffered.len());
        }
        for act in buffered {
            act().await;
        }

        info!("Session ready");
        Ok(())
    }

    /// Tear down the transport and return the session to its unconnected
    /// state. The next connect cycle starts with a fresh queue; the
    /// subscription set and handler registry survive for replay.
    ///
    /// Calling this without a prior successful `connect` is a programming
    /// error and fails loudly.
    pub async fn disconnect(&self) -> EslResult<()> {
        let transport = {
            let mut state = self
                .inner
                .locked();
            let transport = state
                .transport
                .take()
                .ok_or(EslError::NotConnected)?;
            state
                .queue
                .reset();
            transport
        };
        transport
            .close()
            .await
    }

    /// Whether the session is ready: a transport is held and still live.
    /// Reflects transport-level disconnection, not just the last
    /// `connect` outcome.
    pub fn is_connected(&self) -> bool {
        self.inner
            .locked()
            .transport
            .as_ref()
            .is_some_and(|t| t.is_live())
    }

    /// Merge event names into the subscription set.
    ///
    /// When the session is ready, the transport is re-sent the entire
    /// updated set, even if the merge changed nothing. When not ready, the
    /// set is stored and replayed once at connect time.
    pub async fn subscribe<I, S>(&self, names: I) -> EslResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = validate_event_names(names)?;
        let (transport, full_set) = {
            let mut state = self
                .inner
                .locked();
            state
                .subscriptions
                .merge(names);
            (
                state
                    .transport
                    .clone(),
                state
                    .subscriptions
                    .names()
                    .to_vec(),
            )
        };

        match transport.filter(|t| t.is_live()) {
            Some(transport) => {
                transport
                    .subscribe(&full_set)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Remove event names from the subscription set.
    ///
    /// Removal is tracked locally only: no command is sent, and the switch
    /// keeps delivering the events until the next full-set subscribe. This
    /// mirrors the upstream event-socket limitation and is asserted by the
    /// test suite; widen it deliberately if the transport ever grows
    /// first-class unsubscribe support.
    pub async fn unsubscribe<I, S>(&self, names: I) -> EslResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = validate_event_names(names)?;
        self.inner
            .locked()
            .subscriptions
            .remove_all(&names);
        Ok(())
    }

    /// Register a handler for an event name.
    ///
    /// The name joins the subscription set at registration time, so `on`
    /// alone is enough to both subscribe and handle: a connect-time replay
    /// covers it, and on a ready session a grown set triggers an immediate
    /// re-subscribe. Installation of the handler itself is a queued
    /// operation like any other.
    pub async fn on<F>(&self, event_name: &str, handler: F) -> EslResult<()>
    where
        F: Fn(&EslEvent) + Send + Sync + 'static,
    {
        let mut names = validate_event_names([event_name])?;
        let name = names
            .pop()
            .ok_or_else(|| EslError::invalid_argument("event name must not be empty"))?;

        let (transport, full_set, grew) = {
            let mut state = self
                .inner
                .locked();
            let grew = state
                .subscriptions
                .insert(name.clone());
            (
                state
                    .transport
                    .clone(),
                state
                    .subscriptions
                    .names()
                    .to_vec(),
                grew,
            )
        };

        if grew {
            if let Some(transport) = transport.filter(|t| t.is_live()) {
                transport
                    .subscribe(&full_set)
                    .await?;
            }
        }

        let handlers = self
            .inner
            .handlers
            .clone();
        let handler: EventHandler = Arc::new(handler);
        self.enqueue_or_run(queue::action(move || async move {
            debug!("Registering handler for {}", name);
            handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(name)
                .or_default()
                .push(handler);
        }))
        .await;

        Ok(())
    }

    /// `status`: switch uptime and session counts, raw text.
    pub async fn status(&self) -> EslResult<String> {
        self.run_api("status", "status".to_string())
            .await
    }

    /// `show channels`: all active channels.
    pub async fn get_channels(&self) -> EslResult<Vec<Channel>> {
        let body = self
            .run_api("show channels", ShowTable::Channels.to_string())
            .await?;
        listing::decode_show(&body)
    }

    /// `show calls`: all bridged calls.
    pub async fn get_calls(&self) -> EslResult<Vec<Call>> {
        let body = self
            .run_api("show calls", ShowTable::Calls.to_string())
            .await?;
        listing::decode_show(&body)
    }

    /// `sofia status`: profiles, gateways, and aliases.
    pub async fn get_profiles(&self) -> EslResult<Vec<Profile>> {
        let body = self
            .run_api("sofia status", SofiaStatus.to_string())
            .await?;
        Ok(listing::parse_profiles(&body))
    }

    /// Registered users across sofia profiles.
    ///
    /// Fans out one registration query per `profile`-kind entry (optionally
    /// restricted to `profile_filter`) and joins the results. The sweep
    /// always completes: a profile whose fetch fails contributes no users
    /// but is recorded in [`UserListing::failed_profiles`] instead of
    /// stalling the aggregate.
    pub async fn get_users(&self, profile_filter: Option<&str>) -> EslResult<UserListing> {
        let profiles = self
            .get_profiles()
            .await?;
        let targets: Vec<String> = profiles
            .into_iter()
            .filter(|p| p.kind == "profile")
            .map(|p| p.name)
            .filter(|name| profile_filter.map_or(true, |wanted| wanted == name))
            .collect();

        let fetches = targets
            .into_iter()
            .map(|name| {
                let session = self.clone();
                async move {
                    let command = SofiaRegistrations {
                        profile: name.clone(),
                    }
                    .to_string();
                    let result = session
                        .run_api("sofia status reg", command)
                        .await;
                    (name, result)
                }
            });

        let mut sweep = UserListing::default();
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(body) => {
                    sweep
                        .users
                        .extend(listing::parse_registrations(&body, &name));
                }
                Err(e) => {
                    warn!("Registration fetch for profile {} failed: {}", name, e);
                    sweep
                        .failed_profiles
                        .push((name, e));
                }
            }
        }
        Ok(sweep)
    }

    /// Originate a call from a local user to a destination extension.
    ///
    /// Issued as a background job; resolves with the job's raw result body
    /// (`+OK <uuid>`). A `-ERR <cause>` result becomes a
    /// [`EslError::CommandFailed`] carrying the raw response text.
    pub async fn originate(
        &self,
        user: &str,
        destination: &str,
        options: OriginateOptions,
    ) -> EslResult<String> {
        let command = Originate {
            endpoint: Endpoint::User {
                id: user.to_string(),
                domain: options.domain,
            },
            destination: destination.to_string(),
            cid_name: options.cid_name,
            cid_num: options.cid_num,
            timeout: options.timeout,
            variables: options.variables,
        };
        self.run_background("originate", command.to_string())
            .await
    }

    /// Place a channel on hold.
    pub async fn hold(&self, uuid: &str) -> EslResult<()> {
        let command = UuidHold {
            action: HoldAction::Hold,
            uuid: uuid.to_string(),
        };
        self.run_api("uuid_hold", command.to_string())
            .await
            .map(|_| ())
    }

    /// Take a channel off hold.
    pub async fn resume(&self, uuid: &str) -> EslResult<()> {
        let command = UuidHold {
            action: HoldAction::Off,
            uuid: uuid.to_string(),
        };
        self.run_api("uuid_hold", command.to_string())
            .await
            .map(|_| ())
    }

    /// Hang up a channel, optionally with a specific cause.
    pub async fn terminate(&self, uuid: &str, cause: Option<&str>) -> EslResult<()> {
        let command = UuidKill {
            uuid: uuid.to_string(),
            cause: cause.map(str::to_string),
        };
        self.run_api("uuid_kill", command.to_string())
            .await
            .map(|_| ())
    }

    /// Submit an operation: buffered while not ready, executed immediately
    /// once ready.
    async fn enqueue_or_run(&self, act: QueuedAction) {
        let immediate = self
            .inner
            .locked()
            .queue
            .submit(act);
        if let Some(act) = immediate {
            act().await;
        }
    }

    /// Route an inline API command through the queue and hand back its
    /// body. The caller's await is the operation's completion callback.
    async fn run_api(&self, operation: &'static str, command: String) -> EslResult<String> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::downgrade(&self.inner);
        self.enqueue_or_run(queue::action(move || async move {
            let result = api_on_transport(inner, operation, command).await;
            let _ = tx.send(result);
        }))
        .await;

        rx.await
            .map_err(|_| EslError::ConnectionClosed)?
    }

    /// Route a background API command through the queue; resolves with the
    /// job's raw result body.
    async fn run_background(&self, operation: &'static str, command: String) -> EslResult<String> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::downgrade(&self.inner);
        self.enqueue_or_run(queue::action(move || async move {
            let result = background_on_transport(inner, operation, command).await;
            let _ = tx.send(result);
        }))
        .await;

        rx.await
            .map_err(|_| EslError::ConnectionClosed)?
    }
}

/// Fetch the current transport from a weak session reference.
fn transport_of<C: Connector>(
    inner: &Weak<SessionInner<C>>,
) -> EslResult<Arc<C::Transport>> {
    let inner = inner
        .upgrade()
        .ok_or(EslError::ConnectionClosed)?;
    let transport = inner
        .locked()
        .transport
        .clone();
    transport.ok_or(EslError::NotConnected)
}

async fn api_on_transport<C: Connector>(
    inner: Weak<SessionInner<C>>,
    operation: &'static str,
    command: String,
) -> EslResult<String> {
    let transport = transport_of(&inner)?;
    let response = transport
        .send_inline(&command)
        .await?;
    response.into_api_body(operation)
}

async fn background_on_transport<C: Connector>(
    inner: Weak<SessionInner<C>>,
    operation: &'static str,
    command: String,
) -> EslResult<String> {
    let transport = transport_of(&inner)?;
    let body = transport
        .send_background(&command)
        .await?;
    if body
        .trim_start()
        .starts_with("-ERR")
    {
        return Err(EslError::command_failed(operation, body.trim().to_string()));
    }
    Ok(body)
}

/// Deliver transport events to their registered handlers.
///
/// Runs for the lifetime of one connect cycle; ends when the transport's
/// reader drops the sending side. Handlers are cloned out of the registry
/// before invocation so a handler may call back into the session.
async fn dispatch_events(mut events: mpsc::Receiver<EslEvent>, handlers: HandlerMap) {
    while let Some(event) = events
        .recv()
        .await
    {
        let Some(name) = event
            .name()
            .map(str::to_string)
        else {
            continue;
        };

        let matched: Vec<EventHandler> = {
            let map = handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            map.get(&name)
                .cloned()
                .unwrap_or_default()
        };

        if matched.is_empty() {
            trace!("No handler registered for {}", name);
            continue;
        }
        for handler in &matched {
            handler(&event);
        }
    }
    debug!("Event dispatch ended");
}
