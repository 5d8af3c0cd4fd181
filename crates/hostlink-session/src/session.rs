use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hostlink_frame::{put_string, FrameConfig, FrameError, Tag};
use hostlink_transport::IpcStream;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::callbacks::{CallbackArgs, CallbackDescriptor, CallbackRegistry, Signature, Value};
use crate::channel::TransportChannel;
use crate::dispatch::{self, UnhandledQueue};
use crate::error::{Result, SessionError};
use crate::handshake::{self, Announcement};
use crate::natives::{HandleCache, NativeInvoker};
use crate::ping::PongTracker;
use crate::scheduler::Scheduler;

/// Pipe name used when none is configured.
pub const DEFAULT_PIPE_NAME: &str = "hostlink";

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pipe name or path of the host endpoint.
    pub pipe_name: String,
    /// Frame limits for both directions.
    pub frame: FrameConfig,
    /// Bound on the wait for the host's announcement. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Bound on ping and native waits. `None` waits forever.
    ///
    /// A native wait that runs out ends the session: a Response arriving
    /// later could no longer be matched to its request.
    pub response_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            frame: FrameConfig::default(),
            handshake_timeout: None,
            response_timeout: None,
        }
    }
}

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    AnnounceReceived,
    Started,
}

/// The embedding application driven by a session.
pub trait Application {
    /// Called once, after the host's announcement was accepted.
    ///
    /// This is where callbacks are registered and [`Session::start`] is
    /// called. An error aborts [`Session::run`].
    fn initialize(&mut self, session: &Session) -> Result<()>;

    /// Called for every server tick.
    fn on_tick(&mut self, _session: &Session) {}
}

struct ActiveGuard;

impl ActiveGuard {
    fn acquire() -> Result<Self> {
        ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ActiveGuard)
            .map_err(|_| SessionError::AlreadyActive)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::Release);
    }
}

struct Inner {
    channel: TransportChannel,
    config: SessionConfig,
    state: Cell<ConnectionState>,
    announcement: Cell<Option<Announcement>>,
    unhandled: UnhandledQueue,
    pongs: PongTracker,
    callbacks: RefCell<CallbackRegistry>,
    natives: HandleCache,
    application: RefCell<Option<Box<dyn Application>>>,
    running: Cell<bool>,
    finished: Cell<bool>,
    done: Notify,
    outcome: RefCell<Option<SessionError>>,
    _guard: ActiveGuard,
}

/// One connected lifetime of the host pipe.
///
/// The handle is cheap to clone and confined to the thread that created it:
/// it is neither `Send` nor `Sync`, so every session operation happens on
/// the logical thread.
///
/// Only one session may be alive per process at a time.
#[derive(Clone)]
pub struct Session {
    inner: Rc<Inner>,
}

impl Session {
    /// Connect to the configured pipe.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let guard = ActiveGuard::acquire()?;
        info!(pipe = %config.pipe_name, "connecting to host");
        let channel = TransportChannel::connect(&config.pipe_name, config.frame.clone())?;
        Ok(Self::from_parts(guard, channel, config))
    }

    /// Use an already connected stream.
    pub fn with_stream(stream: IpcStream, config: SessionConfig) -> Result<Self> {
        let guard = ActiveGuard::acquire()?;
        let channel = TransportChannel::from_stream(stream, config.frame.clone())?;
        Ok(Self::from_parts(guard, channel, config))
    }

    fn from_parts(guard: ActiveGuard, channel: TransportChannel, config: SessionConfig) -> Self {
        info!("connected; waiting for server announcement");
        Self {
            inner: Rc::new(Inner {
                channel,
                config,
                state: Cell::new(ConnectionState::Connected),
                announcement: Cell::new(None),
                unhandled: UnhandledQueue::default(),
                pongs: PongTracker::new(),
                callbacks: RefCell::new(CallbackRegistry::new()),
                natives: HandleCache::default(),
                application: RefCell::new(None),
                running: Cell::new(false),
                finished: Cell::new(false),
                done: Notify::new(),
                outcome: RefCell::new(None),
                _guard: guard,
            }),
        }
    }

    /// Perform the handshake, initialize `application`, and drive the
    /// session until it finishes.
    ///
    /// Returns when the receive loop ends, a fatal error occurs, or
    /// [`stop`](Self::stop) is called. Callbacks and the application are
    /// released before returning.
    pub fn run<A: Application + 'static>(&self, application: A) -> Result<()> {
        if self.inner.finished.get() {
            return Err(SessionError::InvalidState("session has finished"));
        }
        if self.inner.running.replace(true) {
            return Err(SessionError::InvalidState("session is already running"));
        }

        let scheduler = Scheduler::new()?;
        let result = scheduler.block_on(self.drive(Box::new(application)));
        self.teardown();
        result
    }

    async fn drive(&self, mut application: Box<dyn Application>) -> Result<()> {
        let announcement =
            handshake::await_announcement(&self.inner.channel, self.inner.config.handshake_timeout)
                .await?;
        self.inner.announcement.set(Some(announcement));
        self.inner.state.set(ConnectionState::AnnounceReceived);

        application.initialize(self)?;
        *self.inner.application.borrow_mut() = Some(application);

        if !self.inner.finished.get() {
            self.inner.done.notified().await;
        }
        match self.inner.outcome.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn teardown(&self) {
        let application = self.inner.application.borrow_mut().take();
        drop(application);
        self.inner.callbacks.borrow_mut().clear();
        self.inner.pongs.clear();
        self.inner.channel.shutdown();
        self.inner.finished.set(true);
        self.inner.state.set(ConnectionState::Disconnected);
        debug!("session torn down");
    }

    /// Tell the host to begin delivering ticks and calls, and start the
    /// receive loop. Calling it again has no effect.
    pub fn start(&self) -> Result<()> {
        match self.inner.state.get() {
            ConnectionState::AnnounceReceived => {}
            ConnectionState::Started => {
                warn!("session already started");
                return Ok(());
            }
            _ => return Err(SessionError::InvalidState("start requires a completed handshake")),
        }

        info!("sending start signal to server");
        self.send(Tag::Start, &[])?;
        self.inner.state.set(ConnectionState::Started);
        tokio::task::spawn_local(dispatch::receive_loop(self.clone()));
        Ok(())
    }

    /// Print text on the host console.
    pub fn print(&self, text: &str) -> Result<()> {
        self.require_announced()?;
        let mut payload = BytesMut::with_capacity(text.len() + 1);
        put_string(&mut payload, text)?;
        self.send(Tag::Print, &payload)
    }

    /// Register a callback the host can call by name.
    ///
    /// The host is told about a name only the first time it is registered;
    /// later registrations replace the local descriptor silently.
    pub fn register(&self, descriptor: CallbackDescriptor) -> Result<()> {
        self.require_announced()?;
        let payload = descriptor.register_payload()?;
        let name = descriptor.name().to_string();

        if self.inner.callbacks.borrow().contains(&name) {
            self.inner.callbacks.borrow_mut().insert(descriptor);
            debug!(name, "callback replaced");
            return Ok(());
        }

        // The host learns the name before the registry holds it.
        self.send(Tag::RegisterCall, &payload)?;
        self.inner.callbacks.borrow_mut().insert(descriptor);
        debug!(name, "callback registered");
        Ok(())
    }

    /// Build and register a callback in one step.
    pub fn register_callback<F>(&self, name: &str, signature: Signature, handler: F) -> Result<()>
    where
        F: Fn(&CallbackArgs) -> Option<Value> + 'static,
    {
        self.register(CallbackDescriptor::new(name, signature, handler)?)
    }

    /// Measure one round trip to the host.
    pub async fn ping(&self) -> Result<Duration> {
        if self.inner.state.get() != ConnectionState::Started {
            return Err(SessionError::InvalidState("ping requires a started session"));
        }

        let pong = self.inner.pongs.begin();
        if let Err(err) = self.send(Tag::Ping, &[]) {
            self.inner.pongs.cancel_last();
            return Err(err);
        }

        let received = match self.inner.config.response_timeout {
            Some(limit) => tokio::time::timeout(limit, pong)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => pong.await,
        };
        received.map_err(|_| SessionError::Disconnected("session ended before pong".to_string()))
    }

    /// Look up a native handle on the host (blocking).
    pub fn resolve_handle(&self, name: &str) -> Result<i32> {
        self.require_announced()?;
        self.invoker()
            .resolve_handle(name)
            .map_err(|err| self.escalate(err))
    }

    /// Like [`resolve_handle`](Self::resolve_handle), but asks the host only
    /// once per name.
    pub fn native(&self, name: &str) -> Result<i32> {
        if let Some(handle) = self.inner.natives.get(name) {
            return Ok(handle);
        }
        let handle = self.resolve_handle(name)?;
        self.inner.natives.insert(name, handle);
        Ok(handle)
    }

    /// Invoke a native with a prepared argument buffer (blocking).
    pub fn invoke_native(&self, args: &[u8]) -> Result<Bytes> {
        self.require_announced()?;
        self.invoker().invoke(args).map_err(|err| self.escalate(err))
    }

    /// Queue additional work on the logical thread.
    pub fn spawn<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + 'static,
    {
        if !self.inner.running.get() || self.inner.finished.get() {
            return Err(SessionError::InvalidState("spawn requires a running session"));
        }
        tokio::task::spawn_local(future);
        Ok(())
    }

    /// Finish the session gracefully.
    pub fn stop(&self) {
        self.finish(Ok(()));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// The host's announcement, once the handshake completed.
    pub fn announcement(&self) -> Option<Announcement> {
        self.inner.announcement.get()
    }

    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub(crate) fn channel(&self) -> &TransportChannel {
        &self.inner.channel
    }

    pub(crate) fn unhandled(&self) -> &UnhandledQueue {
        &self.inner.unhandled
    }

    pub(crate) fn pongs(&self) -> &PongTracker {
        &self.inner.pongs
    }

    pub(crate) fn callback(&self, name: &str) -> Option<CallbackDescriptor> {
        self.inner.callbacks.borrow().get(name).cloned()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.inner.finished.get()
    }

    pub(crate) fn send(&self, tag: Tag, payload: &[u8]) -> Result<()> {
        self.inner
            .channel
            .send(tag, payload)
            .map_err(|err| self.escalate(err))
    }

    pub(crate) fn tick(&self) {
        let Ok(mut slot) = self.inner.application.try_borrow_mut() else {
            warn!("tick while the application is busy; skipped");
            return;
        };
        if let Some(application) = slot.as_mut() {
            application.on_tick(self);
        }
    }

    /// Record how the session ended and wake [`run`](Self::run).
    pub(crate) fn finish(&self, outcome: Result<()>) {
        if self.inner.finished.replace(true) {
            if let Err(err) = outcome {
                debug!(error = %err, "session already finished");
            }
            return;
        }
        match outcome {
            Ok(()) => info!("session finished"),
            Err(err) => {
                error!(error = %err, "session terminated");
                *self.inner.outcome.borrow_mut() = Some(err);
            }
        }
        self.inner.state.set(ConnectionState::Disconnected);
        self.inner.done.notify_one();
    }

    fn invoker(&self) -> NativeInvoker<'_> {
        NativeInvoker::new(
            &self.inner.channel,
            &self.inner.unhandled,
            self.inner.config.response_timeout,
        )
    }

    /// End the session for errors that leave the pipe unusable; pass the
    /// error through to the caller either way.
    fn escalate(&self, err: SessionError) -> SessionError {
        let fatal = match &err {
            SessionError::Timeout(limit) => Some(SessionError::Timeout(*limit)),
            SessionError::Disconnected(reason) => Some(SessionError::Disconnected(reason.clone())),
            SessionError::Transport(source) => Some(SessionError::Disconnected(source.to_string())),
            SessionError::Frame(FrameError::Io(source)) => {
                Some(SessionError::Disconnected(source.to_string()))
            }
            SessionError::Frame(FrameError::ConnectionClosed) => {
                Some(SessionError::Disconnected("pipe closed".to_string()))
            }
            _ => None,
        };
        if let Some(fatal) = fatal {
            self.finish(Err(fatal));
        }
        err
    }

    fn require_announced(&self) -> Result<()> {
        match self.inner.state.get() {
            ConnectionState::AnnounceReceived | ConnectionState::Started => Ok(()),
            _ => Err(SessionError::InvalidState(
                "operation requires a completed handshake",
            )),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pipe", &self.inner.config.pipe_name)
            .field("state", &self.inner.state.get())
            .field("callbacks", &self.callback_count())
            .finish_non_exhaustive()
    }
}
