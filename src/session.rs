use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    ble::{BedLink, LinkResolver},
    error::{BedError, Result},
    protocol::{preset_by_name, Command},
    types::{
        Axis, BedPosition, ConnectionStatus, MoveDirection, MovementState, Preset, SessionConfig,
        StepSettings,
    },
};

/// Handle to a running (or finished) movement task
///
/// Returned by [`BedSession::spawn_movement`]. Cancellation is cooperative:
/// [`cancel`](Self::cancel) sets a flag the task checks between steps, so a
/// write that has already been issued always completes, and no further steps
/// are issued afterwards.
#[derive(Clone)]
pub struct MovementHandle {
    command: Command,
    total_repeats: u32,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    steps_issued: Arc<AtomicU32>,
    state: Arc<RwLock<MovementState>>,
}

impl MovementHandle {
    fn new(command: Command, total_repeats: u32, interval: Duration) -> Self {
        Self {
            command,
            total_repeats,
            interval,
            cancelled: Arc::new(AtomicBool::new(false)),
            steps_issued: Arc::new(AtomicU32::new(0)),
            state: Arc::new(RwLock::new(MovementState::Running)),
        }
    }

    /// Request cancellation; the task stops before its next step
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested for {} movement", self.command);
        }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The command this movement repeats
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// The number of steps the movement was asked to issue
    #[must_use]
    pub const fn total_repeats(&self) -> u32 {
        self.total_repeats
    }

    /// Steps issued to the wire so far
    pub fn steps_issued(&self) -> u32 {
        self.steps_issued.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> MovementState {
        *self.state.read().await
    }

    async fn finish(&self, state: MovementState) {
        *self.state.write().await = state;
    }
}

/// Session and movement controller for one physical bed
///
/// A `BedSession` owns the wireless link to a single bed peripheral and is
/// the only component allowed to touch it. Every command funnels through the
/// session gate, so connect-then-write sequences from concurrent callers
/// never interleave on the wire. The session also runs the idle-disconnect
/// watchdog, supervises movement tasks, and provides the stop-all and preset
/// operations built on top of them.
///
/// Sessions are created through [`BedSession::new`] (or a
/// [`SessionRegistry`]) and shared as `Arc<BedSession>`.
///
/// # Examples
///
/// ```no_run
/// use bedframe::{BedSession, BleLinkResolver, Command, SessionConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> bedframe::Result<()> {
///     let resolver = Arc::new(BleLinkResolver::new().await?);
///     let session = BedSession::new("F0:82:C0:11:22:33", resolver, SessionConfig::default());
///
///     // Single button-style command
///     session.send(Command::HeadUp).await?;
///
///     // Continuous movement, then stop everything and disconnect
///     session
///         .spawn_movement(Command::FeetUp, 20, session.config().move_interval)
///         .await;
///     session.stop_all().await;
///     Ok(())
/// }
/// ```
pub struct BedSession {
    address: String,
    config: SessionConfig,
    resolver: Arc<dyn LinkResolver>,
    /// Stored link guarded by the session gate. `None` while disconnected;
    /// replaced wholesale on reconnect, never mutated in place.
    link: Mutex<Option<Box<dyn BedLink>>>,
    /// At most one pending idle-disconnect task.
    watchdog: Mutex<Option<JoinHandle<()>>>,
    /// Running movement tasks, keyed by the command they repeat.
    movements: Mutex<HashMap<Command, MovementHandle>>,
    position: RwLock<BedPosition>,
    steps: RwLock<StepSettings>,
}

impl BedSession {
    /// Create a session for the peripheral at `address`
    ///
    /// The session starts disconnected; the first dispatch resolves and
    /// connects on demand.
    pub fn new(
        address: impl Into<String>,
        resolver: Arc<dyn LinkResolver>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let steps = StepSettings::new(config.default_steps);
        Arc::new(Self {
            address: address.into(),
            config,
            resolver,
            link: Mutex::new(None),
            watchdog: Mutex::new(None),
            movements: Mutex::new(HashMap::new()),
            position: RwLock::new(BedPosition::default()),
            steps: RwLock::new(steps),
        })
    }

    /// The peripheral address this session drives
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Send a single command
    ///
    /// Shorthand for [`dispatch`](Self::dispatch) with one repeat.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn send(self: &Arc<Self>, command: Command) -> Result<()> {
        self.dispatch(command, 1, Duration::ZERO).await
    }

    /// Write `command` to the bed `repeats` times, `interval` apart
    ///
    /// Acquires the session gate, connects on demand (bounded by
    /// [`SessionConfig::connect_timeout`]), writes the payload `repeats`
    /// times with `interval` between writes (none after the last), and
    /// re-arms the idle-disconnect watchdog on success. The gate is held for
    /// the whole sequence, so concurrent dispatches never interleave their
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns [`BedError::DeviceNotFound`] if discovery cannot resolve the
    /// address, [`BedError::ConnectionFailed`] if connecting times out or
    /// fails, or [`BedError::WriteFailed`] on a transport error. On any
    /// connect or write error the stored link is force-disconnected and
    /// discarded before the error is returned, so the next dispatch starts
    /// clean.
    pub async fn dispatch(
        self: &Arc<Self>,
        command: Command,
        repeats: u32,
        interval: Duration,
    ) -> Result<()> {
        self.dispatch_gated(command, repeats, interval, None)
            .await
            .map(|_| ())
    }

    /// Resolve `name` through the command set, then dispatch it
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownCommand`] without touching the gate or the
    /// wire if the name is not in the set; otherwise as
    /// [`dispatch`](Self::dispatch).
    pub async fn dispatch_named(
        self: &Arc<Self>,
        name: &str,
        repeats: u32,
        interval: Duration,
    ) -> Result<()> {
        let command = Command::from_name(name)?;
        self.dispatch(command, repeats, interval).await
    }

    /// One connect-and-write critical section under the session gate.
    ///
    /// `cancel` carries a movement task's cancellation flag; it is re-checked
    /// after the gate is acquired and before every write, so a step racing a
    /// stop-all exits as a benign no-op (`Ok(false)`) instead of reconnecting
    /// to a link the stop just closed.
    async fn dispatch_gated(
        self: &Arc<Self>,
        command: Command,
        repeats: u32,
        interval: Duration,
        cancel: Option<&AtomicBool>,
    ) -> Result<bool> {
        let mut guard = self.link.lock().await;

        if interrupted(cancel) {
            debug!("Skipping {} dispatch, cancelled while waiting", command);
            return Ok(false);
        }

        let active = match guard.take() {
            Some(existing) => {
                if existing.is_connected().await {
                    existing
                } else {
                    self.open_link().await?
                }
            }
            None => self.open_link().await?,
        };

        let payload = command.payload();
        for n in 0..repeats {
            if interrupted(cancel) {
                *guard = Some(active);
                return Ok(false);
            }
            if let Err(err) = active.write(&payload).await {
                warn!("Failed to send bed command {}: {}", command, err);
                let mut broken = active;
                if let Err(err) = broken.disconnect().await {
                    debug!("Disconnect after failed write also failed: {}", err);
                }
                return Err(err);
            }
            debug!("Sent {} ({}/{})", command, n + 1, repeats);
            if n + 1 < repeats {
                sleep(interval).await;
            }
        }

        *guard = Some(active);

        // Re-armed before the gate opens: a watchdog that fired mid-dispatch
        // is blocked on this gate and gets aborted here, never the fresh link.
        self.arm_watchdog().await;
        drop(guard);
        Ok(true)
    }

    /// Resolve and connect a fresh link. Caller holds the gate.
    async fn open_link(&self) -> Result<Box<dyn BedLink>> {
        let Some(mut fresh) = self.resolver.resolve(&self.address).await? else {
            return Err(BedError::DeviceNotFound(self.address.clone()));
        };

        debug!("Connecting to adjustable bed {}", self.address);
        if let Err(err) = fresh.connect(self.config.connect_timeout).await {
            if let Err(err) = fresh.disconnect().await {
                debug!("Disconnect after failed connect also failed: {}", err);
            }
            return Err(err);
        }

        Ok(fresh)
    }

    /// Re-arm the idle-disconnect watchdog, replacing any pending one.
    async fn arm_watchdog(self: &Arc<Self>) {
        let idle = self.config.idle_timeout;
        let mut slot = self.watchdog.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        debug!(
            "Scheduling idle disconnect for {} in {:?}",
            self.address, idle
        );
        let session = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            sleep(idle).await;
            session.idle_disconnect().await;
        }));
    }

    /// Watchdog body: tear the link down if it is still live.
    async fn idle_disconnect(&self) {
        let mut guard = self.link.lock().await;
        if let Some(mut stale) = guard.take() {
            if stale.is_connected().await {
                info!("Disconnecting bed {} (idle timeout)", self.address);
                if let Err(err) = stale.disconnect().await {
                    warn!("Idle disconnect failed: {}", err);
                }
            }
        }
    }

    /// Spawn a movement that repeats `command` `total_repeats` times
    ///
    /// Returns immediately with a [`MovementHandle`]; the task runs in the
    /// background, issuing one gated dispatch per step with `interval`
    /// between steps and advancing the position estimate for axis commands.
    /// If a movement for the same command is already running the request is
    /// ignored and the existing handle is returned.
    pub async fn spawn_movement(
        self: &Arc<Self>,
        command: Command,
        total_repeats: u32,
        interval: Duration,
    ) -> MovementHandle {
        let mut movements = self.movements.lock().await;
        if let Some(existing) = movements.get(&command) {
            debug!("Movement for {} already running, ignoring request", command);
            return existing.clone();
        }

        let handle = MovementHandle::new(command, total_repeats, interval);
        movements.insert(command, handle.clone());
        drop(movements);

        info!(
            "Starting {} movement ({} steps)",
            command, total_repeats
        );
        let session = Arc::clone(self);
        let task = handle.clone();
        tokio::spawn(async move {
            session.run_movement(task).await;
        });

        handle
    }

    /// Spawn a movement along `axis` using the desired step count
    ///
    /// The step count comes from [`desired_steps`](Self::desired_steps),
    /// falling back to [`SessionConfig::default_steps`] when none was set.
    pub async fn move_axis(
        self: &Arc<Self>,
        axis: Axis,
        direction: MoveDirection,
    ) -> MovementHandle {
        let steps = self.desired_steps(axis).await;
        let command = Command::for_axis(axis, direction);
        self.spawn_movement(command, steps, self.config.move_interval)
            .await
    }

    async fn run_movement(self: Arc<Self>, task: MovementHandle) {
        let mut outcome = MovementState::Completed;

        for step in 0..task.total_repeats {
            if task.is_cancelled() {
                outcome = MovementState::Cancelled;
                break;
            }

            match self
                .dispatch_gated(task.command, 1, task.interval, Some(task.cancelled.as_ref()))
                .await
            {
                Ok(true) => {
                    task.steps_issued.fetch_add(1, Ordering::SeqCst);
                    self.advance_position(task.command).await;
                }
                Ok(false) => {
                    outcome = MovementState::Cancelled;
                    break;
                }
                Err(err) => {
                    // No synchronous caller to report to; the dropped link is
                    // observable through connection_status().
                    warn!("{} movement failed after {} steps: {}", task.command, task.steps_issued(), err);
                    outcome = MovementState::Failed;
                    break;
                }
            }

            if step + 1 < task.total_repeats {
                sleep(task.interval).await;
            }
        }

        task.finish(outcome).await;
        self.deregister_movement(&task).await;
        info!(
            "{} movement {} after {}/{} steps",
            task.command,
            outcome,
            task.steps_issued(),
            task.total_repeats
        );
    }

    /// Remove a finished task from the supervisor, unless the slot has
    /// already been taken over by a newer task for the same command.
    async fn deregister_movement(&self, task: &MovementHandle) {
        let mut movements = self.movements.lock().await;
        if let Some(current) = movements.get(&task.command) {
            if Arc::ptr_eq(&current.cancelled, &task.cancelled) {
                movements.remove(&task.command);
            }
        }
    }

    async fn advance_position(&self, command: Command) {
        let Some((axis, direction)) = command.axis() else {
            return;
        };
        let mut position = self.position.write().await;
        position.advance(axis, direction, self.config.move_step);
        debug!(
            "Position estimate now head {}% feet {}%",
            position.head, position.feet
        );
    }

    /// Cancel every movement, cancel the watchdog, and disconnect
    ///
    /// Safe to call with nothing running and no link (a no-op), and safe to
    /// call concurrently with in-flight movements: cancellation signals are
    /// flag sets, not joins, and a movement step that lost the race exits as
    /// a benign no-op. This operation never fails; disconnect errors are
    /// logged and swallowed.
    pub async fn stop_all(&self) {
        let cancelled: Vec<MovementHandle> = {
            let mut movements = self.movements.lock().await;
            movements.drain().map(|(_, handle)| handle).collect()
        };
        if !cancelled.is_empty() {
            info!(
                "Stop requested for {}: cancelling {} movement(s)",
                self.address,
                cancelled.len()
            );
        }
        for handle in &cancelled {
            handle.cancel();
        }

        if let Some(watchdog) = self.watchdog.lock().await.take() {
            watchdog.abort();
        }

        let mut guard = self.link.lock().await;
        if let Some(mut active) = guard.take() {
            if active.is_connected().await {
                info!("Disconnecting bed {} after stop", self.address);
                if let Err(err) = active.disconnect().await {
                    warn!("Disconnect after stop failed: {}", err);
                }
            }
        }
    }

    /// Apply a named preset from the static table
    ///
    /// Runs [`stop_all`](Self::stop_all) first so no stale movement fights
    /// the preset, then spawns one fire-and-forget movement per configured
    /// axis toward that axis's up command; head and feet move concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownPreset`] before any state is touched if
    /// the name matches no table entry; an invalid request never disturbs
    /// an in-progress movement.
    pub async fn apply_preset(self: &Arc<Self>, name: &str) -> Result<Preset> {
        let Some(preset) = preset_by_name(name) else {
            warn!("Unknown preset requested: {}", name);
            return Err(BedError::UnknownPreset(name.to_string()));
        };

        info!("Applying preset {}", preset.name);
        self.stop_all().await;

        if let Some(steps) = preset.head_steps {
            self.spawn_movement(Command::HeadUp, steps, self.config.move_interval)
                .await;
        }
        if let Some(steps) = preset.feet_steps {
            self.spawn_movement(Command::FeetUp, steps, self.config.move_interval)
                .await;
        }

        Ok(*preset)
    }

    /// Current connection state, re-checked against the live handle
    pub async fn connection_status(&self) -> ConnectionStatus {
        let guard = self.link.lock().await;
        match guard.as_deref() {
            Some(link) => {
                if link.is_connected().await {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Disconnected
                }
            }
            None => ConnectionStatus::Disconnected,
        }
    }

    /// Snapshot of the currently running movements
    pub async fn active_movements(&self) -> Vec<MovementHandle> {
        self.movements.lock().await.values().cloned().collect()
    }

    /// Client-side position estimate
    pub async fn position(&self) -> BedPosition {
        *self.position.read().await
    }

    /// Desired step count for an axis (>= 1, with fallback)
    pub async fn desired_steps(&self, axis: Axis) -> u32 {
        self.steps.read().await.steps_for(axis)
    }

    /// Set the desired step count for an axis
    pub async fn set_desired_steps(&self, axis: Axis, steps: u32) {
        self.steps.write().await.set(axis, steps);
    }
}

fn interrupted(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
}

/// Registry of sessions keyed by peripheral address
///
/// One session per configured physical device, created at device-setup time
/// and torn down explicitly at device-removal time; removal stops everything
/// the session was doing and disconnects.
pub struct SessionRegistry {
    resolver: Arc<dyn LinkResolver>,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Arc<BedSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new(resolver: Arc<dyn LinkResolver>, config: SessionConfig) -> Self {
        Self {
            resolver,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the session for `address`
    pub async fn register(&self, address: &str) -> Arc<BedSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(address) {
            return Arc::clone(existing);
        }

        info!("Registering bed session for {}", address);
        let session = BedSession::new(address, Arc::clone(&self.resolver), self.config.clone());
        sessions.insert(address.to_string(), Arc::clone(&session));
        session
    }

    /// Look up an existing session
    pub async fn get(&self, address: &str) -> Option<Arc<BedSession>> {
        self.sessions.lock().await.get(address).map(Arc::clone)
    }

    /// Tear down and remove the session for `address`
    ///
    /// Returns `false` if no such session was registered.
    pub async fn remove(&self, address: &str) -> bool {
        let session = self.sessions.lock().await.remove(address);
        match session {
            Some(session) => {
                info!("Removing bed session for {}", address);
                session.stop_all().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    /// Shared record of everything that crossed the mock transport.
    struct WireLog {
        writes: StdMutex<Vec<(Vec<u8>, Instant)>>,
        connects: AtomicU32,
        disconnects: AtomicU32,
        fail_writes: AtomicBool,
        vanish: AtomicBool,
        current_link: StdMutex<Option<Arc<AtomicBool>>>,
    }

    impl WireLog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: StdMutex::new(Vec::new()),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                fail_writes: AtomicBool::new(false),
                vanish: AtomicBool::new(false),
                current_link: StdMutex::new(None),
            })
        }

        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        fn payloads(&self) -> Vec<Vec<u8>> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|(payload, _)| payload.clone())
                .collect()
        }

        fn write_instants(&self) -> Vec<Instant> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|(_, at)| *at)
                .collect()
        }
    }

    struct MockLink {
        log: Arc<WireLog>,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BedLink for MockLink {
        async fn connect(&mut self, _bound: Duration) -> Result<()> {
            self.log.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.log.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn write(&self, payload: &[u8]) -> Result<()> {
            if self.log.fail_writes.load(Ordering::SeqCst) {
                return Err(BedError::WriteFailed("mock transport fault".to_string()));
            }
            self.log
                .writes
                .lock()
                .unwrap()
                .push((payload.to_vec(), Instant::now()));
            Ok(())
        }
    }

    struct MockResolver {
        log: Arc<WireLog>,
    }

    #[async_trait]
    impl LinkResolver for MockResolver {
        async fn resolve(&self, _address: &str) -> Result<Option<Box<dyn BedLink>>> {
            if self.log.vanish.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let connected = Arc::new(AtomicBool::new(false));
            *self.log.current_link.lock().unwrap() = Some(Arc::clone(&connected));
            Ok(Some(Box::new(MockLink {
                log: Arc::clone(&self.log),
                connected,
            })))
        }
    }

    fn test_session() -> (Arc<BedSession>, Arc<WireLog>) {
        let log = WireLog::new();
        let resolver = Arc::new(MockResolver {
            log: Arc::clone(&log),
        });
        let session = BedSession::new(
            "AA:BB:CC:DD:EE:FF",
            resolver,
            SessionConfig::default(),
        );
        (session, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_connects_once_and_paces_writes() {
        let (session, log) = test_session();

        session
            .dispatch(Command::HeadUp, 3, Duration::from_millis(150))
            .await
            .unwrap();

        assert_eq!(log.connects.load(Ordering::SeqCst), 1);
        let payloads = log.payloads();
        assert_eq!(payloads.len(), 3);
        for payload in &payloads {
            assert_eq!(payload.as_slice(), Command::HeadUp.payload().as_ref());
        }

        let instants = log.write_instants();
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(150));
        }

        assert_eq!(session.connection_status().await, ConnectionStatus::Connected);
        assert!(session.watchdog.lock().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dispatches_do_not_interleave() {
        let (session, log) = test_session();

        let head = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .dispatch(Command::HeadUp, 3, Duration::from_millis(50))
                    .await
            })
        };
        let feet = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .dispatch(Command::FeetUp, 3, Duration::from_millis(50))
                    .await
            })
        };

        head.await.unwrap().unwrap();
        feet.await.unwrap().unwrap();

        let payloads = log.payloads();
        assert_eq!(payloads.len(), 6);
        // Whichever dispatch won the gate, its writes form one uninterrupted
        // run before the other's begin.
        assert_eq!(payloads[0], payloads[1]);
        assert_eq!(payloads[1], payloads[2]);
        assert_eq!(payloads[3], payloads[4]);
        assert_eq!(payloads[4], payloads[5]);
        assert_ne!(payloads[0], payloads[3]);
    }

    #[tokio::test]
    async fn test_unknown_command_never_touches_the_wire() {
        let (session, log) = test_session();

        let err = session
            .dispatch_named("hover", 1, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, BedError::UnknownCommand(name) if name == "hover"));
        assert_eq!(log.write_count(), 0);
        assert_eq!(log.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_address_reports_device_not_found() {
        let (session, log) = test_session();
        log.vanish.store(true, Ordering::SeqCst);

        let err = session.send(Command::Flat).await.unwrap_err();
        assert!(matches!(err, BedError::DeviceNotFound(_)));
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_write_failure_drops_the_link() {
        let (session, log) = test_session();

        session.send(Command::Light).await.unwrap();
        assert_eq!(log.connects.load(Ordering::SeqCst), 1);

        log.fail_writes.store(true, Ordering::SeqCst);
        let err = session.send(Command::Light).await.unwrap_err();
        assert!(matches!(err, BedError::WriteFailed(_)));
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );

        // Next dispatch starts clean and reconnects.
        log.fail_writes.store(false, Ordering::SeqCst);
        session.send(Command::Light).await.unwrap();
        assert_eq!(log.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_status_rechecks_the_handle() {
        let (session, log) = test_session();

        session.send(Command::Light).await.unwrap();
        assert_eq!(session.connection_status().await, ConnectionStatus::Connected);

        // The peripheral side dropping the connection is observed on the
        // next check, not served from a cache.
        let link_connected = log.current_link.lock().unwrap().clone().unwrap();
        link_connected.store(false, Ordering::SeqCst);
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_stop_all_on_idle_session_is_a_noop() {
        let (session, log) = test_session();

        session.stop_all().await;

        assert_eq!(log.write_count(), 0);
        assert_eq!(log.disconnects.load(Ordering::SeqCst), 0);
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_runs_to_completion() {
        let (session, log) = test_session();

        let handle = session
            .spawn_movement(Command::HeadUp, 5, Duration::from_millis(10))
            .await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(handle.state().await, MovementState::Completed);
        assert_eq!(handle.steps_issued(), 5);
        assert_eq!(log.write_count(), 5);
        assert_eq!(session.position().await.head, 5);
        assert!(session.active_movements().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_cancelled_midway_stops_issuing_steps() {
        let (session, log) = test_session();

        let handle = session
            .spawn_movement(Command::HeadUp, 10, Duration::from_millis(150))
            .await;

        // Steps land at 0ms, 150ms, 300ms; cancel between the third and
        // fourth.
        sleep(Duration::from_millis(325)).await;
        handle.cancel();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(handle.state().await, MovementState::Cancelled);
        assert_eq!(handle.steps_issued(), 3);
        assert_eq!(log.write_count(), 3);
        assert!(session.active_movements().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_is_idempotent_while_running() {
        let (session, _log) = test_session();

        let first = session
            .spawn_movement(Command::FeetUp, 50, Duration::from_millis(100))
            .await;
        let second = session
            .spawn_movement(Command::FeetUp, 50, Duration::from_millis(100))
            .await;

        assert!(Arc::ptr_eq(&first.cancelled, &second.cancelled));
        assert_eq!(session.active_movements().await.len(), 1);

        session.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_failure_is_silent_but_observable() {
        let (session, log) = test_session();

        let handle = session
            .spawn_movement(Command::FeetDown, 10, Duration::from_millis(50))
            .await;
        sleep(Duration::from_millis(75)).await;
        log.fail_writes.store(true, Ordering::SeqCst);
        sleep(Duration::from_secs(1)).await;

        assert_eq!(handle.state().await, MovementState::Failed);
        assert!(handle.steps_issued() < 10);
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );
        assert!(session.active_movements().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_cancels_movements_and_disconnects() {
        let (session, log) = test_session();

        let handle = session
            .spawn_movement(Command::HeadUp, 100, Duration::from_millis(100))
            .await;
        sleep(Duration::from_millis(250)).await;

        session.stop_all().await;
        let writes_at_stop = log.write_count();
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );

        // The cancelled task drains without issuing anything further.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.state().await, MovementState::Cancelled);
        assert_eq!(log.write_count(), writes_at_stop);
        assert!(session.active_movements().await.is_empty());
        assert!(session.watchdog.lock().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_watchdog_disconnects_exactly_once() {
        let (session, log) = test_session();

        session.send(Command::HeadUp).await.unwrap();
        assert_eq!(session.connection_status().await, ConnectionStatus::Connected);

        // A second dispatch inside the window resets the timer...
        sleep(Duration::from_secs(15)).await;
        session.send(Command::HeadUp).await.unwrap();

        // ...so nothing happens at the original deadline.
        sleep(Duration::from_secs(20)).await;
        assert_eq!(session.connection_status().await, ConnectionStatus::Connected);
        assert_eq!(log.disconnects.load(Ordering::SeqCst), 0);

        // The refreshed deadline fires once.
        sleep(Duration::from_secs(15)).await;
        assert_eq!(
            session.connection_status().await,
            ConnectionStatus::Disconnected
        );
        assert_eq!(log.disconnects.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(log.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_preset_disturbs_nothing() {
        let (session, _log) = test_session();

        let running = session
            .spawn_movement(Command::FeetUp, 50, Duration::from_millis(100))
            .await;
        sleep(Duration::from_millis(150)).await;

        let err = session.apply_preset("Siesta").await.unwrap_err();
        assert!(matches!(err, BedError::UnknownPreset(name) if name == "Siesta"));

        assert_eq!(running.state().await, MovementState::Running);
        assert!(!running.is_cancelled());
        assert_eq!(session.active_movements().await.len(), 1);

        session.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_preset_spawns_only_configured_axes() {
        let (session, _log) = test_session();

        let stale = session
            .spawn_movement(Command::FeetDown, 50, Duration::from_millis(100))
            .await;
        sleep(Duration::from_millis(150)).await;

        let preset = session.apply_preset("Reading").await.unwrap();
        assert_eq!(preset.head_steps, Some(20));
        assert_eq!(preset.feet_steps, None);

        // The stale movement was stopped, and exactly one new movement runs.
        assert!(stale.is_cancelled());
        let movements = session.active_movements().await;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].command(), Command::HeadUp);
        assert_eq!(movements[0].total_repeats(), 20);

        session.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_axis_uses_desired_steps() {
        let (session, _log) = test_session();

        session.set_desired_steps(Axis::Head, 4).await;
        let head = session.move_axis(Axis::Head, MoveDirection::Up).await;
        assert_eq!(head.total_repeats(), 4);

        // The feet axis was never configured and falls back to the default.
        let feet = session.move_axis(Axis::Feet, MoveDirection::Down).await;
        assert_eq!(feet.total_repeats(), 10);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(head.state().await, MovementState::Completed);
        assert_eq!(session.position().await.head, 4);
        // Feet started flat; moving down clamps at zero.
        assert_eq!(session.position().await.feet, 0);
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let log = WireLog::new();
        let resolver = Arc::new(MockResolver {
            log: Arc::clone(&log),
        });
        let registry = SessionRegistry::new(resolver, SessionConfig::default());

        let first = registry.register("AA:BB:CC:DD:EE:FF").await;
        let again = registry.register("AA:BB:CC:DD:EE:FF").await;
        assert!(Arc::ptr_eq(&first, &again));

        assert!(registry.get("AA:BB:CC:DD:EE:FF").await.is_some());
        assert!(registry.remove("AA:BB:CC:DD:EE:FF").await);
        assert!(registry.get("AA:BB:CC:DD:EE:FF").await.is_none());
        assert!(!registry.remove("AA:BB:CC:DD:EE:FF").await);
    }
}
