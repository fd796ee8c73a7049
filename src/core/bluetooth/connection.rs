//! Connection state machine
//! Owns the single active connection: connect, post-connect introspection,
//! liveness monitoring, disconnect and reconnect.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::events::{EventEmitter, LinkEvent};
use crate::core::bluetooth::gatt::{build_capabilities, read_standard_services};
use crate::core::bluetooth::invocation::{self, InvocationOutcome, Operation};
use crate::core::bluetooth::transport::{Adapters, TransportAdapter};
use crate::core::bluetooth::types::{
    CapabilityRecord, ConnectionContext, ConnectionSnapshot, ConnectionStatus, DeviceHandle,
    DeviceRecord, TransportFamily,
};
use crate::error::{LinkError, Notice};
use crate::utils::TaskHandle;

/// Timing knobs for the state machine
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub liveness_interval: Duration,
    /// Upper bound for the adapter connect call; `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Connect,
    Reconnect,
}

impl Attempt {
    fn status(&self) -> ConnectionStatus {
        match self {
            Self::Connect => ConnectionStatus::Connecting,
            Self::Reconnect => ConnectionStatus::Reconnecting,
        }
    }

    fn failure(&self, device_id: &str, detail: String) -> LinkError {
        let device_id = device_id.to_string();
        match self {
            Self::Connect => LinkError::ConnectFailed { device_id, detail },
            Self::Reconnect => LinkError::ReconnectFailed { device_id, detail },
        }
    }
}

enum ConnectError {
    TimedOut(Duration),
    Adapter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkLoss {
    AdapterEvent,
    LivenessPoll,
}

/// Device of the attempt in progress
struct PendingAttempt {
    family: TransportFamily,
    device_id: String,
    /// Set when the adapter reports the device gone before setup finished
    lost: bool,
}

impl PendingAttempt {
    fn of(device: &DeviceRecord) -> Self {
        Self {
            family: device.family,
            device_id: device.id.clone(),
            lost: false,
        }
    }

    fn matches(&self, family: TransportFamily, device_id: &str) -> bool {
        self.family == family && self.device_id == device_id
    }
}

struct LinkState {
    status: ConnectionStatus,
    context: Option<ConnectionContext>,
    last_device: Option<DeviceRecord>,
    pending: Option<PendingAttempt>,
    /// Incremented for every published connection
    session: u64,
    monitor: Option<TaskHandle>,
}

impl LinkState {
    /// Clears the connection and stops monitoring. Returns the device that
    /// was connected, if any.
    fn teardown(&mut self) -> Option<DeviceRecord> {
        if let Some(monitor) = self.monitor.take() {
            monitor.cancel();
        }
        self.status = ConnectionStatus::Disconnected;
        let device = self.context.take().map(|context| context.device);
        if let Some(device) = &device {
            self.last_device = Some(device.clone());
        }
        device
    }
}

struct Inner {
    adapters: Adapters,
    state: Mutex<LinkState>,
    events: EventEmitter,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
}

/// Connection manager for the active device
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub(crate) fn new(
        adapters: Adapters,
        events: EventEmitter,
        settings: ConnectionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let state = LinkState {
            status: ConnectionStatus::Disconnected,
            context: None,
            last_device: None,
            pending: None,
            session: 0,
            monitor: None,
        };
        Self {
            inner: Arc::new(Inner {
                adapters,
                state: Mutex::new(state),
                events,
                settings,
                shutdown,
            }),
        }
    }

    async fn state(&self) -> MutexGuard<'_, LinkState> {
        self.inner.state.lock().await
    }

    fn set_status(&self, state: &mut LinkState, status: ConnectionStatus) {
        state.status = status;
        self.inner.events.emit(LinkEvent::StatusChanged(status));
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state().await.status
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionStatus::Connected
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state().await;
        ConnectionSnapshot::of(state.status, state.context.as_ref())
    }

    /// Device of the last connection, kept after it ends
    pub async fn last_device(&self) -> Option<DeviceRecord> {
        self.state().await.last_device.clone()
    }

    /// Connects to `device`. Rejected while any connection is active or in progress.
    pub async fn connect(&self, device: &DeviceRecord) -> Result<ConnectionSnapshot, LinkError> {
        {
            let mut state = self.state().await;
            if state.status != ConnectionStatus::Disconnected {
                warn!(
                    "Connect to {} rejected, a connection is already {}",
                    device.id, state.status
                );
                return Err(LinkError::Conflict(state.status));
            }
            self.set_status(&mut state, ConnectionStatus::Connecting);
            state.pending = Some(PendingAttempt::of(device));
        }
        self.establish(device.clone(), Attempt::Connect).await
    }

    /// Connects again to the most recently connected device.
    pub async fn reconnect(&self) -> Result<ConnectionSnapshot, LinkError> {
        let device = {
            let mut state = self.state().await;
            if state.status != ConnectionStatus::Disconnected {
                return Err(LinkError::Conflict(state.status));
            }
            let device = state
                .last_device
                .clone()
                .ok_or(LinkError::NoPreviousDevice)?;
            self.set_status(&mut state, ConnectionStatus::Reconnecting);
            state.pending = Some(PendingAttempt::of(&device));
            device
        };
        info!("Reconnecting to {}", device.id);
        self.establish(device, Attempt::Reconnect).await
    }

    /// Connect, introspect and read standard services, then publish the
    /// context and start monitoring. The status only becomes `Connected`
    /// once the capability list is complete.
    async fn establish(
        &self,
        mut device: DeviceRecord,
        attempt: Attempt,
    ) -> Result<ConnectionSnapshot, LinkError> {
        let adapter = self.inner.adapters.for_family(device.family).clone();
        info!(
            "Device details - ID: {}, Name: {:?}, Transport: {}",
            device.id, device.name, device.family
        );

        let handle = match self.connect_with_timeout(adapter.as_ref(), &device.id).await {
            Ok(handle) => handle,
            Err(ConnectError::TimedOut(limit)) => {
                // The platform may still complete the connect after we gave up.
                if let Err(e) = adapter.disconnect(&device.id).await {
                    warn!("Failed to cancel timed out connect to {}: {}", device.id, e);
                }
                let detail = format!("timed out after {} seconds", limit.as_secs());
                return Err(self.fail(&device, attempt, detail).await);
            }
            Err(ConnectError::Adapter(detail)) => {
                return Err(self.fail(&device, attempt, detail).await);
            }
        };
        if device.name.is_none() {
            device.name = handle.name;
        }

        info!("Connection successful, discovering services...");
        let introspection = match adapter.retrieve_capabilities(&device.id).await {
            Ok(introspection) => introspection,
            Err(e) => {
                if let Err(e) = adapter.disconnect(&device.id).await {
                    warn!("Failed to drop half-open connection to {}: {}", device.id, e);
                }
                let detail = format!("service discovery failed: {}", e);
                return Err(self.fail(&device, attempt, detail).await);
            }
        };
        let capabilities = build_capabilities(&introspection);
        info!("Found {} characteristics", capabilities.len());
        let report = read_standard_services(adapter.as_ref(), &device.id, &introspection).await;
        let link_up = match adapter.is_connected(&device.id).await {
            Ok(up) => up,
            Err(e) => {
                warn!("Could not confirm link to {}: {}", device.id, e);
                true
            }
        };

        let snapshot = {
            let mut state = self.state().await;
            let lost = state.pending.take().is_some_and(|pending| pending.lost) || !link_up;
            let abandoned = self.inner.shutdown.is_cancelled() || state.status != attempt.status();
            if abandoned || lost {
                drop(state);
                if let Err(e) = adapter.disconnect(&device.id).await {
                    warn!("Failed to drop half-open connection to {}: {}", device.id, e);
                }
                let detail = if abandoned {
                    "connection abandoned"
                } else {
                    "device disconnected during setup"
                };
                return Err(self.fail(&device, attempt, detail.to_string()).await);
            }

            state.session += 1;
            let session = state.session;
            state.context = Some(ConnectionContext {
                device: device.clone(),
                family: device.family,
                capabilities,
                readings: report.readings,
                unreadable: report.failures,
            });
            state.last_device = Some(device.clone());
            self.set_status(&mut state, ConnectionStatus::Connected);
            state.monitor = Some(self.spawn_monitor(session, device.id.clone(), adapter));
            ConnectionSnapshot::of(state.status, state.context.as_ref())
        };

        info!("Connection and setup process completed for {}", device.id);
        self.inner.events.emit(LinkEvent::Connected(snapshot.clone()));
        Ok(snapshot)
    }

    async fn connect_with_timeout(
        &self,
        adapter: &dyn TransportAdapter,
        device_id: &str,
    ) -> Result<DeviceHandle, ConnectError> {
        let attempt = adapter.connect(device_id);
        let result = match self.inner.settings.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| ConnectError::TimedOut(limit))?,
            None => attempt.await,
        };
        result.map_err(|e| ConnectError::Adapter(e.to_string()))
    }

    async fn fail(&self, device: &DeviceRecord, attempt: Attempt, detail: String) -> LinkError {
        error!("Connection attempt to {} failed: {}", device.id, detail);
        let mut state = self.state().await;
        if state.status == attempt.status() {
            state.pending = None;
            self.set_status(&mut state, ConnectionStatus::Disconnected);
        }
        attempt.failure(&device.id, detail)
    }

    /// Polls the adapter on a fixed interval while connected.
    fn spawn_monitor(
        &self,
        session: u64,
        device_id: String,
        adapter: Arc<dyn TransportAdapter>,
    ) -> TaskHandle {
        let machine = self.clone();
        let period = self.inner.settings.liveness_interval;
        TaskHandle::spawn(&self.inner.shutdown, move |token| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match adapter.is_connected(&device_id).await {
                            Ok(true) => debug!("Device {} still connected", device_id),
                            Ok(false) => {
                                if !token.is_cancelled() {
                                    info!("Connection loss detected for {}", device_id);
                                    machine.handle_link_loss(session, LinkLoss::LivenessPoll).await;
                                }
                                break;
                            }
                            Err(e) => warn!("Connection check failed: {}", e),
                        }
                    }
                }
            }
            debug!("Liveness monitor for {} stopped", device_id);
        })
    }

    /// Called when the adapter reports that a device dropped.
    pub(crate) async fn on_adapter_disconnected(&self, family: TransportFamily, device_id: &str) {
        let session = {
            let mut state = self.state().await;
            let active = state
                .context
                .as_ref()
                .is_some_and(|context| context.family == family && context.device.id == device_id);
            if active {
                state.session
            } else {
                match state.pending.as_mut() {
                    Some(pending) if pending.matches(family, device_id) => {
                        info!("Device {} dropped while the connection was being set up", device_id);
                        pending.lost = true;
                    }
                    _ => debug!("Ignoring disconnect event for inactive device {}", device_id),
                }
                return;
            }
        };
        self.handle_link_loss(session, LinkLoss::AdapterEvent).await;
    }

    /// Tears down an unexpected disconnect and offers a reconnect.
    async fn handle_link_loss(&self, session: u64, cause: LinkLoss) {
        let device = {
            let mut state = self.state().await;
            if state.session != session || state.status != ConnectionStatus::Connected {
                debug!("Ignoring stale link loss ({:?})", cause);
                return;
            }
            let device = state.teardown();
            self.inner
                .events
                .emit(LinkEvent::StatusChanged(ConnectionStatus::Disconnected));
            device
        };
        let Some(device) = device else { return };

        warn!("Device {} disconnected unexpectedly ({:?})", device.id, cause);
        self.inner.events.emit(LinkEvent::Interrupted(device.clone()));
        self.inner
            .events
            .emit(LinkEvent::Notice(Notice::interrupted(device.display_name())));
    }

    /// Disconnects the active device at the user's request.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (device, session) = {
            let mut state = self.state().await;
            if state.status != ConnectionStatus::Connected {
                return Err(LinkError::NotConnected);
            }
            let Some(context) = state.context.as_ref() else {
                return Err(LinkError::NotConnected);
            };
            let device = context.device.clone();
            if let Some(monitor) = state.monitor.take() {
                monitor.cancel();
            }
            self.set_status(&mut state, ConnectionStatus::Disconnecting);
            (device, state.session)
        };

        info!("Disconnecting from device {}", device.id);
        let adapter = self.inner.adapters.for_family(device.family);
        match adapter.disconnect(&device.id).await {
            Ok(()) => info!("Successfully disconnected"),
            Err(e) => warn!("Adapter disconnect failed, clearing local state anyway: {}", e),
        }

        {
            let mut state = self.state().await;
            if state.session == session && state.status == ConnectionStatus::Disconnecting {
                state.teardown();
                self.inner
                    .events
                    .emit(LinkEvent::StatusChanged(ConnectionStatus::Disconnected));
                info!("Connected state cleared");
            }
        }
        self.inner.events.emit(LinkEvent::Disconnected(device));
        Ok(())
    }

    /// Runs an operation on a characteristic of the connected device.
    pub async fn invoke(
        &self,
        capability: &CapabilityRecord,
        operation: Operation,
    ) -> Result<InvocationOutcome, LinkError> {
        let device = {
            let state = self.state().await;
            match (&state.status, &state.context) {
                (ConnectionStatus::Connected, Some(context)) => context.device.clone(),
                _ => return Err(LinkError::NotConnected),
            }
        };
        let adapter = self.inner.adapters.for_family(device.family);
        invocation::invoke(adapter.as_ref(), &device.id, capability, operation).await
    }

    /// Stops monitoring without touching the adapter.
    pub(crate) async fn stop_monitoring(&self) {
        if let Some(monitor) = self.state().await.monitor.take() {
            monitor.cancel();
        }
    }
}
