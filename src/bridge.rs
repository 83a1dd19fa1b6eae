//! Bridge supervisor: owns the UDP transport, the mDNS announcer and the
//! per-device event loops, and coordinates startup and shutdown.
//!
//! [Bridge::start] runs until the first of its concurrent activities
//! completes (by success or failure), then explicitly cancels and awaits the
//! remaining ones before tearing down discovery and the socket, and surfaces
//! the terminal activity's outcome. [Bridge::close] cancels the supervised
//! run from outside and waits for that teardown to finish; calling it twice
//! is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::announce::{matter_service_registration, Announcer};
use crate::commissioning::{CommissioningHandler, SecurityProvider, StubSecurity};
use crate::config::BridgeConfig;
use crate::device::{ButtonDriver, Device};
use crate::dispatch::{CommandArgs, Dispatcher};
use crate::endpoints::Registry;
use crate::error::BridgeError;
use crate::messages::Message;
use crate::onboarding;
use crate::transport::Transport;

const LIGHT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);
const COMMISSIONING_TICK: Duration = Duration::from_secs(5);

pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<Registry>,
    commissioning: Arc<Mutex<CommissioningHandler>>,
    cancel: CancellationToken,
    started: AtomicBool,
    local_addr: std::sync::Mutex<Option<std::net::SocketAddr>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_security(config, Box::new(StubSecurity))
    }

    /// Bridge with an externally supplied PASE security provider.
    pub fn with_security(config: BridgeConfig, provider: Box<dyn SecurityProvider>) -> Self {
        let registry = Arc::new(Registry::new());
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            config,
            registry,
            commissioning: Arc::new(Mutex::new(CommissioningHandler::new(provider))),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            local_addr: std::sync::Mutex::new(None),
            done_tx,
            done_rx,
        }
    }

    /// Address the UDP listener bound to, once [start](Self::start) got that
    /// far. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a device on the next endpoint. Must happen before
    /// [start](Self::start); the registry is read-only once network activity
    /// begins.
    pub fn register(&mut self, device: Option<Device>) {
        match Arc::get_mut(&mut self.registry) {
            Some(registry) => registry.register(device),
            None => log::warn!("register called after start, ignoring"),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn commissioned(&self) -> bool {
        self.commissioning.lock().await.commissioned()
    }

    /// Route a cluster command to a light endpoint. Invalid targets and
    /// unsupported commands are logged and dropped without a reply.
    pub async fn handle_light_command(
        &self,
        endpoint_id: u16,
        cluster_id: u16,
        command_id: u8,
        args: CommandArgs,
    ) {
        // The registry handle is shared only for the duration of the call,
        // so register() keeps exclusive ownership until start().
        let dispatcher = Dispatcher::new(self.registry.clone());
        if let Err(e) = dispatcher
            .dispatch(endpoint_id, cluster_id, command_id, args)
            .await
        {
            match e {
                BridgeError::UnsupportedCommand { .. } => log::debug!("{}", e),
                _ => log::error!("invalid light command target: {}", e),
            }
        }
    }

    /// Run the bridge until the first concurrent activity completes or
    /// [close](Self::close) is called.
    pub async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        log::info!("starting matter bridge for device {}", self.config.device_id);

        let matter = &self.config.matter;
        let transport = match Transport::bind(&format!("0.0.0.0:{}", matter.port)).await {
            Ok(t) => Arc::new(t),
            Err(e) => {
                // unblock a concurrent close() before aborting startup
                let _ = self.done_tx.send(true);
                return Err(e).context("matter bridge startup");
            }
        };
        if let Ok(addr) = transport.local_addr() {
            *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);
        }
        // port 0 in the config means an ephemeral port; advertise the real one
        let bound_port = self.local_addr().map(|a| a.port()).unwrap_or(matter.port);

        // Discovery is best effort; a machine without multicast still serves
        // the UDP port.
        let announcer = match Announcer::new().await {
            Ok(a) => {
                a.register_service(matter_service_registration(
                    &self.config.device_id,
                    &self.config.device_name,
                    bound_port,
                    matter.vendor_id,
                    matter.product_id,
                    matter.discriminator,
                    self.commissioned().await,
                ))
                .await;
                Some(a)
            }
            Err(e) => {
                log::warn!("mdns announcer unavailable: {:#}", e);
                None
            }
        };

        if let Err(e) = onboarding::print_pairing_info(
            &self.config.device_name,
            &self.config.device_id,
            matter.vendor_id,
            matter.product_id,
            matter.discriminator,
            matter.passcode,
        ) {
            log::warn!("failed to render pairing info: {:#}", e);
        }

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(udp_loop(
            transport.clone(),
            self.commissioning.clone(),
            self.cancel.child_token(),
        ));
        tasks.spawn(button_relay(
            self.registry.clone(),
            self.cancel.child_token(),
        ));
        tasks.spawn(light_monitor(self.cancel.child_token()));
        tasks.spawn(commissioning_tick(self.cancel.child_token()));

        // First completion ends the supervised run.
        let first = tasks.join_next().await;

        // Cancel and await every sibling so nothing keeps writing to the
        // socket we are about to release.
        self.cancel.cancel();
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                if !e.is_cancelled() {
                    log::warn!("bridge task ended abnormally: {}", e);
                }
            }
        }

        if let Some(announcer) = announcer {
            announcer
                .unregister_service(&self.config.device_name, "_matter._tcp.local")
                .await;
            announcer.shutdown();
        }
        drop(transport);
        log::info!("matter bridge stopped");
        let _ = self.done_tx.send(true);

        match first {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => Err(e).context("bridge task panicked"),
            None => Ok(()),
        }
    }

    /// Stop the bridge: cancel all activities and wait for the supervised
    /// run to finish tearing down. Idempotent.
    pub async fn close(&self) {
        log::info!("stopping matter bridge");
        self.cancel.cancel();
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut done = self.done_rx.clone();
        // wait_for returns immediately when the value is already true
        let _ = done.wait_for(|v| *v).await;
    }
}

/// Receive loop: strictly one datagram at a time, preserving arrival order
/// and message counter semantics.
async fn udp_loop(
    transport: Arc<Transport>,
    commissioning: Arc<Mutex<CommissioningHandler>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let Some((data, addr)) = transport.recv(&cancel).await? else {
            return Ok(());
        };
        log::info!("received matter packet from {}, size: {} bytes", addr, data.len());

        let msg = match Message::decode(&data) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping packet from {}: {}", addr, e);
                continue;
            }
        };
        log::debug!("matter message: {:?}", msg);

        if msg.session_id == 0 {
            log::info!("received commissioning message");
            let reply = {
                let mut handler = commissioning.lock().await;
                handler.handle(&msg)
            };
            match reply {
                Ok(reply) => {
                    if let Err(e) = transport.send_to(&reply, addr).await {
                        log::error!("failed to send commissioning reply to {}: {:#}", addr, e);
                    } else {
                        log::debug!("sent commissioning reply to {}, size: {} bytes", addr, reply.len());
                    }
                }
                Err(e) => log::error!("error processing commissioning message: {:#}", e),
            }
        } else {
            // Operational traffic needs an established secure session, which
            // the stub security provider never produces.
            log::debug!("received operational message on session {}", msg.session_id);
        }
    }
}

/// Relay press actions from every registered button. Ends when any button's
/// event source is exhausted, or on cancellation.
async fn button_relay(registry: Arc<Registry>, cancel: CancellationToken) -> Result<()> {
    let buttons: Vec<(u16, Arc<dyn ButtonDriver>)> = registry
        .buttons()
        .iter()
        .filter_map(|d| {
            let endpoint = registry.lookup_by_device(d)?.endpoint_id;
            match d {
                Device::Button(b) => Some((endpoint, b.clone())),
                Device::Light(_) => None,
            }
        })
        .collect();

    if buttons.is_empty() {
        cancel.cancelled().await;
        return Ok(());
    }

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    for (endpoint_id, button) in buttons {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                let action = tokio::select! {
                    action = button.next_action() => action,
                    _ = cancel.cancelled() => return Ok(()),
                };
                let Some(action) = action else {
                    return Ok(());
                };
                log::info!("button {} action: {:?}", button.name(), action);
                log::debug!(
                    "matter event on endpoint {}: switch cluster event 0x{:02x}",
                    endpoint_id,
                    action.switch_event()
                );
            }
        });
    }

    // First finished relay ends the activity; siblings are aborted when the
    // set drops.
    match tasks.join_next().await {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => Err(e.into()),
        None => Ok(()),
    }
}

/// Periodic no-op poll. Hook point for pushing light state changes to
/// subscribed controllers.
async fn light_monitor(cancel: CancellationToken) -> Result<()> {
    let mut interval = tokio::time::interval(LIGHT_MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

/// Periodic idle tick. Hook point for driving retransmissions once a real
/// PASE exchange exists.
async fn commissioning_tick(cancel: CancellationToken) -> Result<()> {
    let mut interval = tokio::time::interval(COMMISSIONING_TICK);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}
