//! Window list and focus control served on the session bus.
//!
//! Two loops are involved. The host loop (calloop) owns all compositor state and must never
//! block. zbus has its own executor, which we build without its background thread, so it only
//! runs when the host loop's pump timer ticks it. Bus-side code therefore never touches the
//! compositor: interface methods hand a request to the host and the pump answers it within the
//! same turn, see [`DBusService::pump`].

use std::time::Duration;

use anyhow::{anyhow, Context};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};

use crate::window::snapshot::serialize_window;
use crate::window::{Compositor, Toplevel};

pub mod dispatch;
pub mod interface;
pub mod link;

use self::dispatch::{dispatch, PublishedProperties};
use self::interface::{
    Call, ToCompositor, WindowObject, WindowSignal, OBJECT_PATH, SERVICE_NAME,
};
use self::link::{Transport, ZbusLink};

/// Default cadence at which the bus executor is polled.
pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(150);

/// Upper bound on bus tasks run per pump step, so a flood of traffic cannot stall the host loop.
const MAX_TASKS_PER_STEP: usize = 64;

/// Where the service is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unstarted,
    /// Connecting to the bus; no connection yet.
    Acquiring,
    /// Object registered, signals go out.
    Active,
    /// The bus took the service name away. Calls are still served, signals are dropped.
    Lost,
    Terminated,
}

/// Host loop data that embeds the service.
///
/// Loop callbacks registered by the service receive the host data and use this to reach both the
/// service and the compositor it serves.
pub trait DBusHost: 'static {
    type Compositor: Compositor;

    fn dbus_parts(&mut self) -> (Option<&mut DBusService>, &mut Self::Compositor);
}

pub struct DBusService {
    lifecycle: Lifecycle,
    link: Option<Box<dyn Transport>>,
    to_compositor: async_channel::Sender<ToCompositor>,
    from_bus: async_channel::Receiver<ToCompositor>,
    properties: PublishedProperties,
    pump_interval: Duration,
    pump_token: Option<RegistrationToken>,
    connect_token: Option<RegistrationToken>,
}

impl DBusService {
    fn new(pump_interval: Duration) -> Self {
        let (to_compositor, from_bus) = async_channel::unbounded();
        Self {
            lifecycle: Lifecycle::Unstarted,
            link: None,
            to_compositor,
            from_bus,
            properties: PublishedProperties::default(),
            pump_interval,
            pump_token: None,
            connect_token: None,
        }
    }

    /// Starts the service on the host loop.
    ///
    /// Returns as soon as the pump is registered and the connection attempt is scheduled; the
    /// service is [`Lifecycle::Acquiring`] until the bus connection comes up. Fails only if the
    /// interface description does not match the handlers or a loop source cannot be created.
    pub fn init<H: DBusHost>(
        event_loop: &LoopHandle<'static, H>,
        pump_interval: Duration,
    ) -> anyhow::Result<Self> {
        let _span = debug_span!("DBusService::init").entered();

        interface::validate(interface::INTERFACE_XML)
            .context("error validating the D-Bus interface")?;

        let mut service = Self::new(pump_interval);
        let iface = WindowObject::new(service.to_compositor.clone());
        interface::validate_served(&iface)
            .context("error validating the served D-Bus interface")?;

        let (executor, scheduler) =
            calloop::futures::executor().context("error creating the connection executor")?;
        let token = event_loop
            .insert_source(executor, |rv, _, host: &mut H| {
                if let (Some(dbus), _) = host.dbus_parts() {
                    dbus.on_connected(rv);
                }
            })
            .map_err(|err| anyhow!("error inserting the connection executor: {}", err.error))?;
        service.connect_token = Some(token);

        if scheduler.schedule(connect(iface)).is_err() {
            event_loop.remove(token);
            return Err(anyhow!("the connection executor is gone"));
        }

        if let Err(err) = service.start_pump(event_loop) {
            event_loop.remove(token);
            return Err(err);
        }

        service.lifecycle = Lifecycle::Acquiring;
        debug!("connecting to the session bus for {SERVICE_NAME}");

        Ok(service)
    }

    /// Stops the service and releases everything it owns.
    ///
    /// Consumes the service, so it can only happen once. Dropping the connection makes the bus
    /// release the service name.
    pub fn cleanup<H: 'static>(mut self, event_loop: &LoopHandle<'static, H>) {
        if let Some(token) = self.pump_token.take() {
            event_loop.remove(token);
        }
        if let Some(token) = self.connect_token.take() {
            event_loop.remove(token);
        }

        self.from_bus.close();
        self.link = None;
        self.lifecycle = Lifecycle::Terminated;

        info!("stopped serving {SERVICE_NAME}");
    }

    /// Service already connected through `transport`, with no loop sources.
    #[cfg(test)]
    pub(crate) fn with_transport(pump_interval: Duration, transport: Box<dyn Transport>) -> Self {
        let mut service = Self::new(pump_interval);
        service.lifecycle = Lifecycle::Acquiring;
        service.on_bus_acquired(transport);
        service
    }

    /// Service waiting for a connection the caller builds, with no loop sources.
    #[cfg(test)]
    pub(crate) fn unconnected(pump_interval: Duration) -> Self {
        let mut service = Self::new(pump_interval);
        service.lifecycle = Lifecycle::Acquiring;
        service
    }

    #[cfg(test)]
    pub(crate) fn attach(&mut self, conn: zbus::Connection) {
        self.on_connected(Ok(conn));
    }

    /// Stands in for the bus side of the channel.
    #[cfg(test)]
    pub(crate) fn bus_sender(&self) -> async_channel::Sender<ToCompositor> {
        self.to_compositor.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn properties(&self) -> &PublishedProperties {
        &self.properties
    }

    pub fn pump_interval(&self) -> Duration {
        self.pump_interval
    }

    /// Broadcasts a window event.
    ///
    /// Fire and forget: unless the service is [`Lifecycle::Active`] the signal is dropped.
    pub fn emit_window_signal<W: Toplevel + ?Sized>(&self, signal: WindowSignal, window: &W) {
        let link = match (self.lifecycle, &self.link) {
            (Lifecycle::Active, Some(link)) => link,
            (lifecycle, _) => {
                trace!(
                    "dropping {} for {}: service is {lifecycle:?}",
                    signal.name(),
                    window.id()
                );
                return;
            }
        };

        debug!("emitting {} for {}", signal.name(), window.id());
        link.emit(signal, serialize_window(window));
    }

    /// Runs one turn of the bus executor against the compositor.
    ///
    /// A turn runs whatever bus tasks are ready, answers the requests they handed over, then runs
    /// ready tasks once more so that replies and queued signals are written out in this same turn.
    /// When nothing is ready every step returns immediately.
    pub fn pump<C: Compositor>(&mut self, compositor: &mut C) {
        let _span = trace_span!("DBusService::pump").entered();

        self.run_ready();
        while let Ok(msg) = self.from_bus.try_recv() {
            self.handle(msg, compositor);
        }
        self.run_ready();
    }

    fn run_ready(&self) -> usize {
        let Some(link) = &self.link else {
            return 0;
        };

        let mut ran = 0;
        while ran < MAX_TASKS_PER_STEP && link.try_tick() {
            ran += 1;
        }
        ran
    }

    fn handle<C: Compositor>(&mut self, msg: ToCompositor, compositor: &mut C) {
        match msg {
            ToCompositor::Call(Call { request, reply }) => {
                trace!("dispatching {request:?}");
                let rv = dispatch(&mut self.properties, compositor, request);
                if reply.try_send(rv).is_err() {
                    trace!("caller went away before the reply");
                }
            }
            ToCompositor::NameAcquired => {
                info!("service name '{SERVICE_NAME}' acquired");
                if self.lifecycle == Lifecycle::Lost {
                    self.lifecycle = Lifecycle::Active;
                }
            }
            ToCompositor::NameLost => {
                info!("service name '{SERVICE_NAME}' lost");
                if matches!(self.lifecycle, Lifecycle::Acquiring | Lifecycle::Active) {
                    self.lifecycle = Lifecycle::Lost;
                }
            }
        }
    }

    fn start_pump<H: DBusHost>(&mut self, event_loop: &LoopHandle<'static, H>) -> anyhow::Result<()> {
        let interval = self.pump_interval;
        let token = event_loop
            .insert_source(Timer::from_duration(interval), move |_, _, host: &mut H| {
                pump_host(host, interval)
            })
            .map_err(|err| anyhow!("error inserting the pump timer: {}", err.error))?;
        self.pump_token = Some(token);
        Ok(())
    }

    fn on_connected(&mut self, rv: anyhow::Result<zbus::Connection>) {
        match rv {
            Ok(conn) => {
                let link = ZbusLink::new(conn, self.to_compositor.clone());
                self.on_bus_acquired(Box::new(link));
            }
            Err(err) => {
                warn!("error connecting to the session bus: {err:?}");
                self.lifecycle = Lifecycle::Lost;
            }
        }
    }

    fn on_bus_acquired(&mut self, link: Box<dyn Transport>) {
        info!("serving {OBJECT_PATH} on the session bus");
        self.link = Some(link);
        self.lifecycle = Lifecycle::Active;
    }
}

/// Pump timer body.
fn pump_host<H: DBusHost>(host: &mut H, interval: Duration) -> TimeoutAction {
    match host.dbus_parts() {
        (Some(dbus), compositor) => {
            dbus.pump(compositor);
            TimeoutAction::ToDuration(interval)
        }
        (None, _) => TimeoutAction::Drop,
    }
}

async fn connect(iface: WindowObject) -> anyhow::Result<zbus::Connection> {
    let conn = zbus::connection::Builder::session()?
        .internal_executor(false)
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await?;
    Ok(conn)
}


/*
One pump turn, every `pump_interval` on the host loop:

  host loop (calloop)                 bus executor (zbus)                 remote caller
  -------------------                 -------------------                 -------------
  timer fires
    run_ready() ------------------->  socket reader parses call  <------- FocusWindow("0x2a")
                                      WindowBus::focus_window
                 <----- ToCompositor::Call ----+
    dispatch() against compositor
      focus_and_raise(0x2a)
    reply.try_send() ------------------------->+
    run_ready() ------------------->  method completes, reply written -> "0x2a"
                                      queued signals written ---------> WindowFocused(...)
  timer rescheduled (ToDuration)
*/
