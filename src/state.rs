//! Host loop data of the `dwl-dbus` binary.

use calloop::LoopHandle;

use crate::config::Config;
use crate::dbus::{DBusHost, DBusService};
use crate::headless::Headless;

/// Everything the event loop callbacks get to touch.
pub struct State {
    pub compositor: Headless,
    /// `None` once the service has been cleaned up.
    pub dbus: Option<DBusService>,
}

impl State {
    /// Starts the bus service on `event_loop` and maps the configured windows.
    ///
    /// The windows' `WindowOpened` events are broadcast by the first [`State::refresh`] after the
    /// service becomes active, or dropped if it is still connecting.
    pub fn new(config: &Config, event_loop: &LoopHandle<'static, State>) -> anyhow::Result<Self> {
        let dbus = DBusService::init(event_loop, config.pump_interval())?;

        let mut state = Self {
            compositor: Headless::new(),
            dbus: Some(dbus),
        };

        for window in &config.windows {
            state
                .compositor
                .add_window(window.app_id.clone(), window.title.clone());
        }

        Ok(state)
    }

    /// Flushes compositor events to the bus. Runs once per loop iteration.
    pub fn refresh(&mut self) {
        let events = self.compositor.take_events();
        let Some(dbus) = &self.dbus else {
            return;
        };

        for (signal, window) in &events {
            dbus.emit_window_signal(*signal, window);
        }
    }

    /// Stops the bus service. Does nothing when called again.
    pub fn shutdown(&mut self, event_loop: &LoopHandle<'static, State>) {
        if let Some(dbus) = self.dbus.take() {
            dbus.cleanup(event_loop);
        }
    }
}

impl DBusHost for State {
    type Compositor = Headless;

    fn dbus_parts(&mut self) -> (Option<&mut DBusService>, &mut Headless) {
        (self.dbus.as_mut(), &mut self.compositor)
    }
}
