//! In-memory compositor used by the `dwl-dbus` binary and by tests.
//!
//! Keeps windows in insertion order for enumeration and a separate bottom-to-top stacking order,
//! and records window events for the host to broadcast once per loop iteration.

use std::mem;

use crate::dbus::interface::WindowSignal;
use crate::window::{Compositor, Toplevel, WindowId};

/// A toplevel of the in-memory compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessWindow {
    id: WindowId,
    title: Option<String>,
    app_id: Option<String>,
}

/// A window event together with the window as it was when the event happened.
pub type WindowEvent = (WindowSignal, HeadlessWindow);

/// Compositor with no outputs and no clients. Windows are created and closed by the caller.
#[derive(Debug, Default)]
pub struct Headless {
    windows: Vec<HeadlessWindow>,
    /// Bottom to top.
    stacking: Vec<WindowId>,
    focused: Option<WindowId>,
    events: Vec<WindowEvent>,
}

impl HeadlessWindow {
    /// Creates an unmapped window with a fresh id.
    pub fn new(app_id: Option<String>, title: Option<String>) -> Self {
        Self {
            id: WindowId::next(),
            title,
            app_id,
        }
    }
}

impl Toplevel for HeadlessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }
}

impl Headless {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a new window on top of the stack.
    pub fn add_window(&mut self, app_id: impl Into<String>, title: impl Into<String>) -> WindowId {
        self.map_window(HeadlessWindow::new(
            Some(app_id.into()),
            Some(title.into()),
        ))
    }

    /// Maps `window` on top of the stack without focusing it and records `WindowOpened`.
    pub fn map_window(&mut self, window: HeadlessWindow) -> WindowId {
        let id = window.id;
        debug!("mapping window {id}");
        self.events.push((WindowSignal::Opened, window.clone()));
        self.windows.push(window);
        self.stacking.push(id);
        id
    }

    /// Unmaps a window and records `WindowClosed` with its last state.
    ///
    /// If it had focus, focus moves to the topmost remaining window. Returns `false` for an unknown
    /// id.
    pub fn close_window(&mut self, id: WindowId) -> bool {
        let Some(idx) = self.windows.iter().position(|w| w.id == id) else {
            return false;
        };

        debug!("closing window {id}");
        let window = self.windows.remove(idx);
        self.stacking.retain(|&x| x != id);
        self.events.push((WindowSignal::Closed, window));

        if self.focused == Some(id) {
            self.focused = None;
            if let Some(&top) = self.stacking.last() {
                self.focus_and_raise(top);
            }
        }

        true
    }

    /// Changes a window title. No event is recorded. Returns `false` for an unknown id.
    pub fn set_title(&mut self, id: WindowId, title: impl Into<String>) -> bool {
        match self.windows.iter_mut().find(|w| w.id == id) {
            Some(window) => {
                window.title = Some(title.into());
                true
            }
            None => false,
        }
    }

    /// The window that has keyboard focus, if any.
    pub fn focused(&self) -> Option<WindowId> {
        self.focused
    }

    /// Bottom to top.
    pub fn stacking_order(&self) -> &[WindowId] {
        &self.stacking
    }

    /// Takes the events recorded since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<WindowEvent> {
        mem::take(&mut self.events)
    }
}

impl Compositor for Headless {
    type Window = HeadlessWindow;

    fn windows(&self) -> impl Iterator<Item = &HeadlessWindow> + '_ {
        self.windows.iter()
    }

    /// Raises the window to the top and focuses it. `WindowFocused` is recorded only when focus
    /// actually changes. Unknown ids are ignored.
    fn focus_and_raise(&mut self, id: WindowId) {
        let Some(window) = self.windows.iter().find(|w| w.id == id) else {
            return;
        };

        self.stacking.retain(|&x| x != id);
        self.stacking.push(id);

        if self.focused != Some(id) {
            self.focused = Some(id);
            self.events.push((WindowSignal::Focused, window.clone()));
        }
    }
}
