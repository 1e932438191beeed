//! Read-only view of compositor windows, as far as the bus service needs it.
//!
//! The service never owns windows. It sees them through [`Compositor`], which the host
//! implements over its own window list, and through [`Toplevel`] for the few string fields that
//! end up in a [`WindowSnapshot`].

use std::fmt;

use crate::utils::id::IdCounter;

pub mod snapshot;
pub use snapshot::WindowSnapshot;

static WINDOW_IDS: IdCounter = IdCounter::new();

/// Opaque token identifying a live window.
///
/// Rendered as `0x<hex>` on the bus. The token is server-assigned and never derived from a
/// memory address; clients must treat it as opaque and only hand it back to `FocusWindow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl WindowId {
    /// Allocates a fresh, process-unique id.
    pub fn next() -> Self {
        Self(WINDOW_IDS.next())
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Parses an id as published by [`fmt::Display`].
    ///
    /// The `0x` prefix is optional and case-insensitive. Returns `None` for anything that is not
    /// entirely a base-16 number.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() || digits.starts_with('+') {
            return None;
        }
        u64::from_str_radix(digits, 16).ok().map(Self)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A live window as seen by the bus service.
pub trait Toplevel {
    fn id(&self) -> WindowId;

    /// Window title, if the client has set one.
    fn title(&self) -> Option<&str>;

    /// Wayland app id, if the client has set one.
    fn app_id(&self) -> Option<&str>;
}

/// The part of the compositor runtime the bus service consumes.
pub trait Compositor {
    type Window: Toplevel;

    /// Live windows in the compositor's own enumeration order.
    fn windows(&self) -> impl Iterator<Item = &Self::Window> + '_;

    /// Focuses the window and raises it to the top of the stack.
    fn focus_and_raise(&mut self, id: WindowId);

    fn find_window(&self, id: WindowId) -> Option<&Self::Window> {
        self.windows().find(|window| window.id() == id)
    }
}
