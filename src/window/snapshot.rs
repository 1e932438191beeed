//! Text records describing a window, as carried by `GetWindows` and the window signals.
//!
//! The record is a JSON-looking literal built by hand:
//!
//! ```text
//! { "id": "0x2a", "title": "Terminal", "app_id": "foot" }
//! ```
//!
//! The only sanitization applied is replacing `"` with `'` in the title. Backslashes and control
//! characters pass through untouched, so a title containing them produces a record that strict
//! JSON parsers will reject. Clients that need exact titles should not rely on these records.

use serde::{Deserialize, Serialize};

use super::Toplevel;

/// Momentary projection of a window's identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub id: String,
    pub title: String,
    pub app_id: String,
}

impl WindowSnapshot {
    pub fn of<W: Toplevel + ?Sized>(window: &W) -> Self {
        Self {
            id: window.id().to_string(),
            title: window.title().unwrap_or_default().replace('"', "'"),
            app_id: window.app_id().unwrap_or_default().to_owned(),
        }
    }

    /// Renders the record literal.
    pub fn to_record(&self) -> String {
        let mut buf = String::new();
        self.write_record(&mut buf);
        buf
    }

    fn write_record(&self, buf: &mut String) {
        buf.push_str("{ \"id\": \"");
        buf.push_str(&self.id);
        buf.push_str("\", \"title\": \"");
        buf.push_str(&self.title);
        buf.push_str("\", \"app_id\": \"");
        buf.push_str(&self.app_id);
        buf.push_str("\" }");
    }
}

/// Serializes a single window into its record literal.
pub fn serialize_window<W: Toplevel + ?Sized>(window: &W) -> String {
    WindowSnapshot::of(window).to_record()
}

/// Serializes windows into an array literal, preserving iteration order.
pub fn serialize_windows<'a, W, I>(windows: I) -> String
where
    W: Toplevel + 'a,
    I: IntoIterator<Item = &'a W>,
{
    let mut buf = String::from("[");
    for (idx, window) in windows.into_iter().enumerate() {
        if idx > 0 {
            buf.push(',');
        }
        WindowSnapshot::of(window).write_record(&mut buf);
    }
    buf.push(']');
    buf
}
