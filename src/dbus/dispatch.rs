//! Turns bus requests into reads of compositor state or focus changes.
//!
//! Runs on the host thread, inside a pump turn, with exclusive access to the compositor. Nothing
//! here blocks and nothing keeps references across turns.

use zbus::fdo;

use super::interface::Property;
use crate::window::snapshot::serialize_windows;
use crate::window::{Compositor, WindowId};

/// Value of `Message` until a client sets one.
pub const DEFAULT_MESSAGE: &str = "Default Message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetWindows,
    FocusWindow { window: String },
    GetProperty(Property),
    SetProperty(PropertyValue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Message(String),
    Count(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Int(i32),
    Done,
}

/// Properties published on the interface.
#[derive(Debug, Default)]
pub struct PublishedProperties {
    message: Option<String>,
    count: i32,
}

impl PropertyValue {
    pub fn property(&self) -> Property {
        match self {
            Self::Message(_) => Property::Message,
            Self::Count(_) => Property::Count,
        }
    }
}

impl Reply {
    pub fn into_text(self) -> fdo::Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(mismatched(other)),
        }
    }

    pub fn into_int(self) -> fdo::Result<i32> {
        match self {
            Self::Int(value) => Ok(value),
            other => Err(mismatched(other)),
        }
    }
}

fn mismatched(reply: Reply) -> fdo::Error {
    error!("reply {reply:?} does not match its request");
    fdo::Error::Failed("internal error".to_owned())
}

impl PublishedProperties {
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_MESSAGE)
    }

    pub fn set_message(&mut self, message: String) {
        self.message = Some(message);
    }

    pub fn count<C: Compositor>(&mut self, _compositor: &C) -> i32 {
        // FIXME: decide whether Count reports windows, outputs or both. Until then it is always 0
        // and clients must not read meaning into it.
        self.count = 0;
        self.count
    }
}

/// Handles one request against the compositor.
pub fn dispatch<C: Compositor>(
    properties: &mut PublishedProperties,
    compositor: &mut C,
    request: Request,
) -> fdo::Result<Reply> {
    match request {
        Request::GetWindows => Ok(Reply::Text(serialize_windows(compositor.windows()))),
        Request::FocusWindow { window } => {
            match WindowId::parse(&window) {
                Some(id) if compositor.find_window(id).is_some() => {
                    debug!("focusing window {id}");
                    compositor.focus_and_raise(id);
                }
                // The window may have closed since the caller listed it.
                _ => trace!("FocusWindow: no live window matches {window:?}"),
            }
            Ok(Reply::Text(window))
        }
        Request::GetProperty(Property::Message) => {
            Ok(Reply::Text(properties.message().to_owned()))
        }
        Request::GetProperty(Property::Count) => Ok(Reply::Int(properties.count(compositor))),
        Request::SetProperty(value) => match value {
            PropertyValue::Message(message) => {
                properties.set_message(message);
                Ok(Reply::Done)
            }
            PropertyValue::Count(_) => Err(fdo::Error::PropertyReadOnly(format!(
                "The '{}' property is read-only.",
                Property::Count.name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Toplevel;

    struct Win {
        id: WindowId,
        title: String,
        app_id: String,
    }

    impl Toplevel for Win {
        fn id(&self) -> WindowId {
            self.id
        }

        fn title(&self) -> Option<&str> {
            Some(&self.title)
        }

        fn app_id(&self) -> Option<&str> {
            Some(&self.app_id)
        }
    }

    #[derive(Default)]
    struct Recording {
        windows: Vec<Win>,
        focused: Vec<WindowId>,
    }

    impl Recording {
        fn with_windows(raw: &[(u64, &str, &str)]) -> Self {
            let windows = raw
                .iter()
                .map(|&(id, title, app_id)| Win {
                    id: WindowId::from_raw(id),
                    title: title.to_owned(),
                    app_id: app_id.to_owned(),
                })
                .collect();
            Self {
                windows,
                focused: Vec::new(),
            }
        }
    }

    impl Compositor for Recording {
        type Window = Win;

        fn windows(&self) -> impl Iterator<Item = &Win> + '_ {
            self.windows.iter()
        }

        fn focus_and_raise(&mut self, id: WindowId) {
            self.focused.push(id);
        }
    }

    fn run(
        props: &mut PublishedProperties,
        comp: &mut Recording,
        request: Request,
    ) -> fdo::Result<Reply> {
        dispatch(props, comp, request)
    }

    #[test]
    fn get_windows_lists_in_enumeration_order() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::with_windows(&[(0x20, "b", "two"), (0x10, "a", "one")]);

        let reply = run(&mut props, &mut comp, Request::GetWindows).unwrap();
        assert_eq!(
            reply,
            Reply::Text(
                r#"[{ "id": "0x20", "title": "b", "app_id": "two" },{ "id": "0x10", "title": "a", "app_id": "one" }]"#
                    .to_owned()
            )
        );
    }

    #[test]
    fn get_windows_with_no_windows() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::default();
        let reply = run(&mut props, &mut comp, Request::GetWindows).unwrap();
        assert_eq!(reply, Reply::Text("[]".to_owned()));
    }

    #[test]
    fn focus_matching_window_focuses_once_and_echoes() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::with_windows(&[(0x10, "a", "one"), (0x2f, "b", "two")]);

        let reply = run(
            &mut props,
            &mut comp,
            Request::FocusWindow {
                window: "0x2f".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(reply, Reply::Text("0x2f".to_owned()));
        assert_eq!(comp.focused, [WindowId::from_raw(0x2f)]);
    }

    #[test]
    fn focus_accepts_unprefixed_hex() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::with_windows(&[(0x2f, "b", "two")]);

        let reply = run(
            &mut props,
            &mut comp,
            Request::FocusWindow {
                window: "2F".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(reply, Reply::Text("2F".to_owned()));
        assert_eq!(comp.focused, [WindowId::from_raw(0x2f)]);
    }

    #[test]
    fn focus_without_match_succeeds_and_does_nothing() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::with_windows(&[(0x10, "a", "one")]);

        for window in ["0x11", "not a window", "", "0x0"] {
            let reply = run(
                &mut props,
                &mut comp,
                Request::FocusWindow {
                    window: window.to_owned(),
                },
            )
            .unwrap();
            assert_eq!(reply, Reply::Text(window.to_owned()));
        }
        assert!(comp.focused.is_empty());
    }

    #[test]
    fn message_defaults_then_round_trips() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::default();

        let reply = run(
            &mut props,
            &mut comp,
            Request::GetProperty(Property::Message),
        )
        .unwrap();
        assert_eq!(reply, Reply::Text(DEFAULT_MESSAGE.to_owned()));

        let value = "héllo \"world\"\n".to_owned();
        let reply = run(
            &mut props,
            &mut comp,
            Request::SetProperty(PropertyValue::Message(value.clone())),
        )
        .unwrap();
        assert_eq!(reply, Reply::Done);

        let reply = run(
            &mut props,
            &mut comp,
            Request::GetProperty(Property::Message),
        )
        .unwrap();
        assert_eq!(reply, Reply::Text(value));
    }

    #[test]
    fn count_is_zero_placeholder() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::with_windows(&[(1, "a", "b"), (2, "c", "d")]);
        let reply = run(&mut props, &mut comp, Request::GetProperty(Property::Count)).unwrap();
        assert_eq!(reply, Reply::Int(0));
    }

    #[test]
    fn setting_count_is_always_rejected() {
        let mut props = PublishedProperties::default();
        let mut comp = Recording::default();

        props.set_message("changed".to_owned());
        for value in [0, 1, -5, i32::MAX] {
            let err = run(
                &mut props,
                &mut comp,
                Request::SetProperty(PropertyValue::Count(value)),
            )
            .unwrap_err();
            assert!(
                matches!(&err, fdo::Error::PropertyReadOnly(msg) if msg == "The 'Count' property is read-only."),
                "unexpected error: {err:?}"
            );
        }
    }

    #[test]
    fn reply_conversion_mismatch_is_internal_error() {
        assert_eq!(Reply::Text("x".to_owned()).into_text().unwrap(), "x");
        assert_eq!(Reply::Int(3).into_int().unwrap(), 3);
        assert!(matches!(
            Reply::Done.into_text(),
            Err(fdo::Error::Failed(_))
        ));
    }
}
