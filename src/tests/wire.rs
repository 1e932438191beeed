//! The service on a real zbus connection, talking to a client over a socket pair.

use std::future::Future;
use std::os::unix::net::UnixStream;
use std::pin::pin;
use std::time::Duration;

use futures_util::future::{self, Either};
use futures_util::StreamExt;
use zbus::connection::Builder;
use zbus::message::Type;
use zbus::zvariant::Value;
use zbus::{Connection, Guid, MessageStream};

use crate::dbus::interface::{WindowObject, WindowSignal, INTERFACE_NAME, OBJECT_PATH};
use crate::dbus::{DBusService, Lifecycle, DEFAULT_PUMP_INTERVAL};
use crate::headless::Headless;
use crate::window::Compositor;

const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

struct Peer {
    service: DBusService,
    compositor: Headless,
    client: Connection,
}

impl Peer {
    fn new() -> Self {
        let mut service = DBusService::unconnected(DEFAULT_PUMP_INTERVAL);

        let (ours, theirs) = UnixStream::pair().unwrap();
        let server = Builder::async_io_unix_stream(ours)
            .server(Guid::generate())
            .unwrap()
            .p2p()
            .internal_executor(false)
            .serve_at(OBJECT_PATH, WindowObject::new(service.bus_sender()))
            .unwrap()
            .build();
        let client = Builder::async_io_unix_stream(theirs).p2p().build();
        let (server, client) = async_io::block_on(future::try_join(server, client)).unwrap();

        service.attach(server);
        assert_eq!(service.lifecycle(), Lifecycle::Active);

        Self {
            service,
            compositor: Headless::new(),
            client,
        }
    }

    /// Runs `fut` while pumping the service every millisecond, as the host loop would.
    fn pumped<F: Future>(&mut self, fut: F) -> F::Output {
        let service = &mut self.service;
        let compositor = &mut self.compositor;
        let pump = async move {
            for _ in 0..5000 {
                service.pump(compositor);
                async_io::Timer::after(Duration::from_millis(1)).await;
            }
        };

        async_io::block_on(async {
            match future::select(pin!(fut), pin!(pump)).await {
                Either::Left((output, _)) => output,
                Either::Right(((), _)) => panic!("no answer within 5 seconds"),
            }
        })
    }

    fn call<B>(&mut self, iface: &str, method: &str, body: &B) -> zbus::Result<zbus::Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        let client = self.client.clone();
        self.pumped(async move {
            client
                .call_method(None::<&str>, OBJECT_PATH, Some(iface), method, body)
                .await
        })
    }

    fn call_text<B>(&mut self, method: &str, body: &B) -> String
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        let reply = self.call(INTERFACE_NAME, method, body).unwrap();
        reply.body().deserialize().unwrap()
    }
}

fn error_of(rv: zbus::Result<zbus::Message>) -> (String, String) {
    match rv {
        Err(zbus::Error::MethodError(name, text, _)) => {
            (name.as_str().to_owned(), text.unwrap_or_default())
        }
        other => panic!("expected a method error, got {other:?}"),
    }
}

#[test]
fn methods_answer_over_the_wire() {
    let mut peer = Peer::new();
    let a = peer.compositor.add_window("foot", "Terminal");
    let b = peer.compositor.add_window("firefox", "Browser");

    assert_eq!(
        peer.call_text("GetWindows", &()),
        format!(
            r#"[{{ "id": "{a}", "title": "Terminal", "app_id": "foot" }},{{ "id": "{b}", "title": "Browser", "app_id": "firefox" }}]"#
        )
    );

    assert_eq!(peer.call_text("FocusWindow", &(a.to_string(),)), a.to_string());
    assert_eq!(peer.compositor.focused(), Some(a));

    assert_eq!(peer.call_text("FocusWindow", &("0xnope",)), "0xnope");
    assert_eq!(peer.compositor.focused(), Some(a));
}

#[test]
fn message_is_writable_over_the_wire() {
    let mut peer = Peer::new();

    peer.call(
        PROPERTIES,
        "Set",
        &(INTERFACE_NAME, "Message", Value::from("hello")),
    )
    .unwrap();
    assert_eq!(peer.service.properties().message(), "hello");

    let reply = peer
        .call(PROPERTIES, "Get", &(INTERFACE_NAME, "Message"))
        .unwrap();
    let value: zbus::zvariant::OwnedValue = reply.body().deserialize().unwrap();
    assert_eq!(String::try_from(value).unwrap(), "hello");
}

#[test]
fn count_write_is_read_only() {
    let mut peer = Peer::new();

    let rv = peer.call(PROPERTIES, "Set", &(INTERFACE_NAME, "Count", Value::from(5i32)));
    let (name, text) = error_of(rv);
    assert_eq!(name, "org.freedesktop.DBus.Error.PropertyReadOnly");
    assert_eq!(text, "The 'Count' property is read-only.");

    let reply = peer
        .call(PROPERTIES, "Get", &(INTERFACE_NAME, "Count"))
        .unwrap();
    let value: zbus::zvariant::OwnedValue = reply.body().deserialize().unwrap();
    assert_eq!(i32::try_from(value).unwrap(), 0);
}

#[test]
fn unknown_method_is_named_in_the_error() {
    let mut peer = Peer::new();

    let (name, text) = error_of(peer.call(INTERFACE_NAME, "Frobnicate", &()));
    assert_eq!(name, "org.freedesktop.DBus.Error.UnknownMethod");
    assert!(text.contains("Frobnicate"), "{text}");
}

#[test]
fn signals_reach_the_client_in_order() {
    let mut peer = Peer::new();
    let a = peer.compositor.add_window("foot", "Terminal");
    let b = peer.compositor.add_window("firefox", "Browser");

    let mut stream = MessageStream::from(&peer.client);
    for id in [a, b] {
        let window = peer.compositor.find_window(id).unwrap();
        peer.service.emit_window_signal(WindowSignal::Opened, window);
    }

    let mut received = Vec::new();
    while received.len() < 2 {
        let msg = peer.pumped(stream.next()).unwrap().unwrap();
        let header = msg.header();
        if header.message_type() != Type::Signal {
            continue;
        }
        let member = header.member().unwrap().to_string();
        let payload: String = msg.body().deserialize().unwrap();
        received.push((member, payload));
    }

    assert_eq!(
        received,
        [
            (
                "WindowOpened".to_owned(),
                format!(r#"{{ "id": "{a}", "title": "Terminal", "app_id": "foot" }}"#)
            ),
            (
                "WindowOpened".to_owned(),
                format!(r#"{{ "id": "{b}", "title": "Browser", "app_id": "firefox" }}"#)
            ),
        ]
    );
}
