//! The `com.dwl.DBus.Interface` object and its fixed description.
//!
//! [`WindowBus`] is what zbus serves at [`OBJECT_PATH`]. It runs on the bus executor and has no
//! access to compositor state: every method and property forwards a [`Request`] to the host
//! through a channel and waits for the reply, which the pump produces within the same turn.

use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{anyhow, bail, ensure, Context};
use async_trait::async_trait;
use zbus::message::{Header, Message};
use zbus::names::{InterfaceName, MemberName};
use zbus::object_server::{DispatchResult2, Interface, SignalEmitter};
use zbus::zvariant::{OwnedValue, Value};
use zbus::{fdo, interface, Connection, ObjectServer};
use zbus_xml::{ArgDirection, Node, PropertyAccess};

use super::dispatch::{PropertyValue, Reply, Request};

pub const SERVICE_NAME: &str = "com.dwl.DBus";
pub const OBJECT_PATH: &str = "/com/dwl/DBus";
pub const INTERFACE_NAME: &str = "com.dwl.DBus.Interface";

/// Introspection document the service is validated against at startup.
pub const INTERFACE_XML: &str = r#"<node>
  <interface name="com.dwl.DBus.Interface">
    <method name="FocusWindow">
      <arg type="s" name="window" direction="in"/>
      <arg type="s" name="window" direction="out"/>
    </method>
    <method name="GetWindows">
      <arg type="s" name="windows" direction="out"/>
    </method>
    <property name="Message" type="s" access="readwrite"/>
    <property name="Count" type="i" access="read"/>
    <signal name="WindowFocused">
      <arg type="s" name="window"/>
    </signal>
    <signal name="WindowOpened">
      <arg type="s" name="window"/>
    </signal>
    <signal name="WindowClosed">
      <arg type="s" name="window"/>
    </signal>
  </interface>
</node>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    FocusWindow,
    GetWindows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Message,
    Count,
}

/// Window events broadcast on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    Focused,
    Opened,
    Closed,
}

impl Method {
    pub const ALL: [Self; 2] = [Self::FocusWindow, Self::GetWindows];

    pub fn name(self) -> &'static str {
        match self {
            Self::FocusWindow => "FocusWindow",
            Self::GetWindows => "GetWindows",
        }
    }

    pub fn from_name(name: &str) -> fdo::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.name() == name)
            .ok_or_else(|| fdo::Error::UnknownMethod(format!("Unknown method: {name}")))
    }
}

impl Property {
    pub const ALL: [Self; 2] = [Self::Message, Self::Count];

    pub fn name(self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::Count => "Count",
        }
    }

    pub fn is_writable(self) -> bool {
        match self {
            Self::Message => true,
            Self::Count => false,
        }
    }

    pub fn from_name(name: &str) -> fdo::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|property| property.name() == name)
            .ok_or_else(|| fdo::Error::UnknownProperty(format!("Unknown property: {name}")))
    }
}

impl WindowSignal {
    pub const ALL: [Self; 3] = [Self::Focused, Self::Opened, Self::Closed];

    pub fn name(self) -> &'static str {
        match self {
            Self::Focused => "WindowFocused",
            Self::Opened => "WindowOpened",
            Self::Closed => "WindowClosed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|signal| signal.name() == name)
    }
}

/// Checks that `xml` describes exactly the members this crate implements.
pub fn validate(xml: &str) -> anyhow::Result<()> {
    let node = Node::from_reader(xml.as_bytes()).context("error parsing interface description")?;

    let Some(iface) = node
        .interfaces()
        .iter()
        .find(|iface| iface.name().as_str() == INTERFACE_NAME)
    else {
        bail!("interface description does not contain {INTERFACE_NAME}");
    };

    let mut methods = Vec::new();
    for method in iface.methods() {
        let name = method.name();
        let method = Method::from_name(name.as_str())
            .with_context(|| format!("described method {name} has no handler"))?;
        ensure!(!methods.contains(&method), "method {name} is described twice");
        methods.push(method);
    }
    if let Some(missing) = Method::ALL.into_iter().find(|m| !methods.contains(m)) {
        bail!("method {} is not described", missing.name());
    }

    let mut properties = Vec::new();
    for property in iface.properties() {
        let name = property.name();
        let known = Property::from_name(name.as_str())
            .with_context(|| format!("described property {name} has no handler"))?;
        let writable = matches!(
            property.access(),
            PropertyAccess::Write | PropertyAccess::ReadWrite
        );
        ensure!(
            writable == known.is_writable(),
            "property {name} access does not match its handler"
        );
        ensure!(!properties.contains(&known), "property {name} is described twice");
        properties.push(known);
    }
    if let Some(missing) = Property::ALL.into_iter().find(|p| !properties.contains(p)) {
        bail!("property {} is not described", missing.name());
    }

    let mut signals = Vec::new();
    for signal in iface.signals() {
        let name = signal.name();
        let known = WindowSignal::from_name(name.as_str())
            .ok_or_else(|| anyhow!("described signal {name} is never emitted"))?;
        ensure!(!signals.contains(&known), "signal {name} is described twice");
        signals.push(known);
    }
    if let Some(missing) = WindowSignal::ALL.into_iter().find(|s| !signals.contains(s)) {
        bail!("signal {} is not described", missing.name());
    }

    Ok(())
}

/// Checks that `iface` serves exactly the members in [`INTERFACE_XML`], with the same argument
/// names, types and property access.
pub fn validate_served<I: Interface>(iface: &I) -> anyhow::Result<()> {
    let mut served = String::from("<node>\n");
    iface.introspect_to_writer(&mut served, 1);
    served.push_str("</node>\n");

    compare_members(INTERFACE_XML, &served)
}

fn compare_members(described: &str, served: &str) -> anyhow::Result<()> {
    let described = members(described).context("error reading the interface description")?;
    let served = members(served).context("error reading the served interface")?;

    let missing: Vec<_> = described.iter().filter(|m| !served.contains(m)).collect();
    let extra: Vec<_> = served.iter().filter(|m| !described.contains(m)).collect();
    ensure!(
        missing.is_empty() && extra.is_empty(),
        "served interface differs from its description: \
         not served {missing:?}, not described {extra:?}"
    );

    Ok(())
}

/// One line per member of [`INTERFACE_NAME`] in `xml`, sorted. Annotations are ignored.
fn members(xml: &str) -> anyhow::Result<Vec<String>> {
    let node = Node::from_reader(xml.as_bytes()).context("error parsing interface description")?;
    let iface = node
        .interfaces()
        .iter()
        .find(|iface| iface.name().as_str() == INTERFACE_NAME)
        .ok_or_else(|| anyhow!("no {INTERFACE_NAME} in the interface description"))?;

    let arg = |arg: &zbus_xml::Arg, direction: Option<ArgDirection>| {
        let mut line = String::new();
        match direction {
            Some(ArgDirection::Out) => line.push_str("out "),
            Some(ArgDirection::In) => line.push_str("in "),
            None => (),
        }
        let _ = write!(line, "{} {}", arg.ty().inner(), arg.name().unwrap_or("_"));
        line
    };

    let mut lines = Vec::new();
    for method in iface.methods() {
        // Method arguments default to "in".
        let args: Vec<_> = method
            .args()
            .iter()
            .map(|a| arg(a, Some(a.direction().unwrap_or(ArgDirection::In))))
            .collect();
        lines.push(format!("method {}({})", method.name(), args.join(", ")));
    }
    for property in iface.properties() {
        let access = property.access();
        let access = match (access.read(), access.write()) {
            (true, true) => "readwrite",
            (true, false) => "read",
            _ => "write",
        };
        lines.push(format!(
            "property {} {} {access}",
            property.name(),
            property.ty().inner()
        ));
    }
    for signal in iface.signals() {
        let args: Vec<_> = signal.args().iter().map(|a| arg(a, None)).collect();
        lines.push(format!("signal {}({})", signal.name(), args.join(", ")));
    }

    lines.sort();
    Ok(lines)
}

/// Messages from the bus side to the host.
#[derive(Debug)]
pub enum ToCompositor {
    Call(Call),
    NameAcquired,
    NameLost,
}

/// A request waiting for the host to answer it.
#[derive(Debug)]
pub struct Call {
    pub request: Request,
    pub reply: async_channel::Sender<fdo::Result<Reply>>,
}

pub struct WindowBus {
    to_compositor: async_channel::Sender<ToCompositor>,
}

#[interface(name = "com.dwl.DBus.Interface")]
impl WindowBus {
    #[zbus(out_args("window"))]
    async fn focus_window(&self, window: String) -> fdo::Result<String> {
        self.request(Request::FocusWindow { window })
            .await?
            .into_text()
    }

    #[zbus(out_args("windows"))]
    async fn get_windows(&self) -> fdo::Result<String> {
        self.request(Request::GetWindows).await?.into_text()
    }

    #[zbus(property(emits_changed_signal = "false"))]
    async fn message(&self) -> fdo::Result<String> {
        self.request(Request::GetProperty(Property::Message))
            .await?
            .into_text()
    }

    #[zbus(property)]
    async fn set_message(&mut self, value: String) -> fdo::Result<()> {
        self.request(Request::SetProperty(PropertyValue::Message(value)))
            .await
            .map(drop)
    }

    // FIXME: Count is a placeholder that always reports zero, see PublishedProperties::count().
    #[zbus(property(emits_changed_signal = "false"))]
    async fn count(&self) -> fdo::Result<i32> {
        self.request(Request::GetProperty(Property::Count))
            .await?
            .into_int()
    }

    #[zbus(signal)]
    pub async fn window_focused(emitter: &SignalEmitter<'_>, window: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn window_opened(emitter: &SignalEmitter<'_>, window: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn window_closed(emitter: &SignalEmitter<'_>, window: &str) -> zbus::Result<()>;
}

impl WindowBus {
    pub fn new(to_compositor: async_channel::Sender<ToCompositor>) -> Self {
        Self { to_compositor }
    }

    async fn request(&self, request: Request) -> fdo::Result<Reply> {
        let (reply, from_compositor) = async_channel::bounded(1);
        let call = Call { request, reply };
        if let Err(err) = self.to_compositor.send(ToCompositor::Call(call)).await {
            warn!("error sending request to the compositor: {err:?}");
            return Err(fdo::Error::Failed("internal error".to_owned()));
        }

        match from_compositor.recv().await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("error receiving reply from the compositor: {err:?}");
                Err(fdo::Error::Failed("internal error".to_owned()))
            }
        }
    }
}

/// The object served at [`OBJECT_PATH`].
///
/// Forwards everything to [`WindowBus`], except that a write to the read-only `Count` goes to the
/// host like any other request, so callers get the host's `PropertyReadOnly` error rather than
/// zbus' `UnknownProperty`. The introspected access stays "read".
pub struct WindowObject(WindowBus);

impl WindowObject {
    pub fn new(to_compositor: async_channel::Sender<ToCompositor>) -> Self {
        Self(WindowBus::new(to_compositor))
    }
}

#[async_trait]
impl Interface for WindowObject {
    fn name() -> InterfaceName<'static> {
        <WindowBus as Interface>::name()
    }

    fn spawn_tasks_for_methods(&self) -> bool {
        self.0.spawn_tasks_for_methods()
    }

    async fn get(
        &self,
        property_name: &str,
        server: &ObjectServer,
        connection: &Connection,
        header: Option<&Header<'_>>,
        emitter: &SignalEmitter<'_>,
    ) -> Option<fdo::Result<OwnedValue>> {
        Interface::get(&self.0, property_name, server, connection, header, emitter).await
    }

    async fn get_all(
        &self,
        server: &ObjectServer,
        connection: &Connection,
        header: Option<&Header<'_>>,
        emitter: &SignalEmitter<'_>,
    ) -> fdo::Result<HashMap<String, OwnedValue>> {
        Interface::get_all(&self.0, server, connection, header, emitter).await
    }

    fn set<'call>(
        &'call self,
        property_name: &'call str,
        value: &'call Value<'_>,
        server: &'call ObjectServer,
        connection: &'call Connection,
        header: Option<&'call Header<'_>>,
        emitter: &'call SignalEmitter<'_>,
    ) -> DispatchResult2<'call> {
        if property_name != Property::Count.name() {
            return Interface::set(
                &self.0,
                property_name,
                value,
                server,
                connection,
                header,
                emitter,
            );
        }

        // Rejected whatever it holds.
        let count = i32::try_from(value).unwrap_or_default();
        DispatchResult2::Async(Box::pin(async move {
            self.0
                .request(Request::SetProperty(PropertyValue::Count(count)))
                .await
                .map(drop)
        }))
    }

    async fn set_mut(
        &mut self,
        property_name: &str,
        value: &Value<'_>,
        server: &ObjectServer,
        connection: &Connection,
        header: Option<&Header<'_>>,
        emitter: &SignalEmitter<'_>,
    ) -> Option<fdo::Result<()>> {
        Interface::set_mut(
            &mut self.0,
            property_name,
            value,
            server,
            connection,
            header,
            emitter,
        )
        .await
    }

    fn call<'call>(
        &'call self,
        server: &'call ObjectServer,
        connection: &'call Connection,
        msg: &'call Message,
        name: MemberName<'call>,
    ) -> DispatchResult2<'call> {
        Interface::call(&self.0, server, connection, msg, name)
    }

    fn call_mut<'call>(
        &'call mut self,
        server: &'call ObjectServer,
        connection: &'call Connection,
        msg: &'call Message,
        name: MemberName<'call>,
    ) -> DispatchResult2<'call> {
        Interface::call_mut(&mut self.0, server, connection, msg, name)
    }

    fn introspect_to_writer(&self, writer: &mut dyn std::fmt::Write, level: usize) {
        self.0.introspect_to_writer(writer, level)
    }
}
