//! The `msg` subcommand: talks to a running service over the session bus.

use std::pin::pin;

use anyhow::Context;
use futures_util::StreamExt;
use serde_json::json;
use zbus::proxy::CacheProperties;

use crate::cli::Msg;
use crate::dbus::interface::WindowSignal;
use crate::window::snapshot::WindowSnapshot;

#[zbus::proxy(
    interface = "com.dwl.DBus.Interface",
    default_service = "com.dwl.DBus",
    default_path = "/com/dwl/DBus"
)]
trait DwlBus {
    fn focus_window(&self, window: &str) -> zbus::Result<String>;

    fn get_windows(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn message(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn set_message(&self, value: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn count(&self) -> zbus::Result<i32>;

    #[zbus(signal)]
    fn window_focused(&self, window: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn window_opened(&self, window: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn window_closed(&self, window: &str) -> zbus::Result<()>;
}

pub fn handle_msg(msg: Msg, json: bool) -> anyhow::Result<()> {
    match msg {
        Msg::EventStream => return async_io::block_on(event_stream(json)),
        Msg::Windows => {
            let windows = proxy()?
                .get_windows()
                .context("error calling GetWindows")?;
            if json {
                println!("{windows}");
            } else {
                print!("{}", describe_windows(&windows));
            }
        }
        Msg::Focus { id } => {
            let echoed = proxy()?
                .focus_window(&id)
                .context("error calling FocusWindow")?;
            if json {
                println!("{}", json!(echoed));
            } else {
                println!("Requested focus for {echoed}");
            }
        }
        Msg::Message { value: Some(value) } => {
            proxy()?
                .set_message(&value)
                .context("error setting Message")?;
        }
        Msg::Message { value: None } => {
            let message = proxy()?.message().context("error reading Message")?;
            if json {
                println!("{}", json!(message));
            } else {
                println!("{message}");
            }
        }
        Msg::Count => {
            let count = proxy()?.count().context("error reading Count")?;
            println!("{count}");
        }
    }

    Ok(())
}

fn proxy() -> anyhow::Result<DwlBusProxyBlocking<'static>> {
    let conn = zbus::blocking::Connection::session().context("error connecting to session bus")?;
    // The service never announces property changes, so cached values would go stale.
    DwlBusProxyBlocking::builder(&conn)
        .cache_properties(CacheProperties::No)
        .build()
        .context("error creating a proxy")
}

/// Human-readable form of a `GetWindows` reply.
fn describe_windows(windows: &str) -> String {
    match serde_json::from_str::<Vec<WindowSnapshot>>(windows) {
        Ok(windows) if windows.is_empty() => "No windows.\n".to_owned(),
        Ok(windows) => windows.iter().map(describe_window).collect(),
        // Titles with backslashes or control characters are not valid JSON.
        Err(_) => format!("{windows}\n"),
    }
}

fn describe_window(window: &WindowSnapshot) -> String {
    format!(
        "Window ID {}:\n  Title: \"{}\"\n  App ID: \"{}\"\n",
        window.id, window.title, window.app_id
    )
}

async fn event_stream(json: bool) -> anyhow::Result<()> {
    let conn = zbus::Connection::session()
        .await
        .context("error connecting to session bus")?;
    let proxy = DwlBusProxy::builder(&conn)
        .cache_properties(CacheProperties::No)
        .build()
        .await
        .context("error creating a proxy")?;

    let mut signals = pin!(proxy
        .inner()
        .receive_all_signals()
        .await
        .context("error subscribing to signals")?);

    if !json {
        println!("Started reading events.");
    }

    while let Some(message) = signals.next().await {
        let header = message.header();
        let Some(signal) = header
            .member()
            .and_then(|member| WindowSignal::from_name(member.as_str()))
        else {
            continue;
        };

        let body = message.body();
        let payload: String = match body.deserialize() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("error parsing {} body: {err:?}", signal.name());
                continue;
            }
        };

        if json {
            let window = serde_json::from_str::<serde_json::Value>(&payload)
                .unwrap_or(serde_json::Value::String(payload));
            println!("{}", json!({ signal.name(): window }));
            continue;
        }

        match serde_json::from_str::<WindowSnapshot>(&payload) {
            Ok(window) => {
                let what = match signal {
                    WindowSignal::Focused => "focused",
                    WindowSignal::Opened => "opened",
                    WindowSignal::Closed => "closed",
                };
                println!(
                    "Window {what}: {} \"{}\" ({})",
                    window.id, window.title, window.app_id
                );
            }
            Err(_) => println!("{}: {payload}", signal.name()),
        }
    }

    Ok(())
}
