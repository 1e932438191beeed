//! The live bus connection and the tasks running on its executor.

use std::pin::pin;

use anyhow::Context;
use async_channel::{Receiver, Sender};
use futures_util::{future, stream, FutureExt, StreamExt};
use zbus::fdo::{self, RequestNameReply};
use zbus::object_server::SignalEmitter;
use zbus::{Connection, Task};

use super::interface::{ToCompositor, WindowBus, WindowSignal, OBJECT_PATH, SERVICE_NAME};

/// Upper bound on cancelled tasks reaped when a link is dropped.
const MAX_REAP_TICKS: usize = 64;

/// What the service needs from the bus library.
pub trait Transport {
    /// Runs one ready task of the bus library's executor.
    ///
    /// Must never block. Returns `false` when nothing was ready.
    fn try_tick(&self) -> bool;

    /// Queues a broadcast signal carrying `payload`.
    fn emit(&self, signal: WindowSignal, payload: String);
}

/// zbus connection driven from the host loop.
///
/// The connection is built with its internal executor thread disabled, so its socket reader,
/// object server and our own tasks only make progress when [`Transport::try_tick`] is called.
pub struct ZbusLink {
    // Cleared in Drop before the connection goes away.
    tasks: Vec<Task<()>>,
    outgoing: Sender<(WindowSignal, String)>,
    conn: Connection,
}

impl ZbusLink {
    pub fn new(conn: Connection, to_compositor: Sender<ToCompositor>) -> Self {
        let (outgoing, queued) = async_channel::unbounded();

        let executor = conn.executor();
        let own = {
            let conn = conn.clone();
            async move {
                if let Err(err) = own_name(&conn, to_compositor).await {
                    warn!("error owning {SERVICE_NAME}: {err:?}");
                }
            }
        };
        let emit = {
            let conn = conn.clone();
            async move {
                if let Err(err) = emit_signals(&conn, queued).await {
                    warn!("error emitting window signals: {err:?}");
                }
            }
        };
        let tasks = vec![
            executor.spawn(own, "own service name"),
            executor.spawn(emit, "emit window signals"),
        ];

        Self {
            tasks,
            outgoing,
            conn,
        }
    }
}

impl Transport for ZbusLink {
    fn try_tick(&self) -> bool {
        // tick() resolves only after running a task, so a pending poll means nothing was ready.
        self.conn.executor().tick().now_or_never().is_some()
    }

    fn emit(&self, signal: WindowSignal, payload: String) {
        if let Err(err) = self.outgoing.try_send((signal, payload)) {
            warn!("error queueing {}: {err:?}", signal.name());
        }
    }
}

impl Drop for ZbusLink {
    fn drop(&mut self) {
        self.outgoing.close();
        self.tasks.clear();

        // Cancelled tasks release their connection handles when the executor next runs them.
        let executor = self.conn.executor();
        for _ in 0..MAX_REAP_TICKS {
            if executor.tick().now_or_never().is_none() {
                break;
            }
        }

        debug!("dropping bus connection, {SERVICE_NAME} will be released");
    }
}

/// Requests the service name and forwards ownership changes to the compositor.
///
/// Ownership is queued rather than refused when another client holds the name, so the bus hands
/// it to us later by itself and we only have to listen.
async fn own_name(conn: &Connection, to_compositor: Sender<ToCompositor>) -> anyhow::Result<()> {
    let proxy = fdo::DBusProxy::new(conn)
        .await
        .context("error creating a DBusProxy")?;

    // Subscribe before requesting so the initial NameAcquired is not missed.
    let acquired = proxy
        .receive_name_acquired()
        .await
        .context("error creating a NameAcquired stream")?
        .filter_map(|signal| {
            let ours = signal
                .args()
                .is_ok_and(|args| args.name().as_str() == SERVICE_NAME);
            future::ready(ours.then_some(ToCompositor::NameAcquired))
        });
    let lost = proxy
        .receive_name_lost()
        .await
        .context("error creating a NameLost stream")?
        .filter_map(|signal| {
            let ours = signal
                .args()
                .is_ok_and(|args| args.name().as_str() == SERVICE_NAME);
            future::ready(ours.then_some(ToCompositor::NameLost))
        });
    let mut events = pin!(stream::select(acquired, lost));

    let reply = conn
        .request_name_with_flags(SERVICE_NAME, Default::default())
        .await
        .context("error requesting the service name")?;
    match reply {
        RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {
            debug!("RequestName({SERVICE_NAME}): {reply:?}")
        }
        RequestNameReply::InQueue => {
            info!("{SERVICE_NAME} is owned by another client, waiting for it to be released")
        }
        _ => warn!("{SERVICE_NAME} is owned by another client: {reply:?}"),
    }

    while let Some(event) = events.next().await {
        if to_compositor.send(event).await.is_err() {
            break;
        }
    }

    Ok(())
}

/// Sends queued signals in the order they were queued.
async fn emit_signals(
    conn: &Connection,
    queued: Receiver<(WindowSignal, String)>,
) -> anyhow::Result<()> {
    let emitter = SignalEmitter::new(conn, OBJECT_PATH).context("error creating a SignalEmitter")?;

    while let Ok((signal, payload)) = queued.recv().await {
        let rv = match signal {
            WindowSignal::Focused => WindowBus::window_focused(&emitter, &payload).await,
            WindowSignal::Opened => WindowBus::window_opened(&emitter, &payload).await,
            WindowSignal::Closed => WindowBus::window_closed(&emitter, &payload).await,
        };
        if let Err(err) = rv {
            warn!("error emitting {}: {err:?}", signal.name());
        }
    }

    Ok(())
}
