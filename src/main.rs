#[macro_use]
extern crate tracing;

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use calloop::signals::{Signal, Signals};
use calloop::EventLoop;
use clap::Parser;
use directories::ProjectDirs;
use dwl_dbus::cli::{Cli, Sub};
use dwl_dbus::client::handle_msg;
use dwl_dbus::config::Config;
use dwl_dbus::state::State;
use dwl_dbus::utils::{version, IS_SYSTEMD_SERVICE};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "dwl_dbus=debug";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("RUST_BACKTRACE").is_none() {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .init();

    if env::var_os("NOTIFY_SOCKET").is_some() {
        IS_SYSTEMD_SERVICE.store(true, Ordering::Relaxed);

        #[cfg(not(feature = "systemd"))]
        warn!(
            "running as a systemd service, but systemd support is compiled out. \
             Are you sure you did not forget to set `--features systemd`?"
        );
    }

    let cli = Cli::parse();

    if let Some(subcommand) = cli.subcommand {
        match subcommand {
            Sub::Validate { config } => {
                let path = config_path(config).ok_or("no config path: home directory not found")?;
                Config::load(&path)?;
                info!("config is valid");
                return Ok(());
            }
            Sub::Msg { msg, json } => {
                handle_msg(msg, json)?;
                return Ok(());
            }
        }
    }

    info!("starting version {}", &version());

    let mut config = match config_path(cli.config) {
        Some(path) if path.exists() => Config::load(&path)
            .map_err(|err| warn!("{err:?}"))
            .unwrap_or_default(),
        Some(path) => {
            debug!("{path:?} does not exist, using the default config");
            Config::default()
        }
        None => Config::default(),
    };
    config.windows.extend(cli.windows);

    let mut event_loop = EventLoop::<State>::try_new()?;
    let handle = event_loop.handle();
    let mut state = State::new(&config, &handle)?;

    let loop_signal = event_loop.get_signal();
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    handle
        .insert_source(signals, move |event, _, _| {
            info!("received {:?}, shutting down", event.signal());
            loop_signal.stop();
        })
        .map_err(|err| err.error)?;

    #[cfg(feature = "systemd")]
    if IS_SYSTEMD_SERVICE.load(Ordering::Relaxed) {
        if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
            warn!("error notifying systemd: {err:?}");
        }
    }

    event_loop.run(None, &mut state, |state| state.refresh())?;

    state.shutdown(&handle);

    Ok(())
}

fn env_config_path() -> Option<PathBuf> {
    env::var_os("DWL_DBUS_CONFIG")
        .filter(|x| !x.is_empty())
        .map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    let Some(dirs) = ProjectDirs::from("", "", "dwl-dbus") else {
        warn!("error retrieving home directory");
        return None;
    };

    let mut path = dirs.config_dir().to_owned();
    path.push("config.json");
    Some(path)
}

/// Explicit path first, then the environment, then the user config directory.
fn config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path
        .or_else(env_config_path)
        .or_else(default_config_path)
}
