use std::sync::atomic::AtomicBool;

use git_version::git_version;

pub mod id;

pub static IS_SYSTEMD_SERVICE: AtomicBool = AtomicBool::new(false);

pub fn version() -> String {
    if let Some(v) = option_env!("DWL_DBUS_BUILD_VERSION_STRING") {
        return String::from(v);
    }

    const MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
    const MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
    const PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

    let commit =
        option_env!("DWL_DBUS_BUILD_COMMIT").unwrap_or(git_version!(fallback = "unknown commit"));

    if PATCH == "0" {
        format!("{MAJOR}.{MINOR} ({commit})")
    } else {
        format!("{MAJOR}.{MINOR}.{PATCH} ({commit})")
    }
}
