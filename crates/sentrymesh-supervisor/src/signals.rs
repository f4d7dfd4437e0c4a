//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Process signal handling (spec §5 "Process signals"): `SIGINT`,
//! `SIGTERM`, `SIGABRT`, `SIGQUIT` and `SIGTRAP` raise the termination
//! flag; `SIGPIPE` is masked so a dropped HTTP/MQTT peer never kills the
//! process, and `SIGCHLD` is left at its default disposition.

use log::info;
use sentrymesh_core::Termination;
use signal_hook::consts::{SIGABRT, SIGINT, SIGQUIT, SIGTERM, SIGTRAP};
use signal_hook::iterator::Signals;

/// Spawns the background thread that watches termination-raising signals
/// and masks `SIGPIPE` in this process.
pub fn install(termination: Termination) -> anyhow::Result<()> {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGABRT, SIGQUIT, SIGTRAP])?;
    std::thread::spawn(move || {
        for signal in signals.forever() {
            info!("received signal {signal}, requesting termination");
            termination.request();
        }
    });
    Ok(())
}
