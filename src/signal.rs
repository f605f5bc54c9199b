//  Copyright 2020 Two Sigma Investments, LP.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use anyhow::{Result, Context};
use nix::sys::signal::{self, pthread_sigmask, SigmaskHow, SigSet};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

/// Signals that ask us to go away.
pub const TERMINATION_SIGNALS: &[libc::c_int] = &[SIGTERM, SIGINT];

/// Installs the handlers for SIGTERM and SIGINT. This must be done before
/// anyone could send us the signal, otherwise the default disposition kills
/// us with a non-zero status.
pub fn trap_termination_signals() -> Result<Signals> {
    Signals::new(TERMINATION_SIGNALS)
        .context("Failed to install termination signal handlers")
}

/// Blocks until a termination signal is delivered and returns it.
pub fn wait_for_termination(signals: &mut Signals) -> Option<libc::c_int> {
    let signal = signals.forever().next();
    if let Some(signal) = signal {
        info!("Received signal {}, terminating", signal);
    }
    signal
}

/// Runs `f` with SIGTERM, SIGINT and SIGHUP blocked. Pending signals are
/// delivered once the previous mask is restored.
/// Namespace surgery such as the root switch cannot be rolled back, so it
/// must not be cut in half by a signal.
pub fn with_termination_signals_blocked<R>(f: impl FnOnce() -> R) -> nix::Result<R> {
    let mut mask = SigSet::empty();
    for sig in &[signal::SIGTERM, signal::SIGINT, signal::SIGHUP] {
        mask.add(*sig);
    }

    let mut old_mask = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut old_mask))?;
    let result = f();
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&old_mask), None)?;

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_blocked_mask_is_restored() -> Result<()> {
        let inside = with_termination_signals_blocked(|| {
            SigSet::thread_get_mask().map(|m| m.contains(signal::SIGTERM))
        })??;
        assert!(inside);

        let after = SigSet::thread_get_mask()?;
        assert!(!after.contains(signal::SIGTERM));
        Ok(())
    }
}
