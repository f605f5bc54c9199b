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

// A minimal init for containers: it sits as pid 1, reaps orphans, and exits
// cleanly when asked to.

use anyhow::{Result, Context};
use nix::{
    errno::Errno,
    sys::wait::{waitpid, WaitPidFlag, WaitStatus},
    unistd::Pid,
};
use signal_hook::{
    consts::{SIGCHLD, SIGINT, SIGTERM},
    iterator::Signals,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ChildExited,
    TerminationRequested,
}

impl Event {
    pub fn from_signal(signal: libc::c_int) -> Option<Self> {
        match signal {
            SIGCHLD => Some(Event::ChildExited),
            SIGTERM | SIGINT => Some(Event::TerminationRequested),
            _ => None,
        }
    }
}

impl State {
    pub fn next(self, event: Event) -> Self {
        match (self, event) {
            (State::Running, Event::ChildExited) => State::Running,
            (_, Event::TerminationRequested) => State::Terminating,
            (State::Terminating, _) => State::Terminating,
        }
    }
}

/// Collects every child that has exited. Returns how many were reaped.
pub fn reap_children() -> Result<usize> {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                trace!("Reaped {:?}", status);
                reaped += 1;
            }
            Err(nix::Error::Sys(Errno::ECHILD)) => break,
            Err(nix::Error::Sys(Errno::EINTR)) => {}
            Err(e) => return Err(e).context("waitpid() failed"),
        }
    }
    Ok(reaped)
}

/// Runs until SIGTERM or SIGINT.
pub fn run() -> Result<()> {
    let mut signals = Signals::new(&[SIGCHLD, SIGTERM, SIGINT])
        .context("Failed to install signal handlers")?;

    // Children may have exited before the handlers were installed.
    reap_children()?;

    let mut state = State::Running;
    for event in signals.forever().filter_map(Event::from_signal) {
        if event == Event::ChildExited {
            reap_children()?;
        }
        state = state.next(event);
        if state == State::Terminating {
            info!("Termination requested");
            break;
        }
    }

    Ok(())
}
