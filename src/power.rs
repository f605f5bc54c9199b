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

// Host power control from a privileged container, through the magic sysrq
// trigger of the host.

use anyhow::{Result, Context};
use std::{
    io::prelude::*,
    path::Path,
    fs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Poweroff,
    Reboot,
}

impl PowerAction {
    pub fn sysrq_key(self) -> u8 {
        match self {
            PowerAction::Poweroff => b'o',
            PowerAction::Reboot   => b'b',
        }
    }
}

/// Flushes filesystem buffers, then writes the sysrq key to `trigger_path`.
/// The trigger must exist: we never create it.
pub fn trigger(action: PowerAction, trigger_path: &Path) -> Result<()> {
    unsafe { libc::sync() };

    let mut trigger = fs::OpenOptions::new()
        .write(true)
        .open(trigger_path)
        .with_context(|| format!("Failed to open {}", trigger_path.display()))?;

    info!("Requesting {:?} through {}", action, trigger_path.display());
    trigger.write_all(&[action.sysrq_key()])
        .with_context(|| format!("Failed to write to {}", trigger_path.display()))?;

    Ok(())
}
