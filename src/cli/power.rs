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


use anyhow::Result;
use std::path::PathBuf;
use structopt::StructOpt;
use serde::Serialize;
use crate::{
    consts::*,
    power::{trigger, PowerAction},
};

/// Power off the host
#[derive(StructOpt, PartialEq, Debug, Serialize)]
pub struct Poweroff {
    /// Sysrq trigger of the host. Defaults to $NSGUARD_SYSRQ_TRIGGER,
    /// or /host/proc/sysrq-trigger
    #[structopt(long)]
    trigger: Option<PathBuf>,

    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

/// Reboot the host
#[derive(StructOpt, PartialEq, Debug, Serialize)]
pub struct Reboot {
    /// Sysrq trigger of the host. Defaults to $NSGUARD_SYSRQ_TRIGGER,
    /// or /host/proc/sysrq-trigger
    #[structopt(long)]
    trigger: Option<PathBuf>,

    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

fn run_action(action: PowerAction, trigger_path: Option<PathBuf>) -> Result<()> {
    let trigger_path = trigger_path.unwrap_or_else(|| SYSRQ_TRIGGER_PATH.clone());
    trigger(action, &trigger_path)
}

impl super::CLI for Poweroff {
    fn run(self) -> Result<()> {
        run_action(PowerAction::Poweroff, self.trigger)
    }
}

impl super::CLI for Reboot {
    fn run(self) -> Result<()> {
        run_action(PowerAction::Reboot, self.trigger)
    }
}
