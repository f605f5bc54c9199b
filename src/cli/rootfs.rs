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
use std::{
    io::{self, ErrorKind},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};
use nix::sched::{unshare, CloneFlags};
use structopt::StructOpt;
use serde::Serialize;
use crate::{
    consts::*,
    rootfs::{mount_proc, RootfsBuilder},
    util::has_sys_admin,
};
use super::ExitCode;

/// Run a command in a freshly built root filesystem
#[derive(StructOpt, PartialEq, Debug, Serialize)]
#[structopt(after_help("\
A new mount namespace is created, the root is switched to --dest (or a
temporary directory) populated from --source, and the command is executed
in place of nsguard."
))]
pub struct Rootfs {
    /// Directory holding the container image
    #[structopt(long)]
    source: PathBuf,

    /// Directory that becomes the new root. Defaults to a fresh directory in /tmp
    #[structopt(long)]
    dest: Option<PathBuf>,

    /// Mount a devtmpfs on /dev instead of binding a minimal set of devices
    #[structopt(long)]
    privileged: bool,

    /// Do not mount /proc and /sys in the new root
    #[structopt(long)]
    no_proc: bool,

    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// Command to run, with its arguments
    // Note: Type should be OsString, but structopt doesn't like it
    #[structopt(required = true)]
    pub command: Vec<String>,
}

impl super::CLI for Rootfs {
    fn run(self) -> Result<()> {
        let Self { source, dest, privileged, no_proc, command, verbose: _ } = self;

        ensure!(has_sys_admin()?, "CAP_SYS_ADMIN is required to build a root filesystem");

        unshare(CloneFlags::CLONE_NEWNS)
            .context("Failed to create a mount namespace")?;

        RootfsBuilder::new(source, dest, privileged).build()?;

        if !no_proc {
            mount_proc(Path::new("/"))?;
        }

        let (prog, args) = command.split_first()
            .ok_or_else(|| anyhow!("No command to run"))?;
        debug!("Executing {:?}", command);

        // exec() only returns on failure
        let err = Command::new(prog).args(args).exec();
        Err(exec_failure(prog, err))
    }
}

fn exec_failure(prog: &str, err: io::Error) -> anyhow::Error {
    let exit_code = match err.kind() {
        ErrorKind::NotFound => EXIT_CODE_COMMAND_NOT_FOUND,
        _ => EXIT_CODE_CANNOT_EXECUTE,
    };
    anyhow::Error::new(err)
        .context(format!("Failed to execute `{}`", prog))
        .context(ExitCode(exit_code))
}
