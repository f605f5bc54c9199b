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
    protocol::System,
    server::{bind, Server},
    util::has_sys_admin,
};

/// Serve CHROOT and MOUNT requests on a Unix socket
#[derive(StructOpt, PartialEq, Debug, Serialize)]
#[structopt(after_help("\
Requests are not authenticated. The socket is only accessible to our uid."
))]
pub struct Serve {
    /// Socket path. Defaults to $NSGUARD_SOCKET, or /run/nsguard.sock
    #[structopt(long)]
    socket: Option<PathBuf>,

    /// Also append log lines to this file
    #[structopt(long)]
    pub log_file: Option<PathBuf>,

    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl super::CLI for Serve {
    fn run(self) -> Result<()> {
        let Self { socket, log_file: _, verbose: _ } = self;
        let socket = socket.unwrap_or_else(|| SOCKET_PATH.clone());

        // Requests will fail individually with EPERM. Not fatal, as the
        // supervisor may only be probing us.
        if !has_sys_admin()? {
            warn!("CAP_SYS_ADMIN is missing, privileged requests will fail");
        }

        let listener = bind(&socket)?;
        info!("Listening on {}", socket.display());

        Server::new(listener, System).run()
    }
}
