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

use std::path::Path;
use nix::mount::mount;
use crate::rootfs::{move_root_uninterrupted, SwitchError};
use super::{Command, ConnId, MountRequest, Request, Response};

/// The privileged operations a request can end up performing.
pub trait Host {
    fn mount(&mut self, req: &MountRequest) -> nix::Result<()>;
    fn move_root(&mut self, dir: &Path) -> Result<(), SwitchError>;
}

/// Performs the operations on the running system.
pub struct System;

impl Host for System {
    fn mount(&mut self, req: &MountRequest) -> nix::Result<()> {
        mount(Some(req.source.as_path()), req.target.as_path(),
              req.fstype.as_deref(), req.flags, req.data.as_deref())
    }

    fn move_root(&mut self, dir: &Path) -> Result<(), SwitchError> {
        move_root_uninterrupted(dir)
    }
}

/// Runs one request to completion: decode, validate, execute.
/// Exactly one response comes out, whatever the input.
pub fn dispatch<H: Host + ?Sized>(host: &mut H, conn: ConnId, raw: &[u8]) -> Response {
    let cmd = Request::decode(raw).and_then(|req| {
        if let Some(verb) = req.verb() {
            info!("[{}] {} request", conn, verb);
        }
        Command::parse(&req)
    });

    match cmd {
        Ok(cmd) => cmd.execute(host, conn),
        Err(e) => {
            info!("[{}] Protocol error: {}", conn, e);
            Response::ProtocolError
        }
    }
}
