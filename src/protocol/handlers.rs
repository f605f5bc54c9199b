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

use std::path::PathBuf;
use nix::mount::MsFlags;
use super::{
    ConnId, Host, ProtocolError, Request, Response, Shape,
    Slot::{Nullable, Required},
};

/// A request that passed validation. Nothing privileged happens before a
/// request gets parsed into a `Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chroot(ChrootRequest),
    Mount(MountRequest),
}

impl Command {
    pub fn parse(req: &Request) -> Result<Self, ProtocolError> {
        match req.verb() {
            Some(ChrootRequest::VERB) => ChrootRequest::parse(req).map(Self::Chroot),
            Some(MountRequest::VERB) => MountRequest::parse(req).map(Self::Mount),
            Some(verb) => Err(ProtocolError::UnknownVerb(verb.to_string())),
            None => Err(ProtocolError::MissingVerb),
        }
    }

    pub fn execute<H: Host + ?Sized>(&self, host: &mut H, conn: ConnId) -> Response {
        match self {
            Self::Chroot(req) => req.execute(host, conn),
            Self::Mount(req) => req.execute(host, conn),
        }
    }
}

// CHROOT
//////////////////////////////////

/// `[["CHROOT", <dir>]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootRequest {
    pub dir: PathBuf,
}

impl ChrootRequest {
    pub const VERB: &'static str = "CHROOT";
    pub const SHAPE: Shape = &[
        &[Required, Required],
    ];

    pub fn parse(req: &Request) -> Result<Self, ProtocolError> {
        req.check_shape(Self::SHAPE)?;
        Ok(Self { dir: req.token(0, 1).unwrap_or_default().into() })
    }

    pub fn execute<H: Host + ?Sized>(&self, host: &mut H, conn: ConnId) -> Response {
        match host.move_root(&self.dir) {
            Ok(()) => {
                info!("[{}] Successful chroot('{}') and chdir('/'), responding OK",
                      conn, self.dir.display());
                Response::Ok
            }
            Err(e) => {
                error!("[{}] Failed to chroot('{}'): {}", conn, self.dir.display(), e);
                Response::internal_error(e.source)
            }
        }
    }
}

// MOUNT
//////////////////////////////////

/// `[["MOUNT", <src>, <dst>], [<fstype>, <flags>, <data>]]`
/// where fstype and data may be null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

impl MountRequest {
    pub const VERB: &'static str = "MOUNT";
    pub const SHAPE: Shape = &[
        &[Required, Required, Required],
        &[Nullable, Required, Nullable],
    ];

    pub fn parse(req: &Request) -> Result<Self, ProtocolError> {
        req.check_shape(Self::SHAPE)?;

        let token = |line, pos| req.token(line, pos).map(str::to_string);
        let flags = req.token(1, 1).unwrap_or_default();

        Ok(Self {
            source: token(0, 1).unwrap_or_default().into(),
            target: token(0, 2).unwrap_or_default().into(),
            fstype: token(1, 0),
            flags: parse_flags(flags)?,
            data: token(1, 2),
        })
    }

    pub fn execute<H: Host + ?Sized>(&self, host: &mut H, conn: ConnId) -> Response {
        match host.mount(self) {
            Ok(()) => {
                info!("[{}] Successful mount('{}', '{}'), responding OK",
                      conn, self.source.display(), self.target.display());
                Response::Ok
            }
            Err(e) => {
                error!("[{}] Failed to mount('{}', '{}'): {}",
                       conn, self.source.display(), self.target.display(), e);
                Response::internal_error(e)
            }
        }
    }
}

/// Flags are the decimal value of the MS_* bits. Anything that is not a
/// number, or carries bits we don't know, is refused.
pub fn parse_flags(flags: &str) -> Result<MsFlags, ProtocolError> {
    flags.parse::<libc::c_ulong>()
        .ok()
        .and_then(MsFlags::from_bits)
        .ok_or_else(|| ProtocolError::BadFlags(flags.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_chroot() -> Result<(), ProtocolError> {
        let req = Request::from_tokens(&[&["CHROOT", "/var/container"]]);
        assert_eq!(Command::parse(&req)?,
                   Command::Chroot(ChrootRequest { dir: "/var/container".into() }));
        Ok(())
    }

    #[test]
    fn test_bad_chroot_shapes() {
        let bad: &[&[&[&str]]] = &[
            // Too long
            &[&["CHROOT", "DIR", "FALSE"], &["EXTRA"]],
            // Missing directory
            &[&["CHROOT"]],
            // Extra cruft
            &[&["CHROOT", "DIR", "FALSE", "EXTRA"]],
            &[&["CHROOT", "DIR"], &[]],
        ];
        for lines in bad {
            let req = Request::from_tokens(lines);
            assert!(ChrootRequest::parse(&req).is_err(), "{:?} was accepted", lines);
        }
    }

    #[test]
    fn test_parse_mount() -> Result<(), ProtocolError> {
        let req = Request::from_tokens(&[&["MOUNT", "/data", "/mnt/data"], &["", "4096", ""]]);
        assert_eq!(Command::parse(&req)?, Command::Mount(MountRequest {
            source: "/data".into(),
            target: "/mnt/data".into(),
            fstype: None,
            flags: MsFlags::MS_BIND,
            data: None,
        }));

        let req = Request::from_tokens(&[&["MOUNT", "tmpfs", "/tmp"], &["tmpfs", "6", "size=1m"]]);
        assert_eq!(Command::parse(&req)?, Command::Mount(MountRequest {
            source: "tmpfs".into(),
            target: "/tmp".into(),
            fstype: Some("tmpfs".into()),
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            data: Some("size=1m".into()),
        }));
        Ok(())
    }

    #[test]
    fn test_bad_mount_shapes() {
        let bad: &[&[&[&str]]] = &[
            // Too short
            &[&["MOUNT", "SRC", "DST"]],
            // Too long
            &[&["MOUNT", "SRC", "DST"], &["FS", "0", ""], &[]],
            // Extra cruft after DST
            &[&["MOUNT", "SRC", "DST", "EXTRA"], &["FS", "0", ""]],
            // Extra cruft after DATA
            &[&["MOUNT", "SRC", "DST"], &["FS", "0", "", "EXTRA"]],
            // Missing SRC
            &[&["MOUNT", "", "DST"], &["FS", "0", ""]],
            // Missing DST
            &[&["MOUNT", "SRC"], &["FS", "0", ""]],
            // Missing FLAGS
            &[&["MOUNT", "SRC", "DST"], &["FS", "", ""]],
        ];
        for lines in bad {
            let req = Request::from_tokens(lines);
            assert!(MountRequest::parse(&req).is_err(), "{:?} was accepted", lines);
        }
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_flags("0"), Ok(MsFlags::empty()));
        assert_eq!(parse_flags("4096"), Ok(MsFlags::MS_BIND));
        assert_eq!(parse_flags("20480"), Ok(MsFlags::MS_BIND | MsFlags::MS_REC));

        for bad in &["bind", "-1", "4096 ", "0x1000", "99999999999999999999999"] {
            assert_eq!(parse_flags(bad), Err(ProtocolError::BadFlags(bad.to_string())));
        }
        // Not a MS_* bit
        assert!(parse_flags(&(1u64 << 40).to_string()).is_err());
    }

    #[test]
    fn test_unknown_verbs() {
        let req = Request::from_tokens(&[&["EXEC", "/bin/sh"]]);
        assert_eq!(Command::parse(&req), Err(ProtocolError::UnknownVerb("EXEC".into())));

        // Verbs are case sensitive
        let req = Request::from_tokens(&[&["chroot", "/"]]);
        assert!(Command::parse(&req).is_err());

        assert_eq!(Command::parse(&Request::default()), Err(ProtocolError::MissingVerb));
    }
}
