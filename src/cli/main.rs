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
use std::path::Path;
use structopt::{StructOpt, clap::AppSettings};
use serde::Serialize;
use crate::logger;
use super::{
    CLI,
    overlay::Overlay,
    rootfs::Rootfs,
    serve::Serve,
    init::Init,
    power::{Poweroff, Reboot},
};

#[derive(StructOpt, PartialEq, Debug, Serialize)]
#[structopt(
    // When showing --help, we want to keep the order of arguments as we defined,
    // as opposed to the default alphabetical order.
    global_setting(AppSettings::DeriveDisplayOrder),
    // help subcommand is not useful, disable it.
    global_setting(AppSettings::DisableHelpSubcommand),
    // subcommand version is not useful, disable it.
    global_setting(AppSettings::VersionlessSubcommands),
)]
#[structopt(after_help("\
ENVS:
    STORAGE_OVERLAY_INTERCEPT  When set, the command line is parsed as the
                               overlay subcommand arguments
    NSGUARD_SOCKET             Default socket path for serve
    NSGUARD_SYSRQ_TRIGGER      Default trigger path for poweroff and reboot"
))]
pub struct Opts {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, PartialEq, Debug, Serialize)]
enum Command {
    Overlay(Overlay),
    Rootfs(Rootfs),
    Serve(Serve),
    Init(Init),
    Poweroff(Poweroff),
    Reboot(Reboot),
}

impl Opts {
    // A global verbose flag would have to be passed before the subcommand,
    // so each subcommand carries its own.
    fn verbosity(&self) -> u8 {
        match self.command {
            Command::Overlay(Overlay { verbose, .. }) |
            Command::Rootfs(Rootfs { verbose, .. }) |
            Command::Serve(Serve { verbose, .. }) |
            Command::Init(Init { verbose, .. }) |
            Command::Poweroff(Poweroff { verbose, .. }) |
            Command::Reboot(Reboot { verbose, .. }) => verbose,
        }
    }

    fn log_prefix(&self) -> &'static str {
        match self.command {
            Command::Overlay(_)  => "overlay",
            Command::Rootfs(_)   => "rootfs",
            Command::Serve(_)    => "serve",
            Command::Init(_)     => "init",
            Command::Poweroff(_) => "poweroff",
            Command::Reboot(_)   => "reboot",
        }
    }

    fn log_file(&self) -> Option<&Path> {
        match &self.command {
            Command::Serve(serve) => serve.log_file.as_deref(),
            _ => None,
        }
    }

    pub fn init_logger(&self) -> Result<()> {
        logger::init(log_level(self.verbosity()), self.log_prefix(), self.log_file())
    }
}

pub fn log_level(verbosity: u8) -> logger::LevelFilter {
    match verbosity {
        0 => logger::LevelFilter::Info,
        1 => logger::LevelFilter::Debug,
        _ => logger::LevelFilter::Trace,
    }
}

impl CLI for Opts {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Overlay(opts)  => opts.run(),
            Command::Rootfs(opts)   => opts.run(),
            Command::Serve(opts)    => opts.run(),
            Command::Init(opts)     => opts.run(),
            Command::Poweroff(opts) => opts.run(),
            Command::Reboot(opts)   => opts.run(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opts> {
        Ok(Opts::from_iter_safe(std::iter::once("nsguard").chain(args.iter().copied()))?)
    }

    #[test]
    fn test_subcommands() -> Result<()> {
        let opts = parse(&["serve", "-vv", "--socket", "/tmp/ns.sock", "--log-file", "/tmp/ns.log"])?;
        assert_eq!(opts.log_prefix(), "serve");
        assert_eq!(opts.verbosity(), 2);
        assert_eq!(opts.log_file(), Some(Path::new("/tmp/ns.log")));

        let opts = parse(&["rootfs", "--source", "/img", "--privileged", "--", "/bin/sh", "-c", "true"])?;
        assert_eq!(opts.log_prefix(), "rootfs");
        assert_eq!(opts.log_file(), None);
        match opts.command {
            Command::Rootfs(r) => assert_eq!(r.command, vec!["/bin/sh", "-c", "true"]),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(parse(&["reboot", "-v"])?.verbosity(), 1);
        assert!(parse(&["chroot"]).is_err());
        Ok(())
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), logger::LevelFilter::Info);
        assert_eq!(log_level(1), logger::LevelFilter::Debug);
        assert_eq!(log_level(5), logger::LevelFilter::Trace);
    }
}
