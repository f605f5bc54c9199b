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
    logger,
    overlay::{assemble_and_hold, OverlaySpec},
};

/// Assemble an overlay filesystem and hold it until terminated
#[derive(StructOpt, PartialEq, Debug, Serialize)]
#[structopt(after_help("\
The first --lowerdir is the top-most layer. Once the overlay is mounted,
finishdir is created to signal readiness. Exits 0 on SIGTERM or SIGINT."
))]
pub struct Overlay {
    /// Read-only layer. Can be repeated, in top to bottom order
    #[structopt(long, required = true, number_of_values = 1)]
    lowerdir: Vec<PathBuf>,

    /// Writable layer
    #[structopt(long)]
    upperdir: PathBuf,

    /// Scratch directory for the overlay driver, on the same filesystem as upperdir
    #[structopt(long)]
    workdir: PathBuf,

    /// Where the merged view is mounted
    #[structopt(long)]
    destdir: PathBuf,

    /// Created once the overlay is mounted
    #[structopt(long)]
    finishdir: PathBuf,

    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl Overlay {
    /// Used when we are started directly by the storage layer, without the
    /// `overlay` subcommand.
    pub fn init_logger(&self) -> Result<()> {
        logger::init(super::main::log_level(self.verbose), "overlay", None)
    }

    fn spec(self) -> OverlaySpec {
        let Self { lowerdir, upperdir, workdir, destdir, finishdir, verbose: _ } = self;
        OverlaySpec {
            lower_dirs: lowerdir,
            upper_dir: upperdir,
            work_dir: workdir,
            dest_dir: destdir,
            finish_dir: finishdir,
        }
    }
}

impl super::CLI for Overlay {
    fn run(self) -> Result<()> {
        let spec = self.spec();
        match assemble_and_hold(&spec)? {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Result<Overlay> {
        Ok(Overlay::from_iter_safe(std::iter::once("nsguard").chain(args.iter().copied()))?)
    }

    #[test]
    fn test_lowerdir_order() -> Result<()> {
        let spec = parse(&[
            "--lowerdir", "/layers/top", "--upperdir", "/c/upper",
            "--lowerdir", "/layers/base", "--workdir", "/c/work",
            "--destdir", "/c/merged", "--finishdir", "/c/ready",
        ])?.spec();

        assert_eq!(spec.lower_dirs, vec![PathBuf::from("/layers/top"), PathBuf::from("/layers/base")]);
        assert_eq!(spec.finish_dir, PathBuf::from("/c/ready"));
        assert_eq!(spec.mount_options()?,
                   "lowerdir=/layers/top:/layers/base,upperdir=/c/upper,workdir=/c/work");
        Ok(())
    }

    #[test]
    fn test_lowerdir_required() {
        assert!(parse(&[
            "--upperdir", "/c/upper", "--workdir", "/c/work",
            "--destdir", "/c/merged", "--finishdir", "/c/ready",
        ]).is_err());
    }
}
