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
use structopt::StructOpt;
use serde::Serialize;
use crate::reaper;

/// Act as the init process of a container: reap orphans until terminated
#[derive(StructOpt, PartialEq, Debug, Serialize)]
pub struct Init {
    /// Verbosity. Can be repeated
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl super::CLI for Init {
    fn run(self) -> Result<()> {
        reaper::run()
    }
}
