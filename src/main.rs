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

use nsguard::{
    consts::*,
    cli::{self, ExitCode, CLI},
    overlay,
};

fn main() {
    fn do_main() -> Result<()> {
        // START_TIME is used for logging purposes
        lazy_static::initialize(&START_TIME);

        // The storage layer launches us with the overlay options as the
        // entire command line. In that case there is no subcommand to parse.
        if overlay::intercept_requested() {
            let opts = cli::Overlay::from_args();
            opts.init_logger()?;
            return opts.run();
        }

        let opts = cli::Opts::from_args();
        opts.init_logger()?;
        opts.run()
    }

    if let Err(e) = do_main() {
        log::error!("{:#}", e);
        let exit_code = ExitCode::from_error(&e).unwrap_or(EXIT_CODE_FAILURE);
        std::process::exit(exit_code as i32);
    }
}
