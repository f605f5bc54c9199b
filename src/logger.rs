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
    io::prelude::*,
    io::stderr,
    path::Path,
    sync::Mutex,
    fs,
};
use log::{Record, Metadata};
pub use log::LevelFilter;
use chrono::prelude::*;
use crate::consts::*;


pub struct Logger {
    cmd_name: &'static str,
    log_file: Option<Mutex<fs::File>>,
}

impl Logger {
    fn format(&self, record: &Record) -> String {
        format!("[nsguard.{}] ({:.3}s) {}\n",
            self.cmd_name, START_TIME.elapsed().as_secs_f64(), record.args())
    }
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let msg = self.format(record);

        // When writing our log outputs fail, we dismiss the errors.
        // There is nowhere else to report them.
        let _ = stderr().write_all(msg.as_bytes());
        if let Some(f) = self.log_file.as_ref() {
            if let Ok(mut f) = f.lock() {
                let _ = f.write_all(msg.as_bytes());
            }
        }
    }

    fn flush(&self) {
        let _ = stderr().flush();
        if let Some(f) = self.log_file.as_ref() {
            if let Ok(mut f) = f.lock() {
                let _ = f.flush();
            }
        }
    }
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

pub fn init(level: LevelFilter, cmd_name: &'static str, log_file_path: Option<&Path>) -> Result<()> {
    let (log_file, log_file_error) = match log_file_path.map(open_log_file) {
        // If we can't open the log file, we can't report the failure yet
        // as the logger is not yet initialized. So we stash the error,
        // and log it later.
        Some(Ok(f)) => (Some(f), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let has_log_file = log_file.is_some();
    let log_file = log_file.map(Mutex::new);
    let logger = Logger { cmd_name, log_file };

    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow!("Failed to install the logger: {}", e))?;
    log::set_max_level(level);

    if let Some(err) = log_file_error {
        warn!("WARN: {:#}", err);
    }

    if has_log_file {
        let host = hostname::get().map_or_else(
            |err| format!("<{}>", err),
            |h| h.to_string_lossy().to_string());

        warn!("Time is {}", Utc::now().to_rfc2822());
        warn!("Host is {}", host);
        warn!("PID is {}", std::process::id());
    }

    Ok(())
}
