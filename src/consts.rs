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

use std::{
    time::Instant,
    path::PathBuf,
    env,
};

// This file gathers all nsguard hard-coded settings

/// When this variable is present in the environment, the process runs as the
/// overlay assembler regardless of its command line subcommand.
pub const OVERLAY_INTERCEPT_ENV: &str = "STORAGE_OVERLAY_INTERCEPT";

// We compute the paths at runtime. It lets the environment override them
// without recompiling.
lazy_static! {
    /// Where the privileged daemon listens when `--socket` is not given.
    pub static ref SOCKET_PATH: PathBuf = env::var_os("NSGUARD_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/run/nsguard.sock"));

    /// The host's sysrq trigger, as seen from a privileged container that has
    /// the host /proc mounted on /host/proc.
    pub static ref SYSRQ_TRIGGER_PATH: PathBuf = env::var_os("NSGUARD_SYSRQ_TRIGGER")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/host/proc/sysrq-trigger"));
}

/// Used with mkdtemp() when no destination is given for the new root.
pub const ROOT_TEMPLATE: &str = "/tmp/XXXXXX";

/// Device nodes bind mounted from the host into an unprivileged /dev
pub const DEV_NODES: &[&str] = &["full", "null", "random", "tty", "urandom", "zero"];

/// Device nodes bind mounted only when the host has them
pub const OPTIONAL_DEV_NODES: &[&str] = &["fuse"];

/// (link name, target) pairs created in an unprivileged /dev
pub const DEV_SYMLINKS: &[(&str, &str)] = &[
    ("ptmx",   "pts/ptmx"),
    ("core",   "/proc/kcore"),
    ("fd",     "/proc/self/fd"),
    ("kmsg",   "console"),
    ("stdin",  "fd/0"),
    ("stdout", "fd/1"),
    ("stderr", "fd/2"),
];

/// The devpts of the container is a new instance. ptmxmode=0666 makes it
/// usable by all users, for programs like tmux or sshd.
pub const DEVPTS_OPTIONS: &str = "newinstance,ptmxmode=0666";
pub const DEV_SHM_OPTIONS: &str = "mode=1777,size=65536k";

/// Longest request line the daemon accepts, newline excluded. A longer
/// line gets PROTOCOL_ERROR and the connection is closed.
pub const MAX_REQUEST_LEN: usize = 64 * 1024;

/// Exit code we return when encountering a fatal error.
pub const EXIT_CODE_FAILURE: u8 = 1;

/// Exit codes when the command given to `rootfs` cannot be executed. These
/// are the ones shells use.
pub const EXIT_CODE_COMMAND_NOT_FOUND: u8 = 127;
pub const EXIT_CODE_CANNOT_EXECUTE: u8 = 126;

lazy_static! {
    pub static ref START_TIME: Instant = Instant::now();
}
