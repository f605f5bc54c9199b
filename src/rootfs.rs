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

// Construction of the container root filesystem. This runs in a fresh mount
// namespace, before any workload. There is no rollback: a half built
// namespace cannot be repaired in-process, so every mount failure is fatal to
// the caller.

use anyhow::{Result, Context};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    path::{Path, PathBuf},
    fmt,
};
use nix::{
    mount::{mount, MsFlags},
    unistd::{chdir, chroot, access, unlink, AccessFlags},
};
use crate::{
    consts::*,
    signal::with_termination_signals_blocked,
    util::{create_dir, create_symlink, mkdtemp, mount_bind, mount_fs, touch, UmaskGuard},
};

// The root switch happens once per process lifetime. RootfsBuilder::enter_root()
// consumes the builder, and this guards against a second builder.
static ROOT_SWITCHED: AtomicBool = AtomicBool::new(false);

// Root switch
//////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStep {
    BlockSignals,
    EnterDir,
    BindSelf,
    MoveToRoot,
    Chroot,
    ChdirRoot,
}

impl fmt::Display for SwitchStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self {
            SwitchStep::BlockSignals => "block signals",
            SwitchStep::EnterDir     => "chdir into the new root",
            SwitchStep::BindSelf     => "bind mount the root onto itself",
            SwitchStep::MoveToRoot   => "move the root onto /",
            SwitchStep::Chroot       => "chroot",
            SwitchStep::ChdirRoot    => "chdir into /",
        };
        write!(f, "Failed to {}", what)
    }
}

#[derive(Debug)]
pub struct SwitchError {
    pub step: SwitchStep,
    pub source: nix::Error,
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.source)
    }
}

impl std::error::Error for SwitchError {}

fn step(step: SwitchStep, result: nix::Result<()>) -> Result<(), SwitchError> {
    result.map_err(|source| SwitchError { step, source })
}

/// Makes `dir` the root of the process, and moves into it.
/// The bind mount of `dir` onto itself makes it a mount point, which is what
/// MS_MOVE requires.
pub fn move_root(dir: &Path) -> Result<(), SwitchError> {
    step(SwitchStep::EnterDir, chdir(dir))?;
    step(SwitchStep::BindSelf, mount(Some(dir), dir, None as Option<&str>,
                                     MsFlags::MS_BIND | MsFlags::MS_REC, None as Option<&str>))?;
    step(SwitchStep::MoveToRoot, mount(Some(dir), "/", None as Option<&str>,
                                       MsFlags::MS_MOVE, None as Option<&str>))?;
    step(SwitchStep::Chroot, chroot("."))?;
    step(SwitchStep::ChdirRoot, chdir("/"))?;
    Ok(())
}

/// `move_root()` with termination signals held off until the switch is over.
pub fn move_root_uninterrupted(dir: &Path) -> Result<(), SwitchError> {
    with_termination_signals_blocked(|| move_root(dir))
        .map_err(|source| SwitchError { step: SwitchStep::BlockSignals, source })?
}

// Builder
//////////////////////////////////

/// Where the container root lives. Exactly one exists per builder, and it is
/// handed over to the mount namespace by `RootfsBuilder::enter_root()`.
#[derive(Debug)]
pub struct RootContext {
    root: PathBuf,
}

impl RootContext {
    pub fn path(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fresh,
    Privatized,
    TmpStaged,
    RootAcquired,
    Populated,
}

#[derive(Debug)]
pub struct PhaseError {
    pub expected: Phase,
    pub actual: Phase,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Root filesystem construction out of order: at phase {:?}, expected {:?}",
               self.actual, self.expected)
    }
}

impl std::error::Error for PhaseError {}

#[derive(Debug)]
pub struct RootfsBuilder {
    source: PathBuf,
    dest: Option<PathBuf>,
    privileged: bool,
    phase: Phase,
    ctx: Option<RootContext>,
}

impl RootfsBuilder {
    pub fn new(source: PathBuf, dest: Option<PathBuf>, privileged: bool) -> Self {
        Self { source, dest, privileged, phase: Phase::Fresh, ctx: None }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn root(&self) -> Option<&Path> {
        self.ctx.as_ref().map(RootContext::path)
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        ensure!(self.phase == expected, PhaseError { expected, actual: self.phase });
        Ok(())
    }

    fn ctx(&self) -> Result<&RootContext> {
        self.ctx.as_ref().ok_or_else(|| anyhow!("No root directory was acquired"))
    }

    /// Phase 1: mounts made from now on stay in our namespace.
    pub fn privatize(&mut self) -> Result<()> {
        self.expect_phase(Phase::Fresh)?;
        mount(Some("none"), "/", None as Option<&str>,
              MsFlags::MS_REC | MsFlags::MS_PRIVATE, None as Option<&str>)
            .context("Failed to convert new mount namespace to be private")?;
        self.phase = Phase::Privatized;
        Ok(())
    }

    /// Phase 2: gives the current root its own /tmp. The new root is usually
    /// placed there, and helpers running before the switch expect it.
    pub fn stage_tmp(&mut self) -> Result<()> {
        self.expect_phase(Phase::Privatized)?;
        create_dir("/tmp", 0o755)?;
        mount_fs("tmpfs", "/tmp", MsFlags::empty(), Some("mode=0755"))
            .context("Failed to mount /tmp tmpfs in parent filesystem")?;
        self.phase = Phase::TmpStaged;
        Ok(())
    }

    /// Phase 3: picks the directory that becomes the root.
    pub fn acquire_root(&mut self) -> Result<&Path> {
        self.expect_phase(Phase::TmpStaged)?;
        let root = match &self.dest {
            Some(dest) => {
                create_dir(dest, 0o755)?;
                dest.clone()
            }
            None => mkdtemp(ROOT_TEMPLATE)
                .context("Failed to create the new root directory")?,
        };
        debug!("New root is {}", root.display());
        self.ctx = Some(RootContext { root });
        self.phase = Phase::RootAcquired;
        self.ctx().map(RootContext::path)
    }

    /// Phase 4: binds the source tree on the root and fills /dev and /tmp.
    pub fn populate(&mut self) -> Result<()> {
        self.expect_phase(Phase::RootAcquired)?;
        let root = self.ctx()?.path().to_path_buf();

        // Directories and device nodes get exactly the modes we ask for.
        let _umask = UmaskGuard::clear();

        mount_bind(&self.source, &root, MsFlags::MS_REC)
            .context("Failed to bind new root filesystem")?;
        chdir(root.as_path()).context("Failed to enter new root filesystem")?;

        let dev = root.join("dev");
        create_dir(&dev, 0o755)?;
        if self.privileged {
            populate_privileged_dev(&dev)?;
        } else {
            populate_dev(&dev)?;
        }
        mount_dev_filesystems(&dev)?;

        create_dir(root.join("tmp"), 0o777)?;

        self.phase = Phase::Populated;
        Ok(())
    }

    /// Phase 5: switches the process root to the new tree. The builder is
    /// consumed, the root now belongs to the mount namespace.
    pub fn enter_root(self) -> Result<()> {
        self.expect_phase(Phase::Populated)?;
        let RootContext { root } = self.ctx()?;
        ensure!(!ROOT_SWITCHED.swap(true, Ordering::SeqCst),
                "The root was already switched in this process");

        move_root_uninterrupted(root)?;
        info!("Switched root to {}", root.display());
        Ok(())
    }

    /// Runs all phases in order.
    pub fn build(mut self) -> Result<()> {
        self.privatize()?;
        self.stage_tmp()?;
        self.acquire_root()?;
        self.populate()?;
        self.enter_root()
    }
}

// /dev
//////////////////////////////////

fn populate_privileged_dev(dev: &Path) -> Result<()> {
    mount_fs("devtmpfs", dev, MsFlags::empty(), Some(""))
        .context("Failed to mount /dev devtmpfs in new root filesystem")?;

    // The devpts of the container is a new instance, so /dev/ptmx cannot be
    // the one of devtmpfs.
    let ptmx = dev.join("ptmx");
    let _ = unlink(ptmx.as_path());
    create_symlink("pts/ptmx", &ptmx)
}

fn bind_node(host_node: &Path, node: &Path) -> Result<()> {
    // A failure to create the mount point shows up in the mount error.
    let _ = touch(node);
    mount_bind(host_node, node, MsFlags::empty())
        .with_context(|| format!("Failed to bind {} into new /dev filesystem", host_node.display()))
}

fn populate_dev(dev: &Path) -> Result<()> {
    mount_fs("tmpfs", dev, MsFlags::MS_NOEXEC | MsFlags::MS_STRICTATIME, Some("mode=0755"))
        .context("Failed to mount /dev tmpfs in new root filesystem")?;

    let host_dev = Path::new("/dev");
    for name in DEV_NODES {
        bind_node(&host_dev.join(name), &dev.join(name))?;
    }

    for name in OPTIONAL_DEV_NODES {
        let host_node = host_dev.join(name);
        if access(host_node.as_path(), AccessFlags::F_OK).is_ok() {
            bind_node(&host_node, &dev.join(name))?;
        } else {
            debug!("{} is absent on the host, skipping", host_node.display());
        }
    }

    create_dev_symlinks(dev)
}

pub fn create_dev_symlinks(dev: &Path) -> Result<()> {
    for (name, target) in DEV_SYMLINKS {
        create_symlink(target, dev.join(name))?;
    }
    Ok(())
}

/// The directories the /dev filesystems are mounted on.
pub fn create_dev_mountpoints(dev: &Path) -> Result<()> {
    for dir in &["mqueue", "pts", "shm"] {
        create_dir(dev.join(dir), 0o755)?;
    }
    Ok(())
}

fn mount_dev_filesystems(dev: &Path) -> Result<()> {
    create_dev_mountpoints(dev)?;

    mount_fs("mqueue", dev.join("mqueue"),
             MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV, None)
        .context("Failed to mount /dev/mqueue in new root filesystem")?;

    mount_fs("devpts", dev.join("pts"),
             MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID, Some(DEVPTS_OPTIONS))
        .context("Failed to mount /dev/pts in new root filesystem")?;

    mount_fs("tmpfs", dev.join("shm"),
             MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV, Some(DEV_SHM_OPTIONS))
        .context("Failed to mount /dev/shm in new root filesystem")?;

    Ok(())
}

// /proc and /sys
//////////////////////////////////

pub fn create_proc_mountpoints(root: &Path) -> Result<()> {
    let _umask = UmaskGuard::clear();
    create_dir(root.join("proc"), 0o755)?;
    create_dir(root.join("sys"), 0o755)?;
    Ok(())
}

/// Mounts /proc and a read-only /sys under `root`. To be called once the root
/// has been switched, with `root` being "/".
pub fn mount_proc(root: &Path) -> Result<()> {
    create_proc_mountpoints(root)?;

    mount(Some("proc"), root.join("proc").as_path(), Some("proc"),
          MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV, None as Option<&str>)
        .context("Failed to mount /proc in new root filesystem")?;

    mount(Some("sysfs"), root.join("sys").as_path(), Some("sysfs"),
          MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
          None as Option<&str>)
        .context("Failed to mount /sys in new root filesystem")?;

    Ok(())
}
