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
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        fs::{DirBuilderExt, OpenOptionsExt, symlink},
    },
    ffi::{CString, OsString},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    fs,
};
use caps::{CapSet, Capability};
use nix::{
    mount::{mount, MsFlags},
    sys::stat::{umask, Mode},
};

/// Creates `path` and its missing parents with the given mode (subject to the
/// umask). Existing directories are fine.
pub fn create_dir_all(path: impl AsRef<Path>, mode: u32) -> Result<()> {
    let path = path.as_ref();
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Creates a single directory. Like mkdir(2), but "already exists" is not an error.
pub fn create_dir(path: impl AsRef<Path>, mode: u32) -> Result<()> {
    let path = path.as_ref();
    match fs::DirBuilder::new().mode(mode).create(path) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        result => result.with_context(|| format!("Failed to create directory {}", path.display())),
    }
}

/// Creates the symlink `link` pointing to `target`. An existing `link` is
/// left alone.
pub fn create_symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let (target, link) = (target.as_ref(), link.as_ref());
    match symlink(target, link) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        result => result.with_context(|| format!("Failed to symlink {} to {}",
                                                 link.display(), target.display())),
    }
}

/// Creates an empty file at `path` if missing, to serve as a bind mount point.
pub fn touch(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to create file {}", path.display()))?;
    Ok(())
}

/// Creates a uniquely named directory from `template`, whose last six
/// characters must be `XXXXXX`. The directory has mode 0700.
pub fn mkdtemp(template: impl AsRef<Path>) -> Result<PathBuf> {
    let template = template.as_ref();
    let mut buf = CString::new(template.as_os_str().as_bytes())
        .with_context(|| format!("Invalid directory template {}", template.display()))?
        .into_bytes_with_nul();

    let ret = unsafe { libc::mkdtemp(buf.as_mut_ptr() as *mut libc::c_char) };
    if ret.is_null() {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("Failed to create temporary directory from {}",
                                     template.display()));
    }

    // The trailing NUL
    buf.pop();
    Ok(PathBuf::from(OsString::from_vec(buf)))
}

pub fn mount_bind(from: impl AsRef<Path>, to: impl AsRef<Path>, flags: MsFlags) -> Result<()> {
    let from = from.as_ref();
    let to = to.as_ref();
    mount(Some(from), to, None as Option<&str>, MsFlags::MS_BIND | flags, None as Option<&str>)
        .with_context(|| format!("Failed to bind mount {} to {}", from.display(), to.display()))
}

pub fn mount_fs(fstype: &str, target: impl AsRef<Path>, flags: MsFlags, data: Option<&str>) -> Result<()> {
    let target = target.as_ref();
    mount(Some(fstype), target, Some(fstype), flags, data)
        .with_context(|| format!("Failed to mount {} on {}", fstype, target.display()))
}

#[must_use = "if unused, the umask is immediately restored"]
/// Clears the process umask. The previous umask is restored on drop.
pub struct UmaskGuard(Mode);

impl UmaskGuard {
    pub fn clear() -> Self {
        Self(umask(Mode::empty()))
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.0);
    }
}

/// Whether we can perform mounts and root switches.
pub fn has_sys_admin() -> Result<bool> {
    caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN)
        .map_err(|e| anyhow!("Failed to read the process capabilities: {}", e))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_create_dir_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("proc");

        create_dir(&path, 0o755)?;
        create_dir(&path, 0o755)?;
        assert!(path.is_dir());
        Ok(())
    }

    #[test]
    fn test_create_dir_reports_missing_parent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = create_dir(dir.path().join("a/b"), 0o755).unwrap_err();
        assert!(err.to_string().contains("Failed to create directory"));
        Ok(())
    }

    #[test]
    fn test_create_dir_all_mode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c/up");

        let _umask = UmaskGuard::clear();
        create_dir_all(&path, 0o755)?;
        create_dir_all(&path, 0o755)?;

        let mode = fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        Ok(())
    }

    #[test]
    fn test_create_symlink_keeps_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let link = dir.path().join("stdin");

        create_symlink("fd/0", &link)?;
        create_symlink("fd/9", &link)?;
        assert_eq!(fs::read_link(&link)?, Path::new("fd/0"));
        Ok(())
    }

    #[test]
    fn test_mkdtemp() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let template = dir.path().join("root-XXXXXX");

        let first = mkdtemp(&template)?;
        let second = mkdtemp(&template)?;
        assert_ne!(first, second);
        for root in &[&first, &second] {
            assert!(root.is_dir());
            assert_eq!(root.parent(), Some(dir.path()));
            let name = root.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            assert!(name.starts_with("root-") && name != "root-XXXXXX", "{}", name);
            assert_eq!(fs::metadata(root)?.permissions().mode() & 0o777, 0o700);
        }
        Ok(())
    }

    #[test]
    fn test_mkdtemp_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let err = mkdtemp(dir.path().join("root")).unwrap_err();
        assert!(err.to_string().contains("Failed to create temporary directory"));

        let err = mkdtemp(dir.path().join("missing/root-XXXXXX")).unwrap_err();
        assert!(err.to_string().contains("Failed to create temporary directory"));
        Ok(())
    }

    #[test]
    fn test_touch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("null");

        touch(&path)?;
        touch(&path)?;
        assert!(path.is_file());
        Ok(())
    }
}
