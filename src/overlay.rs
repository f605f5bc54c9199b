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

// The overlay assembler mounts a union filesystem for the storage layer.
// It runs as its own process: the storage layer waits for the finish
// directory to appear, and kills us when the overlay is no longer needed.
// Our mount lives in our mount namespace, so we must stay alive until then.

use anyhow::{Result, Context};
use std::{
    convert::Infallible,
    path::{Path, PathBuf},
    env,
};
use nix::mount::{mount, MsFlags};
use crate::{
    consts::*,
    signal::{trap_termination_signals, wait_for_termination},
    util::{create_dir, create_dir_all},
};

/// Separates lower layers in the `lowerdir=` option.
const LOWER_SEPARATOR: &str = ":";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    /// Read-only layers. The first one has the highest priority: its files
    /// shadow the ones of the following layers.
    pub lower_dirs: Vec<PathBuf>,
    pub upper_dir: PathBuf,
    /// Scratch space of overlayfs. Must be on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    pub dest_dir: PathBuf,
    /// Created once the overlay is mounted.
    pub finish_dir: PathBuf,
}

pub fn intercept_requested() -> bool {
    env::var_os(OVERLAY_INTERCEPT_ENV).is_some()
}

/// Commas separate mount options, and the kernel offers no way to escape
/// them. Colons separate lower layers.
fn option_value<'a>(path: &'a Path, what: &str, forbid_colon: bool) -> Result<&'a str> {
    let value = path.to_str()
        .ok_or_else(|| anyhow!("The {} path {} is not valid UTF-8", what, path.display()))?;
    ensure!(!value.is_empty(), "The {} path is empty", what);
    ensure!(!value.contains(','),
            "The {} path `{}` contains a comma, which overlayfs cannot accept", what, value);
    ensure!(!(forbid_colon && value.contains(LOWER_SEPARATOR)),
            "The {} path `{}` contains a colon, which overlayfs cannot accept", what, value);
    Ok(value)
}

/// Joins the lower layers in the order given, the way overlayfs expects them.
pub fn join_lower_dirs(lower_dirs: &[PathBuf]) -> Result<String> {
    ensure!(!lower_dirs.is_empty(), "At least one lower directory is required (--lowerdir)");

    let dirs = lower_dirs.iter()
        .map(|dir| option_value(dir, "lower", true))
        .collect::<Result<Vec<_>>>()?;

    Ok(dirs.join(LOWER_SEPARATOR))
}

impl OverlaySpec {
    pub fn mount_options(&self) -> Result<String> {
        let lower = join_lower_dirs(&self.lower_dirs)?;
        let upper = option_value(&self.upper_dir, "upper", false)?;
        let work = option_value(&self.work_dir, "work", false)?;

        let mut options = String::with_capacity(lower.len() + upper.len() + work.len() + 32);
        options.push_str("lowerdir=");
        options.push_str(&lower);
        options.push_str(",upperdir=");
        options.push_str(upper);
        options.push_str(",workdir=");
        options.push_str(work);
        Ok(options)
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in &[&self.upper_dir, &self.work_dir, &self.dest_dir] {
            create_dir_all(dir, 0o755)?;
        }
        Ok(())
    }

    fn mount(&self, options: &str) -> Result<()> {
        debug!("Mounting overlay on {} with {}", self.dest_dir.display(), options);
        mount(Some("overlay"), self.dest_dir.as_path(), Some("overlay"), MsFlags::empty(), Some(options))
            .with_context(|| format!("Failed to mount overlay filesystem on {}",
                                     self.dest_dir.display()))
    }

    /// Validates the spec, creates the directories and mounts the overlay.
    /// The finish directory is created last, and only on success.
    pub fn assemble(&self) -> Result<()> {
        // Options are built first so that a bad spec touches nothing.
        let options = self.mount_options()?;
        self.create_dirs()?;
        self.mount(&options)?;

        create_dir(&self.finish_dir, 0o755)
            .context("Failed to signal overlay readiness")?;
        info!("Overlay mounted on {}", self.dest_dir.display());
        Ok(())
    }
}

/// Mounts the overlay and holds it until we are asked to terminate, at which
/// point the process exits with status 0. This never returns to the caller.
pub fn assemble_and_hold(spec: &OverlaySpec) -> Result<Infallible> {
    // The handlers must be in place before the finish directory appears,
    // as the supervisor may kill us as soon as it sees it.
    let mut signals = trap_termination_signals()?;

    spec.assemble()?;
    wait_for_termination(&mut signals);

    log::logger().flush();
    std::process::exit(0);
}

#[cfg(test)]
mod test {
    use super::*;

    fn paths(dirs: &[&str]) -> Vec<PathBuf> {
        dirs.iter().map(|d| PathBuf::from(*d)).collect()
    }

    fn spec_in(root: &Path, lower_dirs: Vec<PathBuf>) -> OverlaySpec {
        OverlaySpec {
            lower_dirs,
            upper_dir: root.join("c/up"),
            work_dir: root.join("c/work"),
            dest_dir: root.join("c/merged"),
            finish_dir: root.join("c/finished"),
        }
    }

    #[test]
    fn test_join_preserves_order() -> Result<()> {
        assert_eq!(join_lower_dirs(&paths(&["/a", "/b", "/c"]))?, "/a:/b:/c");
        assert_eq!(join_lower_dirs(&paths(&["/c", "/a"]))?, "/c:/a");
        Ok(())
    }

    #[test]
    fn test_join_single_layer() -> Result<()> {
        assert_eq!(join_lower_dirs(&paths(&["/img/layerA"]))?, "/img/layerA");
        Ok(())
    }

    #[test]
    fn test_join_empty_is_rejected() {
        let err = join_lower_dirs(&[]).unwrap_err();
        assert!(err.to_string().contains("At least one lower directory"));
    }

    #[test]
    fn test_mount_options() -> Result<()> {
        let spec = OverlaySpec {
            lower_dirs: paths(&["/img/layerA", "/img/layerB"]),
            upper_dir: "/c/up".into(),
            work_dir: "/c/work".into(),
            dest_dir: "/c/merged".into(),
            finish_dir: "/c/finished".into(),
        };
        assert_eq!(spec.mount_options()?,
                   "lowerdir=/img/layerA:/img/layerB,upperdir=/c/up,workdir=/c/work");
        Ok(())
    }

    #[test]
    fn test_ambiguous_paths_are_rejected() {
        // Accepting these would make ["/a:/b"] and ["/a", "/b"] produce the
        // same options, or let a path inject an extra mount option.
        let mut spec = spec_in(Path::new("/c"), paths(&["/a:/b"]));
        assert!(spec.mount_options().unwrap_err().to_string().contains("colon"));

        spec.lower_dirs = paths(&["/a"]);
        spec.upper_dir = "/c/up,workdir=/x".into();
        assert!(spec.mount_options().unwrap_err().to_string().contains("comma"));

        spec.upper_dir = "/c/up".into();
        spec.lower_dirs = paths(&[""]);
        assert!(spec.mount_options().is_err());
    }

    #[test]
    fn test_distinct_specs_give_distinct_options() -> Result<()> {
        let root = Path::new("/c");
        let specs = vec![
            spec_in(root, paths(&["/a", "/b"])),
            spec_in(root, paths(&["/b", "/a"])),
            spec_in(root, paths(&["/a"])),
            spec_in(root, paths(&["/ab"])),
            OverlaySpec { work_dir: "/c/up".into(), upper_dir: "/c/work".into(),
                          ..spec_in(root, paths(&["/a"])) },
        ];
        let options = specs.iter()
            .map(|s| s.mount_options())
            .collect::<Result<std::collections::HashSet<_>>>()?;
        assert_eq!(options.len(), specs.len());
        Ok(())
    }

    #[test]
    fn test_create_dirs_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let spec = spec_in(dir.path(), paths(&["/a"]));

        spec.create_dirs()?;
        spec.create_dirs()?;
        assert!(spec.upper_dir.is_dir());
        assert!(spec.work_dir.is_dir());
        assert!(spec.dest_dir.is_dir());
        assert!(!spec.finish_dir.exists());
        Ok(())
    }

    #[test]
    fn test_assemble_without_layers_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let spec = spec_in(dir.path(), vec![]);

        assert!(spec.assemble().is_err());
        assert!(!dir.path().join("c").exists());
        Ok(())
    }

    // Needs CAP_SYS_ADMIN: cargo test -- --ignored
    #[test]
    #[ignore]
    fn test_first_lower_layer_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layer_a = dir.path().join("img/layerA");
        let layer_b = dir.path().join("img/layerB");
        create_dir_all(&layer_a, 0o755)?;
        create_dir_all(&layer_b, 0o755)?;
        std::fs::write(layer_a.join("shared"), "A")?;
        std::fs::write(layer_b.join("shared"), "B")?;
        std::fs::write(layer_b.join("only-b"), "B")?;

        let spec = spec_in(dir.path(), vec![layer_a, layer_b]);
        spec.assemble()?;
        let shared = std::fs::read_to_string(spec.dest_dir.join("shared"));
        let only_b = std::fs::read_to_string(spec.dest_dir.join("only-b"));
        let _ = nix::mount::umount(spec.dest_dir.as_path());

        assert_eq!(shared?, "A");
        assert_eq!(only_b?, "B");
        assert!(spec.finish_dir.is_dir());
        Ok(())
    }
}
