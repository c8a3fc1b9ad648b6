//! Recursive ownership propagation for extracted package trees.

use std::path::Path;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::error::{PackageError, Result};
use crate::ui::prelude::*;

/// Resolved numeric owner of a package tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

#[cfg(unix)]
impl Owner {
    /// Look up a user (and optionally a group) by name.
    ///
    /// Without a group the user's primary group is used.
    pub fn lookup(user: &str, group: Option<&str>) -> Result<Self> {
        use nix::unistd::{Group, User};

        let to_io = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);

        let account = User::from_name(user)
            .map_err(|e| PackageError::io(format!("looking up user '{}'", user), to_io(e)))?
            .ok_or_else(|| {
                PackageError::io(
                    format!("looking up user '{}'", user),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such user"),
                )
            })?;

        let gid = match group {
            Some(name) => {
                Group::from_name(name)
                    .map_err(|e| {
                        PackageError::io(format!("looking up group '{}'", name), to_io(e))
                    })?
                    .ok_or_else(|| {
                        PackageError::io(
                            format!("looking up group '{}'", name),
                            std::io::Error::new(std::io::ErrorKind::NotFound, "no such group"),
                        )
                    })?
                    .gid
            }
            None => account.gid,
        };

        Ok(Self {
            uid: account.uid.as_raw(),
            gid: gid.as_raw(),
        })
    }
}

#[cfg(not(unix))]
impl Owner {
    pub fn lookup(user: &str, _group: Option<&str>) -> Result<Self> {
        Err(PackageError::io(
            format!("looking up user '{}'", user),
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "user accounts are only resolved on unix",
            ),
        ))
    }
}

/// Change ownership of `root` and everything below it.
///
/// The cancellation token is checked before every entry. Symlinks are changed
/// themselves and never followed; dangling symlinks are skipped.
#[cfg(unix)]
pub fn chown_recursive(root: &Path, owner: Owner, token: &CancellationToken) -> Result<()> {
    use nix::unistd::{Gid, Uid, chown};

    let uid = Some(Uid::from_raw(owner.uid));
    let gid = Some(Gid::from_raw(owner.gid));

    for entry in WalkDir::new(root).follow_links(false) {
        if token.is_cancelled() {
            return Err(PackageError::Cancelled);
        }

        let entry = entry.map_err(|e| {
            let context = format!("walking {}", root.display());
            match e.into_io_error() {
                Some(io) => PackageError::io(context, io),
                None => PackageError::io(context, std::io::Error::other("filesystem loop")),
            }
        })?;
        let path = entry.path();

        if entry.path_is_symlink() {
            if !path.exists() {
                emit(
                    Level::Debug,
                    "package.chown.skip",
                    &format!("Skipping dangling symlink {}", path.display()),
                    None,
                );
                continue;
            }
            std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid))
                .map_err(|e| PackageError::io(format!("changing owner of {}", path.display()), e))?;
            continue;
        }

        chown(path, uid, gid).map_err(|e| {
            PackageError::io(
                format!("changing owner of {}", path.display()),
                std::io::Error::from_raw_os_error(e as i32),
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn chown_recursive(root: &Path, _owner: Owner, _token: &CancellationToken) -> Result<()> {
    Err(PackageError::io(
        format!("changing owner of {}", root.display()),
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "ownership changes are only supported on unix",
        ),
    ))
}
