//! Namespace confinement for generated programs (Linux).
//!
//! The child unshares a user namespace (plus a network namespace when asked),
//! maps its own uid and gid, and with filesystem confinement on:
//! - makes every mount private to the child
//! - bind-mounts a short list of system paths read-only into its workspace,
//!   plus a few device nodes
//! - pivots into the workspace and detaches the old root
//!
//! Inside, `/` is the workspace. Nothing else on the host is reachable.
//!
//! All paths and buffers are built by `Isolation::prepare` in the parent;
//! `Isolation::enter` runs between fork and exec and only issues syscalls.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use super::sandbox::{SandboxPolicy, check};

/// Device nodes bound into the jail. They stay writable.
const DEVICES: &[&str] = &["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mountpoint {
    Dir,
    File,
}

#[derive(Debug)]
struct Bind {
    source: CString,
    target: CString,
    kind: Mountpoint,
    /// Flags for the read-only remount. `None` leaves the bind writable.
    remount: Option<libc::c_ulong>,
}

#[derive(Debug)]
struct Root {
    workspace: CString,
    dirs: Vec<CString>,
    binds: Vec<Bind>,
    /// Mountpoints created in the workspace, in creation order.
    skeleton: Vec<PathBuf>,
}

/// A planned set of namespaces for one child.
#[derive(Debug)]
pub struct Isolation {
    unshare_flags: libc::c_int,
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
    root: Option<Root>,
}

impl Isolation {
    /// Plan the namespaces `policy` asks for. `None` when it asks for none.
    pub fn prepare(workspace: &Path, policy: &SandboxPolicy) -> io::Result<Option<Self>> {
        if !policy.isolate_network && !policy.confine_filesystem {
            return Ok(None);
        }

        let mut unshare_flags = libc::CLONE_NEWUSER;
        if policy.isolate_network {
            unshare_flags |= libc::CLONE_NEWNET;
        }
        let root = if policy.confine_filesystem {
            unshare_flags |= libc::CLONE_NEWNS;
            Some(Root::plan(workspace, &policy.read_only_paths)?)
        } else {
            None
        };

        // SAFETY: getuid and getgid always succeed.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Ok(Some(Self {
            unshare_flags,
            uid_map: format!("{uid} {uid} 1").into_bytes(),
            gid_map: format!("{gid} {gid} 1").into_bytes(),
            root,
        }))
    }

    /// Placeholder files and directories the jail leaves in the workspace.
    pub fn skeleton(&self) -> &[PathBuf] {
        match &self.root {
            Some(root) => &root.skeleton,
            None => &[],
        }
    }

    /// Enter the namespaces. Runs in the forked child.
    pub fn enter(&self) -> io::Result<()> {
        check(unsafe { libc::unshare(self.unshare_flags) })?;
        write_file(c"/proc/self/setgroups", b"deny")?;
        write_file(c"/proc/self/uid_map", &self.uid_map)?;
        write_file(c"/proc/self/gid_map", &self.gid_map)?;
        if let Some(root) = &self.root {
            root.enter()?;
        }
        Ok(())
    }
}

impl Root {
    fn plan(workspace: &Path, read_only_paths: &[PathBuf]) -> io::Result<Self> {
        let mut sources: Vec<&PathBuf> = read_only_paths.iter().collect();
        sources.sort();
        sources.dedup();

        let mut dirs: Vec<PathBuf> = Vec::new();
        let mut binds = Vec::new();
        let mut skeleton: Vec<PathBuf> = Vec::new();

        for source in sources {
            let target = mirror(workspace, source)?;
            // A path that does not exist is planned as a directory; mounting it
            // fails in the child, which refuses to run.
            let kind = if source.is_file() {
                Mountpoint::File
            } else {
                Mountpoint::Dir
            };
            let remount = libc::MS_REMOUNT
                | libc::MS_BIND
                | libc::MS_RDONLY
                | libc::MS_NOSUID
                | libc::MS_NODEV
                | locked_flags(source);
            plan_mountpoint(workspace, &target, kind, &mut dirs, &mut skeleton);
            binds.push(Bind {
                source: cstring(source)?,
                target: cstring(&target)?,
                kind,
                remount: Some(remount),
            });
        }

        for device in DEVICES.iter().map(Path::new).filter(|d| d.exists()) {
            let target = mirror(workspace, device)?;
            plan_mountpoint(workspace, &target, Mountpoint::File, &mut dirs, &mut skeleton);
            binds.push(Bind {
                source: cstring(device)?,
                target: cstring(&target)?,
                kind: Mountpoint::File,
                remount: None,
            });
        }

        Ok(Self {
            workspace: cstring(workspace)?,
            dirs: dirs.iter().map(|d| cstring(d)).collect::<io::Result<_>>()?,
            binds,
            skeleton,
        })
    }

    fn enter(&self) -> io::Result<()> {
        // Nothing mounted from here on propagates back to the host.
        mount(None, c"/", libc::MS_REC | libc::MS_PRIVATE)?;
        // pivot_root needs the new root to be a mount point.
        mount(Some(&self.workspace), &self.workspace, libc::MS_BIND)?;

        // Mountpoints first: a later bind may cover their parent read-only.
        for dir in &self.dirs {
            make_dir(dir)?;
        }
        for bind in self.binds.iter().filter(|b| b.kind == Mountpoint::File) {
            make_file(&bind.target)?;
        }
        for bind in &self.binds {
            let flags = match bind.kind {
                Mountpoint::Dir => libc::MS_BIND | libc::MS_REC,
                Mountpoint::File => libc::MS_BIND,
            };
            mount(Some(&bind.source), &bind.target, flags)?;
            if let Some(remount) = bind.remount {
                mount(None, &bind.target, remount)?;
            }
        }

        check(unsafe { libc::chdir(self.workspace.as_ptr()) })?;
        let dot = c".";
        let ret = unsafe { libc::syscall(libc::SYS_pivot_root, dot.as_ptr(), dot.as_ptr()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        // The old root is stacked on top of the new one; drop it.
        check(unsafe { libc::umount2(dot.as_ptr(), libc::MNT_DETACH) })?;
        check(unsafe { libc::chdir(c"/".as_ptr()) })
    }
}

/// Remove the mountpoints a jail left behind. Anything the program put in
/// them is left alone.
pub fn tidy(skeleton: &[PathBuf]) {
    for path in skeleton.iter().rev() {
        let Ok(meta) = std::fs::symlink_metadata(path) else {
            continue;
        };
        let _ = if meta.is_dir() {
            std::fs::remove_dir(path)
        } else if meta.is_file() && meta.len() == 0 {
            std::fs::remove_file(path)
        } else {
            Ok(())
        };
    }
}

/// Where `source` appears inside the workspace.
fn mirror(workspace: &Path, source: &Path) -> io::Result<PathBuf> {
    let relative = source.strip_prefix("/").map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("read-only path {} is not absolute", source.display()),
        )
    })?;
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("read-only path {} is not normalized", source.display()),
        ));
    }
    Ok(workspace.join(relative))
}

fn plan_mountpoint(
    workspace: &Path,
    target: &Path,
    kind: Mountpoint,
    dirs: &mut Vec<PathBuf>,
    skeleton: &mut Vec<PathBuf>,
) {
    let mut parents: Vec<&Path> = target
        .ancestors()
        .skip(1)
        .take_while(|dir| *dir != workspace)
        .collect();
    parents.reverse();
    if kind == Mountpoint::Dir {
        parents.push(target);
    }
    for dir in parents {
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
            skeleton.push(dir.to_path_buf());
        }
    }
    if kind == Mountpoint::File && !skeleton.iter().any(|p| p == target) {
        skeleton.push(target.to_path_buf());
    }
}

/// Flags of the mount under `path` that a user namespace may not clear on remount.
fn locked_flags(path: &Path) -> libc::c_ulong {
    let Ok(path) = cstring(path) else {
        return 0;
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut stat) } != 0 {
        return 0;
    }
    [
        (libc::ST_NOEXEC, libc::MS_NOEXEC),
        (libc::ST_NOATIME, libc::MS_NOATIME),
        (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
        (libc::ST_RELATIME, libc::MS_RELATIME),
    ]
    .into_iter()
    .filter(|(st, _)| stat.f_flag & st != 0)
    .fold(0, |flags, (_, ms)| flags | ms)
}

fn cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path {} contains a NUL byte", path.display()),
        )
    })
}

fn mount(source: Option<&CStr>, target: &CStr, flags: libc::c_ulong) -> io::Result<()> {
    let source = source.map_or(std::ptr::null(), CStr::as_ptr);
    check(unsafe {
        libc::mount(
            source,
            target.as_ptr(),
            std::ptr::null(),
            flags,
            std::ptr::null(),
        )
    })
}

fn make_dir(path: &CStr) -> io::Result<()> {
    if unsafe { libc::mkdir(path.as_ptr(), 0o755) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EEXIST) {
        Ok(())
    } else {
        Err(err)
    }
}

fn make_file(path: &CStr) -> io::Result<()> {
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_CLOEXEC,
            0o644 as libc::c_uint,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    unsafe { libc::close(fd) };
    Ok(())
}

fn write_file(path: &CStr, contents: &[u8]) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    let written = unsafe { libc::write(fd, contents.as_ptr().cast(), contents.len()) };
    let result = if written == contents.len() as isize {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    };
    unsafe { libc::close(fd) };
    result
}
