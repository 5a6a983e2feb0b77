use std::{
    ffi::{OsStr, OsString},
    fs::File,
    io,
    os::unix::{
        io::{AsRawFd, FromRawFd, RawFd},
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    fcntl::{self, FlockArg, OFlag},
    sys::stat::{self, Mode},
    unistd,
};

/// Highest suffix tried by [`ListeningSocket::bind_auto()`] when picking a free `wayland-N` name
pub const AUTO_NAME_LIMIT: usize = 32;

// `<socket>.lock`, exclusively flock()ed for as long as the file stays open
#[derive(Debug)]
struct LockFile {
    _file: File,
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Result<LockFile, BindError> {
        let fd = fcntl::open(
            &path,
            OFlag::O_CREAT | OFlag::O_CLOEXEC | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o660),
        )
        .map_err(|_| BindError::PermissionDenied)?;
        // SAFETY: `fd` comes straight from open() and has no other owner
        let file = unsafe { File::from_raw_fd(fd) };
        // another server holding it keeps the lock until it exits
        fcntl::flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock)
            .map_err(|_| BindError::AlreadyInUse)?;
        Ok(LockFile { _file: file, path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = unistd::unlink(&self.path);
    }
}

// a socket file without a lock holder was left behind by a server that died
fn remove_stale_socket(path: &Path) -> Result<(), BindError> {
    match stat::lstat(path) {
        Err(Errno::ENOENT) => Ok(()),
        Err(errno) => Err(BindError::Io(errno.into())),
        Ok(_) => {
            crate::log_debug!("Removing stale socket {}", path.display());
            unistd::unlink(path).map_err(|_| BindError::AlreadyInUse)
        }
    }
}

/// A unix socket clients connect to, together with its lock file
///
/// The lock file (`<socket>.lock`) is held for the whole life of the socket. Both files are
/// removed when the socket is dropped.
#[derive(Debug)]
pub struct ListeningSocket {
    listener: UnixListener,
    path: PathBuf,
    name: Option<OsString>,
    // dropped after the socket file is unlinked
    _lock: LockFile,
}

impl ListeningSocket {
    /// Bind a socket named `name` in `runtime_dir`
    ///
    /// `runtime_dir` must be an absolute path.
    pub fn bind(runtime_dir: &Path, name: impl AsRef<OsStr>) -> Result<ListeningSocket, BindError> {
        if !runtime_dir.is_absolute() {
            return Err(BindError::RuntimeDirNotSet);
        }
        let name = name.as_ref();
        let mut socket = ListeningSocket::bind_absolute(runtime_dir.join(name))?;
        socket.name = Some(name.to_owned());
        Ok(socket)
    }

    /// Bind the first free socket named `{basename}-{n}` in `runtime_dir`, for `n` in `suffixes`
    pub fn bind_auto(
        runtime_dir: &Path,
        basename: &str,
        suffixes: impl IntoIterator<Item = usize>,
    ) -> Result<ListeningSocket, BindError> {
        for n in suffixes {
            match ListeningSocket::bind(runtime_dir, format!("{basename}-{n}")) {
                Err(BindError::AlreadyInUse) => continue,
                result => return result,
            }
        }
        Err(BindError::AlreadyInUse)
    }

    /// Bind a socket at `path`
    ///
    /// A stale socket left at that path by a dead server is replaced, a socket whose lock file
    /// is held by a live one is not.
    pub fn bind_absolute(path: PathBuf) -> Result<ListeningSocket, BindError> {
        let lock = LockFile::acquire(path.with_extension("lock"))?;
        remove_stale_socket(&path)?;
        let listener = UnixListener::bind(&path).map_err(BindError::Io)?;
        listener.set_nonblocking(true).map_err(BindError::Io)?;
        Ok(ListeningSocket { listener, path, name: None, _lock: lock })
    }

    /// Accept a pending connection, `Ok(None)` if there is none
    #[must_use = "the stream must be handed to the display or the client will hang"]
    pub fn accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => Ok(Some(stream)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The socket name, if it was bound with [`bind()`](Self::bind) or
    /// [`bind_auto()`](Self::bind_auto)
    pub fn socket_name(&self) -> Option<&OsStr> {
        self.name.as_deref()
    }

    /// The full path of the socket
    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for ListeningSocket {
    /// Readable when a client waits to be accepted
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        let _ = unistd::unlink(&self.path);
    }
}

/// Error binding a [`ListeningSocket`]
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// No usable runtime directory
    #[error("no absolute runtime directory to put the socket in")]
    RuntimeDirNotSet,
    /// The lock file could not be created
    #[error("cannot create the socket lock file")]
    PermissionDenied,
    /// Another server holds the socket
    #[error("the socket is held by another server")]
    AlreadyInUse,
    /// Some other IO error
    #[error("socket I/O error")]
    Io(#[source] io::Error),
}
