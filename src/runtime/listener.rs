//! Unix domain socket listener setup.

use mio::net::UnixListener;
use socket2::{Domain, SockAddr, Socket, Type};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Create a non-blocking Unix domain socket listener at `path`.
///
/// Any stale socket file left behind by a crashed process is removed first,
/// so a restart never fails with "address in use". Bind or listen failure is
/// returned to the caller; setup errors are fatal to the process.
pub fn bind_socket(path: &Path, backlog: i32) -> io::Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale socket file"),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&SockAddr::unix(path)?)?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    Ok(UnixListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bind_creates_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listen.sock");

        let listener = bind_socket(&path, 8).unwrap();
        assert!(path.exists());
        drop(listener);
    }

    #[test]
    fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");

        // Leave an artifact at the address, as a crashed server would
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"stale").unwrap();
        drop(file);

        let listener = bind_socket(&path, 8).unwrap();
        assert!(path.exists());
        drop(listener);
    }

    #[test]
    fn test_bind_fails_on_unreachable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("listen.sock");

        assert!(bind_socket(&path, 8).is_err());
    }
}
