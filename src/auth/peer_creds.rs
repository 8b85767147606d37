//! Peer credential verification using SO_PEERCRED.

use std::os::fd::AsFd;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

use crate::error::{AuthErrorKind, ShellError};

/// Credentials of the process on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

/// Read the peer's credentials and check its UID against `allowed_uids`.
///
/// An empty allow list rejects everyone.
pub fn verify_peer<S: AsFd>(stream: &S, allowed_uids: &[u32]) -> Result<PeerInfo, ShellError> {
    let creds = getsockopt(stream, PeerCredentials).map_err(|e| ShellError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    let peer = PeerInfo {
        uid: creds.uid(),
        gid: creds.gid(),
        pid: creds.pid(),
    };

    if !allowed_uids.contains(&peer.uid) {
        return Err(ShellError::Auth {
            kind: AuthErrorKind::UnauthorizedPeer { uid: peer.uid },
        });
    }

    Ok(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getuid;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_own_uid_is_accepted() {
        let (a, _b) = UnixStream::pair().unwrap();
        let uid = getuid().as_raw();

        let peer = verify_peer(&a, &[uid]).unwrap();
        assert_eq!(peer.uid, uid);
        assert_eq!(peer.pid, std::process::id() as i32);
    }

    #[test]
    fn test_other_uid_is_rejected() {
        let (a, _b) = UnixStream::pair().unwrap();
        let other = getuid().as_raw().wrapping_add(1);

        let err = verify_peer(&a, &[other]).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Auth {
                kind: AuthErrorKind::UnauthorizedPeer { .. }
            }
        ));
        assert_eq!(err.code(), "AUTH_ERROR");
    }

    #[test]
    fn test_empty_allow_list_rejects() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(verify_peer(&a, &[]).is_err());
    }
}
