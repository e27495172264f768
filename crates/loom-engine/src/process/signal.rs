//! Process-group signalling. Every supervised child leads its own group,
//! so its pid doubles as the group id.

use std::io;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillOutcome {
    Signalled,
    NotRunning,
}

pub fn terminate_group(pid: u32) -> io::Result<KillOutcome> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

pub fn kill_group(pid: u32) -> io::Result<KillOutcome> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<KillOutcome> {
    // pid 0 would address our own group.
    let pgid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid process group {pid}")))?;

    // SAFETY: killpg only sends a signal and takes no pointers.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return Ok(KillOutcome::Signalled);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(KillOutcome::NotRunning)
    } else {
        Err(err)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn refuses_pid_zero() {
        let err = terminate_group(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn kills_a_spawned_group() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert_eq!(kill_group(pid).unwrap(), KillOutcome::Signalled);
        let status = child.wait().await.unwrap();
        assert!(!status.success());

        assert_eq!(terminate_group(pid).unwrap(), KillOutcome::NotRunning);
    }
}
