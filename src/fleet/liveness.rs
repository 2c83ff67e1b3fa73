use serde::{Serialize, Serializer};

/// Whether a worker process is still around. Serialized as the dashboard's
/// numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Stopped,
}

impl Liveness {
    pub fn code(self) -> u8 {
        match self {
            Liveness::Running => 0,
            Liveness::Stopped => 1,
        }
    }
}

impl Serialize for Liveness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Best-effort answer to "is this pid running". A recycled pid reads as
/// `Running`; nothing short of a control channel to the worker can tell.
pub trait LivenessProbe: Send + Sync {
    fn probe(&self, pid: i32) -> Liveness;
}

/// Asks the host's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTableProbe;

#[cfg(unix)]
impl LivenessProbe for ProcessTableProbe {
    fn probe(&self, pid: i32) -> Liveness {
        // pid 0 and negative pids address process groups, not a worker
        if pid <= 0 {
            return Liveness::Stopped;
        }
        // signal 0 only checks for existence; EPERM still means the pid is taken
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) {
            Liveness::Running
        } else {
            Liveness::Stopped
        }
    }
}

#[cfg(windows)]
impl LivenessProbe for ProcessTableProbe {
    fn probe(&self, pid: i32) -> Liveness {
        if pid <= 0 {
            return Liveness::Stopped;
        }
        let filter = format!("PID eq {pid}");
        let output = std::process::Command::new("tasklist")
            .args(["/FI", filter.as_str(), "/NH", "/FO", "CSV"])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let needle = format!("\"{pid}\"");
                if String::from_utf8_lossy(&out.stdout).contains(&needle) {
                    Liveness::Running
                } else {
                    Liveness::Stopped
                }
            }
            _ => Liveness::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_running() {
        let pid = std::process::id() as i32;
        assert_eq!(ProcessTableProbe.probe(pid), Liveness::Running);
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_stopped() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert_eq!(ProcessTableProbe.probe(pid), Liveness::Stopped);
    }

    #[test]
    fn group_pids_are_never_probed() {
        assert_eq!(ProcessTableProbe.probe(0), Liveness::Stopped);
        assert_eq!(ProcessTableProbe.probe(-1), Liveness::Stopped);
    }

    #[test]
    fn status_codes() {
        assert_eq!(serde_json::to_string(&Liveness::Running).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Liveness::Stopped).unwrap(), "1");
    }
}
