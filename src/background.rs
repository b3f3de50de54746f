//! Long-running processes (e.g. servers) that run on the remote while the experiment drives them.

use std::time::{Duration, Instant};

use log::debug;

use spurs::{cmd, Execute, SshShell, SshSpawnHandle};
use spurs_util::escape_for_bash;

use crate::{get_children_pids, ProcessError};

/// How often to poll the remote while waiting for something to happen.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for a spawned process to record its PID.
const PIDFILE_TIMEOUT: Duration = Duration::from_secs(30);

/// A process spawned in its own shell on the remote, along with its PID.
pub struct BackgroundProcess {
    pid: usize,
    handle: SshSpawnHandle,
}

/// The script that launches a background command. The shell records its own PID and then `exec`s
/// the command, so the recorded PID is the command's PID.
fn launcher_script(pidfile: &str, command: &str) -> String {
    format!("echo $$ > {} ; exec {}", pidfile, command)
}

impl BackgroundProcess {
    /// Spawn `command` on the remote. `scratch` is a directory for the launcher script and PID
    /// file; `name` distinguishes them from those of other processes.
    ///
    /// The exit status of the command is ignored: servers are usually killed by a signal.
    pub fn spawn(
        shell: &SshShell,
        command: &str,
        scratch: &str,
        name: &str,
    ) -> Result<Self, failure::Error> {
        let pidfile = dir!(scratch, format!("{}.pid", name));
        let script = dir!(scratch, format!("{}.launch.sh", name));

        shell.run(cmd!("rm -f {}", pidfile))?;
        shell.run(cmd!(
            "echo {} > {}",
            escape_for_bash(&launcher_script(&pidfile, command)),
            script
        ))?;

        let handle = shell.spawn(cmd!("bash {}", script).allow_error())?;

        let pid = read_pidfile(shell, &pidfile)?;
        debug!("{} has pid {}", name, pid);

        Ok(BackgroundProcess { pid, handle })
    }

    pub fn pid(&self) -> usize {
        self.pid
    }

    /// Returns true if the process has not exited yet.
    pub fn is_alive(&self, shell: &SshShell) -> bool {
        shell.run(cmd!("kill -0 {}", self.pid)).is_ok()
    }

    /// Returns the PIDs of the children of this process.
    pub fn children(&self, shell: &SshShell) -> Result<Vec<usize>, failure::Error> {
        get_children_pids(shell, self.pid)
    }

    /// Returns the PID of the only child of this process. It is an error to have more than one.
    pub fn only_child(&self, shell: &SshShell) -> Result<usize, failure::Error> {
        let children = self.children(shell)?;
        if children.len() == 1 {
            Ok(children[0])
        } else {
            Err(ProcessError::UnexpectedChildren {
                pid: self.pid,
                children,
            }
            .into())
        }
    }

    /// Send `SIGTERM` to the process. It is not an error if the process is already gone.
    pub fn terminate(&self, shell: &SshShell) -> Result<(), failure::Error> {
        shell.run(cmd!("kill -TERM {}", self.pid).allow_error())?;
        Ok(())
    }

    /// Wait for the process to exit.
    pub fn wait(self) -> Result<(), failure::Error> {
        let (_shell, result) = self.handle.join();
        result?;
        Ok(())
    }
}

/// Send the given signal (e.g. `TERM`) to the given process on the remote.
pub fn signal(shell: &SshShell, pid: usize, sig: &str) -> Result<(), failure::Error> {
    shell.run(cmd!("kill -{} {}", sig, pid))?;
    Ok(())
}

fn read_pidfile(shell: &SshShell, pidfile: &str) -> Result<usize, failure::Error> {
    let start = Instant::now();

    loop {
        let out = shell.run(cmd!("cat {}", pidfile).allow_error())?;
        if let Ok(pid) = out.stdout.trim().parse::<usize>() {
            return Ok(pid);
        }

        if start.elapsed() > PIDFILE_TIMEOUT {
            return Err(ProcessError::Timeout(PIDFILE_TIMEOUT, pidfile.to_owned()).into());
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// How long a process must survive after its port starts accepting connections before it counts
/// as ready. A server that lost the race for its port exits within this time.
const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Count the sockets listed by `ss`, skipping its header.
fn listening_sockets(ss_stdout: &str) -> usize {
    ss_stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("State"))
        .count()
}

/// Returns true if nothing on the remote listens on the given TCP port.
pub fn port_is_free(shell: &SshShell, port: u16) -> Result<bool, failure::Error> {
    let out = shell.run(cmd!("ss -ltn 'sport = :{}'", port))?;
    Ok(listening_sockets(&out.stdout) == 0)
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Ready,
    Exited,
    TimedOut,
    Pending,
}

/// Decide what a single poll of `wait_for_port` means. A live process wins over a timeout, and a
/// dead process is never ready, even if something else accepts connections on its port.
fn readiness(listening: bool, alive: bool, timed_out: bool) -> Readiness {
    match (listening, alive, timed_out) {
        (_, false, _) => Readiness::Exited,
        (true, true, _) => Readiness::Ready,
        (false, true, true) => Readiness::TimedOut,
        (false, true, false) => Readiness::Pending,
    }
}

/// Wait until the remote accepts connections on the given TCP port while `process` is still
/// running. Fails early if `process` exits in the meantime (e.g. because the port was already in
/// use).
pub fn wait_for_port(
    shell: &SshShell,
    port: u16,
    timeout: Duration,
    process: &BackgroundProcess,
) -> Result<(), failure::Error> {
    let start = Instant::now();

    loop {
        let listening = shell
            .run(cmd!("(echo > /dev/tcp/localhost/{}) 2> /dev/null", port).use_bash())
            .is_ok();
        if listening {
            std::thread::sleep(STARTUP_GRACE);
        }

        match readiness(listening, process.is_alive(shell), start.elapsed() > timeout) {
            Readiness::Ready => return Ok(()),
            Readiness::Exited => return Err(ProcessError::Exited(process.pid()).into()),
            Readiness::TimedOut => {
                return Err(ProcessError::Timeout(timeout, format!("port {}", port)).into())
            }
            Readiness::Pending => std::thread::sleep(POLL_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_records_pid_then_execs() {
        assert_eq!(
            launcher_script("/tmp/memcached.pid", "memcached -p 11211"),
            "echo $$ > /tmp/memcached.pid ; exec memcached -p 11211"
        );
    }

    #[test]
    fn ss_output() {
        assert_eq!(
            listening_sockets("State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n"),
            0
        );
        assert_eq!(listening_sockets(""), 0);
        assert_eq!(
            listening_sockets(
                "State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n\
                 LISTEN 0      1024         0.0.0.0:23456      0.0.0.0:*\n\
                 LISTEN 0      1024            [::]:23456         [::]:*\n"
            ),
            2
        );
    }

    #[test]
    fn ready_only_while_alive() {
        // Someone else's server on the port while ours has died.
        assert_eq!(readiness(true, false, false), Readiness::Exited);
        assert_eq!(readiness(false, false, true), Readiness::Exited);

        assert_eq!(readiness(true, true, false), Readiness::Ready);
        assert_eq!(readiness(true, true, true), Readiness::Ready);
        assert_eq!(readiness(false, true, false), Readiness::Pending);
        assert_eq!(readiness(false, true, true), Readiness::TimedOut);
    }
}
