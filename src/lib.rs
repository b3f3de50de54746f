//! A library of routines for tracing the memory-page accesses of workloads under Intel Pin, and
//! for analyzing the traces afterwards.
//!
//! The experiment routines (`setup*`, `exp*`) run their workloads on a remote machine over SSH.
//! The analysis routines (`analysis`) run locally on trace files copied back from the remote.

// Must be imported first because the other submodules use the macros defined therein.
#[macro_use]
mod macros;

pub mod output;

pub mod allocs;
pub mod analysis;
pub mod background;
pub mod cli;
pub mod pin;
pub mod results;
pub mod runlog;
pub mod stats;
pub mod trace;
pub mod workloads;

pub mod exp00000;
pub mod exp00001;
pub mod setup00000;

use std::collections::BTreeMap;

use failure::{Fail, ResultExt};

use serde::{Deserialize, Serialize};

use spurs::{cmd, Execute, SshShell};

use paths::*;

/// Information needed to log into a remote machine.
#[derive(Clone, Debug)]
pub struct Login<'u, 'h, A: std::net::ToSocketAddrs + std::fmt::Display + Clone> {
    /// A network address for the host.
    pub host: A,
    /// A human-readable address for the host. Often, this is the same as `host`.
    pub hostname: &'h str,
    /// The username to log in as.
    pub username: &'u str,
}

/// Common paths.
pub mod paths {
    /// The default research directory, relative to the remote user's home. It contains the
    /// checkouts and builds of pin, memcached, mutilate, and PARSEC.
    pub const DEFAULT_RESEARCH_DIR: &str = "research";

    /// The default directory for traces, relative to the remote user's home.
    pub const DEFAULT_PIN_OUT_DIR: &str = "pinatrace_out";

    /// Path to the `pin` launcher in the research directory.
    pub const PIN_BINARY: &str = "pin/pin";

    /// Path to the sources of the `pinatrace` tool in the research directory.
    pub const PINATRACE_SOURCE_DIR: &str = "pin/source/tools/ManualExamples";

    /// Path to the compiled `pinatrace` tool, relative to `PINATRACE_SOURCE_DIR`.
    pub const PINATRACE_TOOL: &str = "obj-intel64/pinatrace.so";

    /// Path to the instrumented memcached build (it logs its allocations) in the research
    /// directory.
    pub const MEMCACHED_BINARY: &str = "memcached_log/memcached";

    /// Path to the mutilate load generator in the research directory.
    pub const MUTILATE_BINARY: &str = "mutilate/mutilate";

    /// Path to PARSEC in the research directory.
    pub const PARSEC_DIR: &str = "parsec-3.0";

    /// Path to the PARSEC applications within the PARSEC directory.
    pub const PARSEC_APPS_DIR: &str = "pkgs/apps";

    /// Path to the binaries of an application within its PARSEC app directory.
    pub const PARSEC_BIN_DIR: &str = "inst/amd64-linux.gcc/bin";

    /// Path to the inputs of an application within its PARSEC app directory.
    pub const PARSEC_INPUTS_DIR: &str = "inputs";

    /// The name of the memcached run log, which lives in the memcached trace directory.
    pub const MEMCACHED_RUN_LOG: &str = "memcached_log.txt";

    /// Symlink to the most recent trace of a workload.
    pub const LATEST: &str = "latest";

    /// Symlink to the second most recent trace of a workload (memcached only).
    pub const PREVIOUS: &str = "latest2";

    /// Keys of `research-settings.json`.
    pub mod settings {
        /// Where pin, memcached, mutilate, and PARSEC live.
        pub const RESEARCH_DIR: &str = "research_dir";

        /// Where traces are written.
        pub const PIN_OUT_DIR: &str = "pin_out_dir";

        /// Where temporary inputs, outputs, and pid files go.
        pub const SCRATCH_DIR: &str = "scratch_dir";
    }
}

/// Errors from managing processes on the remote.
#[derive(Debug, Fail)]
pub enum ProcessError {
    #[fail(display = "process {} has no children", _0)]
    NoChildren(usize),

    #[fail(
        display = "expected exactly one child of process {}, found {:?}",
        pid, children
    )]
    UnexpectedChildren { pid: usize, children: Vec<usize> },

    #[fail(display = "process {} exited before it became ready", _0)]
    Exited(usize),

    #[fail(display = "timed out after {:?} waiting for {}", _0, _1)]
    Timeout(std::time::Duration, String),
}

/// Absolute paths of everything the experiments need on the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDirs {
    /// The research directory (see `paths::DEFAULT_RESEARCH_DIR`).
    pub research: String,
    /// The root of the trace output directories.
    pub pin_out: String,
    /// A directory for temporary files.
    pub scratch: String,
}

impl ResearchDirs {
    /// Compute the directories from the remote's research settings, falling back to the defaults
    /// in the user's home directory. Relative settings are taken relative to the home directory.
    pub fn resolve(
        shell: &SshShell,
        settings: &BTreeMap<String, String>,
    ) -> Result<Self, failure::Error> {
        let home = get_user_home_dir(shell)?;
        Self::from_settings(&home, settings)
    }

    fn from_settings(
        home: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<Self, failure::Error> {
        let research: Option<String> = get_remote_research_setting(settings, settings::RESEARCH_DIR)?;
        let pin_out: Option<String> = get_remote_research_setting(settings, settings::PIN_OUT_DIR)?;
        let scratch: Option<String> = get_remote_research_setting(settings, settings::SCRATCH_DIR)?;

        let research = absolutize(home, research.as_deref().unwrap_or(DEFAULT_RESEARCH_DIR));
        let pin_out = absolutize(home, pin_out.as_deref().unwrap_or(DEFAULT_PIN_OUT_DIR));
        let scratch = scratch
            .map(|s| absolutize(home, &s))
            .unwrap_or_else(|| pin_out.clone());

        Ok(ResearchDirs {
            research,
            pin_out,
            scratch,
        })
    }

    pub fn pin(&self) -> String {
        dir!(self.research.as_str(), PIN_BINARY)
    }

    pub fn pinatrace_source(&self) -> String {
        dir!(self.research.as_str(), PINATRACE_SOURCE_DIR)
    }

    pub fn pinatrace_tool(&self) -> String {
        dir!(self.pinatrace_source(), PINATRACE_TOOL)
    }

    pub fn memcached(&self) -> String {
        dir!(self.research.as_str(), MEMCACHED_BINARY)
    }

    pub fn mutilate(&self) -> String {
        dir!(self.research.as_str(), MUTILATE_BINARY)
    }

    pub fn parsec(&self) -> String {
        dir!(self.research.as_str(), PARSEC_DIR)
    }

    /// The directory holding the traces of the given workload (e.g. `memcached` or `ferret`).
    pub fn traces(&self, workload: &str) -> String {
        dir!(self.pin_out.as_str(), workload)
    }
}

/// Make `path` absolute by prefixing it with `home` if needed.
fn absolutize(home: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        dir!(home.trim_end_matches('/'), path)
    }
}

/// Given an array of timings, generate a human-readable string.
pub fn timings_str(timings: &[(&str, std::time::Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}

/// Get the git hash of the local checkout from which the runner is run. Returns `"dirty"` if
/// the checkout has uncommitted changes.
pub fn local_git_hash() -> Result<String, failure::Error> {
    let status = std::process::Command::new("git")
        .args(&["diff", "--quiet"])
        .status()?;

    match status.code() {
        Some(1) => return Ok("dirty".into()),
        Some(_) => {}
        None => failure::bail!("`git diff` terminated by signal"),
    }

    let output = std::process::Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()?;
    let output =
        std::str::from_utf8(&output.stdout).context("converting git hash string to UTF-8")?;
    let output = output.trim();
    Ok(output.into())
}

/// Get the path of the user's home directory.
pub fn get_user_home_dir(ushell: &SshShell) -> Result<String, failure::Error> {
    let user_home = ushell
        .run(cmd!("echo $HOME").use_bash())?
        .stdout
        .trim()
        .to_owned();
    if user_home.is_empty() {
        Err(failure::format_err!("$HOME is empty"))
    } else {
        Ok(user_home)
    }
}

/// There are some settings that are per-machine, rather than per-experiment (e.g. where pin is
/// installed). We keep these settings in a per-machine file called `research-settings.json`,
/// which is generated at the time of the setup.
///
/// This function sets the given setting or overwrites its current value.
pub fn set_remote_research_setting<V: Serialize>(
    ushell: &SshShell,
    setting: &str,
    value: V,
) -> Result<(), failure::Error> {
    // We don't care too much about efficiency, so whenever we update, we will just read,
    // deserialize, update, and reserialize.
    let mut settings = get_remote_research_settings(ushell)?;

    let serialized = serde_json::to_string(&value)?;
    settings.insert(setting.into(), serialized);

    let new_contents = serde_json::to_string(&settings)?;

    ushell.run(cmd!("echo '{}' > research-settings.json", new_contents))?;

    Ok(())
}

/// Return all research settings. The user can then use `get_remote_research_setting` to parse out
/// a single value.
pub fn get_remote_research_settings(
    ushell: &SshShell,
) -> Result<BTreeMap<String, String>, failure::Error> {
    // Make sure the file exists
    ushell.run(cmd!("touch research-settings.json"))?;

    let file_contents = ushell.run(cmd!("cat research-settings.json"))?;
    let file_contents = file_contents.stdout.trim();

    if file_contents.is_empty() {
        Ok(BTreeMap::new())
    } else {
        Ok(serde_json::from_str(file_contents).context("deserializing remote research settings")?)
    }
}

/// Returns the value of the given setting if it is set.
pub fn get_remote_research_setting<'s, 'd, V: Deserialize<'d>>(
    settings: &'s BTreeMap<String, String>,
    setting: &str,
) -> Result<Option<V>, failure::Error>
where
    's: 'd,
{
    if let Some(setting) = settings.get(setting) {
        Ok(Some(
            serde_json::from_str(setting).context("deserializing remote research settings")?,
        ))
    } else {
        Ok(None)
    }
}

/// Returns the PIDs of the children of the given process on the remote.
pub fn get_children_pids(shell: &SshShell, pid: usize) -> Result<Vec<usize>, failure::Error> {
    children_from_pgrep(pid, shell.run(cmd!("pgrep -P {}", pid)))
}

/// Interpret the result of `pgrep -P pid`, which exits with 1 if nothing matched.
fn children_from_pgrep(
    pid: usize,
    result: Result<spurs::SshOutput, spurs::SshError>,
) -> Result<Vec<usize>, failure::Error> {
    let out = match result {
        Ok(out) => out,
        Err(spurs::SshError::NonZeroExit { exit: 1, .. }) => {
            return Err(ProcessError::NoChildren(pid).into())
        }
        Err(err) => return Err(err.into()),
    };

    let children = parse_pids(&out.stdout)?;
    if children.is_empty() {
        Err(ProcessError::NoChildren(pid).into())
    } else {
        Ok(children)
    }
}

/// Parse one PID per line.
fn parse_pids(stdout: &str) -> Result<Vec<usize>, failure::Error> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<usize>()
                .map_err(|e| failure::format_err!("invalid pid {:?}: {}", line, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dirs() {
        let dirs = ResearchDirs::from_settings("/home/markm", &BTreeMap::new()).unwrap();
        assert_eq!(dirs.research, "/home/markm/research");
        assert_eq!(dirs.pin_out, "/home/markm/pinatrace_out");
        assert_eq!(dirs.scratch, "/home/markm/pinatrace_out");
        assert_eq!(dirs.pin(), "/home/markm/research/pin/pin");
        assert_eq!(
            dirs.pinatrace_tool(),
            "/home/markm/research/pin/source/tools/ManualExamples/obj-intel64/pinatrace.so"
        );
        assert_eq!(dirs.traces("memcached"), "/home/markm/pinatrace_out/memcached");
    }

    #[test]
    fn dirs_from_settings() {
        let mut settings = BTreeMap::new();
        settings.insert(
            settings::RESEARCH_DIR.to_owned(),
            serde_json::to_string("/nobackup/research").unwrap(),
        );
        settings.insert(
            settings::PIN_OUT_DIR.to_owned(),
            serde_json::to_string("traces").unwrap(),
        );
        settings.insert(
            settings::SCRATCH_DIR.to_owned(),
            serde_json::to_string("/tmp").unwrap(),
        );

        let dirs = ResearchDirs::from_settings("/home/markm/", &settings).unwrap();
        assert_eq!(dirs.research, "/nobackup/research");
        assert_eq!(dirs.pin_out, "/home/markm/traces");
        assert_eq!(dirs.scratch, "/tmp");
        assert_eq!(dirs.mutilate(), "/nobackup/research/mutilate/mutilate");
    }

    #[test]
    fn pids() {
        assert_eq!(parse_pids("1234\r\n").unwrap(), vec![1234]);
        assert_eq!(parse_pids("12\n13\n\n").unwrap(), vec![12, 13]);
        assert!(parse_pids("").unwrap().is_empty());
        assert!(parse_pids("abc").is_err());
    }

    fn pgrep_output(stdout: &str) -> Result<spurs::SshOutput, spurs::SshError> {
        Ok(spurs::SshOutput {
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    fn pgrep_exit(exit: i32) -> Result<spurs::SshOutput, spurs::SshError> {
        Err(spurs::SshError::NonZeroExit {
            cmd: "pgrep -P 42".into(),
            exit,
        })
    }

    fn is_no_children(err: &failure::Error) -> bool {
        match err.downcast_ref::<ProcessError>() {
            Some(ProcessError::NoChildren(42)) => true,
            _ => false,
        }
    }

    #[test]
    fn children_from_pgrep_result() {
        assert_eq!(children_from_pgrep(42, pgrep_output("43\n")).unwrap(), vec![43]);
        assert!(is_no_children(&children_from_pgrep(42, pgrep_output("")).unwrap_err()));
        assert!(is_no_children(&children_from_pgrep(42, pgrep_exit(1)).unwrap_err()));

        // Anything else (bad options, a lost connection) is not "no children".
        let err = children_from_pgrep(42, pgrep_exit(2)).unwrap_err();
        assert!(!is_no_children(&err));
        assert!(err.downcast_ref::<spurs::SshError>().is_some());

        let err = children_from_pgrep(
            42,
            Err(spurs::SshError::IoError {
                error: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
            }),
        )
        .unwrap_err();
        assert!(!is_no_children(&err));
    }

    #[test]
    fn timings() {
        let timings = [("Workload", std::time::Duration::from_secs(2))];
        assert_eq!(timings_str(&timings), "Workload: 2s\n");
    }
}
