//! Common workloads.

use std::{fmt, path::Path, str::FromStr, time::Duration};

use failure::Fail;

use rand::Rng;

use serde::{Deserialize, Serialize};

use spurs::{cmd, Execute, SshError, SshShell};

use crate::{
    background::{port_is_free, wait_for_port, BackgroundProcess},
    paths::*,
    pin::{maybe_under_pin, Pintool},
    ProcessError,
};

/// The default amount of memory given to the memcached server (MB).
pub const MEMCACHED_DEFAULT_MEMORY_MB: usize = 10_000;

/// The default fraction of mutilate requests that are updates.
pub const MUTILATE_DEFAULT_UPDATE_RATIO: f64 = 0.5;

/// Pick a random port for memcached, so that concurrent experiments on the same machine are
/// unlikely to collide.
pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(10_000..=60_000)
}

/// The configuration of a memcached server.
#[derive(Debug)]
pub struct MemcachedConfig<'s> {
    /// The path to the memcached binary.
    pub memcached: &'s str,
    /// The port to listen on.
    pub port: u16,
    /// The size of the `memcached` server in MB.
    pub server_size_mb: usize,

    /// Indicates that we should run the server under the given pintool.
    pub pintool: Option<Pintool<'s>>,
}

impl MemcachedConfig<'_> {
    pub fn command(&self) -> String {
        maybe_under_pin(
            self.pintool.as_ref(),
            &format!(
                "{} -p {} -m {}",
                self.memcached, self.port, self.server_size_mb
            ),
        )
    }
}

/// Start a `memcached` server in the background and wait for it to accept connections.
///
/// `scratch` is the directory for the launcher's bookkeeping files. If the server does not come
/// up within `timeout`, or exits first (usually because the port is already in use), this
/// returns an error.
pub fn start_memcached(
    shell: &SshShell,
    cfg: &MemcachedConfig<'_>,
    scratch: &str,
    timeout: Duration,
) -> Result<BackgroundProcess, failure::Error> {
    if !port_is_free(shell, cfg.port)? {
        failure::bail!("memcached failed to start: port {} is already in use", cfg.port);
    }

    let server = BackgroundProcess::spawn(shell, &cfg.command(), scratch, "memcached")?;

    match wait_for_port(shell, cfg.port, timeout, &server) {
        Ok(()) => Ok(server),
        Err(err) => {
            if let Some(ProcessError::Exited(_)) = err.downcast_ref::<ProcessError>() {
                failure::bail!(
                    "memcached failed to start (is port {} already in use?)",
                    cfg.port
                );
            }

            server.terminate(shell)?;
            Err(err)
        }
    }
}

/// The configuration of a mutilate load generator run against a local memcached.
#[derive(Debug)]
pub struct MutilateConfig<'s> {
    /// The path to the mutilate binary.
    pub mutilate: &'s str,
    /// The port of the memcached server on localhost.
    pub port: u16,
    /// The fraction of requests that are updates.
    pub update_ratio: f64,
    /// Use the Facebook inter-arrival distribution.
    pub fb_ia: bool,
    /// The value size in bytes.
    pub value_size: usize,
    /// The number of records to load.
    pub records: usize,
    /// How long to generate load for.
    pub time_sec: usize,
}

impl MutilateConfig<'_> {
    /// The mutilate command. The value size, record count, and duration always come last:
    /// `runlog` relies on it.
    pub fn command(&self) -> String {
        format!(
            "{} --server localhost:{} --verbose --update={} {}--valuesize={} --records={} --time={}",
            self.mutilate,
            self.port,
            self.update_ratio,
            if self.fb_ia { "--iadist=fb_ia " } else { "" },
            self.value_size,
            self.records,
            self.time_sec,
        )
    }
}

/// Run mutilate to completion.
pub fn run_mutilate(shell: &SshShell, cfg: &MutilateConfig<'_>) -> Result<(), SshError> {
    shell.run(cmd!("{}", cfg.command()))?;
    Ok(())
}

/// Errors from choosing a PARSEC workload.
#[derive(Debug, Fail)]
pub enum ParsecError {
    #[fail(display = "invalid app_name {}; must be one of: {}", _0, _1)]
    InvalidApp(String, String),

    #[fail(display = "invalid input_size {}; must be one of: {}", _0, _1)]
    InvalidInputSize(String, String),
}

/// The PARSEC applications we know how to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsecApp {
    Blackscholes,
    Bodytrack,
    Ferret,
    Fluidanimate,
    Freqmine,
    Raytrace,
    Vips,
    X264,
}

impl ParsecApp {
    pub const ALL: &'static [ParsecApp] = &[
        ParsecApp::Blackscholes,
        ParsecApp::Bodytrack,
        ParsecApp::Ferret,
        ParsecApp::Fluidanimate,
        ParsecApp::Freqmine,
        ParsecApp::Raytrace,
        ParsecApp::Vips,
        ParsecApp::X264,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParsecApp::Blackscholes => "blackscholes",
            ParsecApp::Bodytrack => "bodytrack",
            ParsecApp::Ferret => "ferret",
            ParsecApp::Fluidanimate => "fluidanimate",
            ParsecApp::Freqmine => "freqmine",
            ParsecApp::Raytrace => "raytrace",
            ParsecApp::Vips => "vips",
            ParsecApp::X264 => "x264",
        }
    }

    /// The name of the binary in the app's `bin` directory.
    pub fn binary(self) -> &'static str {
        match self {
            ParsecApp::Raytrace => "rtview",
            app => app.name(),
        }
    }

    /// The command line arguments of a single-threaded run over the given input and output.
    pub fn args(self, input: &str, output: &str) -> String {
        match self {
            ParsecApp::Blackscholes => format!("1 {} {}", input, output),
            ParsecApp::Bodytrack => format!("{} 4 1 5 1 0 1", input),
            ParsecApp::Ferret => format!("{} 5 5 1 {}", input, output),
            ParsecApp::Fluidanimate => format!("1 1 {} {}", input, output),
            ParsecApp::Freqmine => format!("{} 1", input),
            ParsecApp::Raytrace => format!("{} -automove -nthreads 1 -frames 1 -res 1 1", input),
            ParsecApp::Vips => format!("im_benchmark {} {}", input, output),
            ParsecApp::X264 => format!(
                "--quiet --qp 20 --partitions b8x8,i4x4 --ref 5 --direct auto --b-pyramid \
                 --weightb --mixed-refs --no-fast-pskip --me umh --subme 7 --analyse b8x8,i4x4 \
                 --threads 1 -o {} {}",
                output, input
            ),
        }
    }

    fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|app| app.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ParsecApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ParsecApp {
    type Err = ParsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|app| app.name() == s)
            .ok_or_else(|| ParsecError::InvalidApp(s.to_owned(), Self::valid_names()))
    }
}

/// The PARSEC input sizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSize {
    Test,
    Simdev,
    Simsmall,
    Simmedium,
    Simlarge,
    Native,
}

impl InputSize {
    pub const ALL: &'static [InputSize] = &[
        InputSize::Test,
        InputSize::Simdev,
        InputSize::Simsmall,
        InputSize::Simmedium,
        InputSize::Simlarge,
        InputSize::Native,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InputSize::Test => "test",
            InputSize::Simdev => "simdev",
            InputSize::Simsmall => "simsmall",
            InputSize::Simmedium => "simmedium",
            InputSize::Simlarge => "simlarge",
            InputSize::Native => "native",
        }
    }
}

impl fmt::Display for InputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for InputSize {
    type Err = ParsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|size| size.name() == s)
            .ok_or_else(|| {
                let valid = Self::ALL
                    .iter()
                    .map(|size| size.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                ParsecError::InvalidInputSize(s.to_owned(), valid)
            })
    }
}

/// The configuration of a PARSEC run.
#[derive(Debug)]
pub struct ParsecConfig<'s> {
    /// The path of the PARSEC directory on the remote.
    pub parsec: &'s str,
    pub app: ParsecApp,
    pub input_size: InputSize,
    /// The unpacked input (a file or directory), as listed first by `tar`.
    pub input: &'s str,
    /// Where the app should put its output.
    pub output: &'s str,

    /// Indicates that we should run the workload under the given pintool.
    pub pintool: Option<Pintool<'s>>,
}

/// Returns the parent directory of a remote path (without the trailing `/`).
fn parent_dir(path: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

impl ParsecConfig<'_> {
    fn app_dir(&self) -> String {
        dir!(self.parsec, PARSEC_APPS_DIR, self.app.name())
    }

    /// The input tarball for the configured app and input size.
    pub fn input_tarball(parsec: &str, app: ParsecApp, input_size: InputSize) -> String {
        dir!(
            parsec,
            PARSEC_APPS_DIR,
            app.name(),
            PARSEC_INPUTS_DIR,
            format!("input_{}.tar", input_size)
        )
    }

    /// Where the app actually writes its output. `vips` insists on a `.v` extension.
    pub fn output_path(&self) -> String {
        match self.app {
            ParsecApp::Vips => dir!(parent_dir(self.output), "parsec.v"),
            _ => self.output.to_owned(),
        }
    }

    pub fn command(&self) -> String {
        let binary = dir!(self.app_dir(), PARSEC_BIN_DIR, self.app.binary());

        let input = match self.app {
            // ferret takes the image database, the table name, and the query directory.
            ParsecApp::Ferret => format!(
                "{} lsh {}",
                self.input,
                dir!(parent_dir(self.input), "queries")
            ),
            _ => self.input.to_owned(),
        };

        maybe_under_pin(
            self.pintool.as_ref(),
            &format!("{} {}", binary, self.app.args(&input, &self.output_path())),
        )
    }
}

/// Unpack the input tarball of the given PARSEC app into a fresh temporary directory. Returns the
/// temporary directory and the unpacked input.
pub fn unpack_parsec_input(
    shell: &SshShell,
    parsec: &str,
    app: ParsecApp,
    input_size: InputSize,
) -> Result<(String, String), failure::Error> {
    let tarball = ParsecConfig::input_tarball(parsec, app, input_size);
    let tmp = shell.run(cmd!("mktemp -d"))?.stdout.trim().to_owned();

    let listing = shell.run(cmd!("tar -xvf {} -C {}", tarball, tmp))?.stdout;
    let input = match listing.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(input) => input.to_owned(),
        None => failure::bail!("{} is empty", tarball),
    };

    let input = dir!(tmp.as_str(), input);
    Ok((tmp, input))
}

/// Run the given PARSEC app to completion.
pub fn run_parsec(shell: &SshShell, cfg: &ParsecConfig<'_>) -> Result<(), failure::Error> {
    shell.run(cmd!("{}", cfg.command()))?;
    Ok(())
}
