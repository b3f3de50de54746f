//! Trace memcached under pin while mutilate drives load against it.
//!
//! Requires `setup00000`.

use std::time::{Duration, Instant};

use clap::clap_app;

use log::{info, warn};

use serde::{Deserialize, Serialize};

use spurs::{cmd, Execute, SshShell};

use crate::{
    background::signal,
    cli::{remote, validator},
    output::{Parametrize, Timestamp, ALLOC_SUFFIX},
    paths::MEMCACHED_RUN_LOG,
    pin::{Injection, Pintool},
    results::{
        append_run_log, remove_file, update_latest, write_params, write_timings, LatestPolicy,
    },
    runlog::RunLogEntry,
    workloads::{
        random_port, run_mutilate, start_memcached, MemcachedConfig, MutilateConfig,
        MEMCACHED_DEFAULT_MEMORY_MB, MUTILATE_DEFAULT_UPDATE_RATIO,
    },
    Login, ResearchDirs,
};

/// How long to wait for memcached to start accepting connections by default. Under pin, startup
/// takes a few seconds.
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    exp: (usize, String),

    value_size: usize,
    records: usize,
    time_sec: usize,

    memory_mb: usize,
    port: u16,
    update_ratio: f64,
    fb_ia: bool,
    startup_timeout_secs: u64,

    pin: bool,

    username: String,
    host: String,

    local_git_hash: String,

    remote_research_settings: std::collections::BTreeMap<String, String>,

    timestamp: Timestamp,
}

impl Parametrize for Config {
    fn name(&self) -> &str {
        &self.exp.1
    }

    fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }
}

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { exp00000 =>
        (about: "Run experiment 00000: trace memcached under pin while mutilate drives load \
                 against it.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg HOSTNAME: +required +takes_value
         "The domain name of the remote (e.g. c240g2-031321.wisc.cloudlab.us:22)")
        (@arg USERNAME: +required +takes_value
         "The username on the remote (e.g. markm)")
        (@arg VALUESIZE: +required +takes_value {validator::is::<usize>}
         "The size of mutilate's values in bytes (e.g. 4096)")
        (@arg RECORDS: +required +takes_value {validator::is::<usize>}
         "The number of records mutilate loads (e.g. 100000)")
        (@arg TIME: +required +takes_value {validator::is::<usize>}
         "How long mutilate generates load, in seconds (e.g. 30)")
        (@arg MEMORY: --memory +takes_value {validator::is::<usize>}
         "(Optional) The memory given to memcached in MB (default: 10000)")
        (@arg PORT: --port +takes_value {validator::is::<u16>}
         "(Optional) The port memcached listens on (default: random in 10000-60000)")
        (@arg UPDATE: --update +takes_value {validator::is::<f64>}
         "(Optional) The fraction of requests that are updates (default: 0.5)")
        (@arg FB_IA: --fb_ia
         "(Optional) Use the Facebook inter-arrival distribution")
        (@arg STARTUP_TIMEOUT: --startup_timeout +takes_value {validator::is::<u64>}
         "(Optional) How long to wait for memcached to start, in seconds (default: 60)")
        (@arg NO_PIN: --no_pin
         "(Optional) Run memcached without pin (no trace is produced)")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let login = remote::parse_cli_options(sub_m);

    let value_size = sub_m.value_of("VALUESIZE").unwrap().parse::<usize>().unwrap();
    let records = sub_m.value_of("RECORDS").unwrap().parse::<usize>().unwrap();
    let time_sec = sub_m.value_of("TIME").unwrap().parse::<usize>().unwrap();

    let memory_mb = sub_m
        .value_of("MEMORY")
        .map(|value| value.parse::<usize>().unwrap())
        .unwrap_or(MEMCACHED_DEFAULT_MEMORY_MB);
    let port = sub_m
        .value_of("PORT")
        .map(|value| value.parse::<u16>().unwrap())
        .unwrap_or_else(random_port);
    let update_ratio = sub_m
        .value_of("UPDATE")
        .map(|value| value.parse::<f64>().unwrap())
        .unwrap_or(MUTILATE_DEFAULT_UPDATE_RATIO);
    let fb_ia = sub_m.is_present("FB_IA");
    let startup_timeout_secs = sub_m
        .value_of("STARTUP_TIMEOUT")
        .map(|value| value.parse::<u64>().unwrap())
        .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS);
    let pin = !sub_m.is_present("NO_PIN");

    let ushell = SshShell::with_default_key(login.username, login.host)?;
    let local_git_hash = crate::local_git_hash()?;
    let remote_research_settings = crate::get_remote_research_settings(&ushell)?;

    let cfg = Config {
        exp: (0, "memcached".into()),

        value_size,
        records,
        time_sec,

        memory_mb,
        port,
        update_ratio,
        fb_ia,
        startup_timeout_secs,

        pin,

        username: login.username.into(),
        host: login.hostname.into(),

        local_git_hash,

        remote_research_settings,

        timestamp: Timestamp::now(),
    };

    run_inner(&login, &cfg)
}

fn run_inner<A>(login: &Login<A>, cfg: &Config) -> Result<(), failure::Error>
where
    A: std::net::ToSocketAddrs + std::fmt::Display + std::fmt::Debug + Clone,
{
    let ushell = SshShell::with_default_key(login.username, &login.host)?;

    let dirs = ResearchDirs::resolve(&ushell, &cfg.remote_research_settings)?;
    let out_dir = dirs.traces(cfg.name());
    ushell.run(cmd!("mkdir -p {} {}", out_dir, dirs.scratch))?;

    let (trace_file, params_file, time_file) = cfg.gen_standard_names();
    let trace_path = dir!(out_dir.as_str(), trace_file);
    let alloc_path = dir!(out_dir.as_str(), cfg.gen_file_name(ALLOC_SUFFIX));

    write_params(&ushell, &dir!(out_dir.as_str(), params_file), cfg)?;

    let pin_path = dirs.pin();
    let tool_path = dirs.pinatrace_tool();
    let memcached = dirs.memcached();
    let mutilate = dirs.mutilate();

    let mut timers = vec![];

    let server = time!(
        timers,
        "Start memcached",
        start_memcached(
            &ushell,
            &MemcachedConfig {
                memcached: &memcached,
                port: cfg.port,
                server_size_mb: cfg.memory_mb,
                pintool: if cfg.pin {
                    Some(Pintool {
                        pin_path: &pin_path,
                        tool_path: &tool_path,
                        injection: Injection::Child,
                        output_path: &trace_path,
                        alloc_path: Some(alloc_path.as_str()),
                        disable_aslr: true,
                    })
                } else {
                    None
                },
            },
            &dirs.scratch,
            Duration::from_secs(cfg.startup_timeout_secs),
        )?
    );
    info!("memcached is up on port {} (pid {})", cfg.port, server.pid());

    let mutilate_cfg = MutilateConfig {
        mutilate: &mutilate,
        port: cfg.port,
        update_ratio: cfg.update_ratio,
        fb_ia: cfg.fb_ia,
        value_size: cfg.value_size,
        records: cfg.records,
        time_sec: cfg.time_sec,
    };

    let start = Instant::now();
    let result = time!(timers, "Workload", run_mutilate(&ushell, &mutilate_cfg));
    let mutilate_elapsed = start.elapsed();

    if let Err(err) = result {
        warn!("mutilate failed; cleaning up");

        server.terminate(&ushell)?;
        server.wait()?;

        if cfg.pin {
            info!("Deleting {}", trace_path);
            remove_file(&ushell, &trace_path)?;
        }

        return Err(failure::Error::from(err).context("mutilate failed").into());
    }

    if !cfg.pin {
        server.terminate(&ushell)?;
        server.wait()?;
        write_timings(&ushell, &dir!(out_dir.as_str(), time_file), &timers)?;
        println!("RESULTS: {}", dir!(out_dir.as_str(), cfg.gen_file_name("*")));
        return Ok(());
    }

    // Pin only writes the trace when memcached exits, so memcached must be stopped and pin left
    // to exit on its own.
    let memcached_pid = match server.only_child(&ushell) {
        Ok(pid) => pid,
        Err(err) => {
            server.terminate(&ushell)?;
            return Err(err);
        }
    };

    time!(timers, "Stop memcached", {
        signal(&ushell, memcached_pid, "TERM")?;
        server.wait()?;
    });
    info!("Terminated memcached (pid {})", memcached_pid);

    update_latest(&ushell, &out_dir, &trace_path, LatestPolicy::KeepPrevious)?;

    append_run_log(
        &ushell,
        &dir!(out_dir.as_str(), MEMCACHED_RUN_LOG),
        &RunLogEntry::new(
            &mutilate_cfg.command(),
            &mutilate,
            &trace_path,
            mutilate_elapsed,
        ),
    )?;

    write_timings(&ushell, &dir!(out_dir.as_str(), time_file), &timers)?;

    let glob = cfg.gen_file_name("*");
    println!("RESULTS: {}", dir!(out_dir.as_str(), glob));

    Ok(())
}
