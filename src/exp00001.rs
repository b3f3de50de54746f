//! Trace one PARSEC application under pin, running it to completion.
//!
//! Requires `setup00000`.

use std::time::Instant;

use clap::clap_app;

use log::info;

use serde::{Deserialize, Serialize};

use spurs::{cmd, Execute, SshShell};

use crate::{
    cli::{remote, validator},
    output::{Parametrize, Timestamp},
    pin::{Injection, Pintool},
    results::{
        params_with_header, remove_file, update_latest, wrap_trace_with_header, write_params,
        write_timings, LatestPolicy,
    },
    trace::TraceHeader,
    workloads::{run_parsec, unpack_parsec_input, InputSize, ParsecApp, ParsecConfig},
    Login, ResearchDirs,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    exp: (usize, String),

    app: ParsecApp,
    input_size: InputSize,

    pin: bool,

    username: String,
    host: String,

    local_git_hash: String,

    remote_research_settings: std::collections::BTreeMap<String, String>,

    timestamp: Timestamp,
}

impl Parametrize for Config {
    fn name(&self) -> &str {
        self.app.name()
    }

    fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }
}

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { exp00001 =>
        (about: "Run experiment 00001: trace a PARSEC application under pin.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg HOSTNAME: +required +takes_value
         "The domain name of the remote (e.g. c240g2-031321.wisc.cloudlab.us:22)")
        (@arg USERNAME: +required +takes_value
         "The username on the remote (e.g. markm)")
        (@arg APP: +required +takes_value {validator::is::<ParsecApp>}
         "The PARSEC application (blackscholes, bodytrack, ferret, fluidanimate, freqmine, \
          raytrace, vips, x264)")
        (@arg INPUT_SIZE: +required +takes_value {validator::is::<InputSize>}
         "The PARSEC input size (test, simdev, simsmall, simmedium, simlarge, native)")
        (@arg NO_PIN: --no_pin
         "(Optional) Run the application without pin (no trace is produced)")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let login = remote::parse_cli_options(sub_m);

    let app = sub_m.value_of("APP").unwrap().parse::<ParsecApp>()?;
    let input_size = sub_m.value_of("INPUT_SIZE").unwrap().parse::<InputSize>()?;
    let pin = !sub_m.is_present("NO_PIN");

    let ushell = SshShell::with_default_key(login.username, login.host)?;
    let local_git_hash = crate::local_git_hash()?;
    let remote_research_settings = crate::get_remote_research_settings(&ushell)?;

    let cfg = Config {
        exp: (1, "parsec".into()),

        app,
        input_size,

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
    let scratch_output = dir!(dirs.scratch.as_str(), cfg.gen_file_name(".parsec"));

    let params_path = dir!(out_dir.as_str(), params_file);
    write_params(&ushell, &params_path, cfg)?;

    let parsec = dirs.parsec();
    let pin_path = dirs.pin();
    let tool_path = dirs.pinatrace_tool();

    let mut timers = vec![];

    let (tmp_dir, input) = time!(
        timers,
        "Unpack input",
        unpack_parsec_input(&ushell, &parsec, cfg.app, cfg.input_size)?
    );
    info!("Unpacked {} into {}", input, tmp_dir);

    let parsec_cfg = ParsecConfig {
        parsec: &parsec,
        app: cfg.app,
        input_size: cfg.input_size,
        input: &input,
        output: &scratch_output,
        pintool: if cfg.pin {
            Some(Pintool {
                pin_path: &pin_path,
                tool_path: &tool_path,
                injection: Injection::Dynamic,
                output_path: &trace_path,
                alloc_path: None,
                disable_aslr: true,
            })
        } else {
            None
        },
    };

    let start = Instant::now();
    let result = time!(timers, "Workload", run_parsec(&ushell, &parsec_cfg));
    let elapsed = start.elapsed();

    // Clean up the scratch input and output even if the workload failed.
    ushell.run(cmd!("rm -rf {}", tmp_dir))?;
    remove_file(&ushell, &parsec_cfg.output_path())?;

    result?;

    let header = TraceHeader {
        app_name: Some(cfg.app.name().into()),
        input_size: Some(cfg.input_size.name().into()),
        time_ms: Some(elapsed.as_millis() as u64),
        extra: Default::default(),
    };

    if cfg.pin {
        update_latest(&ushell, &out_dir, &trace_path, LatestPolicy::Replace)?;
    }

    // Text traces (and runs without pin) keep their header in the params instead.
    if cfg.pin && wrap_trace_with_header(&ushell, &trace_path, &header)? {
        info!("Added header to {}", trace_path);
    } else {
        write_params(&ushell, &params_path, &params_with_header(cfg, &header)?)?;
        info!("Added header to {}", params_path);
    }

    write_timings(&ushell, &dir!(out_dir.as_str(), time_file), &timers)?;

    let glob = cfg.gen_file_name("*");
    println!("RESULTS: {}", dir!(out_dir.as_str(), glob));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_carry_header() {
        let cfg = Config {
            exp: (1, "parsec".into()),
            app: ParsecApp::Ferret,
            input_size: InputSize::Simsmall,
            pin: true,
            username: "markm".into(),
            host: "localhost".into(),
            local_git_hash: "abc".into(),
            remote_research_settings: Default::default(),
            timestamp: Timestamp::now(),
        };
        let header = TraceHeader {
            app_name: Some(cfg.app.name().into()),
            input_size: Some(cfg.input_size.name().into()),
            time_ms: Some(4321),
            extra: Default::default(),
        };

        let params = params_with_header(&cfg, &header).unwrap();
        assert_eq!(params["app"], serde_json::to_value(ParsecApp::Ferret).unwrap());
        assert_eq!(params["header"]["time_ms"], 4321);
        assert_eq!(params["header"]["app_name"], "ferret");
        assert_eq!(params["header"]["input_size"], "simsmall");
    }
}
