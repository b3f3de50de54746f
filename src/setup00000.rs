//! Set up the given machine for tracing: record where the tools are and where traces go, check
//! that the tools are there, and optionally build the `pinatrace` tool.
//!
//! Pin, the instrumented memcached, mutilate, and PARSEC are expected to be installed in the
//! research directory already.

use clap::clap_app;

use log::info;

use spurs::{cmd, Execute, SshShell};

use crate::{
    cli::remote, get_remote_research_settings, paths::settings, set_remote_research_setting,
    ResearchDirs,
};

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { setup00000 =>
        (about: "Sets up the given machine for tracing workloads under pin.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg HOSTNAME: +required +takes_value
         "The domain name of the remote (e.g. c240g2-031321.wisc.cloudlab.us:22)")
        (@arg USERNAME: +required +takes_value
         "The username on the remote (e.g. markm)")
        (@arg RESEARCH_DIR: --research_dir +takes_value
         "(Optional) The directory containing pin, memcached_log, mutilate, and parsec-3.0. \
          Relative paths are relative to the home directory (default: research).")
        (@arg OUT_DIR: --out_dir +takes_value
         "(Optional) The directory to write traces to. Relative paths are relative to the \
          home directory (default: pinatrace_out).")
        (@arg SCRATCH_DIR: --scratch_dir +takes_value
         "(Optional) The directory for temporary files (default: the output directory).")
        (@arg BUILD_PINTOOL: --build_pintool
         "(Optional) Build pinatrace.so from the sources in the pin directory.")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let login = remote::parse_cli_options(sub_m);

    let research_dir = sub_m.value_of("RESEARCH_DIR");
    let out_dir = sub_m.value_of("OUT_DIR");
    let scratch_dir = sub_m.value_of("SCRATCH_DIR");
    let build_pintool = sub_m.is_present("BUILD_PINTOOL");

    let ushell = SshShell::with_default_key(login.username, login.host)?;

    for (setting, value) in [
        (settings::RESEARCH_DIR, research_dir),
        (settings::PIN_OUT_DIR, out_dir),
        (settings::SCRATCH_DIR, scratch_dir),
    ]
    .iter()
    {
        if let Some(value) = value {
            set_remote_research_setting(&ushell, setting, value)?;
        }
    }

    let dirs = ResearchDirs::resolve(&ushell, &get_remote_research_settings(&ushell)?)?;
    info!("Using {:?}", dirs);

    ushell.run(cmd!("mkdir -p {} {}", dirs.pin_out, dirs.scratch))?;

    if build_pintool {
        build_pinatrace(&ushell, &dirs)?;
    }

    check_tools(&ushell, &dirs)?;

    Ok(())
}

fn build_pinatrace(ushell: &SshShell, dirs: &ResearchDirs) -> Result<(), failure::Error> {
    let pin_root = dir!(dirs.research.as_str(), "pin");

    with_shell! { ushell in &dirs.pinatrace_source() =>
        cmd!("mkdir -p obj-intel64"),
        cmd!("make PIN_ROOT={} {}", pin_root, crate::paths::PINATRACE_TOOL),
    }

    Ok(())
}

/// Make sure that everything the experiments run is present and executable.
fn check_tools(ushell: &SshShell, dirs: &ResearchDirs) -> Result<(), failure::Error> {
    let mut missing = vec![];

    for (test, path) in [
        ("-x", dirs.pin()),
        ("-e", dirs.pinatrace_tool()),
        ("-x", dirs.memcached()),
        ("-x", dirs.mutilate()),
        ("-d", dirs.parsec()),
    ]
    .iter()
    {
        if ushell.run(cmd!("test {} {}", test, path)).is_err() {
            missing.push(path.clone());
        } else {
            info!("Found {}", path);
        }
    }

    if !missing.is_empty() {
        failure::bail!("missing on the remote: {}", missing.join(", "));
    }

    Ok(())
}
