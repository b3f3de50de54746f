//! Compare the page-count distributions of memcached runs with the same parameters.
//!
//! Runs are found through run logs. Runs are grouped by `(value size, records)`; for each group
//! with at least two runs, the distribution of each run is printed.

use std::path::Path;

use clap::clap_app;

use failure::ResultExt;

use log::warn;

use crate::{
    cli::validator,
    runlog::{group_by_config, parse_run_log, RunRecord},
    stats::{most_common, page_counts_distribution, sizeof_fmt},
    trace::{Accesses, Sampling, Trace},
};

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { runs =>
        (about: "Print the page-count distributions of memcached runs with the same parameters.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg LOGS: +required +takes_value ... "The run logs (e.g. memcached/memcached_log.txt)")
        (@arg FB_IA: --fb_ia "Only runs with the Facebook inter-arrival distribution")
        (@arg BUCKET_SIZE: --bucket_size +takes_value {validator::is_positive}
         "The number of accesses per bucket (default: 10)")
        (@arg TRACE_DIR: --trace_dir +takes_value
         "Where the traces are (default: the directory of each log)")
    }
}

/// Read the runs in `log`, with trace paths resolved against `trace_dir` or the directory of the
/// log.
fn read_runs(log: &str, trace_dir: Option<&str>) -> Result<Vec<RunRecord>, failure::Error> {
    let contents =
        std::fs::read_to_string(log).with_context(|_| format!("reading run log {}", log))?;
    let mut runs = parse_run_log(&contents)?;

    let dir = match trace_dir {
        Some(dir) => Path::new(dir),
        None => Path::new(log).parent().unwrap_or_else(|| Path::new("")),
    };
    for run in runs.iter_mut() {
        run.trace_file = dir.join(&run.trace_file).display().to_string();
    }

    Ok(runs)
}

/// `value size * records = total size` of a group of runs.
fn group_heading(value_size: usize, records: usize) -> String {
    format!(
        "{} * {} = {}",
        value_size,
        records,
        sizeof_fmt(value_size as f64 * records as f64, "B")
    )
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let fb = sub_m.is_present("FB_IA");
    let bucket_size = sub_m
        .value_of("BUCKET_SIZE")
        .map(|value| value.parse::<u64>().unwrap())
        .unwrap_or(10);
    let trace_dir = sub_m.value_of("TRACE_DIR");

    let mut runs = vec![];
    for log in sub_m.values_of("LOGS").unwrap() {
        runs.extend(read_runs(log, trace_dir)?);
    }

    for ((value_size, records), traces) in group_by_config(&runs, fb) {
        if traces.len() < 2 {
            continue;
        }

        println!("{}", group_heading(value_size, records));

        for (trace, time_sec) in traces.iter() {
            let distribution = Trace::open(trace)
                .and_then(|t| Ok(t.aggregate(Accesses::ALL, Sampling::WithCache)?))
                .and_then(|counts| page_counts_distribution(&counts, bucket_size));

            match distribution {
                Ok(distribution) => {
                    println!("{}", time_sec);
                    println!("{:?}", most_common(&distribution));
                    println!();
                }
                Err(err) => warn!("Ignoring {}: {}", trace, err),
            }
        }

        println!();
    }

    Ok(())
}
