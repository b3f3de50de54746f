//! Routines that analyze traces locally, after they have been copied back from the remote.

use clap::{App, Arg, ArgMatches};

use crate::trace::{Accesses, Sampling};

pub mod allocs;
pub mod diff;
pub mod distribution;
pub mod histogram;
pub mod runs;

/// The `--accesses` option, for routines that always look at both sample sets.
pub fn add_accesses_option<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("ACCESSES")
            .long("accesses")
            .takes_value(true)
            .possible_values(&["reads", "writes", "all"])
            .default_value("all")
            .help("Which accesses to count"),
    )
}

/// Options shared by the routines that aggregate traces.
pub fn add_aggregation_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    add_accesses_option(app).arg(
        Arg::with_name("WITHOUT_CACHE")
            .long("without_cache")
            .help("Count all accesses rather than only those that miss in the simulated cache"),
    )
}

/// Parse the value added by `add_accesses_option`.
pub fn parse_accesses_option(sub_m: &ArgMatches<'_>) -> Accesses {
    match sub_m.value_of("ACCESSES") {
        Some("reads") => Accesses::READS,
        Some("writes") => Accesses::WRITES,
        _ => Accesses::ALL,
    }
}

/// Parse the values added by `add_aggregation_options`.
pub fn parse_aggregation_options(sub_m: &ArgMatches<'_>) -> (Accesses, Sampling) {
    let accesses = parse_accesses_option(sub_m);

    let sampling = if sub_m.is_present("WITHOUT_CACHE") {
        Sampling::WithoutCache
    } else {
        Sampling::WithCache
    };

    (accesses, sampling)
}
