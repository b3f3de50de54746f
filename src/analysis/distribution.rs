//! How similar the page-count distributions of two traces are.

use clap::clap_app;

use crate::{cli::validator, stats::compare_page_counts_distributions, trace::Trace};

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { distribution =>
        (about: "Compare the bucketed page-count distributions of two traces by cosine similarity.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg TRACE_A: +required +takes_value "The first trace (e.g. memcached/latest)")
        (@arg TRACE_B: +required +takes_value "The second trace (e.g. memcached/latest2)")
        (@arg BUCKET_SIZE: --bucket_size +takes_value {validator::is_positive}
         "The number of accesses per bucket (default: 10)")
    };

    super::add_aggregation_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let trace_a = sub_m.value_of("TRACE_A").unwrap();
    let trace_b = sub_m.value_of("TRACE_B").unwrap();
    let bucket_size = sub_m
        .value_of("BUCKET_SIZE")
        .map(|value| value.parse::<u64>().unwrap())
        .unwrap_or(10);
    let (accesses, sampling) = super::parse_aggregation_options(sub_m);

    let a = Trace::open(trace_a)?.aggregate(accesses, sampling)?;
    let b = Trace::open(trace_b)?.aggregate(accesses, sampling)?;

    match compare_page_counts_distributions(&a, &b, bucket_size)? {
        Some(similarity) => println!("{}", similarity),
        // One of the traces has no pages.
        None => println!("undefined"),
    }

    Ok(())
}
