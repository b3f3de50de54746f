//! Which pages are accessed in only one of two traces (e.g. `latest` and `latest2`).

use std::collections::BTreeSet;

use clap::clap_app;

use crate::trace::{PageCounts, Trace};

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { diff =>
        (about: "Print the pages accessed by only one of two traces.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg TRACE_A: +required +takes_value "The first trace (e.g. memcached/latest)")
        (@arg TRACE_B: +required +takes_value "The second trace (e.g. memcached/latest2)")
        (@arg QUIET: --quiet -q "Only print the totals")
    };

    super::add_aggregation_options(app)
}

/// The result of comparing the pages of two traces.
#[derive(Debug, PartialEq, Eq)]
pub struct PageDiff {
    /// Pages only in the first trace, with their access counts.
    pub only_a: Vec<(u64, u64)>,
    /// Pages only in the second trace, with their access counts.
    pub only_b: Vec<(u64, u64)>,
    /// The number of distinct pages in either trace.
    pub total: usize,
}

impl PageDiff {
    pub fn unique(&self) -> usize {
        self.only_a.len() + self.only_b.len()
    }
}

pub fn diff_pages(a: &PageCounts, b: &PageCounts) -> PageDiff {
    let only = |x: &PageCounts, y: &PageCounts| -> Vec<(u64, u64)> {
        x.iter()
            .filter(|(page, _)| !y.contains_key(*page))
            .map(|(page, count)| (*page, *count))
            .collect()
    };

    let total = a.keys().chain(b.keys()).collect::<BTreeSet<_>>().len();

    PageDiff {
        only_a: only(a, b),
        only_b: only(b, a),
        total,
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let trace_a = sub_m.value_of("TRACE_A").unwrap();
    let trace_b = sub_m.value_of("TRACE_B").unwrap();
    let quiet = sub_m.is_present("QUIET");
    let (accesses, sampling) = super::parse_aggregation_options(sub_m);

    let a = Trace::open(trace_a)?.aggregate(accesses, sampling)?;
    let b = Trace::open(trace_b)?.aggregate(accesses, sampling)?;

    let diff = diff_pages(&a, &b);

    if !quiet {
        println!("== only in {} ==", trace_a);
        for (page, count) in diff.only_a.iter() {
            println!("{} {}", page, count);
        }
        println!();

        println!("== only in {} ==", trace_b);
        for (page, count) in diff.only_b.iter() {
            println!("{} {}", page, count);
        }
        println!();
    }

    println!("Unique: {}", diff.unique());
    println!("Total: {}", diff.total);

    Ok(())
}
