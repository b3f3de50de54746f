//! Histograms of the number of accesses per page of a trace, with and without the cache.
//!
//! The histograms are written as JSON to `page-access-histogram.json` next to the trace, so that
//! they can be plotted by whatever tool is at hand.

use std::path::{Path, PathBuf};

use clap::clap_app;

use log::{info, warn};

use serde::Serialize;

use crate::{
    cli::validator,
    stats::{histogram, hot_pages, sizeof_fmt, Bin},
    trace::{Accesses, PageCounts, Sampling, Trace, TraceError},
};

/// The name of the output file.
pub const HISTOGRAM_FILE: &str = "page-access-histogram.json";

#[derive(Debug, Serialize)]
struct Histograms {
    trace: String,
    bins: usize,
    with_cache: Vec<Bin>,
    /// Not recorded by every trace format.
    without_cache: Option<Vec<Bin>>,
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { histogram =>
        (about: "Compute histograms of the number of accesses per page of a trace.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg TRACE: +required +takes_value
         "The trace file (e.g. pinatrace_out/ferret/latest)")
        (@arg BINS: --bins +takes_value {validator::is_positive}
         "The number of bins (default: 10)")
        (@arg HOT: --hot +takes_value {validator::is_percentile}
         "Report the top HOT percent of pages by accesses, in (0, 100] (default: 10)")
        (@arg OUTPUT: --output +takes_value
         "Where to write the histograms (default: next to the trace)")
    };

    super::add_accesses_option(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let trace_path = Path::new(sub_m.value_of("TRACE").unwrap());
    let bins = sub_m
        .value_of("BINS")
        .map(|value| value.parse::<usize>().unwrap())
        .unwrap_or(10);
    let hot = sub_m
        .value_of("HOT")
        .map(|value| value.parse::<f64>().unwrap())
        .unwrap_or(10.0);
    let output = sub_m
        .value_of("OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(trace_path));
    let accesses = super::parse_accesses_option(sub_m);

    info!("Reading trace {}", trace_path.display());
    let trace = Trace::open(trace_path)?;

    let with_cache = trace.aggregate(accesses, Sampling::WithCache)?;
    let without_cache = match trace.aggregate(accesses, Sampling::WithoutCache) {
        Ok(counts) => Some(counts),
        Err(TraceError::NotRecorded(_)) => {
            warn!("{} has no samples without cache", trace_path.display());
            None
        }
        Err(err) => return Err(err.into()),
    };

    let histograms = Histograms {
        trace: trace_path.display().to_string(),
        bins,
        with_cache: page_histogram(&with_cache, bins)?,
        without_cache: without_cache
            .as_ref()
            .map(|counts| page_histogram(counts, bins))
            .transpose()?,
    };

    std::fs::write(&output, serde_json::to_string_pretty(&histograms)?)?;

    print_summary(Sampling::WithCache, accesses, &with_cache, hot)?;
    if let Some(without_cache) = &without_cache {
        print_summary(Sampling::WithoutCache, accesses, without_cache, hot)?;
    }

    println!("RESULTS: {}", output.display());

    Ok(())
}

/// `page-access-histogram.json` in the directory of the trace (of the symlink, if it is one).
fn default_output(trace: &Path) -> PathBuf {
    match trace.parent() {
        Some(dir) => dir.join(HISTOGRAM_FILE),
        None => PathBuf::from(HISTOGRAM_FILE),
    }
}

fn page_histogram(counts: &PageCounts, bins: usize) -> Result<Vec<Bin>, failure::Error> {
    let values: Vec<_> = counts.values().cloned().collect();
    histogram(&values, bins)
}

fn print_summary(
    sampling: Sampling,
    accesses: Accesses,
    counts: &PageCounts,
    hot: f64,
) -> Result<(), failure::Error> {
    println!("== {} ({}) ==", sampling, accesses);
    println!(
        "{} pages ({}), {} accesses",
        counts.len(),
        sizeof_fmt(counts.len() as f64 * 4096.0, "B"),
        counts.values().sum::<u64>()
    );

    if counts.is_empty() {
        return Ok(());
    }

    let hot = hot_pages(counts, hot)?;
    println!(
        "hottest {} pages get {:.1}% of accesses",
        hot.pages.len(),
        hot.share() * 100.0
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn output_next_to_trace() {
        assert_eq!(
            default_output(Path::new("/o/ferret/latest")),
            PathBuf::from("/o/ferret/page-access-histogram.json")
        );
        assert_eq!(
            default_output(Path::new("latest")),
            PathBuf::from("page-access-histogram.json")
        );
    }

    #[test]
    fn histogram_of_trace() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("latest");
        let mut file = std::fs::File::create(&trace).unwrap();
        file.write_all(
            br#"{
                "read_with_cache": {"1": 1, "2": 9},
                "write_with_cache": {"1": 1},
                "read_without_cache": {"1": 10, "2": 20},
                "write_without_cache": {"3": 30}
            }"#,
        )
        .unwrap();

        let matches = cli_options().get_matches_from(vec![
            "histogram",
            trace.to_str().unwrap(),
            "--bins",
            "2",
        ]);
        run(&matches).unwrap();

        let out = std::fs::read_to_string(dir.path().join(HISTOGRAM_FILE)).unwrap();
        let out: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(out["bins"], 2);
        assert_eq!(out["with_cache"][0]["count"], 1);
        assert_eq!(out["with_cache"][1]["count"], 1);
        assert_eq!(out["without_cache"][0]["count"], 1);
        assert_eq!(out["without_cache"][1]["count"], 2);
    }

    #[test]
    fn hot_must_be_positive() {
        assert!(cli_options()
            .get_matches_from_safe(vec!["histogram", "latest", "--hot", "0"])
            .is_err());
        assert!(cli_options()
            .get_matches_from_safe(vec!["histogram", "latest", "--without_cache"])
            .is_err());
    }

    #[test]
    fn text_trace_with_tiny_hot_percentile() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("latest");
        std::fs::write(&trace, "## READS\n10: 2\n11: 1\n## WRITES\n10: 5\n").unwrap();

        let matches = cli_options().get_matches_from(vec![
            "histogram",
            trace.to_str().unwrap(),
            "--hot",
            "0.001",
            "--accesses",
            "reads",
        ]);
        run(&matches).unwrap();

        let out = std::fs::read_to_string(dir.path().join(HISTOGRAM_FILE)).unwrap();
        let out: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(out["bins"], 10);
        assert!(out["without_cache"].is_null());
        let pages: u64 = out["with_cache"]
            .as_array()
            .unwrap()
            .iter()
            .map(|bin| bin["count"].as_u64().unwrap())
            .sum();
        assert_eq!(pages, 2);
    }
}
