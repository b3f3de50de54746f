//! Loading `pinatrace` traces and aggregating their per-page access counts.
//!
//! A trace records, for each sample, how many reads and writes hit each page. Samples come in two
//! sets: "with cache", which counts only the accesses that miss a simulated cache hierarchy, and
//! "without cache", which counts all accesses.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use bitflags::bitflags;

use failure::{Fail, ResultExt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access counts by page number.
pub type PageCounts = BTreeMap<u64, u64>;

bitflags! {
    /// Which kinds of accesses to count.
    pub struct Accesses: u8 {
        const READS = 0b01;
        const WRITES = 0b10;
        const ALL = Self::READS.bits | Self::WRITES.bits;
    }
}

impl fmt::Display for Accesses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Accesses::ALL {
            write!(f, "all")
        } else if *self == Accesses::READS {
            write!(f, "reads")
        } else if *self == Accesses::WRITES {
            write!(f, "writes")
        } else {
            write!(f, "none")
        }
    }
}

/// Which sample set to aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sampling {
    WithCache,
    WithoutCache,
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sampling::WithCache => write!(f, "with cache"),
            Sampling::WithoutCache => write!(f, "without cache"),
        }
    }
}

#[derive(Debug, Fail)]
pub enum TraceError {
    #[fail(display = "unrecognized trace layout: {}", _0)]
    UnknownLayout(String),

    #[fail(display = "bad page number: {:?}", _0)]
    BadPage(String),

    #[fail(display = "bad access count for page {}: {}", _0, _1)]
    BadCount(u64, String),

    #[fail(display = "expected an object of page counts for `{}`", _0)]
    MissingCounts(String),

    #[fail(display = "the trace does not contain {} samples", _0)]
    NotRecorded(Sampling),

    #[fail(display = "line {}: expected `page: count`, found {:?}", _0, _1)]
    BadLine(usize, String),
}

/// Per-page read and write counts of one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub reads: PageCounts,
    pub writes: PageCounts,
}

/// Metadata attached to a trace after the run. Older traces have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeader {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub input_size: Option<String>,
    #[serde(default)]
    pub time_ms: Option<u64>,

    /// Anything else that was recorded.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A parsed trace.
#[derive(Debug, Clone)]
pub struct Trace {
    header: Option<TraceHeader>,
    with_cache: Vec<Sample>,
    /// The text format only records cache misses.
    without_cache: Option<Vec<Sample>>,
}

impl Trace {
    /// Read and parse the trace at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|_| format!("reading trace {}", path.display()))?;
        Ok(contents
            .parse::<Trace>()
            .with_context(|_| format!("parsing trace {}", path.display()))?)
    }

    pub fn header(&self) -> Option<&TraceHeader> {
        self.header.as_ref()
    }

    /// The samples of the given set.
    pub fn samples(&self, sampling: Sampling) -> Result<&[Sample], TraceError> {
        match sampling {
            Sampling::WithCache => Ok(&self.with_cache),
            Sampling::WithoutCache => self
                .without_cache
                .as_deref()
                .ok_or(TraceError::NotRecorded(sampling)),
        }
    }

    /// Sum the counts of the selected kinds of accesses for each page across all samples of the
    /// given set.
    pub fn aggregate(
        &self,
        accesses: Accesses,
        sampling: Sampling,
    ) -> Result<PageCounts, TraceError> {
        let mut total = PageCounts::new();

        for sample in self.samples(sampling)? {
            if accesses.contains(Accesses::READS) {
                add_counts(&mut total, &sample.reads);
            }
            if accesses.contains(Accesses::WRITES) {
                add_counts(&mut total, &sample.writes);
            }
        }

        Ok(total)
    }

    pub fn aggregate_reads(&self, sampling: Sampling) -> Result<PageCounts, TraceError> {
        self.aggregate(Accesses::READS, sampling)
    }

    pub fn aggregate_writes(&self, sampling: Sampling) -> Result<PageCounts, TraceError> {
        self.aggregate(Accesses::WRITES, sampling)
    }

    pub fn aggregate_reads_writes(&self, sampling: Sampling) -> Result<PageCounts, TraceError> {
        self.aggregate(Accesses::ALL, sampling)
    }
}

fn add_counts(total: &mut PageCounts, counts: &PageCounts) {
    for (page, count) in counts.iter() {
        *total.entry(*page).or_insert(0) += count;
    }
}

impl FromStr for Trace {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The pin tool's own output is text; everything we post-process is JSON.
        if !s.trim_start().starts_with('{') {
            return parse_text(s);
        }

        let value: Value =
            serde_json::from_str(s).map_err(|e| TraceError::UnknownLayout(e.to_string()))?;
        let mut obj = match value {
            Value::Object(obj) => obj,
            _ => return Err(TraceError::UnknownLayout("not an object".into())),
        };

        let header = if obj.contains_key("header") && obj.contains_key("data") {
            let header = obj.remove("header").unwrap_or(Value::Null);
            let header = serde_json::from_value(header)
                .map_err(|e| TraceError::UnknownLayout(format!("bad header: {}", e)))?;
            obj = match obj.remove("data") {
                Some(Value::Object(data)) => data,
                _ => return Err(TraceError::UnknownLayout("`data` is not an object".into())),
            };
            Some(header)
        } else {
            None
        };

        let (with_cache, without_cache) = if obj.contains_key("cache") {
            (
                parse_sample_list(&obj, "cache")?,
                parse_sample_list(&obj, "no_cache")?,
            )
        } else if obj.contains_key("read_with_cache") {
            (
                vec![parse_flat_sample(&obj, "with_cache")?],
                vec![parse_flat_sample(&obj, "without_cache")?],
            )
        } else {
            let keys: Vec<_> = obj.keys().cloned().collect();
            return Err(TraceError::UnknownLayout(format!("keys {:?}", keys)));
        };

        Ok(Trace {
            header,
            with_cache,
            without_cache: Some(without_cache),
        })
    }
}

fn parse_page(page: &str) -> Result<u64, TraceError> {
    page.trim()
        .parse()
        .map_err(|_| TraceError::BadPage(page.to_owned()))
}

fn parse_count(page: u64, count: &Value) -> Result<u64, TraceError> {
    match count {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| TraceError::BadCount(page, count.to_string()))
}

fn parse_page_counts(counts: Option<&Value>, name: &str) -> Result<PageCounts, TraceError> {
    let counts = match counts {
        Some(Value::Object(counts)) => counts,
        _ => return Err(TraceError::MissingCounts(name.to_owned())),
    };

    counts
        .iter()
        .map(|(page, count)| {
            let page = parse_page(page)?;
            Ok((page, parse_count(page, count)?))
        })
        .collect()
}

fn parse_sample_list(obj: &Map<String, Value>, key: &str) -> Result<Vec<Sample>, TraceError> {
    let samples = match obj.get(key) {
        Some(Value::Array(samples)) => samples,
        _ => return Err(TraceError::UnknownLayout(format!("`{}` is not a list", key))),
    };

    samples
        .iter()
        .map(|sample| {
            Ok(Sample {
                reads: parse_page_counts(sample.get("reads"), "reads")?,
                writes: parse_page_counts(sample.get("writes"), "writes")?,
            })
        })
        .collect()
}

/// `suffix` is `with_cache` or `without_cache`.
fn parse_flat_sample(obj: &Map<String, Value>, suffix: &str) -> Result<Sample, TraceError> {
    let reads = format!("read_{}", suffix);
    let writes = format!("write_{}", suffix);

    Ok(Sample {
        reads: parse_page_counts(obj.get(&reads), &reads)?,
        writes: parse_page_counts(obj.get(&writes), &writes)?,
    })
}

/// The pin tool's text format:
///
/// ```text
/// ## READS
/// 140737351917568: 12
/// ## WRITES
/// 140737351917568: 3
/// ## TOTAL
/// 140737351917568: 15
/// ```
///
/// `TOTAL` is redundant and skipped.
fn parse_text(s: &str) -> Result<Trace, TraceError> {
    enum Section {
        None,
        Reads,
        Writes,
        Total,
    }

    let mut sample = Sample::default();
    let mut section = Section::None;
    let mut seen_section = false;

    for (i, line) in s.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix("##") {
            seen_section = true;
            section = match name.trim() {
                "READS" => Section::Reads,
                "WRITES" => Section::Writes,
                "TOTAL" => Section::Total,
                other => {
                    return Err(TraceError::UnknownLayout(format!(
                        "unknown section {:?}",
                        other
                    )))
                }
            };
            continue;
        }

        let counts = match section {
            Section::Reads => &mut sample.reads,
            Section::Writes => &mut sample.writes,
            Section::Total => continue,
            Section::None => return Err(TraceError::BadLine(i + 1, line.to_owned())),
        };

        let mut parts = line.splitn(2, ':');
        let (page, count) = match (parts.next(), parts.next()) {
            (Some(page), Some(count)) => (page, count),
            _ => return Err(TraceError::BadLine(i + 1, line.to_owned())),
        };

        let page = parse_page(page)?;
        let count = count
            .trim()
            .parse::<u64>()
            .map_err(|_| TraceError::BadCount(page, count.trim().to_owned()))?;

        *counts.entry(page).or_insert(0) += count;
    }

    if !seen_section {
        return Err(TraceError::UnknownLayout("no sections".into()));
    }

    Ok(Trace {
        header: None,
        with_cache: vec![sample],
        without_cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn accesses_display() {
        assert_eq!(Accesses::ALL.to_string(), "all");
        assert_eq!(Accesses::READS.to_string(), "reads");
        assert_eq!(Accesses::WRITES.to_string(), "writes");
        assert_eq!(Accesses::empty().to_string(), "none");
    }

    fn counts(pairs: &[(u64, u64)]) -> PageCounts {
        pairs.iter().cloned().collect()
    }

    const SAMPLE_LISTS: &str = r#"{
        "cache": [
            {"reads": {"1": 2, "2": 1}, "writes": {"1": 1}},
            {"reads": {"1": "3"}, "writes": {"3": 4}}
        ],
        "no_cache": [
            {"reads": {"1": 10}, "writes": {"2": 20}}
        ]
    }"#;

    #[test]
    fn sample_lists() {
        let trace: Trace = SAMPLE_LISTS.parse().unwrap();
        assert!(trace.header().is_none());

        assert_eq!(
            trace.aggregate_reads(Sampling::WithCache).unwrap(),
            counts(&[(1, 5), (2, 1)])
        );
        assert_eq!(
            trace.aggregate_writes(Sampling::WithCache).unwrap(),
            counts(&[(1, 1), (3, 4)])
        );
        assert_eq!(
            trace.aggregate_reads_writes(Sampling::WithCache).unwrap(),
            counts(&[(1, 6), (2, 1), (3, 4)])
        );
        assert_eq!(
            trace.aggregate_reads_writes(Sampling::WithoutCache).unwrap(),
            counts(&[(1, 10), (2, 20)])
        );
        assert!(trace
            .aggregate(Accesses::empty(), Sampling::WithCache)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn flat_maps() {
        let trace: Trace = r#"{
            "read_with_cache": {"7": 1},
            "write_with_cache": {"7": 2, "8": 1},
            "read_without_cache": {"7": 5},
            "write_without_cache": {}
        }"#
        .parse()
        .unwrap();

        assert_eq!(
            trace.aggregate(Accesses::ALL, Sampling::WithCache).unwrap(),
            counts(&[(7, 3), (8, 1)])
        );
        assert_eq!(
            trace.aggregate(Accesses::ALL, Sampling::WithoutCache).unwrap(),
            counts(&[(7, 5)])
        );
    }

    #[test]
    fn header_wrapped() {
        let wrapped = format!(
            r#"{{"header": {{"app_name": "ferret", "input_size": "simsmall", "time_ms": 1234,
                "git_hash": "abc"}}, "data": {}}}"#,
            SAMPLE_LISTS
        );
        let trace: Trace = wrapped.parse().unwrap();

        let header = trace.header().unwrap();
        assert_eq!(header.app_name.as_deref(), Some("ferret"));
        assert_eq!(header.input_size.as_deref(), Some("simsmall"));
        assert_eq!(header.time_ms, Some(1234));
        assert_eq!(header.extra["git_hash"], Value::String("abc".into()));

        assert_eq!(
            trace.aggregate_reads(Sampling::WithCache).unwrap(),
            counts(&[(1, 5), (2, 1)])
        );
    }

    #[test]
    fn text_format() {
        let trace: Trace = "## READS\n10: 2\n11: 1\n## WRITES\n10: 5\n## TOTAL\n10: 7\n11: 1\n"
            .parse()
            .unwrap();

        assert_eq!(
            trace.aggregate_reads_writes(Sampling::WithCache).unwrap(),
            counts(&[(10, 7), (11, 1)])
        );
        assert!(match trace.aggregate_reads(Sampling::WithoutCache) {
            Err(TraceError::NotRecorded(Sampling::WithoutCache)) => true,
            _ => false,
        });
    }

    #[test]
    fn bad_traces() {
        assert!(match "{\"foo\": 1}".parse::<Trace>() {
            Err(TraceError::UnknownLayout(_)) => true,
            _ => false,
        });
        assert!(match r#"{"cache": [{"reads": {"x": 1}, "writes": {}}], "no_cache": []}"#
            .parse::<Trace>()
        {
            Err(TraceError::BadPage(_)) => true,
            _ => false,
        });
        assert!(match r#"{"cache": [{"reads": {"1": -1}, "writes": {}}], "no_cache": []}"#
            .parse::<Trace>()
        {
            Err(TraceError::BadCount(1, _)) => true,
            _ => false,
        });
        assert!(match r#"{"cache": [{"reads": {}}], "no_cache": []}"#.parse::<Trace>() {
            Err(TraceError::MissingCounts(_)) => true,
            _ => false,
        });
        assert!(match "10: 2\n".parse::<Trace>() {
            Err(TraceError::BadLine(1, _)) => true,
            _ => false,
        });
        assert!("".parse::<Trace>().is_err());
    }

    #[test]
    fn open_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_LISTS.as_bytes()).unwrap();

        let trace = Trace::open(file.path()).unwrap();
        assert_eq!(trace.samples(Sampling::WithCache).unwrap().len(), 2);
        assert_eq!(trace.samples(Sampling::WithoutCache).unwrap().len(), 1);

        assert!(Trace::open("/this/trace/does/not/exist.out").is_err());
    }
}
