//! The memcached run log.
//!
//! Every traced memcached run appends an entry to a run log in the memcached trace directory,
//! which is what later lets us find the traces of runs with the same parameters. An entry looks
//! like
//!
//! ```text
//! /mutilate --server localhost:23456 --verbose --update=0.5 --valuesize=4096 --records=100000 --time=30
//! /2016_04_18_00_17_02_memcached.out
//! 31 sec
//! ```
//!
//! and entries are separated by a blank line.

use std::{collections::BTreeMap, fmt, path::Path, time::Duration};

use failure::Fail;

/// An error in the format of a run log.
#[derive(Debug, Fail)]
#[fail(display = "malformed run log entry ({}):\n{}", reason, entry)]
pub struct RunLogError {
    reason: String,
    entry: String,
}

impl RunLogError {
    fn new(entry: &str, reason: impl Into<String>) -> Self {
        RunLogError {
            reason: reason.into(),
            entry: entry.to_owned(),
        }
    }
}

/// A new entry for the run log.
#[derive(Debug, Clone)]
pub struct RunLogEntry {
    /// The mutilate command line, starting from the `/` before the binary name.
    pub command: String,
    /// The file name of the trace.
    pub trace_file: String,
    /// How long mutilate ran.
    pub elapsed: Duration,
}

impl RunLogEntry {
    /// `command` is the full mutilate command; the directory of the binary is stripped. Only the
    /// file name of `trace` is kept.
    pub fn new(command: &str, mutilate: &str, trace: &str, elapsed: Duration) -> Self {
        let tool_dir = Path::new(mutilate)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let command = if tool_dir.is_empty() {
            command
        } else {
            command.strip_prefix(tool_dir.as_str()).unwrap_or(command)
        };
        let trace_file = Path::new(trace)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| trace.to_owned());

        RunLogEntry {
            command: command.to_owned(),
            trace_file,
            elapsed,
        }
    }

    /// The lines of the entry, without the terminating blank line.
    pub fn lines(&self) -> [String; 3] {
        [
            self.command.clone(),
            format!("/{}", self.trace_file),
            format!("{} sec", self.elapsed.as_secs()),
        ]
    }
}

impl fmt::Display for RunLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines().iter() {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)
    }
}

/// A run parsed from the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub value_size: usize,
    pub records: usize,
    pub time_sec: usize,
    /// The file name of the trace, relative to the directory of the log.
    pub trace_file: String,
    /// How long mutilate actually ran, if recorded.
    pub elapsed_secs: Option<u64>,
    /// The run used the Facebook inter-arrival distribution.
    pub fb_dist: bool,
}

impl RunRecord {
    /// The allocation log that goes with the trace.
    pub fn alloc_file(&self) -> String {
        let stem = self.trace_file.trim().split('.').next().unwrap_or("");
        format!("{}_alloc.out", stem)
    }
}

/// Parse the value of a `--name=value` argument.
fn parse_arg(entry: &str, arg: &str, name: &str) -> Result<usize, RunLogError> {
    if !arg.contains(name) {
        return Err(RunLogError::new(
            entry,
            format!("expected `{}`, found `{}`", name, arg),
        ));
    }

    arg.splitn(2, '=')
        .nth(1)
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| RunLogError::new(entry, format!("bad value in `{}`", arg)))
}

fn parse_entry(entry: &str) -> Result<RunRecord, RunLogError> {
    let lines: Vec<_> = entry.trim().lines().map(str::trim).collect();
    if lines.len() != 3 {
        return Err(RunLogError::new(
            entry,
            format!("expected 3 lines, found {}", lines.len()),
        ));
    }

    let args: Vec<_> = lines[0].split_whitespace().collect();
    if args.len() < 3 {
        return Err(RunLogError::new(entry, "too few arguments"));
    }
    let n = args.len();

    let value_size = parse_arg(entry, args[n - 3], "valuesize")?;
    let records = parse_arg(entry, args[n - 2], "records")?;
    let time_sec = parse_arg(entry, args[n - 1], "time")?;

    let trace_file = lines[1].trim_start_matches('/').to_owned();

    let elapsed_secs = lines[2]
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<u64>().ok());

    Ok(RunRecord {
        value_size,
        records,
        time_sec,
        trace_file,
        elapsed_secs,
        fb_dist: entry.contains("fb_ia"),
    })
}

/// Parse the contents of a run log.
pub fn parse_run_log(contents: &str) -> Result<Vec<RunRecord>, RunLogError> {
    // Tolerate `\r\n` from logs that went through a pty.
    let contents = contents.replace("\r\n", "\n");

    contents
        .trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_entry)
        .collect()
}

/// Returns `(trace, alloc log)` pairs of runs that used (`fb == true`) or did not use the
/// Facebook inter-arrival distribution.
pub fn find_alloc_files(records: &[RunRecord], fb: bool) -> Vec<(String, String)> {
    records
        .iter()
        .filter(|r| r.fb_dist == fb)
        .map(|r| (r.trace_file.clone(), r.alloc_file()))
        .collect()
}

/// Group runs by `(value size, records)`, keeping `(trace, requested time)` of each run that
/// matches the distribution filter.
pub fn group_by_config(
    records: &[RunRecord],
    fb: bool,
) -> BTreeMap<(usize, usize), Vec<(String, usize)>> {
    let mut groups: BTreeMap<_, Vec<_>> = BTreeMap::new();

    for r in records.iter().filter(|r| r.fb_dist == fb) {
        groups
            .entry((r.value_size, r.records))
            .or_default()
            .push((r.trace_file.clone(), r.time_sec));
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
/mutilate --server localhost:23456 --verbose --update=0.5 --valuesize=4096 --records=100000 --time=30
/2016_04_18_00_17_02_memcached.out
31 sec

/mutilate --server localhost:40000 --verbose --update=0.5 --iadist=fb_ia --valuesize=4096 --records=100000 --time=30
/2016_04_18_01_00_00_memcached.out
30 sec

/mutilate --server localhost:12000 --verbose --update=0.5 --valuesize=4096 --records=100000 --time=60
/2016_04_18_02_00_00_memcached.out
61 sec

/mutilate --server localhost:12001 --verbose --update=0.5 --valuesize=100 --records=10 --time=5
/2016_04_18_03_00_00_memcached.out
5 sec

";

    #[test]
    fn entry_written_like_the_log() {
        let entry = RunLogEntry::new(
            "/r/mutilate/mutilate --server localhost:1 --verbose --update=0.5 \
             --valuesize=1 --records=2 --time=3",
            "/r/mutilate/mutilate",
            "/o/memcached/2016_04_18_00_17_02_memcached.out",
            Duration::from_millis(3500),
        );

        assert_eq!(
            entry.to_string(),
            "/mutilate --server localhost:1 --verbose --update=0.5 --valuesize=1 --records=2 \
             --time=3\n/2016_04_18_00_17_02_memcached.out\n3 sec\n\n"
        );

        let parsed = parse_run_log(&entry.to_string()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].trace_file, "2016_04_18_00_17_02_memcached.out");
        assert_eq!(parsed[0].elapsed_secs, Some(3));
    }

    #[test]
    fn parse_log() {
        let runs = parse_run_log(LOG).unwrap();
        assert_eq!(runs.len(), 4);

        assert_eq!(
            runs[0],
            RunRecord {
                value_size: 4096,
                records: 100_000,
                time_sec: 30,
                trace_file: "2016_04_18_00_17_02_memcached.out".into(),
                elapsed_secs: Some(31),
                fb_dist: false,
            }
        );
        assert!(runs[1].fb_dist);
        assert_eq!(runs[3].value_size, 100);
    }

    #[test]
    fn parse_log_with_crlf() {
        let runs = parse_run_log(&LOG.replace('\n', "\r\n")).unwrap();
        assert_eq!(runs.len(), 4);
    }

    #[test]
    fn malformed_entries() {
        assert!(parse_run_log("/mutilate --valuesize=1 --records=2 --time=3\n/x.out").is_err());
        assert!(
            parse_run_log("/mutilate --records=2 --valuesize=1 --time=3\n/x.out\n1 sec").is_err()
        );
        assert!(
            parse_run_log("/mutilate --valuesize=a --records=2 --time=3\n/x.out\n1 sec").is_err()
        );
        assert!(parse_run_log("").unwrap().is_empty());
    }

    #[test]
    fn alloc_files() {
        let runs = parse_run_log(LOG).unwrap();

        let allocs = find_alloc_files(&runs, false);
        assert_eq!(allocs.len(), 3);
        assert_eq!(
            allocs[0],
            (
                "2016_04_18_00_17_02_memcached.out".to_owned(),
                "2016_04_18_00_17_02_memcached_alloc.out".to_owned()
            )
        );

        let allocs = find_alloc_files(&runs, true);
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].0, "2016_04_18_01_00_00_memcached.out");
    }

    #[test]
    fn groups() {
        let runs = parse_run_log(LOG).unwrap();

        let groups = group_by_config(&runs, false);
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[&(4096, 100_000)],
            vec![
                ("2016_04_18_00_17_02_memcached.out".to_owned(), 30),
                ("2016_04_18_02_00_00_memcached.out".to_owned(), 60),
            ]
        );
        assert_eq!(groups[&(100, 10)].len(), 1);

        let groups = group_by_config(&runs, true);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&(4096, 100_000)].len(), 1);
    }
}
