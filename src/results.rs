//! Bookkeeping of experiment results on the remote: `latest` symlinks, the memcached run log, and
//! metadata files written next to the traces.

use log::{info, warn};

use serde::Serialize;

use spurs::{cmd, Execute, SshShell};
use spurs_util::escape_for_bash;

use crate::{
    paths::{LATEST, PREVIOUS},
    runlog::RunLogEntry,
};

/// What to do with the old `latest` symlink when a new trace is produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LatestPolicy {
    /// Just point `latest` at the new trace.
    Replace,
    /// Keep the trace `latest` pointed to as `latest2`.
    KeepPrevious,
}

/// The symlinks `update_latest` makes, in order, as `(target, link)`. `previous` is the file
/// `latest` currently resolves to, if `latest` exists.
fn latest_links(
    dir: &str,
    target: &str,
    policy: LatestPolicy,
    previous: Option<&str>,
) -> Vec<(String, String)> {
    let mut links = vec![];

    if let (LatestPolicy::KeepPrevious, Some(previous)) = (policy, previous) {
        links.push((previous.to_owned(), dir!(dir, PREVIOUS)));
    }
    links.push((target.to_owned(), dir!(dir, LATEST)));

    links
}

fn link_cmd(target: &str, link: &str) -> String {
    format!("ln -sfn {} {}", target, link)
}

/// Point `<dir>/latest` at `target`, according to `policy`.
pub fn update_latest(
    shell: &SshShell,
    dir: &str,
    target: &str,
    policy: LatestPolicy,
) -> Result<(), failure::Error> {
    let latest = dir!(dir, LATEST);

    let previous = if policy == LatestPolicy::KeepPrevious
        && shell.run(cmd!("test -L {}", latest)).is_ok()
    {
        let previous = shell
            .run(cmd!("readlink -m {}", latest))?
            .stdout
            .trim()
            .to_owned();

        if shell.run(cmd!("test -e {}", latest)).is_err() {
            warn!("Broken symlink {} points to bad file {}", latest, previous);
        }

        Some(previous)
    } else {
        None
    };

    for (target, link) in latest_links(dir, target, policy, previous.as_deref()) {
        shell.run(cmd!("{}", link_cmd(&target, &link)))?;
        info!("Linked {} to {}", link, target);
    }

    Ok(())
}

/// The command that appends `entry` to `log`. Concurrent runs may share a log, so the append is
/// done under an exclusive lock of the log.
fn append_run_log_cmd(log: &str, entry: &RunLogEntry) -> String {
    let lines: Vec<_> = entry
        .lines()
        .iter()
        .map(|line| format!("'{}'", line))
        .collect();

    format!(
        "flock {} -c \"printf '%s\\n' {} '' >> {}\"",
        log,
        lines.join(" "),
        log
    )
}

/// Append an entry to the memcached run log.
pub fn append_run_log(
    shell: &SshShell,
    log: &str,
    entry: &RunLogEntry,
) -> Result<(), failure::Error> {
    shell.run(cmd!("touch {}", log))?;
    shell.run(cmd!("{}", append_run_log_cmd(log, entry)))?;
    info!("Wrote run to log file {}", log);
    Ok(())
}

/// The command that rewrites the file `trace` as `<prefix><trace>}`. Needs bash.
fn wrap_cmd(trace: &str, prefix: &str) -> String {
    let tmp = format!("{}.tmp", trace);
    format!(
        "(echo -n {} ; cat {} ; echo -n '}}') > {} && mv {} {}",
        escape_for_bash(prefix),
        trace,
        tmp,
        tmp,
        trace
    )
}

fn header_prefix<H: Serialize>(header: &H) -> Result<String, failure::Error> {
    Ok(format!(
        "{{\"header\":{},\"data\":",
        serde_json::to_string(header)?
    ))
}

/// Rewrite the JSON trace at `trace` as `{"header": <header>, "data": <trace>}`. Returns false and
/// leaves the file alone if it is not a JSON trace.
pub fn wrap_trace_with_header<H: Serialize>(
    shell: &SshShell,
    trace: &str,
    header: &H,
) -> Result<bool, failure::Error> {
    let first = shell.run(cmd!("head -c 1 {}", trace))?;
    if first.stdout.trim() != "{" {
        warn!("{} is not a JSON trace; not adding a header", trace);
        return Ok(false);
    }

    shell.run(cmd!("{}", wrap_cmd(trace, &header_prefix(header)?)).use_bash())?;

    Ok(true)
}

/// `params` with `header` added under the `header` key. `params` must serialize to a JSON
/// object.
pub fn params_with_header<P: Serialize, H: Serialize>(
    params: &P,
    header: &H,
) -> Result<serde_json::Value, failure::Error> {
    let mut params = serde_json::to_value(params)?;
    match params.as_object_mut() {
        Some(fields) => {
            fields.insert("header".into(), serde_json::to_value(header)?);
        }
        None => failure::bail!("parameters are not a JSON object: {}", params),
    }
    Ok(params)
}

/// Write the given parameters as JSON to `params_file`.
pub fn write_params<P: Serialize>(
    shell: &SshShell,
    params_file: &str,
    params: &P,
) -> Result<(), failure::Error> {
    shell.run(cmd!(
        "echo {} > {}",
        escape_for_bash(&serde_json::to_string(params)?),
        params_file
    ))?;
    Ok(())
}

/// Write the given timings to `time_file`.
pub fn write_timings(
    shell: &SshShell,
    time_file: &str,
    timers: &[(&str, std::time::Duration)],
) -> Result<(), failure::Error> {
    shell.run(cmd!(
        "echo -e '{}' > {}",
        crate::timings_str(timers),
        time_file
    ))?;
    Ok(())
}

pub fn remove_file(shell: &SshShell, file: &str) -> Result<(), failure::Error> {
    shell.run(cmd!("rm -f {}", file))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{path::Path, process::Command, time::Duration};

    use crate::trace::{Accesses, Sampling, Trace, TraceHeader};

    fn run_bash(script: &str, dir: &Path) {
        let status = Command::new("bash")
            .arg("-c")
            .arg(script)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "{} failed", script);
    }

    #[test]
    fn latest_links_by_policy() {
        assert_eq!(
            latest_links("/o/ferret", "/o/ferret/b.out", LatestPolicy::Replace, Some("/o/a")),
            vec![("/o/ferret/b.out".to_owned(), "/o/ferret/latest".to_owned())]
        );

        // First run: there is no `latest` yet.
        assert_eq!(
            latest_links("/o/m", "/o/m/b.out", LatestPolicy::KeepPrevious, None),
            vec![("/o/m/b.out".to_owned(), "/o/m/latest".to_owned())]
        );

        assert_eq!(
            latest_links("/o/m", "/o/m/b.out", LatestPolicy::KeepPrevious, Some("/o/m/a.out")),
            vec![
                ("/o/m/a.out".to_owned(), "/o/m/latest2".to_owned()),
                ("/o/m/b.out".to_owned(), "/o/m/latest".to_owned()),
            ]
        );

        assert_eq!(link_cmd("/o/m/b.out", "/o/m/latest"), "ln -sfn /o/m/b.out /o/m/latest");
    }

    #[test]
    fn rotate_over_broken_latest() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().to_str().unwrap();

        std::fs::write(dir.path().join("b.out"), "b").unwrap();
        std::fs::write(dir.path().join("c.out"), "c").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.out"), dir.path().join("latest"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("c.out"), dir.path().join("latest2")).unwrap();

        let previous = std::fs::read_link(dir.path().join("latest")).unwrap();
        let previous = previous.to_str().unwrap();
        let target = dir!(d, "b.out");

        for (target, link) in latest_links(d, &target, LatestPolicy::KeepPrevious, Some(previous))
        {
            run_bash(&link_cmd(&target, &link), dir.path());
        }

        assert_eq!(
            std::fs::read_link(dir.path().join("latest")).unwrap(),
            dir.path().join("b.out")
        );
        assert_eq!(
            std::fs::read_link(dir.path().join("latest2")).unwrap(),
            dir.path().join("gone.out")
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("c.out")).unwrap(), "c");
    }

    #[test]
    fn wrapped_trace_parses_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("x_ferret.out");
        std::fs::write(
            &trace,
            r#"{"read_with_cache": {"1": 2}, "write_with_cache": {"1": 1},
                "read_without_cache": {"1": 4}, "write_without_cache": {}}"#,
        )
        .unwrap();

        let header = TraceHeader {
            app_name: Some("ferret".into()),
            input_size: Some("simsmall".into()),
            time_ms: Some(1234),
            extra: Default::default(),
        };
        let cmd = wrap_cmd(trace.to_str().unwrap(), &header_prefix(&header).unwrap());
        assert!(cmd.contains("echo -n '}'"));

        run_bash(&cmd, dir.path());

        let contents = std::fs::read_to_string(&trace).unwrap();
        let wrapped: Trace = contents.parse().unwrap();
        assert_eq!(wrapped.header(), Some(&header));
        assert_eq!(
            wrapped
                .aggregate(Accesses::ALL, Sampling::WithCache)
                .unwrap()
                .get(&1),
            Some(&3)
        );
        assert!(!dir.path().join("x_ferret.out.tmp").exists());
    }

    #[test]
    fn header_merged_into_params() {
        #[derive(Serialize)]
        struct Params {
            exp: (usize, String),
        }

        let header = TraceHeader {
            app_name: Some("vips".into()),
            input_size: Some("test".into()),
            time_ms: Some(250),
            extra: Default::default(),
        };

        let params = params_with_header(
            &Params {
                exp: (1, "parsec".into()),
            },
            &header,
        )
        .unwrap();
        assert_eq!(params["exp"][1], "parsec");
        assert_eq!(params["header"]["time_ms"], 250);
        assert_eq!(params["header"]["app_name"], "vips");

        assert!(params_with_header(&[1, 2], &header).is_err());
    }

    #[test]
    fn run_log_append_is_locked() {
        let entry = RunLogEntry {
            command: "/mutilate --valuesize=1 --records=2 --time=3".into(),
            trace_file: "x_memcached.out".into(),
            elapsed: Duration::from_secs(3),
        };

        assert_eq!(
            append_run_log_cmd("/o/memcached/memcached_log.txt", &entry),
            "flock /o/memcached/memcached_log.txt -c \"printf '%s\\n' \
             '/mutilate --valuesize=1 --records=2 --time=3' '/x_memcached.out' '3 sec' '' \
             >> /o/memcached/memcached_log.txt\""
        );
    }
}
