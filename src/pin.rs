//! Running workloads under Intel Pin with the `pinatrace` tool.
//!
//! `pinatrace` counts the reads and writes to every page, both for all accesses ("without
//! cache") and for accesses that miss a simulated L1/L3 hierarchy ("with cache"). It is
//! configured through the environment rather than through tool flags.

use serde::{Deserialize, Serialize};

/// The environment variable naming the file `pinatrace` writes its trace to.
pub const OUTPUT_FILENAME_VAR: &str = "PINATRACE_OUTPUT_FILENAME";

/// The environment variable naming the file the instrumented memcached logs its allocations to.
pub const ALLOC_FILENAME_VAR: &str = "MEMCACHED_ALLOC_FILENAME";

/// How pin attaches to the workload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Injection {
    /// Pin launches the workload as its child. Needed for servers we want to signal later: the
    /// workload is then the only child of the pin process.
    Child,
    /// Pin's default.
    Dynamic,
}

impl Injection {
    fn as_flag(self) -> &'static str {
        match self {
            Injection::Child => "child",
            Injection::Dynamic => "dynamic",
        }
    }
}

/// Indicates that a workload should run under `pinatrace`, along with the needed parameters.
#[derive(Debug)]
pub struct Pintool<'s> {
    /// The path to the `pin` launcher.
    pub pin_path: &'s str,
    /// The path to `pinatrace.so`.
    pub tool_path: &'s str,
    pub injection: Injection,
    /// The file to write the trace to.
    pub output_path: &'s str,
    /// The file the workload should log its allocations to, if it does that.
    pub alloc_path: Option<&'s str>,
    /// Run the workload with ASLR disabled so that page numbers are comparable across runs.
    pub disable_aslr: bool,
}

impl Pintool<'_> {
    /// The prefix to put in front of a command to run it under pin.
    pub fn command_prefix(&self) -> String {
        format!(
            "env {}={} {}={} {}{} -injection {} -t {} -- ",
            OUTPUT_FILENAME_VAR,
            self.output_path,
            ALLOC_FILENAME_VAR,
            self.alloc_path.unwrap_or(""),
            if self.disable_aslr {
                "setarch x86_64 -R "
            } else {
                ""
            },
            self.pin_path,
            self.injection.as_flag(),
            self.tool_path,
        )
    }
}

/// Returns `command`, wrapped in `pintool` if there is one.
pub fn maybe_under_pin(pintool: Option<&Pintool<'_>>, command: &str) -> String {
    match pintool {
        Some(pintool) => format!("{}{}", pintool.command_prefix(), command),
        None => command.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_injection_with_alloc_log() {
        let pintool = Pintool {
            pin_path: "/r/pin/pin",
            tool_path: "/r/pinatrace.so",
            injection: Injection::Child,
            output_path: "/o/memcached/x_memcached.out",
            alloc_path: Some("/o/memcached/x_memcached_alloc.out"),
            disable_aslr: true,
        };

        assert_eq!(
            maybe_under_pin(Some(&pintool), "/r/memcached -p 12345 -m 10000"),
            "env PINATRACE_OUTPUT_FILENAME=/o/memcached/x_memcached.out \
             MEMCACHED_ALLOC_FILENAME=/o/memcached/x_memcached_alloc.out \
             setarch x86_64 -R /r/pin/pin -injection child -t /r/pinatrace.so -- \
             /r/memcached -p 12345 -m 10000"
        );
    }

    #[test]
    fn dynamic_injection_without_alloc_log() {
        let pintool = Pintool {
            pin_path: "pin",
            tool_path: "pinatrace.so",
            injection: Injection::Dynamic,
            output_path: "out",
            alloc_path: None,
            disable_aslr: false,
        };

        assert_eq!(
            pintool.command_prefix(),
            "env PINATRACE_OUTPUT_FILENAME=out MEMCACHED_ALLOC_FILENAME= \
             pin -injection dynamic -t pinatrace.so -- "
        );
        assert_eq!(maybe_under_pin(None, "ls"), "ls");
    }
}
