//! Naming and recording the output of experiments.
//!
//! Every file an experiment produces is named `<timestamp>_<name><suffix>`, so that all of the
//! output of one run sorts together and can be found with a single glob.

use chrono::{offset::Local, DateTime};

use serde::{Deserialize, Serialize};

/// The format of the timestamp prefix of every output file.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Suffix of the trace written by the pintool.
pub const TRACE_SUFFIX: &str = ".out";

/// Suffix of the allocation log written by the instrumented memcached.
pub const ALLOC_SUFFIX: &str = "_alloc.out";

/// Suffix of the JSON dump of the run's configuration.
pub const PARAMS_SUFFIX: &str = ".params";

/// Suffix of the human-readable timings of the run.
pub const TIME_SUFFIX: &str = ".time";

/// The time at which an experiment started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Local>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Local::now())
    }

    /// The prefix used for output file names (e.g. `2016_04_18_00_17_02`).
    pub fn prefix(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// An experiment configuration that knows how to name its output files.
pub trait Parametrize: Serialize {
    /// The name of the experiment as it appears in file names (e.g. `memcached` or `ferret`).
    fn name(&self) -> &str;

    /// The time the experiment started.
    fn timestamp(&self) -> &Timestamp;

    /// Generate a file name with the given suffix. `gen_file_name("")` is the common prefix of
    /// every file of this run.
    fn gen_file_name(&self, suffix: &str) -> String {
        format!("{}_{}{}", self.timestamp().prefix(), self.name(), suffix)
    }

    /// Returns the names of the trace, params, and timing files, in that order.
    fn gen_standard_names(&self) -> (String, String, String) {
        (
            self.gen_file_name(TRACE_SUFFIX),
            self.gen_file_name(PARAMS_SUFFIX),
            self.gen_file_name(TIME_SUFFIX),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[derive(Serialize)]
    struct Config {
        name: String,
        timestamp: Timestamp,
    }

    impl Parametrize for Config {
        fn name(&self) -> &str {
            &self.name
        }

        fn timestamp(&self) -> &Timestamp {
            &self.timestamp
        }
    }

    #[test]
    fn standard_names() {
        let cfg = Config {
            name: "memcached".into(),
            timestamp: Timestamp(Local.ymd(2016, 4, 18).and_hms(0, 17, 2)),
        };

        let (trace, params, time) = cfg.gen_standard_names();
        assert_eq!(trace, "2016_04_18_00_17_02_memcached.out");
        assert_eq!(params, "2016_04_18_00_17_02_memcached.params");
        assert_eq!(time, "2016_04_18_00_17_02_memcached.time");
        assert_eq!(
            cfg.gen_file_name(ALLOC_SUFFIX),
            "2016_04_18_00_17_02_memcached_alloc.out"
        );
        assert_eq!(cfg.gen_file_name(""), "2016_04_18_00_17_02_memcached");
    }
}
