//! Some routines for adding common CLI options in a consistent, less boilerplatey way.

use clap::ArgMatches;

use crate::Login;

/// Validators for use with `clap_app!` (e.g. `{validator::is::<usize>}`).
pub mod validator {
    use std::str::FromStr;

    /// Checks that the argument parses as a `T`.
    pub fn is<T>(s: String) -> Result<(), String>
    where
        T: FromStr,
        T::Err: std::fmt::Debug,
    {
        s.as_str()
            .parse::<T>()
            .map(|_| ())
            .map_err(|e| format!("{:?}", e))
    }

    /// Checks that the argument is a positive integer.
    pub fn is_positive(s: String) -> Result<(), String> {
        match s.as_str().parse::<u64>() {
            Ok(0) => Err("must be greater than 0".into()),
            Ok(_) => Ok(()),
            Err(e) => Err(format!("{:?}", e)),
        }
    }

    /// Checks that the argument is a number in `(0, 100]`.
    pub fn is_percentile(s: String) -> Result<(), String> {
        match s.as_str().parse::<f64>() {
            Ok(p) if p > 0.0 && p <= 100.0 => Ok(()),
            Ok(p) => Err(format!("{} is not in (0, 100]", p)),
            Err(e) => Err(format!("{:?}", e)),
        }
    }
}

/// CLI options for routines that run on a remote machine.
pub mod remote {
    use super::*;

    /// Parse the `HOSTNAME` and `USERNAME` arguments of a routine.
    pub fn parse_cli_options<'a>(sub_m: &'a ArgMatches<'a>) -> Login<'a, 'a, &'a str> {
        Login {
            username: sub_m.value_of("USERNAME").unwrap(),
            hostname: sub_m.value_of("HOSTNAME").unwrap(),
            host: sub_m.value_of("HOSTNAME").unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validator;

    #[test]
    fn validators() {
        assert!(validator::is::<usize>("10".into()).is_ok());
        assert!(validator::is::<usize>("-1".into()).is_err());
        assert!(validator::is::<f64>("0.5".into()).is_ok());

        assert!(validator::is_positive("3".into()).is_ok());
        assert!(validator::is_positive("0".into()).is_err());

        assert!(validator::is_percentile("0".into()).is_err());
        assert!(validator::is_percentile("-1".into()).is_err());
        assert!(validator::is_percentile("0.01".into()).is_ok());
        assert!(validator::is_percentile("99.5".into()).is_ok());
        assert!(validator::is_percentile("100".into()).is_ok());
        assert!(validator::is_percentile("100.1".into()).is_err());
        assert!(validator::is_percentile("x".into()).is_err());
    }
}
