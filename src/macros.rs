//! Macros used throughout the runner.

/// Join a list of path components with `/`, returning a `String`.
///
/// ```rust,ignore
/// assert_eq!(dir!("/home/markm", "research", "pin"), "/home/markm/research/pin");
/// ```
#[macro_export]
macro_rules! dir {
    ($first:expr $(, $part:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut path = String::from($first);
        $(
            path.push('/');
            path.push_str(&$part);
        )*
        path
    }};
}

/// Time the given expression, pushing `(label, duration)` onto `timers` and evaluating to the
/// value of the expression.
#[macro_export]
macro_rules! time {
    ($timers:ident, $label:expr, $expr:expr) => {{
        let start = std::time::Instant::now();
        let result = $expr;
        let duration = std::time::Instant::now() - start;
        $timers.push(($label, duration));
        result
    }};
}

/// Run a sequence of commands in the given shell, returning early on the first error. If `in
/// <dir>` is given, each command runs in that directory.
#[macro_export]
macro_rules! with_shell {
    ($shell:ident in $cwd:expr => $($cmd:expr),+ $(,)?) => {{
        let cwd = $cwd;
        $(
            $shell.run($cmd.cwd(cwd))?;
        )+
    }};

    ($shell:ident => $($cmd:expr),+ $(,)?) => {{
        $(
            $shell.run($cmd)?;
        )+
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn dir_joins_components() {
        let home = String::from("/home/markm");
        assert_eq!(dir!(home.as_str(), "research", "pin/pin"), "/home/markm/research/pin/pin");
        assert_eq!(dir!("latest"), "latest");
        assert_eq!(dir!("a", format!("{}_{}", 1, 2),), "a/1_2");
    }

    #[test]
    fn time_records_label() {
        let mut timers = vec![];
        let x = time!(timers, "Workload", 1 + 1);
        assert_eq!(x, 2);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].0, "Workload");
    }
}
