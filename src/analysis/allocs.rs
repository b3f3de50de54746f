//! Which allocation sites of memcached share pages.

use std::{collections::BTreeMap, path::Path};

use clap::clap_app;

use failure::ResultExt;

use log::info;

use crate::{
    allocs::{function_page_counts, pages_by_function, parse_memcached_allocs, shared_pages},
    runlog::{find_alloc_files, parse_run_log},
};

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { allocs =>
        (about: "Print the pages that more than one allocating function allocated on.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@group INPUT =>
            (@attributes +required)
            (@arg ALLOC_LOG: --alloc_log +takes_value
             "A memcached allocation log (e.g. memcached/x_memcached_alloc.out)")
            (@arg RUN_LOG: --run_log +takes_value
             "Analyze the allocation logs of all runs in this run log")
        )
        (@arg FB_IA: --fb_ia requires[RUN_LOG]
         "Only runs with the Facebook inter-arrival distribution")
        (@arg EXCLUDE: --exclude +takes_value ...
         "Ignore allocations by these functions (e.g. try_read_network)")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let exclude: Vec<_> = sub_m
        .values_of("EXCLUDE")
        .map(|values| values.collect())
        .unwrap_or_default();

    let alloc_logs = if let Some(log) = sub_m.value_of("ALLOC_LOG") {
        vec![log.to_owned()]
    } else {
        let run_log = sub_m.value_of("RUN_LOG").unwrap();
        let contents = std::fs::read_to_string(run_log)
            .with_context(|_| format!("reading run log {}", run_log))?;
        let dir = Path::new(run_log).parent().unwrap_or_else(|| Path::new(""));

        find_alloc_files(&parse_run_log(&contents)?, sub_m.is_present("FB_IA"))
            .into_iter()
            .map(|(_, alloc)| dir.join(alloc).display().to_string())
            .collect()
    };

    for log in alloc_logs.iter() {
        info!("Reading allocation log {}", log);
        let contents = std::fs::read_to_string(log)
            .with_context(|_| format!("reading allocation log {}", log))?;
        let report = analyze(&contents, &exclude)?;

        println!("== {} ==", log);
        for (page, functions) in report.shared.iter() {
            let functions: Vec<_> = functions.iter().map(String::as_str).collect();
            println!("{} {}", page, functions.join(" "));
        }
        println!("{:?}", report.function_pages);
        println!();
    }

    Ok(())
}

struct Report {
    shared: BTreeMap<u64, std::collections::BTreeSet<String>>,
    function_pages: Vec<(String, usize)>,
}

fn analyze(contents: &str, exclude: &[&str]) -> Result<Report, failure::Error> {
    let allocs: Vec<_> = parse_memcached_allocs(contents)?
        .into_iter()
        .filter(|alloc| !exclude.contains(&alloc.function.as_str()))
        .collect();
    let pages = pages_by_function(&allocs);

    Ok(Report {
        shared: shared_pages(&pages),
        function_pages: function_page_counts(&pages),
    })
}
