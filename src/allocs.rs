//! Allocation logs of the instrumented memcached build.
//!
//! Each allocation is logged on one line, e.g.
//!
//! ```text
//! alloc(1048576) at memcached.c:conn_new:512 -> 0x7ffff0a3c010
//! ```
//!
//! i.e. the size, one filler token, the allocation site as `file:function:line`, and finally the
//! address that was returned.

use std::collections::{BTreeMap, BTreeSet};

use failure::{bail, format_err};

/// The size of a page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// One logged allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRecord {
    pub address: u64,
    pub size: u64,
    pub file: String,
    pub function: String,
    pub line: usize,
}

impl AllocRecord {
    /// The pages touched by this allocation. Empty for a zero-size allocation. An allocation that
    /// runs past the end of the address space stops at the last page.
    pub fn pages(&self) -> std::ops::Range<u64> {
        let start = self.address / PAGE_SIZE;
        if self.size == 0 {
            return start..start;
        }

        let last_byte = self.address.saturating_add(self.size - 1);
        start..last_byte / PAGE_SIZE + 1
    }
}

fn parse_alloc_line(line: &str) -> Result<AllocRecord, failure::Error> {
    let comps: Vec<_> = line.split_whitespace().collect();
    if comps.len() < 3 {
        bail!("truncated allocation record: {:?}", line);
    }

    let size = comps[0]
        .split('(')
        .nth(1)
        .and_then(|s| s.strip_suffix(')'))
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| format_err!("bad allocation size in {:?}", line))?;

    let address = comps[comps.len() - 1];
    let address = u64::from_str_radix(address.trim_start_matches("0x"), 16)
        .map_err(|e| format_err!("bad address in {:?}: {}", line, e))?;

    let site: Vec<_> = comps[2].split(':').collect();
    if site.len() != 3 {
        bail!("bad allocation site in {:?}", line);
    }
    let line_number = site[2]
        .parse::<usize>()
        .map_err(|e| format_err!("bad line number in {:?}: {}", line, e))?;

    Ok(AllocRecord {
        address,
        size,
        file: site[0].to_owned(),
        function: site[1].to_owned(),
        line: line_number,
    })
}

/// Parse an allocation log. Lines that are not allocation records are skipped.
pub fn parse_memcached_allocs(contents: &str) -> Result<Vec<AllocRecord>, failure::Error> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("alloc"))
        .map(parse_alloc_line)
        .collect()
}

/// The functions that allocated memory on each page.
pub fn pages_by_function(allocs: &[AllocRecord]) -> BTreeMap<u64, BTreeSet<String>> {
    let mut pages: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();

    for alloc in allocs.iter() {
        for page in alloc.pages() {
            pages
                .entry(page)
                .or_default()
                .insert(alloc.function.clone());
        }
    }

    pages
}

/// The pages on which more than one function allocated memory.
pub fn shared_pages(
    pages: &BTreeMap<u64, BTreeSet<String>>,
) -> BTreeMap<u64, BTreeSet<String>> {
    pages
        .iter()
        .filter(|(_, functions)| functions.len() > 1)
        .map(|(page, functions)| (*page, functions.clone()))
        .collect()
}

/// The number of pages each function allocated on, most pages first.
pub fn function_page_counts(pages: &BTreeMap<u64, BTreeSet<String>>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for function in pages.values().flatten() {
        *counts.entry(function.as_str()).or_insert(0) += 1;
    }

    let mut counts: Vec<_> = counts
        .into_iter()
        .map(|(f, n)| (f.to_owned(), n))
        .collect();
    counts.sort_by(|(f1, n1), (f2, n2)| n2.cmp(n1).then(f1.cmp(f2)));
    counts
}
