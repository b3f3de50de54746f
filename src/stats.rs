//! Statistics over per-page access counts.

use std::collections::BTreeMap;

use failure::bail;

use serde::Serialize;

use crate::trace::PageCounts;

/// Returns the elements of `elems` up to the `p`-th percentile, by the nearest-rank method.
/// `elems` is assumed to be sorted already.
pub fn percentile_slice<T>(elems: &[T], p: f64) -> Result<&[T], failure::Error> {
    if !(0.0..=100.0).contains(&p) {
        bail!("percentile must be between 0 and 100: {}", p);
    }

    let n = (p / 100.0 * elems.len() as f64).ceil() as usize;
    if n < 1 || n > elems.len() {
        bail!(
            "{}th percentile of {} elements is out of range: rank {}",
            p,
            elems.len(),
            n
        );
    }

    Ok(&elems[..n])
}

/// Bucket the access count of each page into buckets of `bucket_size` accesses, and return the
/// number of pages in each bucket.
pub fn page_counts_distribution(
    counts: &PageCounts,
    bucket_size: u64,
) -> Result<BTreeMap<u64, u64>, failure::Error> {
    if bucket_size == 0 {
        bail!("bucket size must be positive");
    }

    let mut buckets = BTreeMap::new();
    for count in counts.values() {
        *buckets.entry(count / bucket_size).or_insert(0) += 1;
    }

    Ok(buckets)
}

/// Buckets with the most pages first; ties are broken by bucket id.
pub fn most_common(buckets: &BTreeMap<u64, u64>) -> Vec<(u64, u64)> {
    let mut buckets: Vec<_> = buckets.iter().map(|(b, n)| (*b, *n)).collect();
    buckets.sort_by(|(b1, n1), (b2, n2)| n2.cmp(n1).then(b1.cmp(b2)));
    buckets
}

/// The cosine similarity of two vectors of the same length, or `None` if either is all zeros.
pub fn cosine_similarity(v1: &[f64], v2: &[f64]) -> Result<Option<f64>, failure::Error> {
    if v1.len() != v2.len() {
        bail!("vectors have different lengths: {} != {}", v1.len(), v2.len());
    }

    let dot: f64 = v1.iter().zip(v2.iter()).map(|(a, b)| a * b).sum();
    let norm1 = v1.iter().map(|a| a * a).sum::<f64>().sqrt();
    let norm2 = v2.iter().map(|b| b * b).sum::<f64>().sqrt();

    if norm1 == 0.0 || norm2 == 0.0 {
        Ok(None)
    } else {
        Ok(Some(dot / (norm1 * norm2)))
    }
}

/// Bucket both sets of counts and compare the resulting distributions by cosine similarity. The
/// distributions are aligned on bucket ids `0..=max`, where missing buckets have no pages.
pub fn compare_page_counts_distributions(
    a: &PageCounts,
    b: &PageCounts,
    bucket_size: u64,
) -> Result<Option<f64>, failure::Error> {
    let da = page_counts_distribution(a, bucket_size)?;
    let db = page_counts_distribution(b, bucket_size)?;

    let max = da
        .keys()
        .chain(db.keys())
        .max()
        .cloned()
        .unwrap_or(0);

    let align = |d: &BTreeMap<u64, u64>| -> Vec<f64> {
        (0..=max)
            .map(|bucket| d.get(&bucket).cloned().unwrap_or(0) as f64)
            .collect()
    };

    cosine_similarity(&align(&da), &align(&db))
}

/// Format a number of bytes (or whatever `suffix` is) with binary units, e.g. `1.5KiB`.
pub fn sizeof_fmt(num: f64, suffix: &str) -> String {
    let mut num = num;
    for unit in ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"].iter() {
        if num.abs() < 1024.0 {
            return format!("{:.1}{}{}", num, unit, suffix);
        }
        num /= 1024.0;
    }
    format!("{:.1}Yi{}", num, suffix)
}

/// A histogram bin covering `[lo, hi)` (the last bin also includes `hi`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Bin `values` into `bins` equal-width bins over `[min, max]`. If all values are equal, the range
/// is widened by 0.5 on either side.
pub fn histogram(values: &[u64], bins: usize) -> Result<Vec<Bin>, failure::Error> {
    if bins == 0 {
        bail!("number of bins must be positive");
    }
    if values.is_empty() {
        return Ok(vec![]);
    }

    let mut lo = values.iter().min().cloned().unwrap_or(0) as f64;
    let mut hi = values.iter().max().cloned().unwrap_or(0) as f64;
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let mut hist: Vec<_> = (0..bins)
        .map(|i| Bin {
            lo: lo + i as f64 * width,
            hi: if i + 1 == bins {
                hi
            } else {
                lo + (i + 1) as f64 * width
            },
            count: 0,
        })
        .collect();

    for v in values.iter() {
        let i = (((*v as f64) - lo) / width) as usize;
        hist[i.min(bins - 1)].count += 1;
    }

    Ok(hist)
}

/// Summary of the most accessed pages.
#[derive(Debug, Clone, PartialEq)]
pub struct HotPages {
    /// The hot pages, most accessed first.
    pub pages: Vec<(u64, u64)>,
    /// The accesses to the hot pages.
    pub accesses: u64,
    /// The accesses to all pages.
    pub total_accesses: u64,
}

impl HotPages {
    /// The fraction of all accesses that went to the hot pages.
    pub fn share(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.accesses as f64 / self.total_accesses as f64
        }
    }
}

/// The top `p` percent of pages by access count.
pub fn hot_pages(counts: &PageCounts, p: f64) -> Result<HotPages, failure::Error> {
    let mut pages: Vec<_> = counts.iter().map(|(p, n)| (*p, *n)).collect();
    pages.sort_by(|(p1, n1), (p2, n2)| n2.cmp(n1).then(p1.cmp(p2)));

    let total_accesses = pages.iter().map(|(_, n)| n).sum();
    let hot = percentile_slice(&pages, p)?.to_vec();
    let accesses = hot.iter().map(|(_, n)| n).sum();

    Ok(HotPages {
        pages: hot,
        accesses,
        total_accesses,
    })
}
