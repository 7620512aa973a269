//! Sequence similarity in the Ratcliff/Obershelp style: repeatedly take the
//! longest common run, recurse on both sides, and score
//! `2 * matched / (len(a) + len(b))`. Sequences are grapheme clusters.

use std::collections::HashMap;

use unicode_segmentation::UnicodeSegmentation;

/// Sequences at least this long drop "popular" elements from the index.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Similarity ratio in `[0, 1]`. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<&str> = a.graphemes(true).collect();
    let b: Vec<&str> = b.graphemes(true).collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_len(&a, &b) as f64 / total as f64
}

/// Total size of the matching blocks between `a` and `b`.
fn matching_len<T: Eq + std::hash::Hash>(a: &[T], b: &[T]) -> usize {
    let b2j = index(b);
    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, b, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Positions of every element of `b`, minus popular ones for long inputs.
fn index<T: Eq + std::hash::Hash>(b: &[T]) -> HashMap<&T, Vec<usize>> {
    let mut b2j: HashMap<&T, Vec<usize>> = HashMap::new();
    for (j, elt) in b.iter().enumerate() {
        b2j.entry(elt).or_default().push(j);
    }
    if b.len() >= AUTOJUNK_MIN_LEN {
        let popular = b.len() / 100 + 1;
        b2j.retain(|_, positions| positions.len() <= popular);
    }
    b2j
}

#[allow(clippy::too_many_arguments)]
fn longest_match<T: Eq + std::hash::Hash>(
    a: &[T],
    b: &[T],
    b2j: &HashMap<&T, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut besti, mut bestj, mut best) = (alo, blo, 0);
    // j2len[j] = length of the longest match ending at a[i-1], b[j]
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for i in alo..ahi {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(&a[i]) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j.checked_sub(1).and_then(|p| j2len.get(&p)).copied().unwrap_or(0) + 1;
                next.insert(j, k);
                if k > best {
                    besti = i + 1 - k;
                    bestj = j + 1 - k;
                    best = k;
                }
            }
        }
        j2len = next;
    }

    // popular elements were left out of the index; grow the run across them
    while besti > alo && bestj > blo && a[besti - 1] == b[bestj - 1] {
        besti -= 1;
        bestj -= 1;
        best += 1;
    }
    while besti + best < ahi && bestj + best < bhi && a[besti + best] == b[bestj + best] {
        best += 1;
    }
    (besti, bestj, best)
}
