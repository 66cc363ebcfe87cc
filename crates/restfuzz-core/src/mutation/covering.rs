//! Pairwise covering arrays.
//!
//! Greedy construction: each new row starts from the first uncovered pair and
//! fills every other column with the value that covers the most still-uncovered
//! pairs against the columns already fixed. Every row covers at least one new
//! pair, so construction terminates, and it is fully deterministic.

use std::collections::BTreeSet;

/// `((column_a, value_a), (column_b, value_b))` with `column_a < column_b`.
type Pair = ((usize, usize), (usize, usize));

/// Rows of value indices such that every pair of values across two distinct
/// columns appears in at least one row.
///
/// With a single column every value gets its own row; with no columns the
/// array is empty.
pub fn pairwise(domain_sizes: &[usize]) -> Vec<Vec<usize>> {
    if domain_sizes.iter().any(|&n| n == 0) {
        return Vec::new();
    }
    match domain_sizes.len() {
        0 => return Vec::new(),
        1 => return (0..domain_sizes[0]).map(|v| vec![v]).collect(),
        _ => {}
    }

    let mut uncovered: BTreeSet<Pair> = BTreeSet::new();
    for a in 0..domain_sizes.len() {
        for b in a + 1..domain_sizes.len() {
            for va in 0..domain_sizes[a] {
                for vb in 0..domain_sizes[b] {
                    uncovered.insert(((a, va), (b, vb)));
                }
            }
        }
    }

    let mut rows = Vec::new();
    while let Some(&((a, va), (b, vb))) = uncovered.iter().next() {
        let mut row: Vec<Option<usize>> = vec![None; domain_sizes.len()];
        row[a] = Some(va);
        row[b] = Some(vb);

        for col in 0..domain_sizes.len() {
            if row[col].is_some() {
                continue;
            }
            let best = (0..domain_sizes[col])
                .max_by_key(|&v| {
                    let gain = row
                        .iter()
                        .enumerate()
                        .filter_map(|(other, val)| val.map(|x| (other, x)))
                        .filter(|&(other, x)| uncovered.contains(&ordered((col, v), (other, x))))
                        .count();
                    // prefer the lowest value on ties
                    (gain, std::cmp::Reverse(v))
                })
                .unwrap_or(0);
            row[col] = Some(best);
        }

        let row: Vec<usize> = row.into_iter().map(|v| v.unwrap_or(0)).collect();
        for x in 0..row.len() {
            for y in x + 1..row.len() {
                uncovered.remove(&((x, row[x]), (y, row[y])));
            }
        }
        rows.push(row);
    }
    rows
}

fn ordered(p: (usize, usize), q: (usize, usize)) -> Pair {
    if p.0 < q.0 {
        (p, q)
    } else {
        (q, p)
    }
}

/// Whether `rows` cover every cross-column value pair for `domain_sizes`.
pub fn covers_all_pairs(domain_sizes: &[usize], rows: &[Vec<usize>]) -> bool {
    for a in 0..domain_sizes.len() {
        for b in a + 1..domain_sizes.len() {
            for va in 0..domain_sizes[a] {
                for vb in 0..domain_sizes[b] {
                    if !rows.iter().any(|r| r[a] == va && r[b] == vb) {
                        return false;
                    }
                }
            }
        }
    }
    true
}
