//! Hybrid postings: explicit set plus half-open ranges
//!
//! Invariants:
//! - No line number is in both `set` and a range
//! - `ranges` are sorted, non-empty, non-overlapping and non-adjacent
//!
//! Membership and set algebra never depend on which half holds a line.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Postings {
    set: BTreeSet<usize>,
    ranges: Vec<(usize, usize)>,
}

impl Postings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds postings from both halves, normalizing overlap.
    pub fn from_parts(set: impl IntoIterator<Item = usize>, ranges: Vec<(usize, usize)>) -> Self {
        let mut postings = Postings::new();
        let mut ranges: Vec<(usize, usize)> = ranges.into_iter().filter(|(s, e)| s < e).collect();
        ranges.sort_unstable();
        for (s, e) in ranges {
            match postings.ranges.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => postings.ranges.push((s, e)),
            }
        }
        for line in set {
            postings.insert(line);
        }
        postings
    }

    pub fn insert(&mut self, line: usize) {
        if !self.in_ranges(line) {
            self.set.insert(line);
        }
    }

    pub fn remove(&mut self, line: usize) {
        if self.set.remove(&line) {
            return;
        }
        if let Some(i) = self.range_index(line) {
            let (s, e) = self.ranges[i];
            let mut pieces = Vec::with_capacity(2);
            if s < line {
                pieces.push((s, line));
            }
            if line + 1 < e {
                pieces.push((line + 1, e));
            }
            self.ranges.splice(i..=i, pieces);
        }
    }

    pub fn contains(&self, line: usize) -> bool {
        self.set.contains(&line) || self.in_ranges(line)
    }

    pub fn len(&self) -> usize {
        self.set.len() + self.ranges.iter().map(|(s, e)| e - s).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.ranges.is_empty()
    }

    /// All members ascending
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut members: Vec<usize> = self.set.iter().copied().collect();
        for (s, e) in &self.ranges {
            members.extend(*s..*e);
        }
        members.sort_unstable();
        members.into_iter()
    }

    pub fn to_set(&self) -> BTreeSet<usize> {
        self.iter().collect()
    }

    /// Adds every member to `out`.
    pub fn union_into(&self, out: &mut BTreeSet<usize>) {
        out.extend(self.set.iter().copied());
        for (s, e) in &self.ranges {
            out.extend(*s..*e);
        }
    }

    pub fn set_part(&self) -> &BTreeSet<usize> {
        &self.set
    }

    pub fn range_part(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    /// Moves runs of at least `min_run` consecutive lines into ranges.
    pub fn compact(&mut self, min_run: usize) {
        let min_run = min_run.max(2);
        let members: Vec<usize> = self.iter().collect();
        let mut set = BTreeSet::new();
        let mut ranges = Vec::new();

        let mut i = 0;
        while i < members.len() {
            let mut j = i + 1;
            while j < members.len() && members[j] == members[j - 1] + 1 {
                j += 1;
            }
            if j - i >= min_run {
                ranges.push((members[i], members[j - 1] + 1));
            } else {
                set.extend(&members[i..j]);
            }
            i = j;
        }
        self.set = set;
        self.ranges = ranges;
    }

    /// Drops `deleted` lines and renumbers the rest to close the gaps.
    ///
    /// `deleted` must be sorted ascending.
    pub fn shift_out(&mut self, deleted: &[usize]) {
        if deleted.is_empty() {
            return;
        }
        let rank = |n: usize| deleted.partition_point(|&d| d < n);
        let is_deleted = |n: usize| deleted.binary_search(&n).is_ok();

        self.set = self
            .set
            .iter()
            .filter(|n| !is_deleted(**n))
            .map(|n| n - rank(*n))
            .collect();

        let mut shifted: Vec<(usize, usize)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            let lo = deleted.partition_point(|&d| d < s);
            let hi = deleted.partition_point(|&d| d < e);
            let mut a = s;
            for &d in &deleted[lo..hi] {
                if d > a {
                    push_merged(&mut shifted, (a - rank(a), d - rank(a)));
                }
                a = d + 1;
            }
            if a < e {
                push_merged(&mut shifted, (a - rank(a), e - rank(a)));
            }
        }
        self.ranges = shifted;
    }

    /// Largest member, if any
    pub fn max(&self) -> Option<usize> {
        let from_set = self.set.iter().next_back().copied();
        let from_ranges = self.ranges.last().map(|(_, e)| e - 1);
        from_set.max(from_ranges)
    }

    fn in_ranges(&self, line: usize) -> bool {
        self.range_index(line).is_some()
    }

    fn range_index(&self, line: usize) -> Option<usize> {
        let i = self.ranges.partition_point(|(_, e)| *e <= line);
        match self.ranges.get(i) {
            Some((s, _)) if *s <= line => Some(i),
            _ => None,
        }
    }
}

fn push_merged(ranges: &mut Vec<(usize, usize)>, next: (usize, usize)) {
    match ranges.last_mut() {
        Some(last) if last.1 >= next.0 => last.1 = last.1.max(next.1),
        _ => ranges.push(next),
    }
}
