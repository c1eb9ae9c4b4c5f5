//! Line diffs for proposed edits.
//!
//! Myers' O(ND) difference algorithm in linear space: common prefix and
//! suffix are trimmed, then a forward and a backward search meet in the
//! middle and each half is diffed on its own. Lines are compared with their
//! terminators, so a body that only gains or loses its final newline still
//! differs.

use std::fmt::Write as _;

const NO_NEWLINE: &str = "\\ No newline at end of file";

/// One line of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
}

impl DiffLine {
    fn text(&self) -> &str {
        match self {
            DiffLine::Context(text) | DiffLine::Added(text) | DiffLine::Removed(text) => text,
        }
    }

    fn is_change(&self) -> bool {
        !matches!(self, DiffLine::Context(_))
    }
}

/// The edit script turning one body into another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diff {
    lines: Vec<DiffLine>,
    old_ends_without_newline: bool,
    new_ends_without_newline: bool,
}

impl Diff {
    /// Diff two bodies line by line.
    pub fn lines(original: &str, proposed: &str) -> Self {
        let a: Vec<&str> = original.split_inclusive('\n').collect();
        let b: Vec<&str> = proposed.split_inclusive('\n').collect();
        let mut lines = Vec::with_capacity(a.len().max(b.len()));
        diff_slices(&a, &b, &mut lines);
        Self {
            lines,
            old_ends_without_newline: !original.is_empty() && !original.ends_with('\n'),
            new_ends_without_newline: !proposed.is_empty() && !proposed.ends_with('\n'),
        }
    }

    pub fn ops(&self) -> &[DiffLine] {
        &self.lines
    }

    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(DiffLine::is_change)
    }

    pub fn added(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, DiffLine::Added(_)))
            .count()
    }

    pub fn removed(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, DiffLine::Removed(_)))
            .count()
    }

    /// Render in unified format with `context` lines around each change.
    /// Empty when there are no changes.
    pub fn unified(&self, old_name: &str, new_name: &str, context: usize) -> String {
        if !self.has_changes() {
            return String::new();
        }

        // Lines of each side consumed before op `i`.
        let mut before = Vec::with_capacity(self.lines.len() + 1);
        let (mut old, mut new) = (0usize, 0usize);
        for line in &self.lines {
            before.push((old, new));
            match line {
                DiffLine::Context(_) => {
                    old += 1;
                    new += 1;
                }
                DiffLine::Removed(_) => old += 1,
                DiffLine::Added(_) => new += 1,
            }
        }
        before.push((old, new));

        let mut out = String::new();
        let _ = writeln!(out, "--- {old_name}");
        let _ = writeln!(out, "+++ {new_name}");

        for (start, end) in self.hunks(context) {
            let (old_before, new_before) = before[start];
            let (old_after, new_after) = before[end];
            let (old_count, new_count) = (old_after - old_before, new_after - new_before);
            let old_start = if old_count == 0 { old_before } else { old_before + 1 };
            let new_start = if new_count == 0 { new_before } else { new_before + 1 };
            let _ = writeln!(
                out,
                "@@ -{old_start},{old_count} +{new_start},{new_count} @@"
            );
            for (i, line) in self.lines[start..end].iter().enumerate() {
                let marker = match line {
                    DiffLine::Context(_) => ' ',
                    DiffLine::Added(_) => '+',
                    DiffLine::Removed(_) => '-',
                };
                let _ = writeln!(out, "{marker}{}", line.text());

                let (old_after, new_after) = before[start + i + 1];
                let last_old = !matches!(line, DiffLine::Added(_)) && old_after == old;
                let last_new = !matches!(line, DiffLine::Removed(_)) && new_after == new;
                if (last_old && self.old_ends_without_newline)
                    || (last_new && self.new_ends_without_newline)
                {
                    let _ = writeln!(out, "{NO_NEWLINE}");
                }
            }
        }
        out
    }

    /// Op ranges `[start, end)` of each hunk.
    fn hunks(&self, context: usize) -> Vec<(usize, usize)> {
        let changes: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_change())
            .map(|(i, _)| i)
            .collect();

        let mut hunks: Vec<(usize, usize)> = Vec::new();
        for i in changes {
            let start = i.saturating_sub(context);
            let end = (i + context + 1).min(self.lines.len());
            match hunks.last_mut() {
                Some(last) if start <= last.1 => last.1 = end,
                _ => hunks.push((start, end)),
            }
        }
        hunks
    }
}

fn strip(line: &str) -> String {
    line.strip_suffix('\n').unwrap_or(line).to_string()
}

fn diff_slices(a: &[&str], b: &[&str], out: &mut Vec<DiffLine>) {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (a_mid, b_mid) = (&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]);

    out.extend(a[..prefix].iter().map(|line| DiffLine::Context(strip(line))));
    if a_mid.is_empty() {
        out.extend(b_mid.iter().map(|line| DiffLine::Added(strip(line))));
    } else if b_mid.is_empty() {
        out.extend(a_mid.iter().map(|line| DiffLine::Removed(strip(line))));
    } else {
        bisect(a_mid, b_mid, out);
    }
    out.extend(
        a[a.len() - suffix..]
            .iter()
            .map(|line| DiffLine::Context(strip(line))),
    );
}

/// Find where a shortest edit path crosses the middle and diff both halves.
/// The search keeps two vectors of furthest-reaching paths, one per
/// direction, so memory stays linear in the input.
fn bisect(a: &[&str], b: &[&str], out: &mut Vec<DiffLine>) {
    let (n, m) = (a.len() as isize, b.len() as isize);
    let max_d = (n + m + 1) / 2;
    let offset = max_d;
    let len = 2 * max_d + 2;
    let mut forward = vec![-1isize; len as usize];
    let mut backward = vec![-1isize; len as usize];
    forward[(offset + 1) as usize] = 0;
    backward[(offset + 1) as usize] = 0;
    let delta = n - m;
    // Odd delta: the forward pass detects the overlap, else the backward.
    let front = delta % 2 != 0;
    let (mut k1_start, mut k1_end, mut k2_start, mut k2_end) = (0isize, 0isize, 0isize, 0isize);

    for d in 0..max_d {
        let mut k1 = -d + k1_start;
        while k1 <= d - k1_end {
            let k1_offset = (offset + k1) as usize;
            let mut x1 = if k1 == -d
                || (k1 != d && forward[k1_offset - 1] < forward[k1_offset + 1])
            {
                forward[k1_offset + 1]
            } else {
                forward[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < n && y1 < m && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            forward[k1_offset] = x1;
            if x1 > n {
                k1_end += 2;
            } else if y1 > m {
                k1_start += 2;
            } else if front {
                let k2_offset = offset + delta - k1;
                if (0..len).contains(&k2_offset) && backward[k2_offset as usize] != -1 {
                    let x2 = n - backward[k2_offset as usize];
                    if x1 >= x2 {
                        return split(a, b, x1 as usize, y1 as usize, out);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2_start;
        while k2 <= d - k2_end {
            let k2_offset = (offset + k2) as usize;
            let mut x2 = if k2 == -d
                || (k2 != d && backward[k2_offset - 1] < backward[k2_offset + 1])
            {
                backward[k2_offset + 1]
            } else {
                backward[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < n
                && y2 < m
                && a[(n - x2 - 1) as usize] == b[(m - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            backward[k2_offset] = x2;
            if x2 > n {
                k2_end += 2;
            } else if y2 > m {
                k2_start += 2;
            } else if !front {
                let k1_offset = offset + delta - k2;
                if (0..len).contains(&k1_offset) && forward[k1_offset as usize] != -1 {
                    let x1 = forward[k1_offset as usize];
                    let y1 = offset + x1 - k1_offset;
                    if x1 >= n - x2 {
                        return split(a, b, x1 as usize, y1 as usize, out);
                    }
                }
            }
            k2 += 2;
        }
    }

    // Nothing in common.
    out.extend(a.iter().map(|line| DiffLine::Removed(strip(line))));
    out.extend(b.iter().map(|line| DiffLine::Added(strip(line))));
}

fn split(a: &[&str], b: &[&str], x: usize, y: usize, out: &mut Vec<DiffLine>) {
    diff_slices(&a[..x], &b[..y], out);
    diff_slices(&a[x..], &b[y..], out);
}
