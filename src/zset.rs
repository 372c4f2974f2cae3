//! Sorted set: members with `f64` scores, ordered by `(score, member)`.
//!
//! A sorted `Vec` gives binary-search rank queries and cheap ordered
//! iteration; a `HashMap` gives member→score lookups.

use std::collections::HashMap;

use ordered_float::OrderedFloat;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    sorted: Vec<(OrderedFloat<f64>, Vec<u8>)>,
    scores: HashMap<Vec<u8>, OrderedFloat<f64>>,
}

/// One end of a score range. `(1.5` is exclusive, `1.5` inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> Self {
        ScoreBound {
            value,
            exclusive: false,
        }
    }

    fn below_min(&self, score: f64) -> bool {
        if self.exclusive {
            score <= self.value
        } else {
            score < self.value
        }
    }

    fn within_max(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// One end of a lexicographic range (`-`, `+`, `[abc`, `(abc`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(Vec<u8>),
    Exclusive(Vec<u8>),
}

impl LexBound {
    fn admits_as_min(&self, member: &[u8]) -> bool {
        match self {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Inclusive(v) => member >= v.as_slice(),
            LexBound::Exclusive(v) => member > v.as_slice(),
        }
    }

    fn admits_as_max(&self, member: &[u8]) -> bool {
        match self {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Inclusive(v) => member <= v.as_slice(),
            LexBound::Exclusive(v) => member < v.as_slice(),
        }
    }
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).map(|s| s.0)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    /// Inserts or re-scores a member. Returns true if the member was added
    /// or its score changed.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        let new_score = OrderedFloat(score);
        if let Some(&old_score) = self.scores.get(&member) {
            if old_score == new_score {
                return false;
            }
            if let Ok(idx) = self.search(old_score, &member) {
                self.sorted.remove(idx);
            }
        }
        self.scores.insert(member.clone(), new_score);
        let idx = match self.search(new_score, &member) {
            Ok(idx) | Err(idx) => idx,
        };
        self.sorted.insert(idx, (new_score, member));
        true
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        let Some(score) = self.scores.remove(member) else {
            return false;
        };
        if let Ok(idx) = self.search(score, member) {
            self.sorted.remove(idx);
        }
        true
    }

    /// 0-based position in ascending `(score, member)` order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        self.search(score, member).ok()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&[u8], f64)> + '_ {
        self.sorted.iter().map(|(s, m)| (m.as_slice(), s.0))
    }

    /// Entries with rank in `start..end` (half-open, already clamped).
    pub fn by_rank(&self, start: usize, end: usize) -> Vec<(Vec<u8>, f64)> {
        let end = end.min(self.sorted.len());
        if start >= end {
            return Vec::new();
        }
        self.sorted[start..end]
            .iter()
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    pub fn by_score(&self, min: &ScoreBound, max: &ScoreBound) -> Vec<(Vec<u8>, f64)> {
        let (start, end) = self.score_span(min, max);
        self.sorted[start..end]
            .iter()
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    pub fn count_by_score(&self, min: &ScoreBound, max: &ScoreBound) -> usize {
        let (start, end) = self.score_span(min, max);
        end - start
    }

    /// Members within the lexicographic range. Only meaningful when all
    /// scores are equal, as with the real server.
    pub fn by_lex(&self, min: &LexBound, max: &LexBound) -> Vec<(Vec<u8>, f64)> {
        self.sorted
            .iter()
            .filter(|(_, m)| min.admits_as_min(m) && max.admits_as_max(m))
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    pub fn count_by_lex(&self, min: &LexBound, max: &LexBound) -> usize {
        self.sorted
            .iter()
            .filter(|(_, m)| min.admits_as_min(m) && max.admits_as_max(m))
            .count()
    }

    /// Removes and returns up to `count` lowest (or highest) entries.
    pub fn pop(&mut self, count: usize, highest: bool) -> Vec<(Vec<u8>, f64)> {
        let count = count.min(self.sorted.len());
        let drained: Vec<(OrderedFloat<f64>, Vec<u8>)> = if highest {
            let at = self.sorted.len() - count;
            let mut tail = self.sorted.split_off(at);
            tail.reverse();
            tail
        } else {
            self.sorted.drain(..count).collect()
        };
        drained
            .into_iter()
            .map(|(s, m)| {
                self.scores.remove(&m);
                (m, s.0)
            })
            .collect()
    }

    fn score_span(&self, min: &ScoreBound, max: &ScoreBound) -> (usize, usize) {
        let start = self.sorted.partition_point(|(s, _)| min.below_min(s.0));
        let end = self.sorted.partition_point(|(s, _)| max.within_max(s.0));
        (start, end.max(start))
    }

    fn search(&self, score: OrderedFloat<f64>, member: &[u8]) -> Result<usize, usize> {
        self.sorted
            .binary_search_by(|(s, m)| s.cmp(&score).then_with(|| m.as_slice().cmp(member)))
    }
}
