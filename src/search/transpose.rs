// src/search/transpose.rs

use crate::game::defs::{Color, Piece, Square};
use crate::game::moves::{Flag, Move};

// ===================== Scores =====================

pub type Score = i32;

pub const INFINITY: Score = 32_000;
pub const MATE_SCORE: Score = 31_000;
pub const MATE_THRESHOLD: Score = MATE_SCORE - 1024;

#[inline]
pub fn is_mate_score(score: Score) -> bool {
    score > MATE_THRESHOLD || score < -MATE_THRESHOLD
}

/// Mate scores are stored relative to the node so they stay monotone with
/// distance to mate across plies.
#[inline]
pub fn score_to_tt(score: Score, halfmove: i32) -> Score {
    if !is_mate_score(score) {
        score
    } else if score > 0 {
        score + halfmove
    } else {
        score - halfmove
    }
}

#[inline]
pub fn score_from_tt(score: Score, halfmove: i32) -> Score {
    if !is_mate_score(score) {
        score
    } else if score > 0 {
        score - halfmove
    } else {
        score + halfmove
    }
}

// ===================== Bounds / TT entry =====================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Bound {
    Exact,
    Lower,
    Upper,
}

/// Compact best-move payload: enough to re-identify the move among the
/// freshly generated legal moves of the node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TtMove {
    pub from: Square,
    pub to: Square,
    pub piece: Piece,
    pub side: Color,
    pub flag: Flag,
}

impl TtMove {
    pub fn of(m: &Move) -> Self {
        Self { from: m.from, to: m.to, piece: m.piece, side: m.side, flag: m.flag }
    }

    #[inline]
    pub fn matches(&self, m: &Move) -> bool {
        self.from == m.from && self.to == m.to && self.flag == m.flag
    }
}

#[derive(Clone, Copy)]
struct Entry {
    key: u64,
    depth: i32,
    score: Score,
    bound: Bound,
    best: Option<TtMove>,
}

impl Default for Entry {
    fn default() -> Self {
        Self { key: 0, depth: -1, score: 0, bound: Bound::Exact, best: None }
    }
}

// ------------------- Table ---------------------

const fn next_power_of_two(mut value: u64) -> u64 {
    if value == 0 {
        return 1;
    }
    value -= 1;
    value |= value >> 1;
    value |= value >> 2;
    value |= value >> 4;
    value |= value >> 8;
    value |= value >> 16;
    value |= value >> 32;
    value + 1
}

/// Direct-mapped, one entry per slot, unconditional overwrite.
pub struct TranspositionTable {
    entries: Vec<Entry>,
    index_mask: u64,
}

impl TranspositionTable {
    pub fn new(hash_size_mb: usize) -> Self {
        let bytes = (hash_size_mb as u64) * 1024 * 1024;
        let mut entry_count = bytes / core::mem::size_of::<Entry>() as u64;
        if entry_count < 1 {
            entry_count = 1;
        }
        entry_count = next_power_of_two(entry_count);

        Self {
            entries: vec![Entry::default(); entry_count as usize],
            index_mask: entry_count - 1,
        }
    }

    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = Entry::default();
        }
    }

    /// On a key match the stored best move is always returned; the score is
    /// returned only when the entry is deep enough and its bound can cut the
    /// `[alpha, beta]` window.
    pub fn probe(&self, key: u64, depth: i32, alpha: Score, beta: Score)
                 -> (Option<TtMove>, Option<Score>) {
        let entry = &self.entries[(key & self.index_mask) as usize];

        if entry.key != key || entry.depth < 0 {
            return (None, None);
        }

        let best = entry.best;

        if entry.depth >= depth {
            let cut = match entry.bound {
                Bound::Exact => true,
                Bound::Lower => entry.score >= beta,
                Bound::Upper => entry.score <= alpha,
            };
            if cut {
                return (best, Some(entry.score));
            }
        }

        (best, None)
    }

    pub fn store(&mut self, key: u64, depth: i32, score: Score, bound: Bound,
                 best: Option<TtMove>) {
        self.entries[(key & self.index_mask) as usize] =
            Entry { key, depth, score, bound, best };
    }
}
