// src/game/zobrist.rs

use std::sync::OnceLock;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::game::board::{pawn_attacks, Board};
use crate::game::defs::{Color, Piece, Square, COLORS};
use crate::game::gamestate::{CastlingRights, State};

pub static ZOBRIST: OnceLock<ZobristKeys> = OnceLock::new();

#[inline]
pub fn keys() -> &'static ZobristKeys {
    ZOBRIST.get_or_init(|| ZobristKeys::new_with_seed(0xCAFE_F00D))
}

/// 768 piece-square words, four castling words, eight EP-file words and the
/// side-to-move word. Generated once per process from a fixed seed.
pub struct ZobristKeys {
    ps: [[[u64; 64]; 6]; 2],
    castling: [u64; 4],
    ep_file: [u64; 8],
    side: u64,
}

impl ZobristKeys {
    pub fn new_with_seed(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);

        let mut ps = [[[0u64; 64]; 6]; 2];
        for c in 0..2 {
            for p in 0..6 {
                for s in 0..64 {
                    ps[c][p][s] = rng.next_u64();
                }
            }
        }

        let castling = [rng.next_u64(), rng.next_u64(), rng.next_u64(), rng.next_u64()];
        let mut ep_file = [0u64; 8];
        for f in 0..8 {
            ep_file[f] = rng.next_u64();
        }
        let side = rng.next_u64();

        Self { ps, castling, ep_file, side }
    }

    #[inline]
    pub fn ps_key(&self, c: Color, p: Piece, sq: Square) -> u64 {
        self.ps[c as usize][p as usize][sq.0 as usize]
    }

    /// One key per castling-right bit (WK, WQ, BK, BQ order of `CastlingRights`).
    #[inline]
    pub fn castle_key(&self, bit_index: usize) -> u64 {
        self.castling[bit_index]
    }

    #[inline]
    pub fn ep_key(&self, file: u8) -> u64 {
        self.ep_file[file as usize]
    }

    #[inline]
    pub fn stm_key(&self) -> u64 {
        self.side
    }
}

/// True iff `side` has a pawn that could capture onto `ep_square` right now.
/// The EP-file key is folded into the position key only while this holds, so
/// that positions differing only by a dead EP right hash identically.
#[inline]
pub fn ep_capture_possible(board: &Board, side: Color, ep_square: Square) -> bool {
    !(pawn_attacks(!side, ep_square) & board.pieces(side, Piece::Pawn)).is_empty()
}

/// Full recomputation; `Position` keeps the key incrementally after this.
pub fn compute_hash(board: &Board, state: &State) -> u64 {
    let keys = keys();
    let mut h: u64 = 0;

    for &c in &COLORS {
        for &p in &Piece::ALL {
            for sq in board.pieces(c, p) {
                h ^= keys.ps_key(c, p, sq);
            }
        }
    }

    if state.side_to_move() == Color::Black {
        h ^= keys.stm_key();
    }

    let cr = state.castling_rights;
    if cr.has(CastlingRights::WK) { h ^= keys.castle_key(0); }
    if cr.has(CastlingRights::WQ) { h ^= keys.castle_key(1); }
    if cr.has(CastlingRights::BK) { h ^= keys.castle_key(2); }
    if cr.has(CastlingRights::BQ) { h ^= keys.castle_key(3); }

    if let Some(ep) = state.en_passant_square {
        if ep_capture_possible(board, state.side_to_move(), ep) {
            h ^= keys.ep_key(ep.get_file());
        }
    }

    h
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::defs::squarename as SQ;

    #[test]
    fn same_seed_same_keys() {
        let a = ZobristKeys::new_with_seed(42);
        let b = ZobristKeys::new_with_seed(42);
        assert_eq!(a.ps_key(Color::White, Piece::Knight, SQ::G1),
                   b.ps_key(Color::White, Piece::Knight, SQ::G1));
        assert_eq!(a.stm_key(), b.stm_key());
    }

    #[test]
    fn dead_ep_right_does_not_change_hash() {
        // Black to move, EP target e3, but no black pawn on d4/f4.
        let board = Board::default();

        let base = State {
            move_counter: 1,
            ..State::default()
        };
        let with_ep = State {
            en_passant_square: Some(SQ::E3),
            ..base
        };

        assert_eq!(compute_hash(&board, &base), compute_hash(&board, &with_ep));
    }

    #[test]
    fn live_ep_right_changes_hash() {
        let mut board = Board::default();
        // Put a black pawn on d4 so e3 is actually capturable.
        board.clear_piece(Color::Black, Piece::Pawn, SQ::D7);
        board.set_piece(Color::Black, Piece::Pawn, SQ::D4);

        let base = State { move_counter: 1, ..State::default() };
        let with_ep = State { en_passant_square: Some(SQ::E3), ..base };

        assert!(ep_capture_possible(&board, Color::Black, SQ::E3));
        assert_ne!(compute_hash(&board, &base), compute_hash(&board, &with_ep));
    }
}
