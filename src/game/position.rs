// src/game/position.rs

use std::fmt;

use crate::game::board::Board;
use crate::game::defs::{Color, Piece, Square};
use crate::game::gamestate::{CastlingRights, State};
use crate::game::io::{board_from_string, board_to_string};
use crate::game::moves::{Flag, Move, NullUndo, Undo};
use crate::game::zobrist::{self, compute_hash, ep_capture_possible};


// ############################
//     REPETITION HISTORY
// ############################

/// Zobrist keys seen since the last irreversible move. "Clearing" advances
/// the base index instead of truncating, so apply/undo stays a perfect
/// inverse without copying the history into the undo record.
#[derive(Debug, Clone, Default)]
pub struct RepetitionHistory {
    keys: Vec<u64>,
    base: usize,
}

impl RepetitionHistory {
    pub fn new() -> Self {
        Self { keys: Vec::with_capacity(256), base: 0 }
    }

    #[inline]
    pub fn push(&mut self, key: u64) {
        self.keys.push(key);
    }

    #[inline]
    pub fn pop(&mut self) {
        self.keys.pop();
    }

    /// Marks everything so far as unreachable for repetition counting.
    #[inline]
    pub fn rebase(&mut self) {
        self.base = self.keys.len();
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn set_base(&mut self, base: usize) {
        self.base = base;
    }

    /// Occurrences of `key` since the last irreversible move.
    pub fn count(&self, key: u64) -> u32 {
        self.keys[self.base..].iter().filter(|&&k| k == key).count() as u32
    }
}


// ############################
//           POSITION
// ############################

#[derive(Debug, Clone)]
pub struct Position {
    pub board: Board,
    pub state: State,
    hash: u64,
    pub repetition: RepetitionHistory,
}

impl Position {
    /// Standard initial position, all rights, White to move.
    pub fn start() -> Self {
        let board = Board::default();
        let state = State::default();
        let hash = compute_hash(&board, &state);

        let mut repetition = RepetitionHistory::new();
        repetition.push(hash);

        Self { board, state, hash, repetition }
    }

    /// Builds a position from a board-only string plus explicit flags. The
    /// side to move is the parity of `move_counter` (even = White).
    pub fn from_board_string(
        board_str: &str,
        en_passant: Option<Square>,
        white_long: bool,
        white_short: bool,
        black_long: bool,
        black_short: bool,
        move_counter: u32,
    ) -> Result<Self, String> {
        let board = board_from_string(board_str)?;

        if let Some(ep) = en_passant {
            if ep.0 > 63 {
                return Err(format!("en-passant square {} out of range", ep.0));
            }
        }

        let rights = CastlingRights::from_flags(white_long, white_short, black_long, black_short);
        validate_castling_rights(&board, rights)?;

        let state = State {
            castling_rights: rights,
            en_passant_square: en_passant,
            halfmove_clock: 0,
            move_counter,
        };

        let hash = compute_hash(&board, &state);
        let mut repetition = RepetitionHistory::new();
        repetition.push(hash);

        Ok(Self { board, state, hash, repetition })
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.state.side_to_move()
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn board_string(&self) -> String {
        board_to_string(&self.board)
    }

    #[inline]
    pub fn is_threefold_repetition(&self) -> bool {
        self.repetition.count(self.hash) >= 3
    }

    #[inline]
    pub fn is_fifty_move_draw(&self) -> bool {
        self.state.halfmove_clock >= 100
    }

    #[inline]
    fn revoke_right(&mut self, right: CastlingRights, key_index: usize) {
        if self.state.castling_rights.has(right) {
            self.state.castling_rights.remove(right);
            self.hash ^= zobrist::keys().castle_key(key_index);
        }
    }

    /// Castling rights die when the king or a rook leaves its starting
    /// square, and when anything lands on a rook's starting square.
    fn update_castling_rights(&mut self, m: &Move) {
        for sq in [m.from.0, m.to.0] {
            match sq {
                0 => self.revoke_right(CastlingRights::WQ, 1),
                7 => self.revoke_right(CastlingRights::WK, 0),
                4 => {
                    self.revoke_right(CastlingRights::WK, 0);
                    self.revoke_right(CastlingRights::WQ, 1);
                }
                56 => self.revoke_right(CastlingRights::BQ, 3),
                63 => self.revoke_right(CastlingRights::BK, 2),
                60 => {
                    self.revoke_right(CastlingRights::BK, 2);
                    self.revoke_right(CastlingRights::BQ, 3);
                }
                _ => {}
            }
        }
    }

    pub fn apply_move(&mut self, m: &Move) -> Undo {
        let keys = zobrist::keys();
        let us = m.side;
        let them = !us;
        debug_assert_eq!(us, self.side_to_move());

        let mut undo = Undo {
            prev_state: self.state,
            prev_hash: self.hash,
            captured: None,
            rook_move: None,
            prev_repetition_base: self.repetition.base(),
        };

        // Retire the old EP right; its key was folded in only while a pawn
        // could actually take.
        if let Some(ep) = self.state.en_passant_square {
            if ep_capture_possible(&self.board, us, ep) {
                self.hash ^= keys.ep_key(ep.get_file());
            }
            self.state.en_passant_square = None;
        }

        // Normal capture before the mover lands.
        if let Some((vc, vp)) = m.captured {
            self.board.clear_piece(vc, vp, m.to);
            self.hash ^= keys.ps_key(vc, vp, m.to);
            undo.captured = Some((vc, vp, m.to));
        }

        self.board.clear_piece(us, m.piece, m.from);
        self.board.set_piece(us, m.piece, m.to);
        self.hash ^= keys.ps_key(us, m.piece, m.from);
        self.hash ^= keys.ps_key(us, m.piece, m.to);

        match m.flag {
            Flag::DoublePush => {
                let mid = Square((m.from.0 + m.to.0) / 2);
                self.state.en_passant_square = Some(mid);
                if ep_capture_possible(&self.board, them, mid) {
                    self.hash ^= keys.ep_key(mid.get_file());
                }
            }
            Flag::EnPassant => {
                let victim_sq = if us == Color::White {
                    Square(m.to.0 - 8)
                } else {
                    Square(m.to.0 + 8)
                };
                self.board.clear_piece(them, Piece::Pawn, victim_sq);
                self.hash ^= keys.ps_key(them, Piece::Pawn, victim_sq);
                undo.captured = Some((them, Piece::Pawn, victim_sq));
            }
            Flag::WhiteShortCastle | Flag::BlackShortCastle => {
                let (rf, rt) = if us == Color::White {
                    (Square(7), Square(5))
                } else {
                    (Square(63), Square(61))
                };
                self.board.clear_piece(us, Piece::Rook, rf);
                self.board.set_piece(us, Piece::Rook, rt);
                self.hash ^= keys.ps_key(us, Piece::Rook, rf);
                self.hash ^= keys.ps_key(us, Piece::Rook, rt);
                undo.rook_move = Some((rf, rt));
            }
            Flag::WhiteLongCastle | Flag::BlackLongCastle => {
                let (rf, rt) = if us == Color::White {
                    (Square(0), Square(3))
                } else {
                    (Square(56), Square(59))
                };
                self.board.clear_piece(us, Piece::Rook, rf);
                self.board.set_piece(us, Piece::Rook, rt);
                self.hash ^= keys.ps_key(us, Piece::Rook, rf);
                self.hash ^= keys.ps_key(us, Piece::Rook, rt);
                undo.rook_move = Some((rf, rt));
            }
            _ => {
                if let Some(promo) = m.flag.promotion_piece() {
                    self.board.clear_piece(us, Piece::Pawn, m.to);
                    self.board.set_piece(us, promo, m.to);
                    self.hash ^= keys.ps_key(us, Piece::Pawn, m.to);
                    self.hash ^= keys.ps_key(us, promo, m.to);
                }
            }
        }

        self.update_castling_rights(m);

        self.state.move_counter += 1;

        let irreversible = m.piece == Piece::Pawn || undo.captured.is_some();
        if irreversible {
            self.state.halfmove_clock = 0;
        } else {
            self.state.halfmove_clock = self.state.halfmove_clock.saturating_add(1);
        }

        self.hash ^= keys.stm_key();

        if irreversible {
            self.repetition.rebase();
        }
        self.repetition.push(self.hash);

        debug_assert_eq!(self.hash, compute_hash(&self.board, &self.state));

        undo
    }

    pub fn undo_move(&mut self, m: &Move, undo: &Undo) {
        let us = m.side;

        self.repetition.pop();
        self.repetition.set_base(undo.prev_repetition_base);

        self.state = undo.prev_state;
        self.hash = undo.prev_hash;

        // Take the mover back off `to` (the promoted piece if it promoted).
        let landed = m.flag.promotion_piece().unwrap_or(m.piece);
        self.board.clear_piece(us, landed, m.to);
        self.board.set_piece(us, m.piece, m.from);

        if let Some((rf, rt)) = undo.rook_move {
            self.board.clear_piece(us, Piece::Rook, rt);
            self.board.set_piece(us, Piece::Rook, rf);
        }

        if let Some((vc, vp, vsq)) = undo.captured {
            self.board.set_piece(vc, vp, vsq);
        }
    }

    /// Passes the turn: toggles side to move and drops the EP right.
    pub fn apply_null_move(&mut self) -> NullUndo {
        let keys = zobrist::keys();

        let undo = NullUndo {
            prev_en_passant: self.state.en_passant_square,
            prev_hash: self.hash,
        };

        if let Some(ep) = self.state.en_passant_square {
            if ep_capture_possible(&self.board, self.side_to_move(), ep) {
                self.hash ^= keys.ep_key(ep.get_file());
            }
            self.state.en_passant_square = None;
        }

        self.state.move_counter += 1;
        self.hash ^= keys.stm_key();

        undo
    }

    pub fn undo_null_move(&mut self, undo: &NullUndo) {
        self.state.en_passant_square = undo.prev_en_passant;
        self.state.move_counter -= 1;
        self.hash = undo.prev_hash;
    }
}

fn validate_castling_rights(board: &Board, rights: CastlingRights) -> Result<(), String> {
    let checks = [
        (CastlingRights::WK, Color::White, Square(4), Square(7)),
        (CastlingRights::WQ, Color::White, Square(4), Square(0)),
        (CastlingRights::BK, Color::Black, Square(60), Square(63)),
        (CastlingRights::BQ, Color::Black, Square(60), Square(56)),
    ];

    for (right, side, king_sq, rook_sq) in checks {
        if !rights.has(right) {
            continue;
        }
        if !board.pieces(side, Piece::King).contains(king_sq)
            || !board.pieces(side, Piece::Rook).contains(rook_sq)
        {
            return Err(format!(
                "castling right {:?} inconsistent with piece placement", right
            ));
        }
    }

    Ok(())
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.board)
    }
}
