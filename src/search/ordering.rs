// src/search/ordering.rs

use crate::game::board::Board;
use crate::game::defs::{Color, Piece};
use crate::game::moves::{Flag, Move};
use crate::search::eval::PIECE_VALUE_CP;
use crate::search::see;
use crate::search::transpose::{Score, TtMove};

/// Quiet-move history, indexed by (side, from, to).
pub type HistoryTable = [[[i32; 64]; 64]; 2];

pub struct Context<'a> {
    pub tt_move: Option<TtMove>,
    /// Two recent cutoff keys for this halfmove depth; 0 means unset.
    pub cutoff1: u16,
    pub cutoff2: u16,
    pub history: &'a HistoryTable,
    pub side_to_move: Color,
}

#[inline]
fn same_key(key: u16, m: &Move) -> bool {
    key != 0 && key == m.from_to_key()
}

/// Scalar move priority: TT move, promotions, en passant, captures by
/// MVV-LVA plus clamped SEE, cutoff moves, then history-scored quiets.
pub fn score(m: &Move, board: &Board, ctx: &Context) -> Score {
    if let Some(tt) = &ctx.tt_move {
        if tt.from == m.from && tt.to == m.to {
            return 1_000_000;
        }
    }

    match m.flag {
        Flag::PromoteQueen => return 900_000,
        Flag::PromoteRook => return 880_000,
        Flag::PromoteBishop => return 870_000,
        Flag::PromoteKnight => return 870_000,
        Flag::EnPassant => return 860_000,
        Flag::Capture => {
            let victim_value = match m.captured {
                Some((_, victim)) => PIECE_VALUE_CP[victim as usize],
                None => 0,
            };
            let attacker_penalty = if m.piece == Piece::King {
                10
            } else {
                PIECE_VALUE_CP[m.piece as usize]
            };

            let see_value = see::capture(board, m).clamp(-500, 500);
            return 500_000 + (victim_value - attacker_penalty) + see_value;
        }
        _ => {}
    }

    // Simple moves only from here on.
    if same_key(ctx.cutoff1, m) {
        return 300_000;
    }
    if same_key(ctx.cutoff2, m) {
        return 290_000;
    }

    let side = ctx.side_to_move as usize;
    let hval = ctx.history[side][m.from.0 as usize][m.to.0 as usize].clamp(0, 16_384);
    100_000 + hval
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::defs::squarename as SQ;
    use crate::game::io::board_from_string;

    fn empty_history() -> HistoryTable {
        [[[0; 64]; 64]; 2]
    }

    fn ctx<'a>(tt_move: Option<TtMove>, history: &'a HistoryTable) -> Context<'a> {
        Context {
            tt_move,
            cutoff1: 0,
            cutoff2: 0,
            history,
            side_to_move: Color::White,
        }
    }

    #[test]
    fn tt_beats_captures_beat_quiets() {
        let board = board_from_string("4k3/8/8/3p4/8/4N3/8/4K3").unwrap();
        let history = empty_history();

        let quiet = Move::new(SQ::E3, SQ::G4, Piece::Knight, Color::White, None, Flag::Default);
        let cap = Move::new(SQ::E3, SQ::D5, Piece::Knight, Color::White,
                            Some((Color::Black, Piece::Pawn)), Flag::Capture);

        let tt = TtMove::of(&quiet);
        let c = ctx(Some(tt), &history);

        let s_tt = score(&quiet, &board, &c);
        let s_cap = score(&cap, &board, &c);

        let c_no_tt = ctx(None, &history);
        let s_quiet = score(&quiet, &board, &c_no_tt);

        assert!(s_tt > s_cap, "tt {} cap {}", s_tt, s_cap);
        assert!(s_cap > s_quiet, "cap {} quiet {}", s_cap, s_quiet);
    }

    #[test]
    fn promotions_rank_between_tt_and_captures() {
        let board = board_from_string("8/4P3/8/8/8/8/4k3/4K3").unwrap();
        let history = empty_history();
        let c = ctx(None, &history);

        let promo_q = Move::new(SQ::E7, SQ::E8, Piece::Pawn, Color::White, None, Flag::PromoteQueen);
        let promo_r = Move::new(SQ::E7, SQ::E8, Piece::Pawn, Color::White, None, Flag::PromoteRook);

        assert_eq!(score(&promo_q, &board, &c), 900_000);
        assert_eq!(score(&promo_r, &board, &c), 880_000);
    }

    #[test]
    fn winning_capture_outranks_losing_capture() {
        // Nxd5 wins a free pawn; Qxd5 walks into c6xd5.
        let board = board_from_string("4k3/8/2p5/3p4/8/4N3/3Q4/4K3").unwrap();
        let history = empty_history();
        let c = ctx(None, &history);

        let good = Move::new(SQ::E3, SQ::D5, Piece::Knight, Color::White,
                             Some((Color::Black, Piece::Pawn)), Flag::Capture);
        let bad = Move::new(SQ::D2, SQ::D5, Piece::Queen, Color::White,
                            Some((Color::Black, Piece::Pawn)), Flag::Capture);

        assert!(score(&good, &board, &c) > score(&bad, &board, &c));
    }

    #[test]
    fn cutoff_keys_rank_above_plain_quiets() {
        let board = board_from_string("4k3/8/8/8/8/4N3/8/4K3").unwrap();
        let history = empty_history();

        let quiet = Move::new(SQ::E3, SQ::G4, Piece::Knight, Color::White, None, Flag::Default);
        let other = Move::new(SQ::E3, SQ::C4, Piece::Knight, Color::White, None, Flag::Default);

        let c = Context {
            tt_move: None,
            cutoff1: quiet.from_to_key(),
            cutoff2: 0,
            history: &history,
            side_to_move: Color::White,
        };

        assert_eq!(score(&quiet, &board, &c), 300_000);
        assert_eq!(score(&other, &board, &c), 100_000);
    }

    #[test]
    fn history_breaks_quiet_ties_with_a_cap() {
        let board = board_from_string("4k3/8/8/8/8/4N3/8/4K3").unwrap();
        let mut history = empty_history();
        let m = Move::new(SQ::E3, SQ::G4, Piece::Knight, Color::White, None, Flag::Default);
        history[0][SQ::E3.0 as usize][SQ::G4.0 as usize] = 50_000;

        let c = ctx(None, &history);
        assert_eq!(score(&m, &board, &c), 100_000 + 16_384);
    }
}
