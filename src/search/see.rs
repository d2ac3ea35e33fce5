// src/search/see.rs

use crate::game::board::{pawn_attacks, ray, scan_forward, scan_reverse, Board, Dir,
                         KING_ATK, KNIGHT_ATK};
use crate::game::defs::{Color, Piece, Square};
use crate::game::moves::{Flag, Move};
use crate::game::movegen::square_attacked;
use crate::search::eval::PIECE_VALUE_CP;
use crate::search::transpose::Score;

/// King value large enough that no exchange ever trades it away.
const KING_EXCHANGE_VALUE: Score = 10_000;

#[inline]
fn piece_value(piece: Piece) -> Score {
    if piece == Piece::King {
        KING_EXCHANGE_VALUE
    } else {
        PIECE_VALUE_CP[piece as usize]
    }
}

/// Attackers to one square, grouped by piece type and side. Prior captures
/// remove occupancy from the snapshot, so x-ray attackers surface on the
/// next collection pass.
#[derive(Default, Clone, Copy)]
struct Attackers {
    by_type: [[u64; 6]; 2],
}

fn nearest_blocker(board: &Board, target: Square, dir: Dir) -> Option<Square> {
    let blockers = ray(target, dir) & board.occupied().0;
    if blockers == 0 {
        return None;
    }
    let sq = if dir.forward_scan() {
        scan_forward(blockers)
    } else {
        scan_reverse(blockers)
    };
    Some(Square(sq))
}

fn tag_diagonal(board: &Board, sq: Square, out: &mut Attackers) {
    for side in 0..2 {
        if board.bb_pieces[side][Piece::Bishop as usize].contains(sq) {
            out.by_type[side][Piece::Bishop as usize] |= 1u64 << sq.0;
        } else if board.bb_pieces[side][Piece::Queen as usize].contains(sq) {
            out.by_type[side][Piece::Queen as usize] |= 1u64 << sq.0;
        }
    }
}

fn tag_orthogonal(board: &Board, sq: Square, out: &mut Attackers) {
    for side in 0..2 {
        if board.bb_pieces[side][Piece::Rook as usize].contains(sq) {
            out.by_type[side][Piece::Rook as usize] |= 1u64 << sq.0;
        } else if board.bb_pieces[side][Piece::Queen as usize].contains(sq) {
            out.by_type[side][Piece::Queen as usize] |= 1u64 << sq.0;
        }
    }
}

fn collect_attackers(board: &Board, target: Square) -> Attackers {
    let mut out = Attackers::default();
    let t = target.0 as usize;

    for side in [Color::White, Color::Black] {
        let s = side as usize;
        out.by_type[s][Piece::Knight as usize] =
            (KNIGHT_ATK[t] & board.pieces(side, Piece::Knight)).0;
        out.by_type[s][Piece::King as usize] =
            (KING_ATK[t] & board.pieces(side, Piece::King)).0;
        // Pawns of `side` that attack `target` sit on the reverse pattern.
        out.by_type[s][Piece::Pawn as usize] =
            (pawn_attacks(!side, target) & board.pieces(side, Piece::Pawn)).0;
    }

    for dir in [Dir::NorthWest, Dir::NorthEast, Dir::SouthWest, Dir::SouthEast] {
        if let Some(sq) = nearest_blocker(board, target, dir) {
            tag_diagonal(board, sq, &mut out);
        }
    }
    for dir in [Dir::North, Dir::South, Dir::West, Dir::East] {
        if let Some(sq) = nearest_blocker(board, target, dir) {
            tag_orthogonal(board, sq, &mut out);
        }
    }

    out
}

/// Least-valuable attacker of `side`, in pawn..king order.
fn least_valuable(attackers: &Attackers, side: Color) -> Option<(Square, Piece)> {
    let s = side as usize;
    for piece in Piece::ALL {
        let bb = attackers.by_type[s][piece as usize];
        if bb != 0 {
            return Some((Square(scan_forward(bb)), piece));
        }
    }
    None
}

/// Best net outcome for `stm` starting a capture sequence on `target`, where
/// `occupant` currently stands there. Either side may stop at any point, so
/// the result is never negative. This is the minimax collapse
/// `gains[i] = -max(-gains[i], gains[i+1])` expressed as a recurrence.
fn exchange_tail(mut board: Board, target: Square, mut occupant: (Color, Piece),
                 mut stm: Color) -> Score {
    let mut victims = [0 as Score; 32];
    let mut depth = 0usize;

    while depth < victims.len() {
        let attackers = collect_attackers(&board, target);
        let Some((from, piece)) = least_valuable(&attackers, stm) else {
            break;
        };

        // A king may only recapture when the square is quiet afterwards.
        if piece == Piece::King {
            let mut after = board;
            after.clear_piece(occupant.0, occupant.1, target);
            after.clear_piece(stm, Piece::King, from);
            after.set_piece(stm, Piece::King, target);
            if square_attacked(&after, target, stm) {
                break;
            }
        }

        victims[depth] = piece_value(occupant.1);
        depth += 1;

        board.clear_piece(occupant.0, occupant.1, target);
        board.clear_piece(stm, piece, from);
        occupant = (stm, piece);
        stm = !stm;
    }

    let mut tail: Score = 0;
    for i in (0..depth).rev() {
        tail = (victims[i] - tail).max(0);
    }
    tail
}

/// Exact material outcome of the capture encoded in `m`, from the moving
/// side's point of view. Returns 0 when the board does not actually hold a
/// victim for the move (the caller checks legality separately).
pub fn capture(board: &Board, m: &Move) -> Score {
    let us = m.side;
    let them = !us;

    let (victim_sq, victim) = if m.flag == Flag::EnPassant {
        let sq = if us == Color::White {
            Square(m.to.0.wrapping_sub(8))
        } else {
            Square(m.to.0 + 8)
        };
        (sq, Piece::Pawn)
    } else {
        match board.piece_at(m.to) {
            Some((c, p)) if c == them => (m.to, p),
            _ => return 0,
        }
    };

    let mut snapshot = *board;
    snapshot.clear_piece(them, victim, victim_sq);
    snapshot.clear_piece(us, m.piece, m.from);

    // A promoting capture risks the promoted piece in the reply exchange.
    let landed = m.flag.promotion_piece().unwrap_or(m.piece);

    let tail = exchange_tail(snapshot, m.to, (us, landed), them);
    piece_value(victim) - tail
}

/// Exchange estimate for the piece `owner` has standing on `square`: 0 when
/// it stands safely, negative when the opponent wins material by capturing
/// there. Empty or foreign squares yield 0.
pub fn on(board: &Board, square: Square, owner: Color) -> Score {
    let occupant = match board.piece_at(square) {
        Some((c, p)) if c == owner => (c, p),
        _ => return 0,
    };

    -exchange_tail(*board, square, occupant, !owner)
}
