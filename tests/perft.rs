// tests/perft.rs
//
// Reference leaf counts for full legal generation. Each fixture stresses a
// different corner: the initial position, Kiwipete (castling + pins + EP),
// a live en-passant target, and a sparse rook endgame.

use ferrochess::game::defs::Square;
use ferrochess::game::position::Position;
use ferrochess::search::perft::perft;

fn perft_board(board: &str, ep: Option<Square>, castling: bool, depth: usize) -> u64 {
    let mut pos = Position::from_board_string(board, ep, castling, castling, castling, castling, 0)
        .unwrap();
    perft(&mut pos, depth)
}

#[test]
fn initial_position() {
    assert_eq!(perft_board("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR", None, true, 1), 20);
    assert_eq!(perft_board("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR", None, true, 2), 400);
    assert_eq!(perft_board("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR", None, true, 3), 8_902);
}

#[test]
fn kiwipete() {
    let board = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R";
    assert_eq!(perft_board(board, None, true, 1), 48);
    assert_eq!(perft_board(board, None, true, 2), 2_039);
    assert_eq!(perft_board(board, None, true, 3), 97_862);
}

#[test]
fn en_passant_fixture() {
    // White just answered ...b5 with c5xb6 available; EP target is b6 (41).
    let board = "rnbqkbnr/p1p1pppp/8/1pPp4/8/8/PP1PPPPP/RNBQKBNR";
    assert_eq!(perft_board(board, Some(Square(41)), true, 1), 23);
    assert_eq!(perft_board(board, Some(Square(41)), true, 2), 643);
}

#[test]
fn rook_endgame() {
    let board = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8";
    assert_eq!(perft_board(board, None, false, 1), 14);
    assert_eq!(perft_board(board, None, false, 2), 191);
    assert_eq!(perft_board(board, None, false, 3), 2_812);
}
