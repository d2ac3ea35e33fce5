// src/main.rs

use std::io::{self, Write};

use anyhow::{anyhow, Result};

use ferrochess::controller::{EngineLimits, GameController, GameResult, PlayerType, Players,
                             TimeControl};
use ferrochess::game::defs::Square;
use ferrochess::game::io::{board_from_string, derive_castling_rights};
use ferrochess::game::position::Position;
use ferrochess::search::perft::print_perft;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("perft") => {
            let board = args
                .get(2)
                .map(String::as_str)
                .unwrap_or("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
            let depth: usize = args.get(3).map_or(Ok(5), |d| d.parse())?;

            let parsed = board_from_string(board).map_err(|e| anyhow!(e))?;
            let (wq, wk, bq, bk) = derive_castling_rights(&parsed);
            let pos = Position::from_board_string(board, None, wq, wk, bq, bk, 0)
                .map_err(|e| anyhow!(e))?;
            print_perft(&pos, depth);
            Ok(())
        }
        _ => play(),
    }
}

fn play() -> Result<()> {
    let side = input("Choose side (w/b): ")?;
    let play_white = !side.eq_ignore_ascii_case("b");

    let players = if play_white {
        Players { white: PlayerType::Human, black: PlayerType::Engine }
    } else {
        Players { white: PlayerType::Engine, black: PlayerType::Human }
    };

    let mut gc = GameController::new(64);
    gc.set_engine_limits(EngineLimits { max_depth: 6, max_time_ms: 0, max_nodes: 0 });

    gc.set_on_move(Box::new(|m, halfmove, eval_cp| {
        println!("move {:>3}: {}   eval {} cp", halfmove + 1, m, eval_cp);
    }));
    gc.set_on_search_info(Box::new(|depth, score, pv| {
        println!("  depth {depth}: {score} cp  pv {pv}");
    }));
    gc.set_on_game_over(Box::new(|_, reason| {
        println!("\nGame over: {reason}");
    }));

    gc.new_game(players, TimeControl::default());
    println!("{}", gc.position().expect("game started"));

    while gc.get_result() == GameResult::Ongoing {
        let line = input("Your move (e.g. e2e4, e7e8q): ")?;
        if line.eq_ignore_ascii_case("quit") {
            break;
        }

        let Some((from, to, promo)) = parse_user_move(&line) else {
            eprintln!("Unparseable move: {line}");
            continue;
        };

        if !gc.make_user_move(from.0, to.0, promo) {
            eprintln!("Illegal move: {line}");
            continue;
        }

        println!("{}", gc.position().expect("game running"));
    }

    Ok(())
}

/// Accepts `e2e4` or `e7e8q`; returns from, to and the promotion code
/// (1 Q, 2 R, 3 B, 4 N, 0 none).
fn parse_user_move(s: &str) -> Option<(Square, Square, u8)> {
    let b = s.as_bytes();
    if b.len() != 4 && b.len() != 5 {
        return None;
    }

    let from = sq_from_bytes(&b[0..2])?;
    let to = sq_from_bytes(&b[2..4])?;

    let promo = if b.len() == 5 {
        match (b[4] as char).to_ascii_lowercase() {
            'q' => 1,
            'r' => 2,
            'b' => 3,
            'n' => 4,
            _ => return None,
        }
    } else {
        0
    };

    Some((from, to, promo))
}

fn sq_from_bytes(b: &[u8]) -> Option<Square> {
    if b.len() != 2 {
        return None;
    }

    let file = match b[0] {
        b'a'..=b'h' => b[0] - b'a',
        b'A'..=b'H' => b[0] - b'A',
        _ => return None,
    };
    let rank = match b[1] {
        b'1'..=b'8' => b[1] - b'1',
        _ => return None,
    };

    Some(Square::from_file_rank(file, rank))
}

fn input(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut buffer = String::new();
    io::stdin().read_line(&mut buffer)?;

    Ok(buffer.trim().to_string())
}
