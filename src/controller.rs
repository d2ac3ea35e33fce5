// src/controller.rs

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::game::defs::{Color, Piece, Square};
use crate::game::movegen::{generate_legal_moves, in_check};
use crate::game::moves::{Flag, Move, MoveList};
use crate::game::position::Position;
use crate::search::eval::evaluate;
use crate::search::search::{PvLine, SearchEngine, SearchLimits, SearchResult};
use crate::search::transpose::{Score, TranspositionTable};


// ############################
//       CONTROL TYPES
// ############################

#[derive(Debug, Clone, Copy)]
pub struct TimeControl {
    pub base_ms: i32,
    pub increment_ms: i32,
    pub use_increment: bool,
}

impl Default for TimeControl {
    fn default() -> Self {
        Self { base_ms: 300_000, increment_ms: 300, use_increment: true }
    }
}

/// Only depth and nodes are honored; time is the clock widget's business.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineLimits {
    pub max_depth: i32,
    pub max_time_ms: i32,
    pub max_nodes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerType {
    Human,
    Engine,
}

#[derive(Debug, Clone, Copy)]
pub struct Players {
    pub white: PlayerType,
    pub black: PlayerType,
}

impl Default for Players {
    fn default() -> Self {
        Self { white: PlayerType::Human, black: PlayerType::Engine }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Ongoing,
    WhiteWon,
    BlackWon,
    DrawStalemate,
    DrawFiftyMove,
    DrawRepetition,
    DrawMaterial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Null,
    PlayerTurn,
    EngineThinking,
    GameOver,
}

pub type OnPosition = Box<dyn FnMut(&Position)>;
pub type OnMove = Box<dyn FnMut(&Move, u32, Score)>;
pub type OnSearchInfo = Box<dyn FnMut(i32, Score, &str)>;
pub type OnBestMove = Box<dyn FnMut(&Move, &str)>;
pub type OnGameOver = Box<dyn FnMut(GameResult, &str)>;
pub type OnLegalMask = Box<dyn FnMut(u8, u64)>;


// ############################
//       RESULT DETECTION
// ############################

fn has_no_legal_moves(pos: &Position) -> bool {
    let mut list = MoveList::new();
    generate_legal_moves(pos, &mut list, false) == 0
}

/// Lone kings, or a lone minor piece against a bare king.
fn is_insufficient_material(pos: &Position) -> bool {
    let board = &pos.board;

    for side in [Color::White, Color::Black] {
        if !board.pieces(side, Piece::Pawn).is_empty()
            || !board.pieces(side, Piece::Rook).is_empty()
            || !board.pieces(side, Piece::Queen).is_empty()
        {
            return false;
        }
    }

    let minors = board.pieces(Color::White, Piece::Knight).count()
        + board.pieces(Color::White, Piece::Bishop).count()
        + board.pieces(Color::Black, Piece::Knight).count()
        + board.pieces(Color::Black, Piece::Bishop).count();

    minors <= 1
}

fn detect_result(pos: &Position) -> GameResult {
    if pos.is_fifty_move_draw() {
        return GameResult::DrawFiftyMove;
    }
    if pos.is_threefold_repetition() {
        return GameResult::DrawRepetition;
    }
    if is_insufficient_material(pos) {
        return GameResult::DrawMaterial;
    }

    if has_no_legal_moves(pos) {
        let stm = pos.side_to_move();
        if in_check(&pos.board, stm) {
            return if stm == Color::White { GameResult::BlackWon } else { GameResult::WhiteWon };
        }
        return GameResult::DrawStalemate;
    }

    GameResult::Ongoing
}

fn result_reason(result: GameResult) -> &'static str {
    match result {
        GameResult::DrawFiftyMove => "draw by fifty-move rule",
        GameResult::DrawRepetition => "draw by threefold repetition",
        GameResult::DrawStalemate => "stalemate",
        GameResult::DrawMaterial => "draw by insufficient material",
        GameResult::WhiteWon => "checkmate, White wins",
        GameResult::BlackWon => "checkmate, Black wins",
        GameResult::Ongoing => "",
    }
}

fn promotion_flag_for_code(code: u8) -> Option<Flag> {
    match code {
        1 => Some(Flag::PromoteQueen),
        2 => Some(Flag::PromoteRook),
        3 => Some(Flag::PromoteBishop),
        4 => Some(Flag::PromoteKnight),
        _ => None,
    }
}


// ############################
//        CONTROLLER
// ############################

/// Orchestrates a game between humans and the engine: lifecycle, turn
/// arbitration, move validation and terminal-state detection. Rendering and
/// input plumbing stay on the other side of the callback boundary.
pub struct GameController {
    tt: TranspositionTable,
    position: Option<Position>,
    engine: SearchEngine,

    players: Players,
    time_control: TimeControl,
    engine_limits: EngineLimits,

    state: ControllerState,
    result: GameResult,
    stop_flag: Arc<AtomicBool>,

    on_position: Option<OnPosition>,
    on_move: Option<OnMove>,
    on_search_info: Option<OnSearchInfo>,
    on_best_move: Option<OnBestMove>,
    on_game_over: Option<OnGameOver>,
    on_legal_mask: Option<OnLegalMask>,
}

impl GameController {
    pub fn new(tt_megabytes: usize) -> Self {
        Self {
            tt: TranspositionTable::new(tt_megabytes),
            position: None,
            engine: SearchEngine::new(),
            players: Players::default(),
            time_control: TimeControl::default(),
            engine_limits: EngineLimits::default(),
            state: ControllerState::Null,
            result: GameResult::Ongoing,
            stop_flag: Arc::new(AtomicBool::new(false)),
            on_position: None,
            on_move: None,
            on_search_info: None,
            on_best_move: None,
            on_game_over: None,
            on_legal_mask: None,
        }
    }

    pub fn new_game(&mut self, players: Players, tc: TimeControl) {
        self.players = players;
        self.time_control = tc;
        self.result = GameResult::Ongoing;
        self.position = Some(Position::start());
        self.state = ControllerState::PlayerTurn;

        self.emit_position();

        if self.is_engine_to_move() {
            self.enter_engine_thinking();
        }
    }

    /// Loads a board-only string. Castling rights are granted where king and
    /// rook still stand on their home squares. On a malformed string the
    /// previous position is kept.
    pub fn load_position(&mut self, board_string: &str, players: Players,
                         tc: TimeControl) -> Result<(), String> {
        let probe = crate::game::io::board_from_string(board_string)?;
        let (wq, wk, bq, bk) = crate::game::io::derive_castling_rights(&probe);

        let position = Position::from_board_string(board_string, None, wq, wk, bq, bk, 0)?;

        self.players = players;
        self.time_control = tc;
        self.result = GameResult::Ongoing;
        self.position = Some(position);
        self.state = ControllerState::PlayerTurn;

        self.emit_position();

        if self.is_engine_to_move() {
            self.enter_engine_thinking();
        }

        Ok(())
    }

    /// Validates and applies a user move. A pawn reaching the last rank
    /// requires a promotion code {1 Q, 2 R, 3 B, 4 N}; 0 means none.
    pub fn make_user_move(&mut self, from: u8, to: u8, promo_code: u8) -> bool {
        if self.state == ControllerState::GameOver {
            return false;
        }
        let Some(pos) = self.position.as_ref() else {
            return false;
        };
        if from > 63 || to > 63 {
            return false;
        }

        let mut list = MoveList::new();
        generate_legal_moves(pos, &mut list, false);

        let mut chosen: Option<Move> = None;
        for m in list.iter() {
            if m.from.0 != from || m.to.0 != to {
                continue;
            }

            if !m.flag.is_promotion() {
                if promo_code == 0 {
                    chosen = Some(*m);
                    break;
                }
                continue;
            }

            match promotion_flag_for_code(promo_code) {
                Some(flag) if flag == m.flag => {
                    chosen = Some(*m);
                    break;
                }
                _ => continue,
            }
        }

        let Some(chosen) = chosen else {
            return false;
        };

        self.apply_and_notify(&chosen);

        if self.result != GameResult::Ongoing {
            return true;
        }

        if self.is_engine_to_move() {
            self.enter_engine_thinking();
        } else {
            self.state = ControllerState::PlayerTurn;
        }

        true
    }

    /// Legal destinations of the piece on `square`, also emitted through the
    /// `on_legal_mask` sink.
    pub fn request_legal_mask(&mut self, square: u8) -> u64 {
        let mask = match (&self.position, square) {
            (Some(pos), 0..=63) => {
                let mut list = MoveList::new();
                generate_legal_moves(pos, &mut list, false);

                let mut mask = 0u64;
                for m in list.iter() {
                    if m.from.0 == square {
                        mask |= 1u64 << m.to.0;
                    }
                }
                mask
            }
            _ => 0,
        };

        if let Some(cb) = self.on_legal_mask.as_mut() {
            cb(square, mask);
        }

        mask
    }

    pub fn set_engine_limits(&mut self, limits: EngineLimits) {
        self.engine_limits = limits;
    }

    pub fn set_engine_side(&mut self, side: Color, enabled: bool) {
        let player = if enabled { PlayerType::Engine } else { PlayerType::Human };
        match side {
            Color::White => self.players.white = player,
            Color::Black => self.players.black = player,
        }
    }

    /// Cooperative: the running search sees the flag at its next node.
    pub fn stop_search(&mut self) {
        self.stop_flag.store(true, AtomicOrdering::Relaxed);
    }

    pub fn get_position_string(&self) -> String {
        self.position
            .as_ref()
            .map(Position::board_string)
            .unwrap_or_default()
    }

    pub fn get_result(&self) -> GameResult {
        self.result
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Snapshot code for rendering: 0 empty, 1..6 White P,N,B,R,Q,K,
    /// 7..12 the same for Black.
    pub fn piece_code_at(&self, square: u8) -> u8 {
        let Some(pos) = self.position.as_ref() else {
            return 0;
        };
        if square > 63 {
            return 0;
        }

        match pos.board.piece_at(Square(square)) {
            None => 0,
            Some((color, piece)) => {
                let base = piece as u8 + 1;
                if color == Color::White { base } else { base + 6 }
            }
        }
    }

    // ---------- Callback registration ----------

    pub fn set_on_position(&mut self, cb: OnPosition) {
        self.on_position = Some(cb);
    }
    pub fn set_on_move(&mut self, cb: OnMove) {
        self.on_move = Some(cb);
    }
    pub fn set_on_search_info(&mut self, cb: OnSearchInfo) {
        self.on_search_info = Some(cb);
    }
    pub fn set_on_best_move(&mut self, cb: OnBestMove) {
        self.on_best_move = Some(cb);
    }
    pub fn set_on_game_over(&mut self, cb: OnGameOver) {
        self.on_game_over = Some(cb);
    }
    pub fn set_on_legal_mask(&mut self, cb: OnLegalMask) {
        self.on_legal_mask = Some(cb);
    }

    // ---------- Internals ----------

    fn is_engine_to_move(&self) -> bool {
        let Some(pos) = self.position.as_ref() else {
            return false;
        };
        match pos.side_to_move() {
            Color::White => self.players.white == PlayerType::Engine,
            Color::Black => self.players.black == PlayerType::Engine,
        }
    }

    fn emit_position(&mut self) {
        if let (Some(cb), Some(pos)) = (self.on_position.as_mut(), self.position.as_ref()) {
            cb(pos);
        }
    }

    fn apply_and_notify(&mut self, m: &Move) {
        let (halfmove_index, eval_cp, result) = {
            let Some(pos) = self.position.as_mut() else {
                return;
            };
            pos.apply_move(m);
            (pos.state.move_counter - 1, evaluate(pos), detect_result(pos))
        };

        if let Some(cb) = self.on_move.as_mut() {
            cb(m, halfmove_index, eval_cp);
        }
        self.emit_position();

        self.result = result;
        if result != GameResult::Ongoing {
            self.state = ControllerState::GameOver;
            if let Some(cb) = self.on_game_over.as_mut() {
                cb(result, result_reason(result));
            }
        }
    }

    /// Synchronous engine turn: search, report, apply the best move, detect
    /// the terminal state, hand the turn back.
    fn enter_engine_thinking(&mut self) {
        if self.position.is_none() {
            return;
        }
        self.state = ControllerState::EngineThinking;

        self.stop_flag.store(false, AtomicOrdering::Relaxed);
        self.engine.set_stop_flag(Arc::clone(&self.stop_flag));

        let mut limits = SearchLimits::default();
        if self.engine_limits.max_depth > 0 {
            limits.max_depth = self.engine_limits.max_depth;
        }
        if self.engine_limits.max_nodes > 0 {
            limits.nodes_limit = self.engine_limits.max_nodes;
        }

        let result = {
            let mut info = self.on_search_info.take();
            let mut adapter = |depth: i32, score: Score, pv: &PvLine| {
                if let Some(cb) = info.as_mut() {
                    cb(depth, score, &pv.to_uci_string());
                }
            };

            let result = match self.position.as_mut() {
                Some(pos) => self.engine.search(pos, &mut self.tt, limits, Some(&mut adapter)),
                None => SearchResult::default(),
            };

            self.on_search_info = info;
            result
        };

        if let Some(best) = result.best_move {
            if let Some(cb) = self.on_best_move.as_mut() {
                cb(&best, &result.pv.to_uci_string());
            }

            self.apply_and_notify(&best);

            if self.result != GameResult::Ongoing {
                return;
            }
        }

        self.state = ControllerState::PlayerTurn;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::defs::StartPosition;

    fn humans() -> Players {
        Players { white: PlayerType::Human, black: PlayerType::Human }
    }

    #[test]
    fn new_game_starts_from_the_initial_board() {
        let mut gc = GameController::new(1);
        gc.new_game(humans(), TimeControl::default());

        assert_eq!(gc.get_position_string(), StartPosition::BOARD_STRING);
        assert_eq!(gc.get_result(), GameResult::Ongoing);
        assert_eq!(gc.state(), ControllerState::PlayerTurn);

        let pos = gc.position().unwrap();
        assert_eq!(pos.side_to_move(), Color::White);

        let mut list = MoveList::new();
        assert_eq!(generate_legal_moves(pos, &mut list, false), 20);
    }

    #[test]
    fn user_move_e2e4_sets_the_ep_target() {
        let mut gc = GameController::new(1);
        gc.new_game(humans(), TimeControl::default());

        assert!(gc.make_user_move(12, 28, 0));
        let pos = gc.position().unwrap();
        assert_eq!(pos.state.en_passant_square, Some(Square(20)));
        assert_eq!(pos.side_to_move(), Color::Black);
    }

    #[test]
    fn illegal_user_moves_are_rejected() {
        let mut gc = GameController::new(1);
        gc.new_game(humans(), TimeControl::default());

        let before = gc.get_position_string();
        assert!(!gc.make_user_move(12, 36, 0)); // e2e5
        assert!(!gc.make_user_move(0, 16, 0));  // a1a3 through own pawn
        assert_eq!(gc.get_position_string(), before);
    }

    #[test]
    fn promotion_requires_an_explicit_code() {
        let mut gc = GameController::new(1);
        gc.load_position("8/4P3/8/8/8/k7/8/4K3", humans(), TimeControl::default())
            .unwrap();

        assert!(!gc.make_user_move(52, 60, 0), "missing promotion code must fail");
        assert!(gc.make_user_move(52, 60, 1));
        assert_eq!(gc.piece_code_at(60), 5, "a white queen must appear on e8");
    }

    #[test]
    fn load_position_keeps_the_old_state_on_bad_input() {
        let mut gc = GameController::new(1);
        gc.new_game(humans(), TimeControl::default());

        assert!(gc.load_position("not/a/board", humans(), TimeControl::default()).is_err());
        assert_eq!(gc.get_position_string(), StartPosition::BOARD_STRING);
    }

    #[test]
    fn legal_mask_matches_pawn_moves() {
        let mut gc = GameController::new(1);
        gc.new_game(humans(), TimeControl::default());

        // e2 pawn: e3 and e4.
        let mask = gc.request_legal_mask(12);
        assert_eq!(mask, (1u64 << 20) | (1u64 << 28));
    }

    #[test]
    fn engine_answers_with_a_legal_move() {
        let mut gc = GameController::new(1);
        gc.set_engine_limits(EngineLimits { max_depth: 3, max_time_ms: 0, max_nodes: 0 });
        gc.new_game(Players { white: PlayerType::Human, black: PlayerType::Engine },
                    TimeControl::default());

        assert!(gc.make_user_move(12, 28, 0));

        // The engine replied synchronously; it is White's turn again.
        let pos = gc.position().unwrap();
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.state.move_counter, 2);
        assert_eq!(gc.state(), ControllerState::PlayerTurn);
    }

    #[test]
    fn fifty_move_and_repetition_draws_are_reported() {
        // Two bare kings plus rooks shuffling: play 4 reversible king moves
        // to force the same position three times.
        let mut gc = GameController::new(1);
        gc.load_position("4k3/8/8/8/8/8/8/4K2R", humans(), TimeControl::default())
            .unwrap();

        // Shuffle the kings until the same position has come up three
        // times (castling-right loss keeps the very first cycle distinct).
        let cycle = [(4u8, 3u8), (60, 59), (3, 4), (59, 60)];
        'outer: for _ in 0..3 {
            for &(f, t) in &cycle {
                assert!(gc.make_user_move(f, t, 0));
                if gc.get_result() != GameResult::Ongoing {
                    break 'outer;
                }
            }
        }

        assert_eq!(gc.get_result(), GameResult::DrawRepetition);
        assert_eq!(gc.state(), ControllerState::GameOver);
        assert!(!gc.make_user_move(4, 3, 0), "no moves after game over");
    }

    #[test]
    fn insufficient_material_is_detected() {
        let mut gc = GameController::new(1);
        gc.load_position("4k3/8/8/8/8/8/4P3/4K3", humans(), TimeControl::default())
            .unwrap();

        // Kings plus one pawn is not insufficient.
        assert_eq!(gc.get_result(), GameResult::Ongoing);

        let bare = Position::from_board_string("4k3/8/8/8/8/8/8/4K3",
                                               None, false, false, false, false, 0)
            .unwrap();
        assert!(super::is_insufficient_material(&bare));

        let minor = Position::from_board_string("4k3/8/8/8/8/8/8/2B1K3",
                                                None, false, false, false, false, 0)
            .unwrap();
        assert!(super::is_insufficient_material(&minor));

        let two_minors = Position::from_board_string("2n1k3/8/8/8/8/8/8/2B1K3",
                                                     None, false, false, false, false, 0)
            .unwrap();
        assert!(!super::is_insufficient_material(&two_minors));
    }
}
