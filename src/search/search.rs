// src/search/search.rs

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::game::defs::Piece;
use crate::game::movegen::{generate_legal_moves, in_check};
use crate::game::moves::{Flag, Move, MoveList};
use crate::game::position::Position;
use crate::search::eval::{evaluate_for_side_to_move, PIECE_VALUE_CP};
use crate::search::ordering::{self, HistoryTable};
use crate::search::see;
use crate::search::transpose::{
    is_mate_score, score_from_tt, score_to_tt, Bound, Score, TranspositionTable, TtMove,
    INFINITY, MATE_SCORE,
};

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub max_depth: i32,
    /// 0 = unlimited.
    pub nodes_limit: i64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self { max_depth: 64, nodes_limit: 0 }
    }
}

#[derive(Clone, Copy)]
pub struct PvLine {
    pub moves: [Move; 128],
    pub length: usize,
}

impl PvLine {
    pub fn new() -> Self {
        Self { moves: [Move::default(); 128], length: 0 }
    }

    pub fn as_slice(&self) -> &[Move] {
        &self.moves[..self.length]
    }

    pub fn to_uci_string(&self) -> String {
        self.as_slice()
            .iter()
            .map(Move::to_uci)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn set(&mut self, head: Move, tail: &PvLine) {
        self.moves[0] = head;
        self.length = 1;
        for i in 0..tail.length {
            if self.length >= self.moves.len() {
                break;
            }
            self.moves[self.length] = tail.moves[i];
            self.length += 1;
        }
    }
}

impl Default for PvLine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Default)]
pub struct SearchResult {
    pub best_move: Option<Move>,
    pub score_cp: Score,
    pub depth: i32,
    pub nodes: i64,
    pub pv: PvLine,
}

/// Iterative-deepening alpha-beta searcher. One instance per controller;
/// holds the per-search ordering state (cutoff keys, quiet history).
pub struct SearchEngine {
    nodes: i64,
    limits: SearchLimits,
    cutoff_keys: [[u16; 2]; 256],
    history: HistoryTable,
    stop_flag: Option<Arc<AtomicBool>>,
    /// First simple-move index eligible for late-move reduction.
    lmr_base_index: i32,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            nodes: 0,
            limits: SearchLimits::default(),
            cutoff_keys: [[0; 2]; 256],
            history: [[[0; 64]; 64]; 2],
            stop_flag: None,
            lmr_base_index: 4,
        }
    }

    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = Some(flag);
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.stop_flag
            .as_ref()
            .map_or(false, |f| f.load(AtomicOrdering::Relaxed))
    }

    /// Stop callback first, then the node budget; a tripped check means the
    /// node is not entered and the recursion unwinds with 0.
    #[inline]
    fn enter_node(&mut self) -> bool {
        if self.stopped() {
            return false;
        }
        if self.limits.nodes_limit > 0 && self.nodes >= self.limits.nodes_limit {
            return false;
        }
        self.nodes += 1;
        true
    }

    #[inline]
    fn budget_tripped(&self) -> bool {
        self.stopped()
            || (self.limits.nodes_limit > 0 && self.nodes >= self.limits.nodes_limit)
    }

    fn reset_cutoff_keys(&mut self) {
        for row in self.cutoff_keys.iter_mut() {
            row[0] = 0;
            row[1] = 0;
        }
    }

    /// Runs the iterative-deepening loop. `on_iteration` is reported once
    /// per completed depth with the score and principal variation.
    pub fn search(&mut self, root: &mut Position, tt: &mut TranspositionTable,
                  limits: SearchLimits,
                  mut on_iteration: Option<&mut dyn FnMut(i32, Score, &PvLine)>)
                  -> SearchResult {
        self.nodes = 0;
        self.limits = limits;
        self.reset_cutoff_keys();
        self.history = [[[0; 64]; 64]; 2];

        let mut result = SearchResult::default();
        let mut prev_score = 0;

        for depth in 1..=limits.max_depth.max(1) {
            // Aspiration window around the previous score, tighter as the
            // search deepens.
            let window = if depth <= 4 { 25 } else { 15 };
            let mut alpha = (prev_score - window).clamp(-INFINITY, INFINITY);
            let mut beta = (prev_score + window).clamp(-INFINITY, INFINITY);

            let mut pv = PvLine::new();
            let mut score = self.alpha_beta(root, tt, depth, alpha, beta, 0, &mut pv);
            if self.budget_tripped() {
                break;
            }

            // Aspiration fail: re-search with the full window.
            if score <= alpha || score >= beta {
                alpha = -INFINITY;
                beta = INFINITY;
                pv.length = 0;
                score = self.alpha_beta(root, tt, depth, alpha, beta, 0, &mut pv);
                if self.budget_tripped() {
                    break;
                }
            }

            prev_score = score;
            result.depth = depth;
            result.score_cp = score;
            result.pv = pv;
            result.nodes = self.nodes;
            if pv.length > 0 {
                result.best_move = Some(pv.moves[0]);
            }

            if let Some(cb) = on_iteration.as_deref_mut() {
                cb(depth, score, &result.pv);
            }

            if is_mate_score(score) {
                break;
            }
            if self.limits.nodes_limit > 0 && self.nodes >= self.limits.nodes_limit {
                break;
            }
        }

        result.nodes = self.nodes;
        result
    }

    fn quiescence(&mut self, pos: &mut Position, mut alpha: Score, beta: Score,
                  halfmove: i32, pv: &mut PvLine) -> Score {
        if !self.enter_node() {
            return 0;
        }

        let checked = in_check(&pos.board, pos.side_to_move());

        let mut stand_pat = 0;
        if !checked {
            stand_pat = evaluate_for_side_to_move(pos);
            if stand_pat >= beta {
                return stand_pat;
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
        }

        // In check every escape is searched; otherwise captures only.
        let mut list = MoveList::new();
        generate_legal_moves(pos, &mut list, !checked);

        // A check with no escape is mate even at the quiescence horizon.
        if checked && list.is_empty() {
            return -(MATE_SCORE - halfmove);
        }

        let qctx = ordering::Context {
            tt_move: None,
            cutoff1: 0,
            cutoff2: 0,
            history: &self.history,
            side_to_move: pos.side_to_move(),
        };

        let mut order: Vec<(Score, usize)> = (0..list.len)
            .map(|i| (ordering::score(&list.items[i], &pos.board, &qctx), i))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for &(_, idx) in &order {
            let m = list.items[idx];

            if !checked {
                let victim_value = if m.flag == Flag::EnPassant {
                    PIECE_VALUE_CP[Piece::Pawn as usize]
                } else {
                    m.captured.map_or(0, |(_, p)| PIECE_VALUE_CP[p as usize])
                };

                // Delta pruning: optimistic gain still cannot reach alpha.
                const DELTA: Score = 90;
                if stand_pat + victim_value + DELTA < alpha {
                    continue;
                }

                // Losing captures are not worth a recursion.
                if !m.is_promotion() && see::capture(&pos.board, &m) < 0 {
                    continue;
                }
            }

            let undo = pos.apply_move(&m);

            let mut child = PvLine::new();
            let score = -self.quiescence(pos, -beta, -alpha, halfmove + 1, &mut child);

            pos.undo_move(&m, &undo);

            if score >= beta {
                return score;
            }
            if score > alpha {
                alpha = score;
                pv.set(m, &child);
            }
        }

        alpha
    }

    fn alpha_beta(&mut self, pos: &mut Position, tt: &mut TranspositionTable,
                  depth: i32, mut alpha: Score, beta: Score, halfmove: i32,
                  pv: &mut PvLine) -> Score {
        if !self.enter_node() {
            return 0;
        }

        if pos.is_threefold_repetition() || pos.is_fifty_move_draw() {
            return 0;
        }

        if depth <= 0 {
            return self.quiescence(pos, alpha, beta, halfmove, pv);
        }

        let alpha_orig = alpha;

        let key = pos.hash();
        let (tt_move, tt_cut) = tt.probe(key, depth, alpha, beta);
        if let Some(tt_score) = tt_cut {
            return score_from_tt(tt_score, halfmove);
        }

        // Static evaluation feeds razoring and futility.
        let static_eval = evaluate_for_side_to_move(pos);

        // Razoring at the frontier.
        if depth == 1 && static_eval + 150 <= alpha {
            let mut qpv = PvLine::new();
            let q = self.quiescence(pos, alpha - 1, alpha, halfmove, &mut qpv);
            if q <= alpha {
                return q;
            }
        }

        let stm = pos.side_to_move();
        let checked = in_check(&pos.board, stm);

        // Null-move pruning; skipped in check and in pawn endings.
        if !checked && depth >= 3 {
            let board = &pos.board;
            let non_pawn = board.pieces(stm, Piece::Knight)
                | board.pieces(stm, Piece::Bishop)
                | board.pieces(stm, Piece::Rook)
                | board.pieces(stm, Piece::Queen);

            if !non_pawn.is_empty() {
                let null_undo = pos.apply_null_move();

                const R: i32 = 2;
                let mut dummy = PvLine::new();
                let nm_score =
                    -self.alpha_beta(pos, tt, depth - 1 - R, -beta, -beta + 1,
                                     halfmove + 1, &mut dummy);

                pos.undo_null_move(&null_undo);

                if nm_score >= beta {
                    return nm_score;
                }
            }
        }

        let mut list = MoveList::new();
        generate_legal_moves(pos, &mut list, false);

        if list.is_empty() {
            return if checked { -(MATE_SCORE - halfmove) } else { 0 };
        }

        let hm = (halfmove as usize).min(255);
        let ctx = ordering::Context {
            tt_move,
            cutoff1: self.cutoff_keys[hm][0],
            cutoff2: self.cutoff_keys[hm][1],
            history: &self.history,
            side_to_move: stm,
        };

        let mut order: Vec<(Score, usize)> = (0..list.len)
            .map(|i| (ordering::score(&list.items[i], &pos.board, &ctx), i))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut best_move: Option<Move> = None;
        let mut best_child = PvLine::new();
        let mut best_score = -INFINITY;

        let mut move_index = 0;
        for &(_, idx) in &order {
            move_index += 1;
            let m = list.items[idx];

            let is_promo = m.is_promotion();
            let is_capture = m.is_capture();
            let is_simple = m.is_simple();

            let is_tt = tt_move.as_ref().map_or(false, |t| t.matches(&m));
            let is_first = move_index == 1;

            // Pre-SEE for shallow capture pruning.
            let mut capture_see = 0;
            if is_capture && !is_promo && depth <= 2 {
                capture_see = see::capture(&pos.board, &m);
            }

            let undo = pos.apply_move(&m);

            // A check is only exempt from pruning while it is materially
            // safe to stand on the checking square.
            let gives_check = in_check(&pos.board, pos.side_to_move());
            let safe_check = gives_check && see::on(&pos.board, m.to, stm) >= 0;

            // Futility pruning of quiet moves near the frontier.
            if !safe_check && is_simple && depth <= 3 && !is_tt && !is_first {
                let margin = match depth {
                    1 => 100,
                    2 => 200,
                    _ => 300,
                };
                if static_eval + margin <= alpha {
                    pos.undo_move(&m, &undo);
                    continue;
                }
            }

            // Obviously losing captures at shallow depth.
            if !gives_check && is_capture && !is_promo && depth <= 2 && !is_tt && !is_first
                && capture_see < 0
            {
                pos.undo_move(&m, &undo);
                continue;
            }

            // Late move pruning of very late quiets.
            if !safe_check && is_simple && !is_tt && depth > 7
                && move_index >= self.lmr_base_index + 2
            {
                let quiet_limit = 2 + (depth * depth) / 2;
                if move_index > quiet_limit {
                    pos.undo_move(&m, &undo);
                    continue;
                }
            }

            let new_depth = depth - 1;
            let mut child = PvLine::new();

            let score;
            if is_simple && depth >= 3 && move_index >= self.lmr_base_index {
                // Late quiet move: reduced null-window probe first.
                let r = 1;
                let probe = -self.alpha_beta(pos, tt, new_depth - r, -alpha - 1, -alpha,
                                             halfmove + 1, &mut child);
                if probe > alpha {
                    score = -self.alpha_beta(pos, tt, new_depth, -beta, -alpha,
                                             halfmove + 1, &mut child);
                } else {
                    score = probe;
                }
            } else if is_first {
                score = -self.alpha_beta(pos, tt, new_depth, -beta, -alpha,
                                         halfmove + 1, &mut child);
            } else {
                let probe = -self.alpha_beta(pos, tt, new_depth, -alpha - 1, -alpha,
                                             halfmove + 1, &mut child);
                if probe > alpha && probe < beta {
                    score = -self.alpha_beta(pos, tt, new_depth, -beta, -alpha,
                                             halfmove + 1, &mut child);
                } else {
                    score = probe;
                }
            }

            pos.undo_move(&m, &undo);

            if score > best_score {
                best_score = score;
                best_child = child;
                best_move = Some(m);
            }

            if best_score >= beta {
                if is_simple {
                    let key16 = m.from_to_key();
                    if self.cutoff_keys[hm][0] != key16 {
                        self.cutoff_keys[hm][1] = self.cutoff_keys[hm][0];
                        self.cutoff_keys[hm][0] = key16;
                    }

                    let side = m.side as usize;
                    let (from, to) = (m.from.0 as usize, m.to.0 as usize);
                    self.history[side][from][to] += depth * depth;

                    if self.history[side][from][to] > 32_767 {
                        for side_row in self.history.iter_mut() {
                            for from_row in side_row.iter_mut() {
                                for cell in from_row.iter_mut() {
                                    *cell /= 2;
                                }
                            }
                        }
                    }
                }

                tt.store(key, depth, score_to_tt(best_score, halfmove), Bound::Lower,
                         best_move.as_ref().map(TtMove::of));
                return best_score;
            }

            if best_score > alpha {
                alpha = best_score;
                if let Some(bm) = best_move {
                    pv.set(bm, &best_child);
                }
            }
        }

        let bound = if best_score <= alpha_orig { Bound::Upper } else { Bound::Exact };
        tt.store(key, depth, score_to_tt(best_score, halfmove), bound,
                 best_move.as_ref().map(TtMove::of));

        best_score
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn run(board: &str, white_to_move: bool, depth: i32) -> (SearchResult, Position) {
        let mut pos = Position::from_board_string(board, None, false, false, false, false,
                                                  if white_to_move { 0 } else { 1 })
            .unwrap();
        let mut tt = TranspositionTable::new(8);
        let mut engine = SearchEngine::new();
        let result = engine.search(&mut pos, &mut tt,
                                   SearchLimits { max_depth: depth, nodes_limit: 0 }, None);
        (result, pos)
    }

    fn pv_is_legal(result: &SearchResult, pos: &Position) -> bool {
        let mut replay = pos.clone();
        for m in result.pv.as_slice() {
            let mut legal = MoveList::new();
            generate_legal_moves(&replay, &mut legal, false);
            if !legal.iter().any(|l| l == m) {
                return false;
            }
            replay.apply_move(m);
        }
        true
    }

    #[test]
    fn pv_replays_as_legal_moves() {
        let (result, pos) = run("r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R", true, 4);
        assert!(result.depth >= 1);
        assert!(result.pv.length >= 1);
        assert!(pv_is_legal(&result, &pos));
    }

    #[test]
    fn nodes_limit_is_respected() {
        let mut pos = Position::start();
        let mut tt = TranspositionTable::new(8);
        let mut engine = SearchEngine::new();

        let limits = SearchLimits { max_depth: 64, nodes_limit: 2_000 };
        let result = engine.search(&mut pos, &mut tt, limits, None);

        assert!(result.nodes <= limits.nodes_limit, "nodes {}", result.nodes);
        assert!(result.depth >= 1);
    }

    #[test]
    fn finds_mate_in_one() {
        // Back-rank: Ra8#.
        let (result, _) = run("6k1/5ppp/8/8/8/8/8/R3K3", true, 3);
        let best = result.best_move.expect("mate line must produce a move");
        assert_eq!(best.to_uci(), "a1a8");
        assert!(result.score_cp > MATE_SCORE - 100);
    }

    #[test]
    fn stop_flag_keeps_previous_iteration() {
        let mut pos = Position::start();
        let mut tt = TranspositionTable::new(8);
        let mut engine = SearchEngine::new();

        let flag = Arc::new(AtomicBool::new(true));
        engine.set_stop_flag(flag);

        let result = engine.search(&mut pos, &mut tt, SearchLimits::default(), None);
        assert!(result.best_move.is_none(), "stop before iteration 1 yields the sentinel");
        assert_eq!(result.nodes, 0);
    }

    #[test]
    fn search_leaves_the_position_untouched() {
        let mut pos = Position::start();
        let snapshot = pos.clone();
        let mut tt = TranspositionTable::new(8);
        let mut engine = SearchEngine::new();

        engine.search(&mut pos, &mut tt, SearchLimits { max_depth: 4, nodes_limit: 0 }, None);

        assert_eq!(pos.board, snapshot.board);
        assert_eq!(pos.state, snapshot.state);
        assert_eq!(pos.hash(), snapshot.hash());
    }
}
