use itertools::iproduct;
use rand::Rng;
use rand::prelude::IndexedRandom;
use std::collections::HashSet;

/// A single board coordinate, addressed as (row, column).
/// This is the unit every piece of knowledge is expressed over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

/// Errors surfaced by the deduction engine.
///
/// An empty move pool is not represented here: move selection reports it as
/// `None` / `Turn::Exhausted`, a normal outcome rather than a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A coordinate outside the board was passed to an operation.
    #[error("cell ({row}, {col}) is outside the {height}x{width} board")]
    OutOfBounds {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },
    /// The accumulated observations contradict each other. The knowledge base
    /// is not repaired; the caller decides whether to abort or log.
    #[error("inconsistent knowledge: {0}")]
    InconsistentKnowledge(String),
}

/// A helper function yielding all valid neighbor coordinates of a cell on a
/// `height` x `width` board, excluding the cell itself.
/// It correctly handles board edges and corners.
pub fn neighbors(height: usize, width: usize, cell: Cell) -> impl Iterator<Item = Cell> {
    (-1..=1_isize).flat_map(move |dr| {
        (-1..=1_isize).filter_map(move |dc| {
            // Skip the cell itself (dr=0, dc=0)
            if dr == 0 && dc == 0 {
                return None;
            }

            let nr = cell.row as isize + dr;
            let nc = cell.col as isize + dc;

            if nr >= 0 && nr < height as isize && nc >= 0 && nc < width as isize {
                Some(Cell {
                    row: nr as usize,
                    col: nc as usize,
                })
            } else {
                None
            }
        })
    })
}

// --- Constraint (a single logical fact) ---

/// A single logical fact about the board: exactly `count` of `cells` are
/// mines.
///
/// A live constraint only refers to unresolved cells; once a cell is proven
/// safe or a mine it is folded away through one of the two reductions. A
/// constraint whose cell set has emptied carries no information and is
/// dropped from the working set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Constraint {
    cells: HashSet<Cell>,
    count: usize,
}

impl Constraint {
    /// Creates a constraint, rejecting counts that exceed the region size.
    pub fn new(
        cells: impl IntoIterator<Item = Cell>,
        count: usize,
    ) -> Result<Self, EngineError> {
        let cells: HashSet<Cell> = cells.into_iter().collect();
        if count > cells.len() {
            return Err(EngineError::InconsistentKnowledge(format!(
                "{} mines claimed among {} cells",
                count,
                cells.len()
            )));
        }
        Ok(Constraint { cells, count })
    }

    /// The unresolved cells this fact ranges over.
    pub fn cells(&self) -> &HashSet<Cell> {
        &self.cells
    }

    /// The exact number of mines among the remaining cells.
    pub fn count(&self) -> usize {
        self.count
    }

    /// A constraint with no cells left is spent.
    pub fn is_resolved(&self) -> bool {
        self.cells.is_empty()
    }

    /// Folds in the fact that `cell` is a mine: removes it and decrements the
    /// count. No-op when the cell is not part of this constraint.
    pub fn reduce_as_mine(&mut self, cell: Cell) -> Result<(), EngineError> {
        if self.cells.remove(&cell) {
            self.count = self.count.checked_sub(1).ok_or_else(|| {
                EngineError::InconsistentKnowledge(format!(
                    "cell ({}, {}) claimed as a mine inside a region proven mine-free",
                    cell.row, cell.col
                ))
            })?;
        }
        Ok(())
    }

    /// Folds in the fact that `cell` is safe: removes it, count unchanged.
    /// No-op when the cell is not part of this constraint.
    pub fn reduce_as_safe(&mut self, cell: Cell) -> Result<(), EngineError> {
        if self.cells.remove(&cell) && self.count > self.cells.len() {
            return Err(EngineError::InconsistentKnowledge(format!(
                "removing safe cell ({}, {}) leaves {} mines among {} cells",
                cell.row,
                cell.col,
                self.count,
                self.cells.len()
            )));
        }
        Ok(())
    }

    /// Every remaining cell must be a mine exactly when the count matches the
    /// region size. `None` means "nothing derivable", not an error.
    pub fn derive_mines(&self) -> Option<&HashSet<Cell>> {
        (!self.cells.is_empty() && self.count == self.cells.len()).then_some(&self.cells)
    }

    /// Every remaining cell must be safe exactly when no mine is left in the
    /// region.
    pub fn derive_safes(&self) -> Option<&HashSet<Cell>> {
        (!self.cells.is_empty() && self.count == 0).then_some(&self.cells)
    }
}

// --- Knowledge Base (the inference engine) ---

/// The accumulated knowledge of the agent: every move made, every cell proven
/// safe or proven a mine, and the working set of constraints still awaiting
/// resolution.
///
/// The three cell sets only ever grow, `known_safe` and `known_mine` stay
/// disjoint, and live constraints never mention a resolved cell. Feeding the
/// base observations that contradict each other yields
/// `EngineError::InconsistentKnowledge` at the point the contradiction is
/// derived.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeBase {
    height: usize,
    width: usize,
    moves_made: HashSet<Cell>,
    known_safe: HashSet<Cell>,
    known_mine: HashSet<Cell>,
    constraints: Vec<Constraint>,
}

impl KnowledgeBase {
    pub fn new(height: usize, width: usize) -> Self {
        if height == 0 || width == 0 {
            panic!("Board dimensions must be positive.");
        }
        KnowledgeBase {
            height,
            width,
            moves_made: HashSet::new(),
            known_safe: HashSet::new(),
            known_mine: HashSet::new(),
            constraints: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Cells already queried or played.
    pub fn moves_made(&self) -> &HashSet<Cell> {
        &self.moves_made
    }

    /// Cells proven not to be mines.
    pub fn known_safe(&self) -> &HashSet<Cell> {
        &self.known_safe
    }

    /// Cells proven to be mines.
    pub fn known_mine(&self) -> &HashSet<Cell> {
        &self.known_mine
    }

    /// The live constraint working set.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn check_bounds(&self, cell: Cell) -> Result<(), EngineError> {
        if cell.row < self.height && cell.col < self.width {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                row: cell.row,
                col: cell.col,
                height: self.height,
                width: self.width,
            })
        }
    }

    /// Records that `cell` is a mine and folds the fact into every active
    /// constraint. Re-asserting a known mine is a no-op; claiming a mine on a
    /// cell already proven safe is a contradiction.
    ///
    /// Returns whether the fact was new.
    pub fn mark_mine(&mut self, cell: Cell) -> Result<bool, EngineError> {
        self.check_bounds(cell)?;
        if self.known_mine.contains(&cell) {
            return Ok(false);
        }
        if self.known_safe.contains(&cell) {
            return Err(EngineError::InconsistentKnowledge(format!(
                "cell ({}, {}) was proven safe and is now claimed to be a mine",
                cell.row, cell.col
            )));
        }
        self.known_mine.insert(cell);
        for constraint in &mut self.constraints {
            constraint.reduce_as_mine(cell)?;
        }
        self.compact();
        Ok(true)
    }

    /// Records that `cell` is safe and folds the fact into every active
    /// constraint. The mirror image of [`Self::mark_mine`].
    pub fn mark_safe(&mut self, cell: Cell) -> Result<bool, EngineError> {
        self.check_bounds(cell)?;
        if self.known_safe.contains(&cell) {
            return Ok(false);
        }
        if self.known_mine.contains(&cell) {
            return Err(EngineError::InconsistentKnowledge(format!(
                "cell ({}, {}) was proven to be a mine and is now claimed safe",
                cell.row, cell.col
            )));
        }
        self.known_safe.insert(cell);
        for constraint in &mut self.constraints {
            constraint.reduce_as_safe(cell)?;
        }
        self.compact();
        Ok(true)
    }

    /// The only entry point driven by gameplay: the board reported `count`
    /// mines among the neighbors of a revealed (safe) cell.
    ///
    /// This function runs the whole update for a single observation:
    /// 1. Records the move and the implied safety of the observed cell.
    /// 2. Builds a constraint over the cell's in-bounds neighbors.
    /// 3. Folds already-resolved neighbors into the new constraint.
    /// 4. Applies any immediate derivation, otherwise stores the constraint.
    /// 5. Runs derivation to a fixed point.
    ///
    /// Observations must arrive in the order the moves were made.
    pub fn add_observation(&mut self, cell: Cell, count: usize) -> Result<(), EngineError> {
        self.check_bounds(cell)?;

        // --- 1. Record the Move ---
        self.moves_made.insert(cell);
        self.mark_safe(cell)?;

        // --- 2. Build the Neighbor Constraint ---
        let mut constraint =
            Constraint::new(neighbors(self.height, self.width, cell), count)?;

        // --- 3. Fold In Resolved Neighbors ---
        let snapshot: Vec<Cell> = constraint.cells().iter().copied().collect();
        for neighbor in snapshot {
            if self.known_mine.contains(&neighbor) {
                constraint.reduce_as_mine(neighbor)?;
            } else if self.known_safe.contains(&neighbor) || self.moves_made.contains(&neighbor)
            {
                constraint.reduce_as_safe(neighbor)?;
            }
        }

        // --- 4. Immediate Derivation, or Store ---
        if let Some(mines) = constraint.derive_mines() {
            let mines: Vec<Cell> = mines.iter().copied().collect();
            for mine in mines {
                self.mark_mine(mine)?;
            }
        } else if let Some(safes) = constraint.derive_safes() {
            let safes: Vec<Cell> = safes.iter().copied().collect();
            for safe in safes {
                self.mark_safe(safe)?;
            }
        } else if !constraint.is_resolved() && !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }

        // --- 5. Fixed Point ---
        self.close()
    }

    /// Repeatedly applies the two derivation rules until a full pass adds no
    /// mark and no constraint.
    ///
    /// Each pass snapshots its conclusions first and applies them afterwards,
    /// so the working set is never mutated while it is being scanned. The
    /// loop terminates: marks strictly shrink the unknown-cell universe and
    /// only constraints not currently present are ever added, over a finite
    /// space of (cell set, count) pairs.
    fn close(&mut self) -> Result<(), EngineError> {
        loop {
            let mut changed = false;

            // Pass (a): single-constraint derivations. A count of zero frees
            // the whole region; a count matching the region size condemns it.
            let mut safes: HashSet<Cell> = HashSet::new();
            let mut mines: HashSet<Cell> = HashSet::new();
            for constraint in &self.constraints {
                if let Some(derived) = constraint.derive_safes() {
                    safes.extend(derived.iter().copied());
                }
                if let Some(derived) = constraint.derive_mines() {
                    mines.extend(derived.iter().copied());
                }
            }
            if let Some(collision) = safes.intersection(&mines).next() {
                return Err(EngineError::InconsistentKnowledge(format!(
                    "cell ({}, {}) was derived as both mine and safe",
                    collision.row, collision.col
                )));
            }
            for cell in safes {
                changed |= self.mark_safe(cell)?;
            }
            for cell in mines {
                changed |= self.mark_mine(cell)?;
            }

            // Pass (b): subset elimination. If region B holds exactly B.count
            // mines and its subset A holds exactly A.count of them, the
            // remainder B - A holds exactly the difference.
            let mut derived: Vec<Constraint> = Vec::new();
            for (small, large) in iproduct!(&self.constraints, &self.constraints) {
                if std::ptr::eq(small, large)
                    || small.cells().is_empty()
                    || !small.cells().is_subset(large.cells())
                {
                    continue;
                }
                let count = large.count().checked_sub(small.count()).ok_or_else(|| {
                    EngineError::InconsistentKnowledge(format!(
                        "a region holding {} mines contains a sub-region holding {}",
                        large.count(),
                        small.count()
                    ))
                })?;
                let remainder: HashSet<Cell> = large
                    .cells()
                    .difference(small.cells())
                    .copied()
                    .collect();
                if remainder.is_empty() && count == 0 {
                    continue;
                }
                let inferred = Constraint::new(remainder, count)?;
                if !self.constraints.contains(&inferred) && !derived.contains(&inferred) {
                    derived.push(inferred);
                }
            }
            if !derived.is_empty() {
                changed = true;
                self.constraints.extend(derived);
            }

            if !changed {
                return Ok(());
            }
        }
    }

    /// Drops spent constraints and collapses duplicates left behind by
    /// reductions.
    fn compact(&mut self) {
        let mut kept: Vec<Constraint> = Vec::with_capacity(self.constraints.len());
        for constraint in self.constraints.drain(..) {
            if !constraint.is_resolved() && !kept.contains(&constraint) {
                kept.push(constraint);
            }
        }
        self.constraints = kept;
    }
}

// --- Agent (move selection and board interaction) ---

/// The outcome of a single agent turn against a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// A logically proven safe cell was revealed, with its neighbor count.
    Deduced(Cell, usize),
    /// No proven cell existed; a random unknown cell survived, with its count.
    Guessed(Cell, usize),
    /// The chosen cell was a mine.
    Exploded(Cell),
    /// Nothing left to play: every unrevealed cell is a flagged mine.
    Exhausted,
}

/// The player. Owns the knowledge base exclusively; every fact flows through
/// [`KnowledgeBase::add_observation`] and the two marking operations, never
/// by touching the constraint set directly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Agent {
    kb: KnowledgeBase,
}

impl Agent {
    pub fn new(height: usize, width: usize) -> Self {
        Agent {
            kb: KnowledgeBase::new(height, width),
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Feeds one observation straight into the knowledge base.
    pub fn observe(&mut self, cell: Cell, count: usize) -> Result<(), EngineError> {
        self.kb.add_observation(cell, count)
    }

    /// Returns a cell proven safe that has not been played yet, or `None`
    /// when no deduced move is available. The smallest coordinate is taken so
    /// the choice is reproducible.
    pub fn choose_safe_move(&self) -> Option<Cell> {
        self.kb
            .known_safe()
            .difference(self.kb.moves_made())
            .copied()
            .min()
    }

    /// Returns a uniformly random cell that has not been played and is not a
    /// known mine, or `None` when no such cell remains. The chosen cell may
    /// still turn out to be a mine; it is just not known to be one.
    pub fn choose_random_move(&self, rng: &mut impl Rng) -> Option<Cell> {
        let (height, width) = self.kb.dimensions();
        let candidates: Vec<Cell> = (0..height)
            .flat_map(|row| (0..width).map(move |col| Cell { row, col }))
            .filter(|cell| {
                !self.kb.moves_made().contains(cell) && !self.kb.known_mine().contains(cell)
            })
            .collect();
        candidates.choose(rng).copied()
    }

    /// Plays one turn: reveals a deduced safe cell if any exists, otherwise
    /// guesses. A guess that hits a mine ends the turn without feeding the
    /// knowledge base.
    pub fn play_turn<B: BoardEnvironment>(
        &mut self,
        board: &B,
        rng: &mut impl Rng,
    ) -> Result<Turn, EngineError> {
        let (deduced, choice) = match self.choose_safe_move() {
            Some(cell) => (true, Some(cell)),
            None => (false, self.choose_random_move(rng)),
        };
        let Some(cell) = choice else {
            return Ok(Turn::Exhausted);
        };

        if board.is_mine(cell)? {
            return Ok(Turn::Exploded(cell));
        }

        let count = board.nearby_mines(cell)?;
        self.kb.add_observation(cell, count)?;

        Ok(if deduced {
            Turn::Deduced(cell, count)
        } else {
            Turn::Guessed(cell, count)
        })
    }
}

// --- Board Environment (ground truth, opaque to the engine) ---

/// The game world as seen by the agent: fixed dimensions plus two queries.
///
/// `is_mine` is ground truth and is only consulted to settle the outcome of a
/// reveal; the knowledge base never sees it. `nearby_mines` is only asked for
/// cells that are not themselves mines.
pub trait BoardEnvironment {
    fn dimensions(&self) -> (usize, usize);
    fn is_mine(&self, cell: Cell) -> Result<bool, EngineError>;
    fn nearby_mines(&self, cell: Cell) -> Result<usize, EngineError>;
}

/// Ground-truth mine placement for a game.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MineField {
    height: usize,
    width: usize,
    mines: HashSet<Cell>,
}

impl MineField {
    /// Scatters `mine_count` mines uniformly over the board.
    pub fn random(
        height: usize,
        width: usize,
        mine_count: usize,
        rng: &mut impl Rng,
    ) -> Self {
        if mine_count >= height * width {
            panic!("Total mines must be less than the number of cells on the board.");
        }
        let mut mines = HashSet::new();
        while mines.len() != mine_count {
            mines.insert(Cell {
                row: rng.random_range(0..height),
                col: rng.random_range(0..width),
            });
        }
        MineField {
            height,
            width,
            mines,
        }
    }

    /// Builds a board with an explicit mine placement.
    pub fn with_mines(
        height: usize,
        width: usize,
        mines: impl IntoIterator<Item = Cell>,
    ) -> Self {
        let mines: HashSet<Cell> = mines.into_iter().collect();
        if mines.len() >= height * width {
            panic!("Total mines must be less than the number of cells on the board.");
        }
        for mine in &mines {
            if mine.row >= height || mine.col >= width {
                panic!("Mine placed outside the board.");
            }
        }
        MineField {
            height,
            width,
            mines,
        }
    }

    pub fn mine_count(&self) -> usize {
        self.mines.len()
    }

    fn check_bounds(&self, cell: Cell) -> Result<(), EngineError> {
        if cell.row < self.height && cell.col < self.width {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                row: cell.row,
                col: cell.col,
                height: self.height,
                width: self.width,
            })
        }
    }
}

impl BoardEnvironment for MineField {
    fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn is_mine(&self, cell: Cell) -> Result<bool, EngineError> {
        self.check_bounds(cell)?;
        Ok(self.mines.contains(&cell))
    }

    fn nearby_mines(&self, cell: Cell) -> Result<usize, EngineError> {
        self.check_bounds(cell)?;
        Ok(neighbors(self.height, self.width, cell)
            .filter(|neighbor| self.mines.contains(neighbor))
            .count())
    }
}

// --- Game (orchestrating a full session) ---

/// Tracks whether a game is still running or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GameState {
    Playing,
    Won,
    Lost,
}

/// A full session: the hidden board, the playing agent, and the outcome so
/// far.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Game {
    board: MineField,
    agent: Agent,
    state: GameState,
}

impl Game {
    /// Starts a game on a randomly mined board.
    pub fn new(height: usize, width: usize, mine_count: usize) -> Self {
        Self::with_board(MineField::random(height, width, mine_count, &mut rand::rng()))
    }

    /// Starts a game on a prepared board.
    pub fn with_board(board: MineField) -> Self {
        let (height, width) = board.dimensions();
        Game {
            board,
            agent: Agent::new(height, width),
            state: GameState::Playing,
        }
    }

    pub fn board(&self) -> &MineField {
        &self.board
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    /// Deserializes a session from bytes.
    pub fn deserialize(bts: &[u8]) -> Self {
        bcs::from_bytes(bts).unwrap()
    }

    /// Serializes the session to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        bcs::to_bytes(self).unwrap()
    }

    /// Plays one agent turn and settles the session state.
    pub fn step(&mut self, rng: &mut impl Rng) -> anyhow::Result<Turn> {
        if self.state != GameState::Playing {
            anyhow::bail!("game_ended");
        }

        let turn = self.agent.play_turn(&self.board, rng)?;
        match turn {
            Turn::Exploded(_) => self.state = GameState::Lost,
            // No playable cell left means every unrevealed cell is a flagged
            // mine, which is a cleared board.
            Turn::Exhausted => self.state = GameState::Won,
            Turn::Deduced(..) | Turn::Guessed(..) => {
                if self.is_cleared() {
                    self.state = GameState::Won;
                }
            }
        }
        Ok(turn)
    }

    /// Every cell that is not a mine has been revealed.
    fn is_cleared(&self) -> bool {
        let (height, width) = self.board.dimensions();
        self.agent.knowledge().moves_made().len() + self.board.mine_count() == height * width
    }
}
