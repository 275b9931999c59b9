//! Fleet placement and hit resolution.
//!
//! The turn arbiter owns one board per player and treats it as a black box
//! behind [`BoardModel`]. [`StandardBoard`] is the classic 10×10 grid with a
//! five-ship fleet.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const GRID_SIZE: u8 = 10;

/// Ship classes of the standard fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShipKind {
    Carrier,
    Battleship,
    Destroyer,
    Submarine,
    PatrolBoat,
}

impl ShipKind {
    pub const FLEET: [ShipKind; 5] = [
        ShipKind::Carrier,
        ShipKind::Battleship,
        ShipKind::Destroyer,
        ShipKind::Submarine,
        ShipKind::PatrolBoat,
    ];

    pub fn length(self) -> u8 {
        match self {
            ShipKind::Carrier => 5,
            ShipKind::Battleship => 4,
            ShipKind::Destroyer | ShipKind::Submarine => 3,
            ShipKind::PatrolBoat => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Grid cell. `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u8,
}

impl Position {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

/// Outcome of a shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackResult {
    Miss,
    Hit,
    Sunk(ShipKind),
}

/// Wire form of [`AttackResult`] without the ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotOutcome {
    Miss,
    Hit,
    Sunk,
}

impl AttackResult {
    pub fn outcome(self) -> ShotOutcome {
        match self {
            AttackResult::Miss => ShotOutcome::Miss,
            AttackResult::Hit => ShotOutcome::Hit,
            AttackResult::Sunk(_) => ShotOutcome::Sunk,
        }
    }

    pub fn sunk_ship(self) -> Option<ShipKind> {
        match self {
            AttackResult::Sunk(kind) => Some(kind),
            _ => None,
        }
    }
}

/// One player's board.
pub trait BoardModel: Send + Sync {
    /// Place (or move) a ship. Returns false if it would leave the grid or
    /// overlap another ship.
    fn place(&mut self, ship: ShipKind, origin: Position, orientation: Orientation) -> bool;

    /// Fire at a cell. A repeated shot reports `Miss` and changes nothing.
    fn attack(&mut self, target: Position) -> AttackResult;

    fn contains(&self, pos: Position) -> bool;

    /// True once at least one ship is placed and every placed ship is sunk.
    fn all_sunk(&self) -> bool;

    fn fleet_complete(&self) -> bool;

    /// Copy of the current state, used to roll back an uncommitted shot.
    fn snapshot(&self) -> Box<dyn BoardModel>;
}

/// Produces a fresh board for each seat of a new game.
pub type BoardFactory = Arc<dyn Fn() -> Box<dyn BoardModel> + Send + Sync>;

pub fn standard_factory() -> BoardFactory {
    Arc::new(|| -> Box<dyn BoardModel> { Box::new(StandardBoard::new()) })
}

#[derive(Debug, Clone)]
struct PlacedShip {
    kind: ShipKind,
    cells: Vec<Position>,
    hits: HashSet<Position>,
}

impl PlacedShip {
    fn is_sunk(&self) -> bool {
        self.hits.len() == self.cells.len()
    }
}

/// Square grid with the standard fleet.
#[derive(Debug, Clone)]
pub struct StandardBoard {
    size: u8,
    ships: Vec<PlacedShip>,
    shots: HashSet<Position>,
}

impl StandardBoard {
    pub fn new() -> Self {
        Self::with_size(GRID_SIZE)
    }

    pub fn with_size(size: u8) -> Self {
        Self {
            size,
            ships: Vec::with_capacity(ShipKind::FLEET.len()),
            shots: HashSet::new(),
        }
    }

    fn cells_for(&self, ship: ShipKind, origin: Position, orientation: Orientation) -> Option<Vec<Position>> {
        (0..ship.length())
            .map(|i| {
                let (x, y) = match orientation {
                    Orientation::Horizontal => (origin.x.checked_add(i)?, origin.y),
                    Orientation::Vertical => (origin.x, origin.y.checked_add(i)?),
                };
                let pos = Position::new(x, y);
                self.contains(pos).then_some(pos)
            })
            .collect()
    }
}

impl Default for StandardBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardModel for StandardBoard {
    fn place(&mut self, ship: ShipKind, origin: Position, orientation: Orientation) -> bool {
        let Some(cells) = self.cells_for(ship, origin, orientation) else {
            return false;
        };

        let overlaps = self
            .ships
            .iter()
            .filter(|placed| placed.kind != ship)
            .any(|placed| placed.cells.iter().any(|c| cells.contains(c)));
        if overlaps {
            return false;
        }

        self.ships.retain(|placed| placed.kind != ship);
        self.ships.push(PlacedShip {
            kind: ship,
            cells,
            hits: HashSet::new(),
        });
        true
    }

    fn attack(&mut self, target: Position) -> AttackResult {
        if !self.contains(target) || !self.shots.insert(target) {
            return AttackResult::Miss;
        }

        match self.ships.iter_mut().find(|s| s.cells.contains(&target)) {
            Some(ship) => {
                ship.hits.insert(target);
                if ship.is_sunk() {
                    AttackResult::Sunk(ship.kind)
                } else {
                    AttackResult::Hit
                }
            }
            None => AttackResult::Miss,
        }
    }

    fn contains(&self, pos: Position) -> bool {
        pos.x < self.size && pos.y < self.size
    }

    fn all_sunk(&self) -> bool {
        !self.ships.is_empty() && self.ships.iter().all(PlacedShip::is_sunk)
    }

    fn fleet_complete(&self) -> bool {
        ShipKind::FLEET
            .iter()
            .all(|kind| self.ships.iter().any(|s| s.kind == *kind))
    }

    fn snapshot(&self) -> Box<dyn BoardModel> {
        Box::new(self.clone())
    }
}

/// Lay out the standard fleet on consecutive rows starting at the top-left.
pub fn place_standard_fleet(board: &mut dyn BoardModel) -> bool {
    ShipKind::FLEET
        .iter()
        .enumerate()
        .all(|(row, kind)| board.place(*kind, Position::new(0, row as u8), Orientation::Horizontal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_within_bounds() {
        let mut board = StandardBoard::new();
        assert!(board.place(ShipKind::Carrier, Position::new(5, 0), Orientation::Horizontal));
        assert!(!board.place(ShipKind::Battleship, Position::new(7, 0), Orientation::Horizontal));
        assert!(!board.place(ShipKind::Battleship, Position::new(0, 8), Orientation::Vertical));
        assert!(!board.place(ShipKind::PatrolBoat, Position::new(255, 0), Orientation::Horizontal));
    }

    #[test]
    fn test_place_rejects_overlap_and_allows_move() {
        let mut board = StandardBoard::new();
        assert!(board.place(ShipKind::Carrier, Position::new(0, 0), Orientation::Horizontal));
        assert!(!board.place(ShipKind::Destroyer, Position::new(2, 0), Orientation::Vertical));

        // Moving the carrier onto its own old cells is fine.
        assert!(board.place(ShipKind::Carrier, Position::new(1, 0), Orientation::Horizontal));
        assert!(board.place(ShipKind::Destroyer, Position::new(0, 0), Orientation::Vertical));
    }

    #[test]
    fn test_fleet_complete() {
        let mut board = StandardBoard::new();
        assert!(!board.fleet_complete());
        assert!(place_standard_fleet(&mut board));
        assert!(board.fleet_complete());
    }

    #[test]
    fn test_attack_hit_sunk_miss() {
        let mut board = StandardBoard::new();
        board.place(ShipKind::PatrolBoat, Position::new(3, 3), Orientation::Vertical);

        assert_eq!(board.attack(Position::new(0, 0)), AttackResult::Miss);
        assert_eq!(board.attack(Position::new(3, 3)), AttackResult::Hit);
        assert!(!board.all_sunk());
        assert_eq!(board.attack(Position::new(3, 4)), AttackResult::Sunk(ShipKind::PatrolBoat));
        assert!(board.all_sunk());

        // Repeat shot changes nothing.
        assert_eq!(board.attack(Position::new(3, 4)), AttackResult::Miss);
    }

    #[test]
    fn test_empty_board_not_sunk() {
        let board = StandardBoard::new();
        assert!(!board.all_sunk());
        assert!(!board.contains(Position::new(10, 0)));
        assert!(board.contains(Position::new(9, 9)));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut board = StandardBoard::new();
        board.place(ShipKind::PatrolBoat, Position::new(0, 0), Orientation::Horizontal);
        let before = board.snapshot();

        board.attack(Position::new(0, 0));
        board.attack(Position::new(1, 0));
        assert!(board.all_sunk());
        assert!(!before.all_sunk());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&ShipKind::PatrolBoat).unwrap(), "\"patrolBoat\"");
        assert_eq!(serde_json::to_string(&AttackResult::Sunk(ShipKind::Carrier).outcome()).unwrap(), "\"sunk\"");
        let o: Orientation = serde_json::from_str("\"vertical\"").unwrap();
        assert_eq!(o, Orientation::Vertical);
    }
}
