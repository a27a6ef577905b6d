//! A* pathfinding over the map grid

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::grid::{GridCell, GridGeometry};

/// Find a shortest 4-connected path from `start` to `goal`.
///
/// `blocked` holds every impassable cell for this query (static obstacles plus
/// cells occupied by other units). Returns `[start]` when already at the goal
/// and an empty path when the goal is out of bounds, blocked or unreachable.
/// Among equally short paths the one returned is unspecified.
pub fn find_path(
    geometry: &GridGeometry,
    start: GridCell,
    goal: GridCell,
    blocked: &HashSet<GridCell>,
) -> Vec<GridCell> {
    if start == goal {
        return vec![start];
    }
    if !geometry.in_bounds(goal) || blocked.contains(&goal) {
        return Vec::new();
    }

    // (f, insertion order, cell); the sequence number keeps ties deterministic
    let mut open: BinaryHeap<Reverse<(i32, u32, GridCell)>> = BinaryHeap::new();
    let mut g_score: HashMap<GridCell, i32> = HashMap::new();
    let mut came_from: HashMap<GridCell, GridCell> = HashMap::new();
    let mut closed: HashSet<GridCell> = HashSet::new();
    let mut seq = 0u32;

    g_score.insert(start, 0);
    open.push(Reverse((start.distance(&goal), seq, start)));

    while let Some(Reverse((_, _, current))) = open.pop() {
        if current == goal {
            return reconstruct(&came_from, current);
        }
        if !closed.insert(current) {
            continue;
        }

        let current_g = g_score.get(&current).copied().unwrap_or(i32::MAX);
        for neighbor in current.neighbors() {
            if !geometry.in_bounds(neighbor)
                || blocked.contains(&neighbor)
                || closed.contains(&neighbor)
            {
                continue;
            }

            let tentative = current_g + 1;
            if tentative < g_score.get(&neighbor).copied().unwrap_or(i32::MAX) {
                g_score.insert(neighbor, tentative);
                came_from.insert(neighbor, current);
                seq += 1;
                open.push(Reverse((tentative + neighbor.distance(&goal), seq, neighbor)));
            }
        }
    }

    Vec::new()
}

fn reconstruct(came_from: &HashMap<GridCell, GridCell>, goal: GridCell) -> Vec<GridCell> {
    let mut path = vec![goal];
    let mut node = goal;
    while let Some(prev) = came_from.get(&node) {
        path.push(*prev);
        node = *prev;
    }
    path.reverse();
    path
}
