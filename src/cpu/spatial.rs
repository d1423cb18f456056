// spatial hash grid: cells hashed into one slot per particle, sorted by key, offsets per key
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

const HASH_K1: u32 = 15823;
const HASH_K2: u32 = 9737333;

/// Neighbourhood scan order. The GPU kernels walk the cells in the same order so that
/// density sums are accumulated identically.
pub const CELL_OFFSETS: [IVec2; 9] = [
    IVec2::new(-1, 1),
    IVec2::new(0, 1),
    IVec2::new(1, 1),
    IVec2::new(-1, 0),
    IVec2::new(0, 0),
    IVec2::new(1, 0),
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
];

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct SpatialEntry {
    pub index: u32,
    pub hash: u32,
    pub key: u32,
}

#[inline]
pub fn cell_of(pos: Vec2, h: f32) -> IVec2 {
    (pos / h).floor().as_ivec2()
}

// the wraparound is part of the hash, do not widen
#[inline]
pub fn hash_cell(cell: IVec2) -> u32 {
    let a = (cell.x as u32).wrapping_mul(HASH_K1);
    let b = (cell.y as u32).wrapping_mul(HASH_K2);
    a.wrapping_add(b)
}

#[inline]
pub fn key_from_hash(hash: u32, table_size: u32) -> u32 {
    hash % table_size
}

pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// `(stage_index, step_index)` pairs of the bitonic network for `n` entries, in the order
/// they must run. Every pair is one barrier-separated pass.
pub fn bitonic_schedule(n: usize) -> impl Iterator<Item = (u32, u32)> {
    let num_stages = next_power_of_two(n).trailing_zeros();
    (0..num_stages).flat_map(|stage| (0..=stage).map(move |step| (stage, step)))
}

/// Number of comparators in each pass of the network.
pub fn comparator_count(n: usize) -> usize {
    next_power_of_two(n) / 2
}

/// One comparator of the bitonic network.
///
/// `global_index` ranges over `0..comparator_count(n)`. The pair it compares lies inside a
/// block of `2 << (stage_index - step_index)` entries, so running the comparators of
/// different blocks concurrently never touches the same slot. Pairs reaching past the end of
/// `entries` are skipped, which sorts arrays that are not a power of two long.
pub fn compare_and_swap(
    entries: &mut [SpatialEntry],
    stage_index: u32,
    step_index: u32,
    global_index: usize,
) {
    let group_width = 1usize << (stage_index - step_index);
    let group_height = 2 * group_width - 1;
    let h = global_index & (group_width - 1);
    let left = h + (group_height + 1) * (global_index / group_width);
    let right_step = if step_index == 0 {
        group_height - 2 * h
    } else {
        (group_height + 1) / 2
    };
    let right = left + right_step;

    if right >= entries.len() {
        return;
    }
    if entries[left].key > entries[right].key {
        entries.swap(left, right);
    }
}

/// Width of the independent comparator blocks in a pass.
#[inline]
pub fn block_len(stage_index: u32, step_index: u32) -> usize {
    2usize << (stage_index - step_index)
}

/// Runs every comparator of one pass over a single block (or the trailing partial block).
pub fn sort_block(block: &mut [SpatialEntry], stage_index: u32, step_index: u32) {
    let group_width = block_len(stage_index, step_index) / 2;
    for local in 0..group_width {
        compare_and_swap(block, stage_index, step_index, local);
    }
}

/// Sequential bitonic sort by key.
pub fn bitonic_sort(entries: &mut [SpatialEntry]) {
    for (stage, step) in bitonic_schedule(entries.len()) {
        for block in entries.chunks_mut(block_len(stage, step)) {
            sort_block(block, stage, step);
        }
    }
}

/// Hashed bucket table over the particles' predicted positions.
#[derive(Clone, Debug, Default)]
pub struct SpatialHash {
    pub entries: Vec<SpatialEntry>,
    pub offsets: Vec<u32>,
}

impl SpatialHash {
    pub fn with_len(n: usize) -> Self {
        Self {
            entries: vec![SpatialEntry::default(); n],
            offsets: vec![n as u32; n],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resize(&mut self, n: usize) {
        self.entries.resize(n, SpatialEntry::default());
        self.offsets.resize(n, n as u32);
    }

    /// Builds the unsorted entry for a single particle.
    #[inline]
    pub fn entry_for(index: usize, pos: Vec2, h: f32, table_size: u32) -> SpatialEntry {
        let hash = hash_cell(cell_of(pos, h));
        SpatialEntry {
            index: index as u32,
            hash,
            key: key_from_hash(hash, table_size),
        }
    }

    /// Resets every offset slot to the sentinel and rebuilds the entries from `predicted`.
    pub fn update_entries(&mut self, predicted: &[Vec2], h: f32) {
        let n = predicted.len();
        self.resize(n);
        let sentinel = n as u32;
        self.offsets.fill(sentinel);
        for (i, (entry, &pos)) in self.entries.iter_mut().zip(predicted).enumerate() {
            *entry = Self::entry_for(i, pos, h, sentinel);
        }
    }

    pub fn sort(&mut self) {
        bitonic_sort(&mut self.entries);
    }

    /// Records the first sorted index of every key. Slots without entries keep the sentinel
    /// written by [`SpatialHash::update_entries`].
    pub fn calculate_offsets(&mut self) {
        for i in 0..self.entries.len() {
            let key = self.entries[i].key;
            if i == 0 || self.entries[i - 1].key != key {
                self.offsets[key as usize] = i as u32;
            }
        }
    }

    /// Hash, sort and offsets in one go.
    pub fn rebuild(&mut self, predicted: &[Vec2], h: f32) {
        self.update_entries(predicted, h);
        self.sort();
        self.calculate_offsets();
    }

    /// Indices of the particles hashed into the nine cells around `pos`.
    ///
    /// Candidates may still lie outside the smoothing radius; callers compare squared
    /// distances before doing anything else with them.
    pub fn candidates(&self, pos: Vec2, h: f32) -> Candidates<'_> {
        Candidates {
            table: self,
            origin: cell_of(pos, h),
            cell: 0,
            hash: 0,
            key: 0,
            cursor: self.entries.len(),
        }
    }
}

/// Iterator returned by [`SpatialHash::candidates`].
pub struct Candidates<'a> {
    table: &'a SpatialHash,
    origin: IVec2,
    cell: usize,
    hash: u32,
    key: u32,
    cursor: usize,
}

impl Iterator for Candidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let entries = &self.table.entries;
        let n = entries.len();
        loop {
            if self.cursor < n {
                let entry = entries[self.cursor];
                if entry.key == self.key {
                    self.cursor += 1;
                    if entry.hash == self.hash {
                        return Some(entry.index as usize);
                    }
                    continue;
                }
            }

            // current bucket exhausted, move on to the next cell
            if self.cell == CELL_OFFSETS.len() || n == 0 {
                return None;
            }
            self.hash = hash_cell(self.origin + CELL_OFFSETS[self.cell]);
            self.key = key_from_hash(self.hash, n as u32);
            self.cursor = self.table.offsets[self.key as usize] as usize;
            self.cell += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries_with_keys(keys: &[u32]) -> Vec<SpatialEntry> {
        keys.iter()
            .enumerate()
            .map(|(i, &key)| SpatialEntry { index: i as u32, hash: key, key })
            .collect()
    }

    fn pseudo_random_keys(n: usize, modulo: u32) -> Vec<u32> {
        // xorshift, good enough to shuffle
        let mut x = 0x9E37_79B9u32;
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x % modulo
            })
            .collect()
    }

    #[test]
    fn hash_wraps_for_negative_cells() {
        let h = hash_cell(IVec2::new(-1, -1));
        let expected = (u32::MAX).wrapping_mul(15823).wrapping_add(u32::MAX.wrapping_mul(9737333));
        assert_eq!(h, expected);
        assert_eq!(hash_cell(IVec2::new(2, 3)), 2 * 15823 + 3 * 9737333);
    }

    #[test]
    fn cell_floors_towards_negative_infinity() {
        assert_eq!(cell_of(Vec2::new(-0.1, 0.1), 0.5), IVec2::new(-1, 0));
        assert_eq!(cell_of(Vec2::new(1.0, 0.99), 0.5), IVec2::new(2, 1));
    }

    #[test]
    fn schedule_has_triangular_length() {
        assert_eq!(bitonic_schedule(1).count(), 0);
        assert_eq!(bitonic_schedule(2).count(), 1);
        assert_eq!(bitonic_schedule(8).count(), 6);
        assert_eq!(bitonic_schedule(9).count(), 10);
    }

    #[test]
    fn bitonic_sorts_any_length() {
        for n in [1usize, 2, 3, 5, 7, 8, 16, 31, 100, 257, 1024, 1500] {
            let keys = pseudo_random_keys(n, (n as u32).max(2));
            let mut entries = entries_with_keys(&keys);
            bitonic_sort(&mut entries);

            assert!(entries.windows(2).all(|w| w[0].key <= w[1].key), "n = {n} not sorted");

            // permutation check: every original index is still there once
            let mut seen = vec![false; n];
            for e in &entries {
                assert!(!seen[e.index as usize]);
                seen[e.index as usize] = true;
                assert_eq!(keys[e.index as usize], e.key);
            }
        }
    }

    #[test]
    fn offsets_point_at_first_of_each_key() {
        let predicted: Vec<Vec2> = (0..37)
            .map(|i| Vec2::new((i % 7) as f32 * 0.3, (i / 7) as f32 * 0.25))
            .collect();
        let mut table = SpatialHash::default();
        table.rebuild(&predicted, 0.5);

        let n = predicted.len() as u32;
        for key in 0..n {
            let first = table.entries.iter().position(|e| e.key == key);
            match first {
                Some(i) => assert_eq!(table.offsets[key as usize], i as u32),
                None => assert_eq!(table.offsets[key as usize], n),
            }
        }
    }

    #[test]
    fn stale_offsets_are_reset() {
        let mut table = SpatialHash::default();
        table.rebuild(&[Vec2::ZERO, Vec2::new(5.0, 5.0), Vec2::new(9.0, 1.0)], 1.0);
        table.rebuild(&[Vec2::ZERO, Vec2::new(0.1, 0.1), Vec2::new(0.2, 0.2)], 1.0);

        let used: Vec<u32> = table.entries.iter().map(|e| e.key).collect();
        for key in 0..3u32 {
            if !used.contains(&key) {
                assert_eq!(table.offsets[key as usize], 3);
            }
        }
    }

    #[test]
    fn every_particle_finds_itself_once() {
        let h = 0.4;
        let predicted: Vec<Vec2> = pseudo_random_keys(200, 1000)
            .chunks(2)
            .map(|c| Vec2::new(c[0] as f32 * 0.01 - 3.0, c[1] as f32 * 0.007))
            .collect();
        let mut table = SpatialHash::default();
        table.rebuild(&predicted, h);

        for (i, &pos) in predicted.iter().enumerate() {
            let own = SpatialHash::entry_for(i, pos, h, predicted.len() as u32);
            let start = table.offsets[own.key as usize] as usize;
            let hits = table.entries[start..]
                .iter()
                .take_while(|e| e.key == own.key)
                .filter(|e| e.index as usize == i)
                .count();
            assert_eq!(hits, 1, "particle {i}");
        }
    }

    #[test]
    fn candidates_cover_brute_force_neighbours() {
        let h = 0.3;
        let predicted: Vec<Vec2> = pseudo_random_keys(300, 500)
            .chunks(2)
            .map(|c| Vec2::new(c[0] as f32 * 0.006, c[1] as f32 * 0.004))
            .collect();
        let mut table = SpatialHash::default();
        table.rebuild(&predicted, h);

        for &pos in &predicted {
            let mut found: Vec<usize> = table
                .candidates(pos, h)
                .filter(|&j| (predicted[j] - pos).length_squared() <= h * h)
                .collect();
            found.sort_unstable();
            found.dedup();

            let expected: Vec<usize> = (0..predicted.len())
                .filter(|&j| (predicted[j] - pos).length_squared() <= h * h)
                .collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn candidates_on_empty_table() {
        let table = SpatialHash::default();
        assert_eq!(table.candidates(Vec2::ZERO, 1.0).count(), 0);
    }
}
