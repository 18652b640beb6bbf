// Per-footprint decode tables: every block mode pre-decoded, the infill
// table for each distinct weight grid, and the partition tables. Built
// once per footprint and memoized process-wide; reads after the initial
// fill take no lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::blockmode::{self, BlockMode};
use crate::decimation::{self, Decimation};
use crate::partition::PartitionTable;

/// One valid block mode with its infill table.
#[derive(Clone)]
pub struct ModeEntry {
  pub mode: BlockMode,
  pub decimation: Arc<Decimation>,
}

/// All precomputed tables for one block footprint.
pub struct BlockSizeInfo {
  pub block_x: u32,
  pub block_y: u32,
  pub block_z: u32,
  pub texel_count: u32,
  modes: Vec<Option<ModeEntry>>,
  /// Valid mode ids ordered by search preference: larger weight grids
  /// first, then higher weight quant, then fewer weight bits.
  sorted_modes: Vec<u16>,
  /// Partition tables for 2, 3 and 4 partitions.
  partitions: [PartitionTable; 3],
}

impl BlockSizeInfo {
  fn build(block_x: u32, block_y: u32, block_z: u32) -> Self {
    let mut decimations: HashMap<(u32, u32, u32), Arc<Decimation>> = HashMap::new();
    let mut modes: Vec<Option<ModeEntry>> = Vec::with_capacity(2048);

    for m in 0..2048u32 {
      let entry = blockmode::decode_block_mode(m, block_x, block_y, block_z).map(|bm| {
        let key = (bm.weights_x, bm.weights_y, bm.weights_z);
        let dec = decimations
          .entry(key)
          .or_insert_with(|| {
            Arc::new(decimation::build(
              block_x,
              block_y,
              block_z,
              bm.weights_x,
              bm.weights_y,
              bm.weights_z,
            ))
          })
          .clone();
        ModeEntry { mode: bm, decimation: dec }
      });
      modes.push(entry);
    }

    let mut sorted_modes: Vec<u16> =
      (0..2048u16).filter(|&m| modes[m as usize].is_some()).collect();
    sorted_modes.sort_by_key(|&m| {
      let bm = &modes[m as usize].as_ref().unwrap().mode;
      let grid = bm.weights_x * bm.weights_y * bm.weights_z;
      (
        std::cmp::Reverse(grid),
        std::cmp::Reverse(bm.weight_quant.index()),
        bm.weight_bits,
        m,
      )
    });

    let partitions = [
      PartitionTable::build(block_x, block_y, block_z, 2),
      PartitionTable::build(block_x, block_y, block_z, 3),
      PartitionTable::build(block_x, block_y, block_z, 4),
    ];

    log::debug!(
      "built block tables for {}x{}x{}: {} valid modes",
      block_x,
      block_y,
      block_z,
      sorted_modes.len()
    );

    BlockSizeInfo {
      block_x: block_x,
      block_y: block_y,
      block_z: block_z,
      texel_count: block_x * block_y * block_z,
      modes: modes,
      sorted_modes: sorted_modes,
      partitions: partitions,
    }
  }

  pub fn is_2d(&self) -> bool {
    self.block_z == 1
  }

  pub fn mode(&self, mode: u32) -> Option<&ModeEntry> {
    self.modes[mode as usize].as_ref()
  }

  pub fn sorted_modes(&self) -> &[u16] {
    &self.sorted_modes
  }

  pub fn partition_table(&self, partition_count: u32) -> &PartitionTable {
    assert!((2..=4).contains(&partition_count));
    &self.partitions[(partition_count - 2) as usize]
  }

  /// Partition assignment row; partition count 1 yields all-zero rows.
  pub fn partition_of(&self, partition_count: u32, seed: u32, texel: usize) -> u32 {
    if partition_count == 1 {
      0
    } else {
      self.partition_table(partition_count).row(seed)[texel] as u32
    }
  }
}

type Cache = RwLock<HashMap<(u32, u32, u32), Arc<BlockSizeInfo>>>;

fn cache() -> &'static Cache {
  static CACHE: OnceLock<Cache> = OnceLock::new();
  CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Fetch (building on first use) the tables for one footprint.
pub fn block_size_info(block_x: u32, block_y: u32, block_z: u32) -> Arc<BlockSizeInfo> {
  let key = (block_x, block_y, block_z);
  if let Some(info) = cache().read().get(&key) {
    return info.clone();
  }
  let mut guard = cache().write();
  // Double-checked: another thread may have filled the slot meanwhile
  guard
    .entry(key)
    .or_insert_with(|| Arc::new(BlockSizeInfo::build(block_x, block_y, block_z)))
    .clone()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_returns_shared_tables() {
    let a = block_size_info(4, 4, 1);
    let b = block_size_info(4, 4, 1);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.texel_count, 16);
  }

  #[test]
  fn sorted_modes_prefer_larger_grids() {
    let info = block_size_info(8, 8, 1);
    let first = &info.mode(info.sorted_modes()[0] as u32).unwrap().mode;
    let last =
      &info.mode(*info.sorted_modes().last().unwrap() as u32).unwrap().mode;
    let g = |bm: &BlockMode| bm.weights_x * bm.weights_y * bm.weights_z;
    assert!(g(first) >= g(last));
  }

  #[test]
  fn modes_share_decimation_tables() {
    let info = block_size_info(6, 6, 1);
    let mut by_grid: HashMap<(u32, u32), *const Decimation> = HashMap::new();
    for &m in info.sorted_modes() {
      let e = info.mode(m as u32).unwrap();
      let key = (e.mode.weights_x, e.mode.weights_y);
      let ptr = Arc::as_ptr(&e.decimation);
      if let Some(&existing) = by_grid.get(&key) {
        assert_eq!(existing, ptr);
      } else {
        by_grid.insert(key, ptr);
      }
    }
  }
}
