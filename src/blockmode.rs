// Decode of the 11-bit block-mode field into weight-grid geometry,
// dual-plane flag and weight quantization, for both 2D and 3D blocks.

use crate::ise;
use crate::quant::Quant;

/// Geometry and quantization selected by one valid block mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockMode {
  pub weights_x: u32,
  pub weights_y: u32,
  pub weights_z: u32,
  pub dual_plane: bool,
  pub weight_quant: Quant,
  pub weight_bits: u32,
}

impl BlockMode {
  pub fn weight_count(&self) -> u32 {
    let per_plane = self.weights_x * self.weights_y * self.weights_z;
    if self.dual_plane {
      per_plane * 2
    } else {
      per_plane
    }
  }
}

// R=2..7 map to one of two quantization ranges depending on the H bit
const WEIGHT_QUANT_OF_R: [[Quant; 6]; 2] = [
  [Quant::Q2, Quant::Q3, Quant::Q4, Quant::Q5, Quant::Q6, Quant::Q8],
  [Quant::Q10, Quant::Q12, Quant::Q16, Quant::Q20, Quant::Q24, Quant::Q32],
];

fn weight_quant(r: u32, high_precision: bool) -> Option<Quant> {
  if r < 2 {
    return None;
  }
  Some(WEIGHT_QUANT_OF_R[high_precision as usize][(r - 2) as usize])
}

// Raw field decode, before any footprint validation. Returns the weight
// grid, dual-plane flag and quant, or None for reserved encodings.
fn decode_raw_2d(mode: u32) -> Option<(u32, u32, bool, Quant)> {
  let mut r = (mode >> 4) & 1;
  let mut h = (mode >> 9) & 1 != 0;
  let mut d = (mode >> 10) & 1 != 0;
  let a = (mode >> 5) & 3;
  let w;
  let t;

  if mode & 3 != 0 {
    r |= (mode & 3) << 1;
    let b = (mode >> 7) & 3;
    match (mode >> 2) & 3 {
      0 => {
        w = b + 4;
        t = a + 2;
      }
      1 => {
        w = b + 8;
        t = a + 2;
      }
      2 => {
        w = a + 2;
        t = b + 8;
      }
      _ => {
        let b = b & 1;
        if mode & 0x100 != 0 {
          w = b + 2;
          t = a + 2;
        } else {
          w = a + 2;
          t = b + 6;
        }
      }
    }
  } else {
    r |= ((mode >> 2) & 3) << 1;
    if (mode >> 2) & 3 == 0 {
      return None;
    }
    let b = (mode >> 9) & 3;
    match (mode >> 7) & 3 {
      0 => {
        w = 12;
        t = a + 2;
      }
      1 => {
        w = a + 2;
        t = 12;
      }
      2 => {
        w = a + 6;
        t = b + 6;
        d = false;
        h = false;
      }
      _ => match (mode >> 5) & 3 {
        0 => {
          w = 6;
          t = 10;
        }
        1 => {
          w = 10;
          t = 6;
        }
        _ => return None,
      },
    }
  }

  let quant = weight_quant(r, h)?;
  Some((w, t, d, quant))
}

fn decode_raw_3d(mode: u32) -> Option<(u32, u32, u32, bool, Quant)> {
  let mut r = (mode >> 4) & 1;
  let h = (mode >> 9) & 1 != 0;
  let mut d = (mode >> 10) & 1 != 0;
  let a = (mode >> 5) & 3;
  let w;
  let t;
  let s;
  let mut hq = h;

  if mode & 3 != 0 {
    r |= (mode & 3) << 1;
    let b = (mode >> 7) & 3;
    let c = (mode >> 2) & 3;
    w = a + 2;
    t = b + 2;
    s = c + 2;
  } else {
    r |= ((mode >> 2) & 3) << 1;
    if (mode >> 2) & 3 == 0 {
      return None;
    }
    match (mode >> 7) & 3 {
      3 => {
        // The last group keeps its D and H bits
        match (mode >> 5) & 3 {
          0 => {
            w = 6;
            t = 2;
            s = 2;
          }
          1 => {
            w = 2;
            t = 6;
            s = 2;
          }
          2 => {
            w = 2;
            t = 2;
            s = 6;
          }
          _ => return None,
        }
      }
      plane => {
        // B occupies the D and H bit positions here, so both are forced off
        let b = (mode >> 9) & 3;
        d = false;
        hq = false;
        match plane {
          0 => {
            w = 6;
            t = b + 2;
            s = a + 2;
          }
          1 => {
            w = a + 2;
            t = 6;
            s = b + 2;
          }
          _ => {
            w = a + 2;
            t = b + 2;
            s = 6;
          }
        }
      }
    }
  }

  let quant = weight_quant(r, hq)?;
  Some((w, t, s, d, quant))
}

/// Weight-stream budget imposed by the physical layout.
pub const MIN_WEIGHT_BITS: u32 = 24;
pub const MAX_WEIGHT_BITS: u32 = 96;
pub const MAX_WEIGHTS_PER_BLOCK: u32 = 64;

/// Decode `mode` against a block footprint; `None` for reserved encodings
/// and for grids the footprint cannot hold.
pub fn decode_block_mode(
  mode: u32,
  block_x: u32,
  block_y: u32,
  block_z: u32,
) -> Option<BlockMode> {
  assert!(mode < 2048);
  let (wx, wy, wz, dual, quant) = if block_z == 1 {
    let (w, t, d, q) = decode_raw_2d(mode)?;
    (w, t, 1, d, q)
  } else {
    decode_raw_3d(mode)?
  };

  if wx > block_x || wy > block_y || wz > block_z {
    return None;
  }

  let count = wx * wy * wz * if dual { 2 } else { 1 };
  if count > MAX_WEIGHTS_PER_BLOCK {
    return None;
  }

  let weight_bits = ise::bit_count(quant, count);
  if !(MIN_WEIGHT_BITS..=MAX_WEIGHT_BITS).contains(&weight_bits) {
    return None;
  }

  Some(BlockMode {
    weights_x: wx,
    weights_y: wy,
    weights_z: wz,
    dual_plane: dual,
    weight_quant: quant,
    weight_bits: weight_bits,
  })
}
