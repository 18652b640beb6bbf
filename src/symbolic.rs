// Physical <-> symbolic block conversion.
//
// A symbolic block is the fully-validated decoded form: endpoints still as
// quantized color integers, weights already unquantized to 0..=64. All
// malformed encodings collapse into `SymbolicBlock::Error`, which paints
// as magenta; nothing here aborts an image operation.

use crate::bits::BlockBits;
use crate::blocksize::BlockSizeInfo;
use crate::endpoint;
use crate::ise;
use crate::quant::{self, Quant};

pub const PLANE2_WEIGHT_OFFSET: usize = 32;
pub const MAX_COLOR_VALUES: usize = 18;

/// Decoded contents of one non-constant block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPayload {
  pub block_mode: u32,
  pub partition_count: u32,
  pub partition_index: u32,
  pub color_formats: [u8; 4],
  /// Quantized color integers, `int_count()` of them.
  pub color_values: [u8; MAX_COLOR_VALUES],
  pub color_quant: Quant,
  /// Plane-2 component, or None for single-plane blocks.
  pub plane2_component: Option<u32>,
  /// Unquantized weights 0..=64 on the weight grid; plane 2 at +32.
  pub weights: [u8; 64],
  pub is_dual_plane: bool,
}

impl BlockPayload {
  pub fn int_count(&self) -> usize {
    (0..self.partition_count as usize)
      .map(|p| endpoint::format_int_count(self.color_formats[p] as u32) as usize)
      .sum()
  }

  /// Color integers of partition `p`, unquantized to 0..=255.
  pub fn unquantized_endpoint_ints(&self, p: usize) -> [i32; 8] {
    let unq = quant::color_unquant_table(self.color_quant);
    let mut start = 0;
    for q in 0..p {
      start += endpoint::format_int_count(self.color_formats[q] as u32) as usize;
    }
    let n = endpoint::format_int_count(self.color_formats[p] as u32) as usize;
    let mut out = [0i32; 8];
    for i in 0..n {
      out[i] = unq[self.color_values[start + i] as usize] as i32;
    }
    out
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolicBlock {
  /// Void-extent block with UNORM16 color.
  ConstantU16 { rgba: [u16; 4] },
  /// Void-extent block with FP16 color (HDR streams only).
  ConstantF16 { rgba: [u16; 4] },
  /// Malformed or reserved encoding; paints magenta.
  Error,
  Block(Box<BlockPayload>),
}

// Remaining bits for color data by partition count: 128 minus the 11-bit
// mode, the 2-bit count field and, for multi-partition blocks, the 10-bit
// partition index and 6-bit low CEM field.
const COLOR_BITS_AVAILABLE: [i32; 5] = [-1, 111, 99, 99, 99];

fn parse_void_extent(block: BlockBits, is_2d: bool) -> SymbolicBlock {
  if is_2d {
    // Reserved bits 10 and 11 must both be set
    if block.read_bits(2, 10) != 3 {
      return SymbolicBlock::Error;
    }
    let min_s = block.read_bits(13, 12);
    let max_s = block.read_bits(13, 25);
    let min_t = block.read_bits(13, 38);
    let max_t = block.read_bits(13, 51);
    let all_ones =
      min_s == 0x1FFF && max_s == 0x1FFF && min_t == 0x1FFF && max_t == 0x1FFF;
    if !all_ones && (min_s >= max_s || min_t >= max_t) {
      return SymbolicBlock::Error;
    }
  } else {
    let min_s = block.read_bits(9, 10);
    let max_s = block.read_bits(9, 19);
    let min_t = block.read_bits(9, 28);
    let max_t = block.read_bits(9, 37);
    let min_r = block.read_bits(9, 46);
    let max_r = block.read_bits(9, 55);
    let all_ones = min_s == 0x1FF
      && max_s == 0x1FF
      && min_t == 0x1FF
      && max_t == 0x1FF
      && min_r == 0x1FF
      && max_r == 0x1FF;
    if !all_ones && (min_s >= max_s || min_t >= max_t || min_r >= max_r) {
      return SymbolicBlock::Error;
    }
  }

  let rgba = [
    block.read_bits(16, 64) as u16,
    block.read_bits(16, 80) as u16,
    block.read_bits(16, 96) as u16,
    block.read_bits(16, 112) as u16,
  ];
  if block.read_bits(1, 9) != 0 {
    SymbolicBlock::ConstantF16 { rgba: rgba }
  } else {
    SymbolicBlock::ConstantU16 { rgba: rgba }
  }
}

/// Decode one 16-byte physical block.
pub fn physical_to_symbolic(bsi: &BlockSizeInfo, bytes: &[u8; 16]) -> SymbolicBlock {
  let block = BlockBits::from_bytes(bytes);
  let block_mode = block.read_bits(11, 0);

  if block_mode & 0x1FF == 0x1FC {
    return parse_void_extent(block, bsi.is_2d());
  }

  let entry = match bsi.mode(block_mode) {
    Some(e) => e,
    None => return SymbolicBlock::Error,
  };
  let mode = &entry.mode;

  // Weights live at the top of the block, bit-reversed
  let weight_count = mode.weight_count() as usize;
  let mut weight_chars = [0u8; 64];
  ise::decode_ise(
    mode.weight_quant,
    block.reversed(),
    0,
    &mut weight_chars[..weight_count],
  );
  let unq = quant::weight_unquant_table(mode.weight_quant);
  let mut weights = [0u8; 64];
  for i in 0..weight_count {
    let w = unq[weight_chars[i] as usize];
    if mode.dual_plane {
      weights[(i >> 1) + (i & 1) * PLANE2_WEIGHT_OFFSET] = w;
    } else {
      weights[i] = w;
    }
  }

  let partition_count = block.read_bits(2, 11) + 1;
  if mode.dual_plane && partition_count == 4 {
    return SymbolicBlock::Error;
  }

  let mut color_formats = [0u8; 4];
  let partition_index;
  let color_start;
  let mut encoded_high_size = 0u32;

  if partition_count == 1 {
    partition_index = 0;
    color_formats[0] = block.read_bits(4, 13) as u8;
    color_start = 17;
  } else {
    partition_index = block.read_bits(10, 13);
    let cem_low = block.read_bits(6, 23);
    color_start = 29;
    if cem_low & 3 == 0 {
      // One format shared by every partition
      let fmt = (cem_low >> 2) as u8;
      for p in 0..partition_count as usize {
        color_formats[p] = fmt;
      }
    } else {
      encoded_high_size = 3 * partition_count - 4;
      let below_weights = 128 - mode.weight_bits - encoded_high_size;
      let encoded =
        (block.read_bits(encoded_high_size, below_weights) << 6) | cem_low;
      let base_class = (encoded & 3) - 1;
      let mut bitpos = 2;
      let mut classes = [0u32; 4];
      for p in 0..partition_count as usize {
        classes[p] = base_class + ((encoded >> bitpos) & 1);
        bitpos += 1;
      }
      for p in 0..partition_count as usize {
        let low = (encoded >> bitpos) & 3;
        color_formats[p] = (classes[p] * 4 + low) as u8;
        bitpos += 2;
      }
    }
  }

  let int_count: u32 = (0..partition_count as usize)
    .map(|p| endpoint::format_int_count(color_formats[p] as u32))
    .sum();
  if int_count > MAX_COLOR_VALUES as u32 {
    return SymbolicBlock::Error;
  }

  let mut color_bits = COLOR_BITS_AVAILABLE[partition_count as usize]
    - mode.weight_bits as i32
    - encoded_high_size as i32;
  if mode.dual_plane {
    color_bits -= 2;
  }
  let color_bits = color_bits.max(0) as u32;

  let mut color_quant = None;
  for qi in (0..quant::QUANT_LEVELS).rev() {
    let q = Quant::from_index(qi);
    if ise::bit_count(q, int_count) <= color_bits {
      color_quant = Some(q);
      break;
    }
  }
  let color_quant = match color_quant {
    Some(q) if q >= quant::MIN_COLOR_QUANT => q,
    _ => return SymbolicBlock::Error,
  };

  let mut color_values = [0u8; MAX_COLOR_VALUES];
  ise::decode_ise(color_quant, block, color_start, &mut color_values[..int_count as usize]);

  let plane2_component = if mode.dual_plane {
    let pos = 128 - mode.weight_bits - encoded_high_size - 2;
    Some(block.read_bits(2, pos))
  } else {
    None
  };

  SymbolicBlock::Block(Box::new(BlockPayload {
    block_mode: block_mode,
    partition_count: partition_count,
    partition_index: partition_index,
    color_formats: color_formats,
    color_values: color_values,
    color_quant: color_quant,
    plane2_component: plane2_component,
    weights: weights,
    is_dual_plane: mode.dual_plane,
  }))
}

/// Build the 16-byte void-extent block for a constant color.
pub fn constant_block_bytes(rgba: [u16; 4], hdr: bool) -> [u8; 16] {
  let mut block = BlockBits(if hdr {
    0xFFFF_FFFF_FFFF_FFFCu128
  } else {
    0xFFFF_FFFF_FFFF_FDFCu128
  });
  for (i, &c) in rgba.iter().enumerate() {
    block.write_bits(c as u32, 16, 64 + 16 * i as u32);
  }
  block.to_bytes()
}

/// Materialize a symbolic payload into its 128 bits.
///
/// Returns None when the format combination cannot be represented (the
/// encoder treats that as a rejected candidate).
pub fn symbolic_to_physical(bsi: &BlockSizeInfo, pb: &BlockPayload) -> Option<[u8; 16]> {
  let entry = bsi.mode(pb.block_mode)?;
  let mode = &entry.mode;

  let mut block = BlockBits::default();
  block.write_bits(pb.block_mode, 11, 0);
  block.write_bits(pb.partition_count - 1, 2, 11);

  let pc = pb.partition_count as usize;
  let color_start;
  let mut encoded_high_size = 0u32;

  if pc == 1 {
    block.write_bits(pb.color_formats[0] as u32, 4, 13);
    color_start = 17;
  } else {
    block.write_bits(pb.partition_index, 10, 13);
    color_start = 29;
    let shared = pb.color_formats[1..pc].iter().all(|&f| f == pb.color_formats[0]);
    if shared {
      block.write_bits((pb.color_formats[0] as u32) << 2, 6, 23);
    } else {
      // Per-partition formats span at most two consecutive classes
      let classes: Vec<u32> = (0..pc).map(|p| (pb.color_formats[p] as u32) >> 2).collect();
      let base = *classes.iter().min().unwrap();
      if classes.iter().any(|&c| c > base + 1) || base > 2 {
        return None;
      }
      let mut encoded = base + 1;
      let mut bitpos = 2;
      for p in 0..pc {
        encoded |= (classes[p] - base) << bitpos;
        bitpos += 1;
      }
      for p in 0..pc {
        encoded |= ((pb.color_formats[p] as u32) & 3) << bitpos;
        bitpos += 2;
      }
      encoded_high_size = 3 * pb.partition_count - 4;
      block.write_bits(encoded & 0x3F, 6, 23);
      let below_weights = 128 - mode.weight_bits - encoded_high_size;
      block.write_bits(encoded >> 6, encoded_high_size, below_weights);
    }
  }

  let int_count = pb.int_count();
  if ise::bit_count(pb.color_quant, int_count as u32) > 128 - color_start {
    return None;
  }
  ise::encode_ise(
    pb.color_quant,
    &pb.color_values[..int_count],
    &mut block,
    color_start,
  );

  if let Some(comp) = pb.plane2_component {
    let pos = 128 - mode.weight_bits - encoded_high_size - 2;
    block.write_bits(comp, 2, pos);
  }

  // Weights: quantize, pack forward, then reflect into the block top
  let quant_tab = quant::weight_quant_table(mode.weight_quant);
  let count = mode.weight_count() as usize;
  let mut chars = [0u8; 64];
  for i in 0..count {
    let w = if mode.dual_plane {
      pb.weights[(i >> 1) + (i & 1) * PLANE2_WEIGHT_OFFSET]
    } else {
      pb.weights[i]
    };
    chars[i] = quant_tab[w as usize];
  }
  let mut wblock = BlockBits::default();
  ise::encode_ise(mode.weight_quant, &chars[..count], &mut wblock, 0);
  block.0 |= wblock.0.reverse_bits();

  Some(block.to_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blocksize::block_size_info;

  #[test]
  fn constant_block_layout_is_exact() {
    let bytes = constant_block_bytes([10 * 257, 20 * 257, 30 * 257, 40 * 257], false);
    assert_eq!(&bytes[..8], &[0xFC, 0xFD, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(&bytes[8..10], &(2570u16).to_le_bytes());
    assert_eq!(&bytes[14..16], &(10280u16).to_le_bytes());

    let hdr = constant_block_bytes([0x3C00, 0, 0, 0x3C00], true);
    assert_eq!(&hdr[..8], &[0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
  }

  #[test]
  fn constant_blocks_parse_back() {
    let bsi = block_size_info(4, 4, 1);
    let bytes = constant_block_bytes([1, 2, 3, 4], false);
    assert_eq!(
      physical_to_symbolic(&bsi, &bytes),
      SymbolicBlock::ConstantU16 { rgba: [1, 2, 3, 4] }
    );
    let bytes = constant_block_bytes([5, 6, 7, 8], true);
    assert_eq!(
      physical_to_symbolic(&bsi, &bytes),
      SymbolicBlock::ConstantF16 { rgba: [5, 6, 7, 8] }
    );
  }

  #[test]
  fn broken_void_extent_is_error() {
    let mut bytes = constant_block_bytes([1, 2, 3, 4], false);
    // Clear the reserved bits at 10..12
    bytes[1] &= !0x0C;
    let bsi = block_size_info(4, 4, 1);
    assert_eq!(physical_to_symbolic(&bsi, &bytes), SymbolicBlock::Error);

    // Extent with min >= max (not all-ones)
    let mut bytes = constant_block_bytes([1, 2, 3, 4], false);
    bytes[2] = 0x00; // disturb min_s/max_s ordering without the sentinel
    bytes[3] = 0x00;
    assert_eq!(physical_to_symbolic(&bsi, &bytes), SymbolicBlock::Error);
  }

  #[test]
  fn reserved_mode_is_error() {
    let bsi = block_size_info(4, 4, 1);
    let mut bytes = [0u8; 16];
    bytes[0] = 0x10; // mode bits 0..1 zero, quant field zero -> reserved
    assert_eq!(physical_to_symbolic(&bsi, &bytes), SymbolicBlock::Error);
  }

  fn sample_payload(bsi: &BlockSizeInfo, mode_id: u32) -> BlockPayload {
    let entry = bsi.mode(mode_id).expect("valid mode");
    let mut weights = [0u8; 64];
    let unq = quant::weight_unquant_table(entry.mode.weight_quant);
    for i in 0..entry.mode.weight_count() as usize {
      weights[i] = unq[(i * 3) % unq.len()];
    }
    BlockPayload {
      block_mode: mode_id,
      partition_count: 1,
      partition_index: 0,
      color_formats: [endpoint::FMT_RGBA as u8; 4],
      color_values: {
        let mut v = [0u8; MAX_COLOR_VALUES];
        for (i, slot) in v.iter_mut().enumerate().take(8) {
          *slot = (i * 5 % 16) as u8;
        }
        v
      },
      color_quant: Quant::Q16,
      plane2_component: None,
      weights: weights,
      is_dual_plane: entry.mode.dual_plane,
    }
  }

  #[test]
  fn single_partition_round_trip() {
    let bsi = block_size_info(6, 6, 1);
    // Pick a valid single-plane mode
    let mode_id = *bsi
      .sorted_modes()
      .iter()
      .find(|&&m| {
        let e = bsi.mode(m as u32).unwrap();
        !e.mode.dual_plane
      })
      .unwrap() as u32;
    let entry = bsi.mode(mode_id).unwrap();

    // Choose the quant the parser will derive for 8 ints in this mode
    let color_bits = (111 - entry.mode.weight_bits as i32).max(0) as u32;
    let mut derived = None;
    for qi in (0..quant::QUANT_LEVELS).rev() {
      let q = Quant::from_index(qi);
      if ise::bit_count(q, 8) <= color_bits {
        derived = Some(q);
        break;
      }
    }
    let mut pb = sample_payload(&bsi, mode_id);
    pb.color_quant = derived.unwrap();
    // Clamp stored chars into the quant's range
    let range = pb.color_quant.range();
    for v in pb.color_values.iter_mut() {
      *v = (*v as u32 % range) as u8;
    }

    let bytes = symbolic_to_physical(&bsi, &pb).unwrap();
    match physical_to_symbolic(&bsi, &bytes) {
      SymbolicBlock::Block(parsed) => {
        assert_eq!(parsed.block_mode, pb.block_mode);
        assert_eq!(parsed.partition_count, 1);
        assert_eq!(parsed.color_formats[0], pb.color_formats[0]);
        assert_eq!(parsed.color_quant, pb.color_quant);
        assert_eq!(parsed.color_values[..8], pb.color_values[..8]);
        let n = bsi.mode(mode_id).unwrap().mode.weight_count() as usize;
        assert_eq!(parsed.weights[..n], pb.weights[..n]);
      }
      other => panic!("expected block, got {:?}", other),
    }
  }
}
