// Integer Sequence Encoding.
//
// A sequence of chars under a given quantization level is stored as raw
// bits interleaved with packed base-3 (trit) or base-5 (quint) groups.
// Five trits share one 8-bit packed value, three quints share a 7-bit one,
// and the packed bits are spliced between the chars' raw bits so that a
// truncated stream still decodes its leading chars.

use std::sync::OnceLock;

use crate::bits::BlockBits;
use crate::quant::Quant;

/// Bits needed to store `char_count` chars at `quant`.
///
/// Equivalent to the specification's ceil(count * scale / ((divisor<<1)+1))
/// with (scale, divisor) = (8+5b, 2) for trits, (7+3b, 1) for quints and
/// (b, 0) for plain bits.
pub fn bit_count(quant: Quant, char_count: u32) -> u32 {
  let b = quant.bits();
  let mut bits = char_count * b;
  if quant.has_trit() {
    bits += (char_count * 8 + 4) / 5;
  } else if quant.has_quint() {
    bits += (char_count * 7 + 2) / 3;
  }
  bits
}

// Trit-bit group sizes after each char of a 5-char block, and their
// cumulative totals for truncated final blocks.
const TRIT_GROUP_SIZE: [u32; 5] = [2, 2, 1, 2, 1];
const QUINT_GROUP_SIZE: [u32; 3] = [3, 2, 2];

fn decode_trit_block(t: u32) -> [u8; 5] {
  let c;
  let t4;
  let t3;
  if (t >> 2) & 7 == 7 {
    c = ((t >> 5) & 7) << 2 | (t & 3);
    t4 = 2;
    t3 = 2;
  } else {
    c = t & 0x1F;
    if (t >> 5) & 3 == 3 {
      t4 = 2;
      t3 = (t >> 7) & 1;
    } else {
      t4 = (t >> 7) & 1;
      t3 = (t >> 5) & 3;
    }
  }
  let t2;
  let t1;
  let t0;
  if c & 3 == 3 {
    t2 = 2;
    t1 = (c >> 4) & 1;
    let c3 = (c >> 3) & 1;
    t0 = (c3 << 1) | (((c >> 2) & 1) & !c3 & 1);
  } else if (c >> 2) & 3 == 3 {
    t2 = 2;
    t1 = 2;
    t0 = c & 3;
  } else {
    t2 = (c >> 4) & 1;
    t1 = (c >> 2) & 3;
    let c1 = (c >> 1) & 1;
    t0 = (c1 << 1) | ((c & 1) & !c1 & 1);
  }
  [t0 as u8, t1 as u8, t2 as u8, t3 as u8, t4 as u8]
}

fn decode_quint_block(q: u32) -> [u8; 3] {
  let q2;
  let q1;
  let q0;
  if (q >> 1) & 3 == 3 && (q >> 5) & 3 == 0 {
    let q0b = q & 1;
    q2 = (q0b << 2) | ((((q >> 4) & 1) & !q0b & 1) << 1) | (((q >> 3) & 1) & !q0b & 1);
    q1 = 4;
    q0 = 4;
  } else {
    let c;
    if (q >> 1) & 3 == 3 {
      q2 = 4;
      c = (((q >> 3) & 3) << 3) | ((!(q >> 5) & 3) << 1) | (q & 1);
    } else {
      q2 = (q >> 5) & 3;
      c = q & 0x1F;
    }
    if c & 7 == 5 {
      q1 = 4;
      q0 = (c >> 3) & 3;
    } else {
      q1 = (c >> 3) & 3;
      q0 = c & 7;
    }
  }
  [q0 as u8, q1 as u8, q2 as u8]
}

struct IseTables {
  trits_of_integer: [[u8; 5]; 256],
  quints_of_integer: [[u8; 3]; 128],
  // Lowest packed value per tuple; index t0 + 3*t1 + 9*t2 + 27*t3 + 81*t4
  integer_of_trits: [u8; 243],
  // Index q0 + 5*q1 + 25*q2
  integer_of_quints: [u8; 125],
}

fn ise_tables() -> &'static IseTables {
  static TABLES: OnceLock<IseTables> = OnceLock::new();
  TABLES.get_or_init(|| {
    let mut trits_of_integer = [[0u8; 5]; 256];
    let mut quints_of_integer = [[0u8; 3]; 128];
    let mut integer_of_trits = [u8::MAX; 243];
    let mut integer_of_quints = [u8::MAX; 125];

    // Iterating packed values in ascending order makes the first (lowest)
    // packed value win for ambiguous tuples, which also guarantees that a
    // tuple with trailing zero trits packs with its unwritten bits zero.
    for t in 0..256usize {
      let trits = decode_trit_block(t as u32);
      trits_of_integer[t] = trits;
      let idx = trits[0] as usize
        + 3 * trits[1] as usize
        + 9 * trits[2] as usize
        + 27 * trits[3] as usize
        + 81 * trits[4] as usize;
      if integer_of_trits[idx] == u8::MAX {
        integer_of_trits[idx] = t as u8;
      }
    }
    for q in 0..128usize {
      let quints = decode_quint_block(q as u32);
      quints_of_integer[q] = quints;
      let idx = quints[0] as usize + 5 * quints[1] as usize + 25 * quints[2] as usize;
      if integer_of_quints[idx] == u8::MAX {
        integer_of_quints[idx] = q as u8;
      }
    }

    IseTables {
      trits_of_integer: trits_of_integer,
      quints_of_integer: quints_of_integer,
      integer_of_trits: integer_of_trits,
      integer_of_quints: integer_of_quints,
    }
  })
}

/// Decode `out.len()` chars from `block` starting at `bit_offset`.
pub fn decode_ise(quant: Quant, block: BlockBits, bit_offset: u32, out: &mut [u8]) {
  assert!(!out.is_empty());
  let tables = ise_tables();
  let b = quant.bits();
  let mut ofs = bit_offset;

  if quant.has_trit() {
    let mut base = 0;
    while base < out.len() {
      let in_block = (out.len() - base).min(5);
      let mut m = [0u32; 5];
      let mut packed = 0u32;
      let mut packed_pos = 0;
      for i in 0..in_block {
        m[i] = block.read_bits(b, ofs);
        ofs += b;
        let g = TRIT_GROUP_SIZE[i];
        packed |= block.read_bits(g, ofs) << packed_pos;
        packed_pos += g;
        ofs += g;
      }
      let trits = tables.trits_of_integer[packed as usize];
      for i in 0..in_block {
        out[base + i] = ((trits[i] as u32) << b | m[i]) as u8;
      }
      base += in_block;
    }
  } else if quant.has_quint() {
    let mut base = 0;
    while base < out.len() {
      let in_block = (out.len() - base).min(3);
      let mut m = [0u32; 3];
      let mut packed = 0u32;
      let mut packed_pos = 0;
      for i in 0..in_block {
        m[i] = block.read_bits(b, ofs);
        ofs += b;
        let g = QUINT_GROUP_SIZE[i];
        packed |= block.read_bits(g, ofs) << packed_pos;
        packed_pos += g;
        ofs += g;
      }
      let quints = tables.quints_of_integer[packed as usize];
      for i in 0..in_block {
        out[base + i] = ((quints[i] as u32) << b | m[i]) as u8;
      }
      base += in_block;
    }
  } else {
    for slot in out.iter_mut() {
      *slot = block.read_bits(b, ofs) as u8;
      ofs += b;
    }
  }
}

/// Encode `chars` into `block` starting at `bit_offset`.
pub fn encode_ise(quant: Quant, chars: &[u8], block: &mut BlockBits, bit_offset: u32) {
  assert!(!chars.is_empty());
  let tables = ise_tables();
  let b = quant.bits();
  let mut ofs = bit_offset;

  if quant.has_trit() {
    for group in chars.chunks(5) {
      let mut trit = [0usize; 5];
      for (i, &ch) in group.iter().enumerate() {
        trit[i] = (ch as usize) >> b;
      }
      let packed = tables.integer_of_trits
        [trit[0] + 3 * trit[1] + 9 * trit[2] + 27 * trit[3] + 81 * trit[4]]
        as u32;
      let mut packed_pos = 0;
      for (i, &ch) in group.iter().enumerate() {
        block.write_bits(ch as u32 & ((1 << b) - 1), b, ofs);
        ofs += b;
        let g = TRIT_GROUP_SIZE[i];
        block.write_bits((packed >> packed_pos) & ((1 << g) - 1), g, ofs);
        packed_pos += g;
        ofs += g;
      }
    }
  } else if quant.has_quint() {
    for group in chars.chunks(3) {
      let mut quint = [0usize; 3];
      for (i, &ch) in group.iter().enumerate() {
        quint[i] = (ch as usize) >> b;
      }
      let packed =
        tables.integer_of_quints[quint[0] + 5 * quint[1] + 25 * quint[2]] as u32;
      let mut packed_pos = 0;
      for (i, &ch) in group.iter().enumerate() {
        block.write_bits(ch as u32 & ((1 << b) - 1), b, ofs);
        ofs += b;
        let g = QUINT_GROUP_SIZE[i];
        block.write_bits((packed >> packed_pos) & ((1 << g) - 1), g, ofs);
        packed_pos += g;
        ofs += g;
      }
    }
  } else {
    for &ch in chars {
      block.write_bits(ch as u32, b, ofs);
      ofs += b;
    }
  }
}
