// The 21 ASTC quantization levels and their transfer functions.
//
// Each level stores an integer as raw bits plus optionally one trit or one
// quint. Unquantization follows the specification's A/B/C bit-pattern
// algorithm, so the scrambled char ordering of the wire format falls out
// naturally; the tables here are built from that algorithm on first use.

use std::sync::OnceLock;

/// Quantization level, ordered by range.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum Quant {
  Q2 = 0,
  Q3,
  Q4,
  Q5,
  Q6,
  Q8,
  Q10,
  Q12,
  Q16,
  Q20,
  Q24,
  Q32,
  Q40,
  Q48,
  Q64,
  Q80,
  Q96,
  Q128,
  Q160,
  Q192,
  Q256,
}

pub const QUANT_LEVELS: usize = 21;

/// Weight quantization never exceeds Q32.
pub const WEIGHT_QUANT_LEVELS: usize = 12;

/// Color quantization never goes below Q6.
pub const MIN_COLOR_QUANT: Quant = Quant::Q6;

// (bits, has_trit, has_quint) per level
const ISE_SPLIT: [(u32, bool, bool); QUANT_LEVELS] = [
  (1, false, false), // Q2
  (0, true, false),  // Q3
  (2, false, false), // Q4
  (0, false, true),  // Q5
  (1, true, false),  // Q6
  (3, false, false), // Q8
  (1, false, true),  // Q10
  (2, true, false),  // Q12
  (4, false, false), // Q16
  (2, false, true),  // Q20
  (3, true, false),  // Q24
  (5, false, false), // Q32
  (3, false, true),  // Q40
  (4, true, false),  // Q48
  (6, false, false), // Q64
  (4, false, true),  // Q80
  (5, true, false),  // Q96
  (7, false, false), // Q128
  (5, false, true),  // Q160
  (6, true, false),  // Q192
  (8, false, false), // Q256
];

impl Quant {
  pub fn from_index(i: usize) -> Quant {
    assert!(i < QUANT_LEVELS);
    // Safety not needed: a match keeps this in safe code
    const ALL: [Quant; QUANT_LEVELS] = [
      Quant::Q2, Quant::Q3, Quant::Q4, Quant::Q5, Quant::Q6, Quant::Q8,
      Quant::Q10, Quant::Q12, Quant::Q16, Quant::Q20, Quant::Q24, Quant::Q32,
      Quant::Q40, Quant::Q48, Quant::Q64, Quant::Q80, Quant::Q96, Quant::Q128,
      Quant::Q160, Quant::Q192, Quant::Q256,
    ];
    ALL[i]
  }

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn bits(self) -> u32 {
    ISE_SPLIT[self as usize].0
  }

  pub fn has_trit(self) -> bool {
    ISE_SPLIT[self as usize].1
  }

  pub fn has_quint(self) -> bool {
    ISE_SPLIT[self as usize].2
  }

  /// Number of representable values.
  pub fn range(self) -> u32 {
    let (b, t, q) = ISE_SPLIT[self as usize];
    let base = if t { 3 } else if q { 5 } else { 1 };
    base << b
  }
}

// Replicate the low `from` bits of `v` across a `to`-bit field, MSB first.
fn replicate_bits(v: u32, from: u32, to: u32) -> u32 {
  assert!(from >= 1 && from <= to);
  let mut r = v << (to - from);
  let mut fill = r >> from;
  while fill != 0 {
    r |= fill;
    fill >>= from;
  }
  r
}

/// Unquantize one weight char to the 0..=64 range.
pub fn unquant_weight(quant: Quant, ch: u32) -> u32 {
  assert!(quant.index() < WEIGHT_QUANT_LEVELS);
  assert!(ch < quant.range());

  // Trit/quint levels with no extra bits map directly
  if quant == Quant::Q3 {
    return ch * 32;
  }
  if quant == Quant::Q5 {
    return ch * 16;
  }

  let b = quant.bits();
  let w = if quant.has_trit() || quant.has_quint() {
    let t = ch >> b;
    let m = ch & ((1 << b) - 1);
    let a = if m & 1 != 0 { 0x7F } else { 0 };
    let bf = (m >> 1) & 1;
    let cf = (m >> 2) & 1;
    // Per-level C constant and B bit pattern from the specification
    let (c, bpat) = match (quant.has_trit(), b) {
      (true, 1) => (50, 0),
      (false, 1) => (28, 0),
      (true, 2) => (23, bf * 0b100_0101),
      (false, 2) => (13, bf * 0b100_0010),
      (true, 3) => (11, cf * 0b100_0010 + bf * 0b010_0001),
      _ => unreachable!("no such weight quantization level"),
    };
    let mut uq = t * c + bpat;
    uq ^= a;
    (a & 0x20) | (uq >> 2)
  } else {
    // Bits only: replicate into a 6-bit field
    replicate_bits(ch, b, 6)
  };

  // Stretch 0..63 so that 32 stays the exact midpoint of 0..64
  if w > 32 {
    w + 1
  } else {
    w
  }
}

/// Unquantize one color char to the 0..=255 range. Valid for Q6 and up.
pub fn unquant_color(quant: Quant, ch: u32) -> u32 {
  assert!(quant >= MIN_COLOR_QUANT);
  assert!(ch < quant.range());

  let b = quant.bits();
  if !quant.has_trit() && !quant.has_quint() {
    return replicate_bits(ch, b, 8);
  }

  let t = ch >> b;
  let m = ch & ((1 << b) - 1);
  let a = if m & 1 != 0 { 0x1FF } else { 0 };
  let bf = (m >> 1) & 1;
  let cf = (m >> 2) & 1;
  let df = (m >> 3) & 1;
  let ef = (m >> 4) & 1;
  let ff = (m >> 5) & 1;
  let (c, bpat) = match (quant.has_trit(), b) {
    (true, 1) => (204, 0),
    (false, 1) => (113, 0),
    (true, 2) => (93, bf * 0b1_0001_0110),
    (false, 2) => (54, bf * 0b1_0000_1110),
    (true, 3) => (44, cf * 266 + bf * 133),
    (false, 3) => (26, cf * 261 + bf * 130),
    (true, 4) => (22, df * 260 + cf * 130 + bf * 65),
    (false, 4) => (13, df * 258 + cf * 129 + bf * 64),
    (true, 5) => (11, ef * 258 + df * 129 + cf * 64 + bf * 32),
    (false, 5) => (6, ef * 257 + df * 128 + cf * 64 + bf * 32),
    (true, 6) => (5, ff * 257 + ef * 128 + df * 64 + cf * 32 + bf * 16),
    _ => unreachable!("no such color quantization level"),
  };
  let mut uq = t * c + bpat;
  uq ^= a;
  (a & 0x80) | (uq >> 2)
}

struct TransferTables {
  // unquantized value per char, indexed [quant][char]
  weight_unquant: Vec<Vec<u8>>,
  // nearest char per target weight 0..=64, indexed [quant][target]
  weight_quant: Vec<[u8; 65]>,
  color_unquant: Vec<Vec<u8>>,
  color_quant: Vec<[u8; 256]>,
}

fn tables() -> &'static TransferTables {
  static TABLES: OnceLock<TransferTables> = OnceLock::new();
  TABLES.get_or_init(|| {
    let mut weight_unquant = Vec::with_capacity(WEIGHT_QUANT_LEVELS);
    let mut weight_quant = Vec::with_capacity(WEIGHT_QUANT_LEVELS);
    for qi in 0..WEIGHT_QUANT_LEVELS {
      let q = Quant::from_index(qi);
      let unq: Vec<u8> = (0..q.range()).map(|ch| unquant_weight(q, ch) as u8).collect();
      let mut inv = [0u8; 65];
      for (target, slot) in inv.iter_mut().enumerate() {
        let mut best = 0usize;
        let mut best_d = i32::MAX;
        for (ch, &u) in unq.iter().enumerate() {
          let d = (u as i32 - target as i32).abs();
          if d < best_d || (d == best_d && (u as usize) < unq[best] as usize) {
            best = ch;
            best_d = d;
          }
        }
        *slot = best as u8;
      }
      weight_unquant.push(unq);
      weight_quant.push(inv);
    }

    let mut color_unquant = Vec::with_capacity(QUANT_LEVELS);
    let mut color_quant = Vec::with_capacity(QUANT_LEVELS);
    for qi in 0..QUANT_LEVELS {
      let q = Quant::from_index(qi);
      if q < MIN_COLOR_QUANT {
        color_unquant.push(Vec::new());
        color_quant.push([0u8; 256]);
        continue;
      }
      let unq: Vec<u8> = (0..q.range()).map(|ch| unquant_color(q, ch) as u8).collect();
      let mut inv = [0u8; 256];
      for (target, slot) in inv.iter_mut().enumerate() {
        let mut best = 0usize;
        let mut best_d = i32::MAX;
        for (ch, &u) in unq.iter().enumerate() {
          let d = (u as i32 - target as i32).abs();
          if d < best_d || (d == best_d && (u as usize) < unq[best] as usize) {
            best = ch;
            best_d = d;
          }
        }
        *slot = best as u8;
      }
      color_unquant.push(unq);
      color_quant.push(inv);
    }

    TransferTables {
      weight_unquant: weight_unquant,
      weight_quant: weight_quant,
      color_unquant: color_unquant,
      color_quant: color_quant,
    }
  })
}

pub fn weight_unquant_table(quant: Quant) -> &'static [u8] {
  &tables().weight_unquant[quant.index()]
}

pub fn weight_quant_table(quant: Quant) -> &'static [u8; 65] {
  &tables().weight_quant[quant.index()]
}

pub fn color_unquant_table(quant: Quant) -> &'static [u8] {
  &tables().color_unquant[quant.index()]
}

pub fn color_quant_table(quant: Quant) -> &'static [u8; 256] {
  &tables().color_quant[quant.index()]
}
