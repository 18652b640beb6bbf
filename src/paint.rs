// Per-texel color evaluation: endpoints plus interpolated weights down to
// RGBA8 or RGBA-float texels. Two 65536-entry tables translate the 16-bit
// interpolation space to floats, one for UNORM16 and one for the LNS
// encoding HDR channels interpolate in.

use std::sync::OnceLock;

use half::f16;

use crate::blocksize::BlockSizeInfo;
use crate::config::Profile;
use crate::endpoint::{self, Endpoints};
use crate::symbolic::{BlockPayload, SymbolicBlock, PLANE2_WEIGHT_OFFSET};
use crate::util::clamp_unorm16;

pub const ERROR_COLOR_U8: [u8; 4] = [0xFF, 0x00, 0xFF, 0xFF];
pub const ERROR_COLOR_F32: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

/// ASTC's 16-bit logarithmic encoding lowered to an FP16 bit pattern.
pub fn lns_to_sf16(p: u16) -> u16 {
  let mc = p & 0x7FF;
  let ec = p >> 11;
  let mt = if mc < 512 {
    3 * mc
  } else if mc < 1536 {
    4 * mc - 512
  } else {
    5 * mc - 2048
  };
  let res = (ec << 10) | (mt >> 3);
  res.min(0x7BFF)
}

/// Inverse of `lns_to_sf16` up to rounding, used by the HDR encoder.
pub fn float_to_lns(p: f32) -> f32 {
  if p.is_nan() || p <= 1.0 / 67108864.0 {
    return 0.0;
  }
  if p >= 65536.0 {
    return 65535.0;
  }

  // frexp: p = frac * 2^expo with frac in [0.5, 1). The early-outs above
  // leave only normal values, so the exponent field is usable directly.
  let expo = ((p.to_bits() >> 23) & 0xFF) as i32 - 126;
  let frac = f32::from_bits((p.to_bits() & 0x007F_FFFF) | 0x3F00_0000);

  let mut p1;
  let expo = if expo < -13 {
    p1 = p * 33554432.0;
    0
  } else {
    p1 = (frac - 0.5) * 4096.0;
    expo + 14
  };

  if p1 < 384.0 {
    p1 *= 4.0 / 3.0;
  } else if p1 <= 1408.0 {
    p1 += 128.0;
  } else {
    p1 = (p1 + 512.0) * (4.0 / 5.0);
  }

  p1 + expo as f32 * 2048.0 + 1.0
}

struct FloatTables {
  unorm16_to_f32: Vec<f32>,
  lns_to_f32: Vec<f32>,
}

fn float_tables() -> &'static FloatTables {
  static TABLES: OnceLock<FloatTables> = OnceLock::new();
  TABLES.get_or_init(|| FloatTables {
    unorm16_to_f32: (0..65536).map(|i| i as f32 / 65535.0).collect(),
    lns_to_f32: (0..65536)
      .map(|i| f16::from_bits(lns_to_sf16(i as u16)).to_f32())
      .collect(),
  })
}

pub fn unorm16_to_f32(v: u16) -> f32 {
  float_tables().unorm16_to_f32[v as usize]
}

pub fn lns_to_f32(v: u16) -> f32 {
  float_tables().lns_to_f32[v as usize]
}

/// Interpolate one channel in 16-bit space.
#[inline]
fn interpolate(e0: u16, e1: u16, w: u32) -> u16 {
  let delta = e1 as i32 - e0 as i32;
  let v = e0 as i32 + ((delta * w as i32 + 32) >> 6);
  clamp_unorm16(v) as u16
}

/// Per-partition endpoints for one block, unpacked once before painting.
fn unpack_endpoints(pb: &BlockPayload, profile: Profile) -> [Endpoints; 4] {
  let mut eps = [endpoint::error_endpoints(); 4];
  for p in 0..pb.partition_count as usize {
    let ints = pb.unquantized_endpoint_ints(p);
    eps[p] = endpoint::unpack(pb.color_formats[p] as u32, &ints, profile);
  }
  eps
}

fn texel_weights(
  bsi: &BlockSizeInfo,
  pb: &BlockPayload,
  texel: usize,
) -> (u32, Option<(u32, u32)>) {
  let entry = bsi.mode(pb.block_mode).expect("parsed block has a valid mode");
  let w1 = entry.decimation.texel_weight(&pb.weights, texel);
  match pb.plane2_component {
    Some(comp) => {
      let w2 = entry
        .decimation
        .texel_weight(&pb.weights[PLANE2_WEIGHT_OFFSET..], texel);
      (w1, Some((comp, w2)))
    }
    None => (w1, None),
  }
}

/// Paint one symbolic block as RGBA8.
pub fn decode_block_u8(
  bsi: &BlockSizeInfo,
  profile: Profile,
  sym: &SymbolicBlock,
  out: &mut [[u8; 4]],
) {
  assert!(out.len() == bsi.texel_count as usize);
  match sym {
    SymbolicBlock::Error => out.fill(ERROR_COLOR_U8),
    SymbolicBlock::ConstantU16 { rgba } => {
      let c = [
        (rgba[0] >> 8) as u8,
        (rgba[1] >> 8) as u8,
        (rgba[2] >> 8) as u8,
        (rgba[3] >> 8) as u8,
      ];
      out.fill(c);
    }
    SymbolicBlock::ConstantF16 { rgba } => {
      if profile.is_hdr() {
        let mut c = [0u8; 4];
        for i in 0..4 {
          let f = f16::from_bits(rgba[i]).to_f32().clamp(0.0, 1.0);
          c[i] = (f * 255.0 + 0.5) as u8;
        }
        out.fill(c);
      } else {
        // HDR content under an LDR decode is substituted, not an error
        out.fill(ERROR_COLOR_U8);
      }
    }
    SymbolicBlock::Block(pb) => {
      let eps = unpack_endpoints(pb, profile);
      for texel in 0..out.len() {
        let part = bsi.partition_of(pb.partition_count, pb.partition_index, texel) as usize;
        let ep = &eps[part];
        if ep.is_error {
          out[texel] = ERROR_COLOR_U8;
          continue;
        }
        let (w1, plane2) = texel_weights(bsi, pb, texel);
        let mut px = [0u8; 4];
        for c in 0..4 {
          let w = match plane2 {
            Some((comp, w2)) if comp as usize == c => w2,
            _ => w1,
          };
          px[c] = (interpolate(ep.e0[c], ep.e1[c], w) >> 8) as u8;
        }
        out[texel] = px;
      }
    }
  }
}

/// Paint one symbolic block as RGBA f32.
pub fn decode_block_f32(
  bsi: &BlockSizeInfo,
  profile: Profile,
  sym: &SymbolicBlock,
  out: &mut [[f32; 4]],
) {
  assert!(out.len() == bsi.texel_count as usize);
  match sym {
    SymbolicBlock::Error => out.fill(ERROR_COLOR_F32),
    SymbolicBlock::ConstantU16 { rgba } => {
      let c = [
        unorm16_to_f32(rgba[0]),
        unorm16_to_f32(rgba[1]),
        unorm16_to_f32(rgba[2]),
        unorm16_to_f32(rgba[3]),
      ];
      out.fill(c);
    }
    SymbolicBlock::ConstantF16 { rgba } => {
      if profile.is_hdr() {
        let c = [
          f16::from_bits(rgba[0]).to_f32(),
          f16::from_bits(rgba[1]).to_f32(),
          f16::from_bits(rgba[2]).to_f32(),
          f16::from_bits(rgba[3]).to_f32(),
        ];
        out.fill(c);
      } else {
        out.fill(ERROR_COLOR_F32);
      }
    }
    SymbolicBlock::Block(pb) => {
      let eps = unpack_endpoints(pb, profile);
      for texel in 0..out.len() {
        let part = bsi.partition_of(pb.partition_count, pb.partition_index, texel) as usize;
        let ep = &eps[part];
        if ep.is_error {
          out[texel] = ERROR_COLOR_F32;
          continue;
        }
        let (w1, plane2) = texel_weights(bsi, pb, texel);
        let mut px = [0f32; 4];
        for c in 0..4 {
          let w = match plane2 {
            Some((comp, w2)) if comp as usize == c => w2,
            _ => w1,
          };
          let v = interpolate(ep.e0[c], ep.e1[c], w);
          let lns = if c == 3 { ep.alpha_lns } else { ep.rgb_lns };
          px[c] = if lns { lns_to_f32(v) } else { unorm16_to_f32(v) };
        }
        out[texel] = px;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blocksize::block_size_info;
  use crate::symbolic;

  #[test]
  fn interpolation_is_the_documented_form() {
    // (e0 + ((delta*w + 32) >> 6)) with w = 0, 32, 64
    assert_eq!(interpolate(0, 0xFFFF, 0), 0);
    assert_eq!(interpolate(0, 0xFFFF, 64), 0xFFFF);
    assert_eq!(interpolate(0, 0xFFFF, 32), ((0xFFFFu32 * 32 + 32) >> 6) as u16);
    assert_eq!(interpolate(100 * 257, 100 * 257, 17), 100 * 257);
  }

  #[test]
  fn constant_u16_paints_its_bytes() {
    let bsi = block_size_info(4, 4, 1);
    let sym = SymbolicBlock::ConstantU16 { rgba: [10 * 257, 20 * 257, 30 * 257, 40 * 257] };
    let mut out = [[0u8; 4]; 16];
    decode_block_u8(&bsi, Profile::Ldr, &sym, &mut out);
    assert!(out.iter().all(|&p| p == [10, 20, 30, 40]));

    let mut outf = [[0f32; 4]; 16];
    decode_block_f32(&bsi, Profile::Ldr, &sym, &mut outf);
    assert!((outf[0][0] - 2570.0 / 65535.0).abs() < 1e-6);
  }

  #[test]
  fn hdr_constant_under_ldr_is_magenta() {
    let bsi = block_size_info(4, 4, 1);
    let bytes = symbolic::constant_block_bytes([0x3C00; 4], true);
    let sym = symbolic::physical_to_symbolic(&bsi, &bytes);
    let mut out = [[0u8; 4]; 16];
    decode_block_u8(&bsi, Profile::Ldr, &sym, &mut out);
    assert!(out.iter().all(|&p| p == ERROR_COLOR_U8));

    // Under an HDR profile the FP16 one decodes as 1.0
    let mut outf = [[0f32; 4]; 16];
    decode_block_f32(&bsi, Profile::Hdr, &sym, &mut outf);
    assert_eq!(outf[7], [1.0, 1.0, 1.0, 1.0]);
  }

  #[test]
  fn lns_transfer_is_monotone() {
    let mut prev = -1.0f32;
    for v in (0..65536).step_by(17) {
      let f = lns_to_f32(v as u16);
      assert!(f >= prev);
      prev = f;
    }
    // And float_to_lns lands near the inverse
    for v in [0x0800u16, 0x2000, 0x4731, 0x7FFF, 0xA000] {
      let f = lns_to_f32(v);
      let back = float_to_lns(f);
      assert!(
        (back - v as f32).abs() < 2.5,
        "lns {} -> {} -> {}",
        v,
        f,
        back
      );
    }
  }

  #[test]
  fn error_block_is_magenta() {
    let bsi = block_size_info(4, 4, 1);
    let mut out = [[0u8; 4]; 16];
    decode_block_u8(&bsi, Profile::Ldr, &SymbolicBlock::Error, &mut out);
    assert!(out.iter().all(|&p| p == ERROR_COLOR_U8));
  }
}
