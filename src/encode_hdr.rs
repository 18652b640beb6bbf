// The HDR F32 block encoder. Texels are first moved into "code space":
// LNS codes for HDR channels, UNORM16 for the LDR alpha of the hybrid
// profile. The search mirrors the U8 encoder but quantizes endpoints
// through the HDR format encodings instead of per-channel tables.

use crate::blocksize::{BlockSizeInfo, ModeEntry};
use crate::config::{Config, Profile};
use crate::endpoint::{
  self, FMT_HDR_LUMINANCE_LARGE_RANGE, FMT_HDR_LUMINANCE_SMALL_RANGE, FMT_HDR_RGB,
  FMT_HDR_RGBA, FMT_HDR_RGB_LDR_ALPHA,
};
use crate::encode::{grid_weights_from_ideal, ideal_weights, partition_shortlist};
use crate::ise;
use crate::paint;
use crate::quant::{self, Quant};
use crate::symbolic::{self, BlockPayload, SymbolicBlock, MAX_COLOR_VALUES};

use half::f16;

fn to_code(cfg: &Config, v: f32, is_alpha: bool) -> u16 {
  if is_alpha && cfg.profile == Profile::HdrRgbLdrA {
    (v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16
  } else {
    paint::float_to_lns(v).round().clamp(0.0, 65535.0) as u16
  }
}

// Quantize one 16-bit code down to the 12-bit endpoint space.
fn code12(code: u16) -> i32 {
  (code >> 4) as i32
}

struct HdrCtx<'a> {
  cfg: &'a Config,
  bsi: &'a BlockSizeInfo,
  codes: Vec<[i32; 4]>,
  texel_count: usize,
  cw: [f32; 4],
}

impl<'a> HdrCtx<'a> {
  /// Interpolate the payload in 16-bit space and accumulate weighted SSE
  /// against the source codes.
  fn payload_error(&self, payload: &BlockPayload, limit: f64) -> f64 {
    let entry = match self.bsi.mode(payload.block_mode) {
      Some(e) => e,
      None => return f64::INFINITY,
    };
    let mut eps = [endpoint::error_endpoints(); 4];
    for p in 0..payload.partition_count as usize {
      let ints = payload.unquantized_endpoint_ints(p);
      eps[p] = endpoint::unpack(payload.color_formats[p] as u32, &ints, self.cfg.profile);
      if eps[p].is_error {
        return f64::INFINITY;
      }
    }
    let mut err = 0.0f64;
    for i in 0..self.texel_count {
      let part = self
        .bsi
        .partition_of(payload.partition_count, payload.partition_index, i)
        as usize;
      let ep = &eps[part];
      let w = entry.decimation.texel_weight(&payload.weights, i) as i32;
      for c in 0..4 {
        let e0 = ep.e0[c] as i32;
        let e1 = ep.e1[c] as i32;
        let v = (e0 + (((e1 - e0) * w + 32) >> 6)).clamp(0, 0xFFFF);
        let diff = (v - self.codes[i][c]) as f64;
        err += self.cw[c] as f64 * diff * diff;
      }
      if err > limit {
        return err;
      }
    }
    err
  }

  fn luma(&self, i: usize) -> i32 {
    let c = &self.codes[i];
    c[0] + c[1] + c[2]
  }

  fn representative_endpoints(&self, pc: u32, seed: u32, part: usize) -> ([i32; 4], [i32; 4]) {
    let mut lo = None;
    let mut hi = None;
    for i in 0..self.texel_count {
      if self.bsi.partition_of(pc, seed, i) as usize != part {
        continue;
      }
      if lo.map_or(true, |j| self.luma(i) < self.luma(j)) {
        lo = Some(i);
      }
      if hi.map_or(true, |j| self.luma(i) > self.luma(j)) {
        hi = Some(i);
      }
    }
    match (lo, hi) {
      (Some(l), Some(h)) => (self.codes[l], self.codes[h]),
      _ => ([0; 4], [0; 4]),
    }
  }

  /// Encode an endpoint pair into a format's color integers (still in
  /// 0..=255 space, before ISE quantization).
  fn pack_format(&self, format: u32, e0: [i32; 4], e1: [i32; 4]) -> [u8; 8] {
    let mut v = [0u8; 8];
    match format {
      FMT_HDR_LUMINANCE_LARGE_RANGE => {
        let y0 = code12(e0[0] as u16).min(code12(e1[0] as u16));
        let y1 = code12(e0[0] as u16).max(code12(e1[0] as u16));
        v[0] = (y0 >> 4) as u8;
        v[1] = (y1 >> 4) as u8;
      }
      FMT_HDR_LUMINANCE_SMALL_RANGE => {
        let y0 = code12(e0[0] as u16).min(code12(e1[0] as u16));
        let y1 = code12(e0[0] as u16).max(code12(e1[0] as u16));
        let d = y1 - y0;
        if d < 32 {
          // Low-precision-delta layout: y0 over 11 bits, delta over 4
          let y0q = y0 >> 1;
          v[0] = (y0q & 0x7F) as u8;
          v[1] = (((y0q >> 7) << 4) | (d >> 1).min(0xF)) as u8;
        } else {
          let y0q = y0 >> 2;
          v[0] = (0x80 | (y0q & 0x7F)) as u8;
          v[1] = (((y0q >> 7) << 5) | (d >> 2).min(0x1F)) as u8;
        }
      }
      FMT_HDR_RGB | FMT_HDR_RGB_LDR_ALPHA | FMT_HDR_RGBA => {
        // The direct (major-component 3) layout of the HDR RGB format
        let (r0, g0, b0) = (code12(e0[0] as u16), code12(e0[1] as u16), code12(e0[2] as u16));
        let (r1, g1, b1) = (code12(e1[0] as u16), code12(e1[1] as u16), code12(e1[2] as u16));
        v[0] = (r0 >> 4) as u8;
        v[1] = (r1 >> 4) as u8;
        v[2] = (g0 >> 4) as u8;
        v[3] = (g1 >> 4) as u8;
        v[4] = (0x80 | (b0 >> 5)) as u8;
        v[5] = (0x80 | (b1 >> 5)) as u8;
        match format {
          FMT_HDR_RGB_LDR_ALPHA => {
            v[6] = (e0[3] >> 8) as u8;
            v[7] = (e1[3] >> 8) as u8;
          }
          FMT_HDR_RGBA => {
            // Direct alpha selector
            v[6] = (0x80 | (code12(e0[3] as u16) >> 5)) as u8;
            v[7] = (0x80 | (code12(e1[3] as u16) >> 5)) as u8;
          }
          _ => {}
        }
      }
      _ => unreachable!("HDR encoder format"),
    }
    v
  }

  fn try_combo(
    &self,
    entry: &ModeEntry,
    mode_id: u32,
    format: u32,
    pc: u32,
    seed: u32,
    best_err: f64,
  ) -> Option<(f64, BlockPayload)> {
    let mode = &entry.mode;
    if mode.dual_plane {
      return None;
    }
    let stride = endpoint::format_int_count(format) as usize;
    let ints = (stride as u32) * pc;
    if ints as usize > MAX_COLOR_VALUES {
      return None;
    }

    let color_bits =
      ([0i32, 111, 99, 99, 99][pc as usize] - mode.weight_bits as i32).max(0) as u32;
    let mut cquant = None;
    for qi in (0..quant::QUANT_LEVELS).rev() {
      let q = Quant::from_index(qi);
      if ise::bit_count(q, ints) <= color_bits {
        cquant = Some(q);
        break;
      }
    }
    let cquant = match cquant {
      Some(q) if q >= quant::MIN_COLOR_QUANT => q,
      _ => return None,
    };

    let qt = quant::color_quant_table(cquant);
    let mut color_values = [0u8; MAX_COLOR_VALUES];
    let mut ideal = vec![0.0f32; self.texel_count];
    let assignment = |i: usize| -> usize { self.bsi.partition_of(pc, seed, i) as usize };

    for part in 0..pc as usize {
      let (r0, r1) = self.representative_endpoints(pc, seed, part);
      let packed = self.pack_format(format, r0, r1);
      for (i, &b) in packed[..stride].iter().enumerate() {
        color_values[part * stride + i] = qt[b as usize];
      }
      // Project against what the decoder will actually reconstruct
      let probe = BlockPayload {
        block_mode: mode_id,
        partition_count: pc,
        partition_index: seed,
        color_formats: [format as u8; 4],
        color_values: color_values,
        color_quant: cquant,
        plane2_component: None,
        weights: [0u8; 64],
        is_dual_plane: false,
      };
      let ints_dec = probe.unquantized_endpoint_ints(part);
      let ep = endpoint::unpack(format, &ints_dec, self.cfg.profile);
      if ep.is_error {
        return None;
      }
      let e0 = [ep.e0[0] as f32, ep.e0[1] as f32, ep.e0[2] as f32, ep.e0[3] as f32];
      let e1 = [ep.e1[0] as f32, ep.e1[1] as f32, ep.e1[2] as f32, ep.e1[3] as f32];
      ideal_weights(&self.codes, assignment, part, &e0, &e1, &self.cw, &mut ideal);
    }

    let mut weights = [0u8; 64];
    let gcount = entry.decimation.weight_count as usize;
    grid_weights_from_ideal(
      &entry.decimation,
      &ideal,
      mode.weight_quant,
      &mut weights[..gcount],
    );

    let payload = BlockPayload {
      block_mode: mode_id,
      partition_count: pc,
      partition_index: seed,
      color_formats: [format as u8; 4],
      color_values: color_values,
      color_quant: cquant,
      plane2_component: None,
      weights: weights,
      is_dual_plane: false,
    };
    let err = self.payload_error(&payload, best_err);
    if err >= best_err {
      return None;
    }
    Some((err, payload))
  }
}

/// Compress one block of already-swizzled RGBA float texels under an HDR
/// profile.
pub fn compress_block_hdr(cfg: &Config, bsi: &BlockSizeInfo, texels: &[[f32; 4]]) -> [u8; 16] {
  let texel_count = bsi.texel_count as usize;
  assert!(texels.len() == texel_count);

  let f16_of = |t: &[f32; 4]| -> [u16; 4] {
    [
      f16::from_f32(t[0]).to_bits(),
      f16::from_f32(t[1]).to_bits(),
      f16::from_f32(t[2]).to_bits(),
      f16::from_f32(t[3]).to_bits(),
    ]
  };
  if texels.iter().all(|t| f16_of(t) == f16_of(&texels[0])) {
    return symbolic::constant_block_bytes(f16_of(&texels[0]), true);
  }

  let codes: Vec<[i32; 4]> = texels
    .iter()
    .map(|t| {
      [
        to_code(cfg, t[0], false) as i32,
        to_code(cfg, t[1], false) as i32,
        to_code(cfg, t[2], false) as i32,
        to_code(cfg, t[3], true) as i32,
      ]
    })
    .collect();

  let ctx = HdrCtx {
    cfg: cfg,
    bsi: bsi,
    codes: codes,
    texel_count: texel_count,
    cw: [cfg.cw_r, cfg.cw_g, cfg.cw_b, cfg.cw_a],
  };

  // Fallback constant block from the average and its error as baseline
  let mut avg = [0f32; 4];
  for t in texels {
    for c in 0..4 {
      avg[c] += t[c] / texel_count as f32;
    }
  }
  let fallback_bytes = symbolic::constant_block_bytes(f16_of(&avg), true);
  let avg_code = [
    to_code(cfg, f16::from_f32(avg[0]).to_f32(), false) as i32,
    to_code(cfg, f16::from_f32(avg[1]).to_f32(), false) as i32,
    to_code(cfg, f16::from_f32(avg[2]).to_f32(), false) as i32,
    to_code(cfg, f16::from_f32(avg[3]).to_f32(), true) as i32,
  ];
  let mut best_err = 0.0f64;
  for code in ctx.codes.iter() {
    for c in 0..4 {
      let d = (code[c] - avg_code[c]) as f64;
      best_err += ctx.cw[c] as f64 * d * d;
    }
  }
  let mut best: Option<BlockPayload> = None;

  // Alpha handling decides the format family
  let alpha_all_one = texels.iter().all(|t| t[3] == 1.0);
  let grey = ctx.codes.iter().all(|c| c[0] == c[1] && c[1] == c[2]);
  let format = if grey && alpha_all_one {
    let span = ctx.codes.iter().map(|c| c[0]).max().unwrap()
      - ctx.codes.iter().map(|c| c[0]).min().unwrap();
    if code12(span.clamp(0, 0xFFFF) as u16) < 32 {
      FMT_HDR_LUMINANCE_SMALL_RANGE
    } else {
      FMT_HDR_LUMINANCE_LARGE_RANGE
    }
  } else if alpha_all_one {
    FMT_HDR_RGB
  } else if cfg.profile == Profile::HdrRgbLdrA {
    FMT_HDR_RGB_LDR_ALPHA
  } else {
    FMT_HDR_RGBA
  };

  let tune = &cfg.tune;
  let mut shortlists: Vec<Vec<(u32, f64)>> = vec![vec![(0, 0.0)]];
  let max_pc_for_ints = (MAX_COLOR_VALUES as u32) / endpoint::format_int_count(format);
  let max_pc = tune.max_partition_count.min(max_pc_for_ints).min(4).max(1);
  for pc in 2..=max_pc {
    shortlists.push(partition_shortlist(
      bsi,
      &ctx.codes,
      pc,
      !alpha_all_one,
      tune.partition_index_limit[(pc - 2) as usize],
      tune.partitioning_candidate_limit[(pc - 2) as usize] as usize,
    ));
  }

  let all_modes = bsi.sorted_modes();
  let searched = (all_modes.len() * tune.block_mode_limit as usize / 100).max(1);

  for &mode_id in &all_modes[..searched] {
    let entry = bsi.mode(mode_id as u32).unwrap();
    for pc in 1..=max_pc {
      for &(seed, _) in shortlists[(pc - 1) as usize].iter() {
        if let Some((err, payload)) =
          ctx.try_combo(entry, mode_id as u32, format, pc, seed, best_err)
        {
          best_err = err;
          best = Some(payload);
        }
      }
    }
  }

  let best = match best {
    Some(b) => b,
    None => return fallback_bytes,
  };
  match symbolic::symbolic_to_physical(bsi, &best) {
    Some(bytes) => match symbolic::physical_to_symbolic(bsi, &bytes) {
      SymbolicBlock::Error => fallback_bytes,
      _ => bytes,
    },
    None => fallback_bytes,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blocksize::block_size_info;
  use crate::config::Flags;

  #[test]
  fn constant_hdr_block_is_void_extent_f16() {
    let cfg = Config::new(Profile::Hdr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
    let bsi = block_size_info(4, 4, 1);
    let texels = [[1.5f32, 0.25, 4.0, 1.0]; 16];
    let bytes = compress_block_hdr(&cfg, &bsi, &texels);
    assert_eq!(&bytes[..8], &[0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    let sym = symbolic::physical_to_symbolic(&bsi, &bytes);
    match sym {
      SymbolicBlock::ConstantF16 { rgba } => {
        assert_eq!(rgba[0], f16::from_f32(1.5).to_bits());
        assert_eq!(rgba[3], f16::from_f32(1.0).to_bits());
      }
      other => panic!("expected constant, got {:?}", other),
    }
  }

  #[test]
  fn varying_hdr_block_improves_on_average() {
    let cfg = Config::new(Profile::Hdr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
    let bsi = block_size_info(4, 4, 1);
    let mut texels = [[0f32; 4]; 16];
    for (i, t) in texels.iter_mut().enumerate() {
      let v = 0.25 + i as f32 * 0.5;
      *t = [v, v * 0.5, v * 2.0, 1.0];
    }
    let bytes = compress_block_hdr(&cfg, &bsi, &texels);
    let sym = symbolic::physical_to_symbolic(&bsi, &bytes);
    assert_ne!(sym, SymbolicBlock::Error);

    // The output should track the gradient rather than collapse to one color
    let mut out = vec![[0f32; 4]; 16];
    paint::decode_block_f32(&bsi, Profile::Hdr, &sym, &mut out);
    assert!(out[15][0] > out[0][0]);
  }

  #[test]
  fn hybrid_profile_uses_ldr_alpha_format() {
    let cfg = Config::new(Profile::HdrRgbLdrA, 4, 4, 1, 60.0, Flags::empty()).unwrap();
    let bsi = block_size_info(4, 4, 1);
    let mut texels = [[0f32; 4]; 16];
    for (i, t) in texels.iter_mut().enumerate() {
      *t = [i as f32 * 0.3, 1.0, 0.5, (i as f32) / 16.0];
    }
    let bytes = compress_block_hdr(&cfg, &bsi, &texels);
    match symbolic::physical_to_symbolic(&bsi, &bytes) {
      SymbolicBlock::Block(pb) => {
        assert_eq!(pb.color_formats[0] as u32, FMT_HDR_RGB_LDR_ALPHA);
      }
      SymbolicBlock::ConstantF16 { .. } => panic!("unexpected constant"),
      other => panic!("unexpected {:?}", other),
    }
  }
}
