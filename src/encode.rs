// The LDR U8 block encoder: search over block modes, partitionings and
// endpoint quantization for the 128-bit encoding minimizing the weighted
// error metric. The search never does worse than a constant-average
// block, because that candidate seeds the running best.

use std::sync::OnceLock;

use crate::blocksize::{BlockSizeInfo, ModeEntry};
use crate::config::{Config, Flags};
use crate::decimation::Decimation;
use crate::endpoint::{
  FMT_LUMINANCE, FMT_LUMINANCE_ALPHA, FMT_RGB, FMT_RGBA,
};
use crate::ise;
use crate::paint;
use crate::quant::{self, Quant};
use crate::symbolic::{
  self, BlockPayload, SymbolicBlock, MAX_COLOR_VALUES, PLANE2_WEIGHT_OFFSET,
};

/// How the candidate error is measured against the source block.
pub(crate) enum ErrorMetric {
  /// Weighted SSE in UNORM16 space; optional per-texel alpha weighting.
  WeightedSse { cw: [f32; 4], alpha_weight: bool },
  /// Angular error against the reconstructed source normal.
  NormalMap,
  /// Squared error between RGBM-decoded linear values.
  Rgbm { scale: f32 },
}

// (R, A) -> unit normal lookup for the normal-map metric.
fn normal_lut() -> &'static Vec<[f32; 3]> {
  static LUT: OnceLock<Vec<[f32; 3]>> = OnceLock::new();
  LUT.get_or_init(|| {
    let mut lut = Vec::with_capacity(65536);
    for ra in 0..65536u32 {
      let x = (ra & 0xFF) as f32 / 255.0 * 2.0 - 1.0;
      let y = (ra >> 8) as f32 / 255.0 * 2.0 - 1.0;
      let z = (1.0 - x * x - y * y).max(0.0).sqrt();
      let len = (x * x + y * y + z * z).sqrt().max(1e-9);
      lut.push([x / len, y / len, z / len]);
    }
    lut
  })
}

impl ErrorMetric {
  pub(crate) fn for_config(cfg: &Config) -> ErrorMetric {
    if cfg.flags.contains(Flags::MAP_NORMAL) {
      ErrorMetric::NormalMap
    } else if cfg.flags.contains(Flags::MAP_RGBM) {
      ErrorMetric::Rgbm { scale: cfg.rgbm_scale }
    } else {
      ErrorMetric::WeightedSse {
        cw: [cfg.cw_r, cfg.cw_g, cfg.cw_b, cfg.cw_a],
        alpha_weight: cfg.flags.contains(Flags::USE_ALPHA_WEIGHT),
      }
    }
  }

  /// Accumulated error of `dec` against `src`, stopping early once it
  /// exceeds `limit`.
  pub(crate) fn block_error(&self, src: &[[u8; 4]], dec: &[[u8; 4]], limit: f64) -> f64 {
    let mut err = 0.0f64;
    match self {
      ErrorMetric::WeightedSse { cw, alpha_weight } => {
        for (s, d) in src.iter().zip(dec.iter()) {
          let texel_w = if *alpha_weight { s[3] as f64 / 255.0 } else { 1.0 };
          for c in 0..4 {
            let diff = (s[c] as i32 - d[c] as i32) as f64 * 257.0;
            err += cw[c] as f64 * texel_w * diff * diff;
          }
          if err > limit {
            return err;
          }
        }
      }
      ErrorMetric::NormalMap => {
        let lut = normal_lut();
        for (s, d) in src.iter().zip(dec.iter()) {
          let ns = lut[s[0] as usize | (s[3] as usize) << 8];
          let nd = lut[d[0] as usize | (d[3] as usize) << 8];
          let dot = ns[0] * nd[0] + ns[1] * nd[1] + ns[2] * nd[2];
          err += (1.0 - dot as f64).max(0.0) * 65535.0 * 65535.0;
          if err > limit {
            return err;
          }
        }
      }
      ErrorMetric::Rgbm { scale } => {
        for (s, d) in src.iter().zip(dec.iter()) {
          let sa = s[3] as f64 / 255.0 * *scale as f64;
          let da = d[3] as f64 / 255.0 * *scale as f64;
          for c in 0..3 {
            let sl = (s[c] as f64 / 255.0 * sa).min(1e15);
            let dl = (d[c] as f64 / 255.0 * da).min(1e15);
            let diff = (sl - dl) * 65535.0;
            err += diff * diff;
          }
          if err > limit {
            return err;
          }
        }
      }
    }
    err
  }
}

/// Shortlist of promising partition seeds, smallest within-partition
/// variance first.
pub(crate) fn partition_shortlist(
  bsi: &BlockSizeInfo,
  codes: &[[i32; 4]],
  partition_count: u32,
  use_alpha: bool,
  scan_limit: u32,
  keep: usize,
) -> Vec<(u32, f64)> {
  let table = bsi.partition_table(partition_count);
  let mut best: Vec<(u32, f64)> = Vec::with_capacity(keep);
  let channels = if use_alpha { 4 } else { 3 };

  for seed in 0..scan_limit.min(1024) {
    if !table.is_usable(seed) {
      continue;
    }
    let row = table.row(seed);
    let mut count = [0i64; 4];
    let mut sum = [[0i64; 4]; 4];
    let mut sum_sq = [[0i64; 4]; 4];
    for (i, &p) in row.iter().enumerate() {
      let p = p as usize;
      count[p] += 1;
      for c in 0..channels {
        let v = codes[i][c] as i64;
        sum[p][c] += v;
        sum_sq[p][c] += v * v;
      }
    }
    let mut score = 0.0f64;
    for p in 0..partition_count as usize {
      for c in 0..channels {
        score += sum_sq[p][c] as f64 - (sum[p][c] * sum[p][c]) as f64 / count[p] as f64;
      }
    }

    if best.len() < keep {
      best.push((seed, score));
    } else {
      // Replace the current worst; ties keep the lower seed
      let (worst_i, &(_, worst)) = best
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap())
        .unwrap();
      if score < worst {
        best[worst_i] = (seed, score);
      }
    }
  }
  best.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
  best
}

/// Ideal per-texel weights projected onto the grid, then quantized.
/// `ideal` is in 0..=64 per texel; the result lands in `grid_out`.
pub(crate) fn grid_weights_from_ideal(
  dec: &Decimation,
  ideal: &[f32],
  wquant: Quant,
  grid_out: &mut [u8],
) {
  let qt = quant::weight_quant_table(wquant);
  let unq = quant::weight_unquant_table(wquant);
  if dec.is_direct {
    for (i, &w) in ideal.iter().enumerate() {
      let q = qt[w.round().clamp(0.0, 64.0) as usize];
      grid_out[i] = unq[q as usize];
    }
    return;
  }

  let n = dec.weight_count as usize;
  let mut acc = vec![0.0f32; n];
  let mut den = vec![0.0f32; n];
  for (t, &w) in ideal.iter().enumerate() {
    let taps = &dec.taps[t];
    for k in 0..4 {
      let c = taps.w[k] as f32;
      if c > 0.0 {
        acc[taps.idx[k] as usize] += c * w;
        den[taps.idx[k] as usize] += c;
      }
    }
  }
  for g in 0..n {
    let w = if den[g] > 0.0 { acc[g] / den[g] } else { 32.0 };
    let q = qt[w.round().clamp(0.0, 64.0) as usize];
    grid_out[g] = unq[q as usize];
  }
}

/// Project texels of one partition onto the endpoint line; 0..=64.
pub(crate) fn ideal_weights(
  codes: &[[i32; 4]],
  assignment: impl Fn(usize) -> usize,
  part: usize,
  e0: &[f32; 4],
  e1: &[f32; 4],
  cw: &[f32; 4],
  out: &mut [f32],
) {
  let dir = [e1[0] - e0[0], e1[1] - e0[1], e1[2] - e0[2], e1[3] - e0[3]];
  let mut den = 0.0f32;
  for c in 0..4 {
    den += dir[c] * dir[c] * cw[c];
  }
  for (i, code) in codes.iter().enumerate() {
    if assignment(i) != part {
      continue;
    }
    if den <= f32::EPSILON {
      out[i] = 0.0;
      continue;
    }
    let mut num = 0.0f32;
    for c in 0..4 {
      num += (code[c] as f32 - e0[c]) * dir[c] * cw[c];
    }
    out[i] = (64.0 * num / den).clamp(0.0, 64.0);
  }
}

/// Least-squares endpoint update for one channel given texel weights.
/// Returns the refitted (e0, e1) or None if the system is degenerate.
pub(crate) fn refit_channel(
  values: impl Iterator<Item = (f32, f32)>,
) -> Option<(f32, f32)> {
  let mut a = 0.0f64;
  let mut b = 0.0f64;
  let mut c = 0.0f64;
  let mut d0 = 0.0f64;
  let mut d1 = 0.0f64;
  for (t, w) in values {
    let w = w as f64 / 64.0;
    let iw = 1.0 - w;
    a += iw * iw;
    b += iw * w;
    c += w * w;
    d0 += t as f64 * iw;
    d1 += t as f64 * w;
  }
  let det = a * c - b * b;
  if det.abs() < 1e-7 {
    return None;
  }
  Some((((c * d0 - b * d1) / det) as f32, ((a * d1 - b * d0) / det) as f32))
}

// One combination under evaluation.
struct Candidate {
  err: f64,
  payload: BlockPayload,
}

struct SearchCtx<'a> {
  cfg: &'a Config,
  bsi: &'a BlockSizeInfo,
  metric: ErrorMetric,
  codes: [[i32; 4]; 216],
  src_u8: [[u8; 4]; 216],
  texel_count: usize,
  grey: bool,
  alpha_opaque: bool,
  alpha_varies: bool,
  cw: [f32; 4],
}

impl<'a> SearchCtx<'a> {
  fn format_for(&self, _pc: u32) -> u32 {
    if self.cfg.flags.contains(Flags::MAP_NORMAL) {
      FMT_LUMINANCE_ALPHA
    } else if self.grey && self.alpha_opaque {
      FMT_LUMINANCE
    } else if self.grey {
      FMT_LUMINANCE_ALPHA
    } else if self.alpha_opaque {
      FMT_RGB
    } else {
      FMT_RGBA
    }
  }

  fn luma(&self, i: usize) -> i32 {
    let c = &self.codes[i];
    c[0] + c[1] + c[2]
  }

  /// Representative endpoint pair for one partition: the extreme-luma
  /// texels, alpha breaking ties.
  fn representative_endpoints(
    &self,
    assignment: &dyn Fn(usize) -> usize,
    part: usize,
  ) -> ([i32; 4], [i32; 4]) {
    let mut lo: Option<usize> = None;
    let mut hi: Option<usize> = None;
    for i in 0..self.texel_count {
      if assignment(i) != part {
        continue;
      }
      let better_lo = match lo {
        None => true,
        Some(j) => {
          let (li, lj) = (self.luma(i), self.luma(j));
          li < lj || (li == lj && self.codes[i][3] < self.codes[j][3])
        }
      };
      if better_lo {
        lo = Some(i);
      }
      let better_hi = match hi {
        None => true,
        Some(j) => {
          let (li, lj) = (self.luma(i), self.luma(j));
          li > lj || (li == lj && self.codes[i][3] > self.codes[j][3])
        }
      };
      if better_hi {
        hi = Some(i);
      }
    }
    match (lo, hi) {
      (Some(l), Some(h)) => (self.codes[l], self.codes[h]),
      _ => ([0; 4], [0; 4]),
    }
  }

  /// Quantize an endpoint pair into the block's color integers, fixing up
  /// the order so the decoder's sum comparison keeps our orientation.
  /// Returns (values, decoded_e0, decoded_e1, swapped).
  fn quantize_endpoints(
    &self,
    format: u32,
    cquant: Quant,
    e0: [i32; 4],
    e1: [i32; 4],
  ) -> ([u8; 8], [i32; 4], [i32; 4], bool) {
    let qt = quant::color_quant_table(cquant);
    let unq = quant::color_unquant_table(cquant);
    let q = |v: i32| -> (u8, i32) {
      let ch = qt[v.clamp(0, 255) as usize];
      (ch, unq[ch as usize] as i32)
    };

    let mut vals = [0u8; 8];
    let mut d0 = [0i32; 4];
    let mut d1 = [0i32; 4];
    let mut swapped = false;
    match format {
      FMT_LUMINANCE => {
        let (c0, u0) = q(e0[0]);
        let (c1, u1) = q(e1[0]);
        vals[0] = c0;
        vals[1] = c1;
        d0 = [u0, u0, u0, 255];
        d1 = [u1, u1, u1, 255];
      }
      FMT_LUMINANCE_ALPHA => {
        let (c0, u0) = q(e0[0]);
        let (c1, u1) = q(e1[0]);
        let (c2, u2) = q(e0[3]);
        let (c3, u3) = q(e1[3]);
        vals[0] = c0;
        vals[1] = c1;
        vals[2] = c2;
        vals[3] = c3;
        d0 = [u0, u0, u0, u2];
        d1 = [u1, u1, u1, u3];
      }
      FMT_RGB | FMT_RGBA => {
        let mut ch = [0u8; 8];
        let mut u0 = [0i32; 4];
        let mut u1 = [0i32; 4];
        for c in 0..3 {
          let (a, ua) = q(e0[c]);
          let (b, ub) = q(e1[c]);
          ch[c * 2] = a;
          ch[c * 2 + 1] = b;
          u0[c] = ua;
          u1[c] = ub;
        }
        if format == FMT_RGBA {
          let (a, ua) = q(e0[3]);
          let (b, ub) = q(e1[3]);
          ch[6] = a;
          ch[7] = b;
          u0[3] = ua;
          u1[3] = ub;
        } else {
          u0[3] = 255;
          u1[3] = 255;
        }
        // The decoder swaps and blue-contracts when the second sum is
        // lower; store the pair so that never fires
        let s0 = u0[0] + u0[1] + u0[2];
        let s1 = u1[0] + u1[1] + u1[2];
        if s1 < s0 {
          std::mem::swap(&mut u0, &mut u1);
          for c in 0..4 {
            ch.swap(c * 2, c * 2 + 1);
          }
          swapped = true;
        }
        vals = ch;
        d0 = u0;
        d1 = u1;
      }
      _ => unreachable!("LDR encoder format"),
    }
    (vals, d0, d1, swapped)
  }

  /// Evaluate one (mode, partitioning, dual-plane) combination.
  fn try_combo(
    &self,
    entry: &ModeEntry,
    mode_id: u32,
    pc: u32,
    seed: u32,
    dual_component: Option<u32>,
    best_err: f64,
  ) -> Option<Candidate> {
    let mode = &entry.mode;
    if mode.dual_plane != dual_component.is_some() {
      return None;
    }
    if mode.dual_plane && pc == 4 {
      return None;
    }

    let format = self.format_for(pc);
    let ints = crate::endpoint::format_int_count(format) * pc;
    if ints as usize > MAX_COLOR_VALUES {
      return None;
    }

    let mut color_bits = [0i32, 111, 99, 99, 99][pc as usize] - mode.weight_bits as i32;
    if mode.dual_plane {
      color_bits -= 2;
    }
    let color_bits = color_bits.max(0) as u32;
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

    let assignment = |i: usize| -> usize {
      self.bsi.partition_of(pc, seed, i) as usize
    };

    let mut color_values = [0u8; MAX_COLOR_VALUES];
    let mut ideal = vec![0.0f32; self.texel_count];
    let mut ideal_p2 = vec![0.0f32; self.texel_count];
    let stride = crate::endpoint::format_int_count(format) as usize;

    for part in 0..pc as usize {
      let (r0, r1) = self.representative_endpoints(&assignment, part);
      let (vals, d0, d1, _swapped) =
        self.quantize_endpoints(format, cquant, r0, r1);
      color_values[part * stride..part * stride + stride]
        .copy_from_slice(&vals[..stride]);

      let e0 = [d0[0] as f32, d0[1] as f32, d0[2] as f32, d0[3] as f32];
      let e1 = [d1[0] as f32, d1[1] as f32, d1[2] as f32, d1[3] as f32];
      if let Some(comp) = dual_component {
        // Plane 1 carries every channel but `comp`
        let mut cw1 = self.cw;
        cw1[comp as usize] = 0.0;
        ideal_weights(
          &self.codes[..self.texel_count],
          assignment,
          part,
          &e0,
          &e1,
          &cw1,
          &mut ideal,
        );
        let mut cw2 = [0.0f32; 4];
        cw2[comp as usize] = 1.0;
        ideal_weights(
          &self.codes[..self.texel_count],
          assignment,
          part,
          &e0,
          &e1,
          &cw2,
          &mut ideal_p2,
        );
      } else {
        ideal_weights(
          &self.codes[..self.texel_count],
          assignment,
          part,
          &e0,
          &e1,
          &self.cw,
          &mut ideal,
        );
      }
    }

    let mut weights = [0u8; 64];
    let gcount = entry.decimation.weight_count as usize;
    grid_weights_from_ideal(
      &entry.decimation,
      &ideal,
      mode.weight_quant,
      &mut weights[..gcount],
    );
    if dual_component.is_some() {
      let mut p2 = [0u8; 32];
      grid_weights_from_ideal(
        &entry.decimation,
        &ideal_p2,
        mode.weight_quant,
        &mut p2[..gcount],
      );
      weights[PLANE2_WEIGHT_OFFSET..PLANE2_WEIGHT_OFFSET + gcount]
        .copy_from_slice(&p2[..gcount]);
    }

    let mut color_formats = [0u8; 4];
    for p in 0..pc as usize {
      color_formats[p] = format as u8;
    }
    let payload = BlockPayload {
      block_mode: mode_id,
      partition_count: pc,
      partition_index: seed,
      color_formats: color_formats,
      color_values: color_values,
      color_quant: cquant,
      plane2_component: dual_component,
      weights: weights,
      is_dual_plane: mode.dual_plane,
    };

    let err = self.payload_error(&payload, best_err);
    if err >= best_err {
      return None;
    }
    Some(Candidate { err: err, payload: payload })
  }

  fn payload_error(&self, payload: &BlockPayload, limit: f64) -> f64 {
    let mut dec = [[0u8; 4]; 216];
    paint::decode_block_u8(
      self.bsi,
      self.cfg.profile,
      &SymbolicBlock::Block(Box::new(payload.clone())),
      &mut dec[..self.texel_count],
    );
    self
      .metric
      .block_error(&self.src_u8[..self.texel_count], &dec[..self.texel_count], limit)
  }

  /// One round of least-squares endpoint refinement followed by weight
  /// recomputation. Replaces the candidate when it improves.
  fn refine(&self, cand: &mut Candidate) {
    let entry = match self.bsi.mode(cand.payload.block_mode) {
      Some(e) => e,
      None => return,
    };
    let pc = cand.payload.partition_count;
    let seed = cand.payload.partition_index;
    let format = cand.payload.color_formats[0] as u32;
    let cquant = cand.payload.color_quant;
    let stride = crate::endpoint::format_int_count(format) as usize;
    let assignment = |i: usize| -> usize { self.bsi.partition_of(pc, seed, i) as usize };

    // Current per-texel weights via the infill table; the plane-2 channel
    // refits against its own weight stream
    let mut texw = vec![0.0f32; self.texel_count];
    let mut texw2 = vec![0.0f32; self.texel_count];
    for i in 0..self.texel_count {
      texw[i] = entry.decimation.texel_weight(&cand.payload.weights, i) as f32;
      if cand.payload.is_dual_plane {
        texw2[i] = entry
          .decimation
          .texel_weight(&cand.payload.weights[PLANE2_WEIGHT_OFFSET..], i)
          as f32;
      }
    }
    let plane2 = cand.payload.plane2_component;

    let mut refined = cand.payload.clone();
    for part in 0..pc as usize {
      let fit = |channel: usize| -> Option<(f32, f32)> {
        let w_of = |i: usize| -> f32 {
          if plane2 == Some(channel as u32) {
            texw2[i]
          } else {
            texw[i]
          }
        };
        refit_channel(
          (0..self.texel_count)
            .filter(|&i| assignment(i) == part)
            .map(|i| (self.codes[i][channel] as f32, w_of(i))),
        )
      };
      let (mut e0, mut e1) = ([0i32; 4], [0i32; 4]);
      let clamp255 = |v: f32| v.round().clamp(0.0, 255.0) as i32;
      match format {
        FMT_LUMINANCE | FMT_LUMINANCE_ALPHA => {
          if let Some((a, b)) = fit(0) {
            e0[0] = clamp255(a);
            e1[0] = clamp255(b);
          } else {
            return;
          }
          if format == FMT_LUMINANCE_ALPHA {
            if let Some((a, b)) = fit(3) {
              e0[3] = clamp255(a);
              e1[3] = clamp255(b);
            } else {
              return;
            }
          }
        }
        _ => {
          for c in 0..4 {
            if format == FMT_RGB && c == 3 {
              continue;
            }
            if let Some((a, b)) = fit(c) {
              e0[c] = clamp255(a);
              e1[c] = clamp255(b);
            } else {
              return;
            }
          }
        }
      }
      let (vals, _, _, swapped) = self.quantize_endpoints(format, cquant, e0, e1);
      if swapped {
        // The weights no longer face the stored endpoint order and the
        // partitions share them, so this round cannot land
        return;
      }
      refined.color_values[part * stride..part * stride + stride]
        .copy_from_slice(&vals[..stride]);
    }

    let err = self.payload_error(&refined, cand.err);
    if err < cand.err {
      cand.err = err;
      cand.payload = refined;
    }
  }
}

/// Compress one block of already-swizzled RGBA8 texels.
pub fn compress_block_u8(cfg: &Config, bsi: &BlockSizeInfo, texels: &[[u8; 4]]) -> [u8; 16] {
  let texel_count = bsi.texel_count as usize;
  assert!(texels.len() == texel_count);

  // Uniform blocks take the void-extent shortcut
  if texels.iter().all(|&t| t == texels[0]) {
    let c = texels[0];
    return symbolic::constant_block_bytes(
      [
        c[0] as u16 * 257,
        c[1] as u16 * 257,
        c[2] as u16 * 257,
        c[3] as u16 * 257,
      ],
      false,
    );
  }

  let tune = &cfg.tune;
  let mut codes = [[0i32; 4]; 216];
  for (i, t) in texels.iter().enumerate() {
    codes[i] = [t[0] as i32, t[1] as i32, t[2] as i32, t[3] as i32];
  }

  let grey = texels.iter().all(|t| t[0] == t[1] && t[1] == t[2]);
  let alpha_min = texels.iter().map(|t| t[3]).min().unwrap();
  let alpha_max = texels.iter().map(|t| t[3]).max().unwrap();

  let mut src_u8 = [[0u8; 4]; 216];
  src_u8[..texel_count].copy_from_slice(texels);

  let ctx = SearchCtx {
    cfg: cfg,
    bsi: bsi,
    metric: ErrorMetric::for_config(cfg),
    codes: codes,
    src_u8: src_u8,
    texel_count: texel_count,
    grey: grey,
    alpha_opaque: alpha_min == 255,
    alpha_varies: alpha_min != alpha_max,
    cw: [cfg.cw_r, cfg.cw_g, cfg.cw_b, cfg.cw_a],
  };

  // The constant-average block seeds the search; sampling it through the
  // error metric guarantees we never regress below it
  let mut avg = [0u32; 4];
  for t in texels {
    for c in 0..4 {
      avg[c] += t[c] as u32;
    }
  }
  let avg: [u8; 4] = {
    let n = texel_count as u32;
    [
      ((avg[0] + n / 2) / n) as u8,
      ((avg[1] + n / 2) / n) as u8,
      ((avg[2] + n / 2) / n) as u8,
      ((avg[3] + n / 2) / n) as u8,
    ]
  };
  let fallback_bytes = symbolic::constant_block_bytes(
    [
      avg[0] as u16 * 257,
      avg[1] as u16 * 257,
      avg[2] as u16 * 257,
      avg[3] as u16 * 257,
    ],
    false,
  );
  let const_dec = [avg; 216];
  let mut best_err = ctx.metric.block_error(
    &ctx.src_u8[..texel_count],
    &const_dec[..texel_count],
    f64::INFINITY,
  );
  let mut best: Option<Candidate> = None;

  // Good-enough threshold from the dB limit, widened by the overshoot
  let sum_cw: f32 = ctx.cw.iter().sum();
  let db_stop = 10f64.powf(-(tune.db_limit as f64) / 10.0)
    * 65535.0
    * 65535.0
    * texel_count as f64
    * sum_cw as f64
    * tune.mse_overshoot.max(1.0) as f64
    / 4.0;

  // Dual-plane gating: only when alpha varies and decorrelates from luma
  let dual_component = if ctx.alpha_varies && !cfg.flags.contains(Flags::MAP_RGBM) {
    let corr = alpha_luma_correlation(&ctx.codes[..texel_count]);
    if corr.abs() < tune.plane_early_out_limit_correlation {
      Some(3u32)
    } else {
      None
    }
  } else {
    None
  };

  // Partition shortlists per partition count
  let mut shortlists: Vec<Vec<(u32, f64)>> = vec![vec![(0, 0.0)]];
  for pc in 2..=tune.max_partition_count.min(4) {
    shortlists.push(partition_shortlist(
      bsi,
      &ctx.codes[..texel_count],
      pc,
      ctx.alpha_varies,
      tune.partition_index_limit[(pc - 2) as usize],
      tune.partitioning_candidate_limit[(pc - 2) as usize] as usize,
    ));
  }

  // Sorted mode list, truncated by the block-mode budget
  let all_modes = bsi.sorted_modes();
  let searched = (all_modes.len() * tune.block_mode_limit as usize / 100).max(1);
  let mut mode_ids: Vec<u16> = all_modes[..searched].to_vec();
  if tune.search_mode0_enable {
    // Keep one undecimated single-plane baseline in the pool
    if let Some(&m) = all_modes.iter().find(|&&m| {
      let e = bsi.mode(m as u32).unwrap();
      e.decimation.is_direct && !e.mode.dual_plane
    }) {
      if !mode_ids.contains(&m) {
        mode_ids.push(m);
      }
    }
  }

  let mut candidates: Vec<Candidate> = Vec::new();
  'modes: for &mode_id in &mode_ids {
    let entry = bsi.mode(mode_id as u32).unwrap();
    for pc in 1..=tune.max_partition_count.min(4) {
      let seeds = &shortlists[(pc - 1) as usize];
      for &(seed, score) in seeds.iter() {
        // Partition variance lower bound: a hopeless split is skipped
        if pc > 1
          && score * 257.0 * 257.0
            > best_err * tune.partition_early_out_limit_factor.max(1.0) as f64
        {
          continue;
        }
        let dc = if entry.mode.dual_plane {
          match dual_component {
            Some(c) => Some(c),
            None => continue,
          }
        } else {
          None
        };
        if let Some(cand) = ctx.try_combo(entry, mode_id as u32, pc, seed, dc, best_err) {
          best_err = cand.err;
          candidates.push(cand);
          candidates.sort_by(|a, b| a.err.partial_cmp(&b.err).unwrap());
          candidates.truncate(tune.candidate_limit as usize);
          if best_err <= db_stop {
            break 'modes;
          }
        }
      }
    }
  }

  // Refinement on the survivors
  for cand in candidates.iter_mut() {
    for _ in 0..tune.refinement_limit {
      ctx.refine(cand);
    }
  }
  for cand in candidates {
    match &best {
      Some(b) if b.err <= cand.err => {}
      _ => best = Some(cand),
    }
  }

  let best = match best {
    Some(b) => b,
    None => return fallback_bytes,
  };

  match symbolic::symbolic_to_physical(bsi, &best.payload) {
    Some(bytes) => {
      // A block that does not survive its own parse is discarded
      match symbolic::physical_to_symbolic(bsi, &bytes) {
        SymbolicBlock::Error => fallback_bytes,
        _ => bytes,
      }
    }
    None => fallback_bytes,
  }
}

fn alpha_luma_correlation(codes: &[[i32; 4]]) -> f32 {
  let n = codes.len() as f64;
  let mut sl = 0.0;
  let mut sa = 0.0;
  let mut sll = 0.0;
  let mut saa = 0.0;
  let mut sla = 0.0;
  for c in codes {
    let l = (c[0] + c[1] + c[2]) as f64;
    let a = c[3] as f64;
    sl += l;
    sa += a;
    sll += l * l;
    saa += a * a;
    sla += l * a;
  }
  let cov = sla - sl * sa / n;
  let vl = sll - sl * sl / n;
  let va = saa - sa * sa / n;
  if vl <= 0.0 || va <= 0.0 {
    return 1.0;
  }
  (cov / (vl * va).sqrt()) as f32
}
