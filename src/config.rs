// Codec configuration: color profile, mode flags, swizzles, channel
// weights and the search-effort tuning derived from a quality value.

use bitflags::bitflags;

use crate::error::Error;
use crate::util::lerp;

/// Color profile the codec operates in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Profile {
  /// LDR, linear RGBA.
  Ldr,
  /// LDR with sRGB-encoded RGB.
  LdrSrgb,
  /// HDR RGB with LDR alpha.
  HdrRgbLdrA,
  /// HDR in all four components.
  Hdr,
}

impl Profile {
  pub fn is_hdr(self) -> bool {
    matches!(self, Profile::HdrRgbLdrA | Profile::Hdr)
  }
}

bitflags! {
  /// Optional codec behaviors.
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct Flags: u32 {
    /// Two-component normal map: L+A endpoints and angular error.
    const MAP_NORMAL = 1 << 0;
    /// Round float decode output through the 8-bit painter (LDR only).
    const USE_DECODE_UNORM8 = 1 << 1;
    /// Weight RGB error by the texel's alpha.
    const USE_ALPHA_WEIGHT = 1 << 2;
    /// Perceptual RGB error weights.
    const USE_PERCEPTUAL = 1 << 3;
    /// Context never compresses.
    const DECOMPRESS_ONLY = 1 << 4;
    /// Context only decompresses its own output.
    const SELF_DECOMPRESS_ONLY = 1 << 5;
    /// Shared-multiplier RGBM encoding.
    const MAP_RGBM = 1 << 6;
  }
}

/// One component of a swizzle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Selector {
  R,
  G,
  B,
  A,
  Zero,
  One,
  /// Reconstructed normal Z; decompression only.
  Z,
}

/// RGBA component routing applied on the way in and out of the codec.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Swizzle {
  pub r: Selector,
  pub g: Selector,
  pub b: Selector,
  pub a: Selector,
}

impl Swizzle {
  pub fn rgba() -> Self {
    Swizzle { r: Selector::R, g: Selector::G, b: Selector::B, a: Selector::A }
  }

  pub fn components(&self) -> [Selector; 4] {
    [self.r, self.g, self.b, self.a]
  }

  pub(crate) fn validate(&self, decompress: bool) -> Result<(), Error> {
    for c in self.components() {
      if c == Selector::Z && !decompress {
        return Err(Error::BadSwizzle);
      }
    }
    Ok(())
  }
}

/// Search-effort knobs. Resolved from the quality value at config time and
/// then freely adjustable before the context is built.
#[derive(Copy, Clone, Debug)]
pub struct Tuning {
  pub max_partition_count: u32,
  /// Seeds scored in the partition shortlist, per partition count 2..4.
  pub partition_index_limit: [u32; 3],
  /// Percentage of the sorted block-mode list to search.
  pub block_mode_limit: u32,
  pub refinement_limit: u32,
  pub candidate_limit: u32,
  /// Shortlisted seeds fully evaluated, per partition count 2..4.
  pub partitioning_candidate_limit: [u32; 3],
  /// PSNR (dB) at which the search stops early.
  pub db_limit: f32,
  pub mse_overshoot: f32,
  pub partition_early_out_limit_factor: f32,
  pub plane_early_out_limit_correlation: f32,
  pub search_mode0_enable: bool,
}

// Anchor presets: Fastest, Fast, Medium, Thorough, VeryThorough, Exhaustive
const PRESET_QUALITY: [f32; 6] = [0.0, 10.0, 60.0, 98.0, 99.0, 100.0];

const PRESETS: [Tuning; 6] = [
  Tuning {
    max_partition_count: 1,
    partition_index_limit: [16, 8, 8],
    block_mode_limit: 4,
    refinement_limit: 1,
    candidate_limit: 1,
    partitioning_candidate_limit: [1, 1, 1],
    db_limit: 30.0,
    mse_overshoot: 1.0,
    partition_early_out_limit_factor: 1.0,
    plane_early_out_limit_correlation: 0.5,
    search_mode0_enable: true,
  },
  Tuning {
    max_partition_count: 2,
    partition_index_limit: [64, 32, 16],
    block_mode_limit: 8,
    refinement_limit: 1,
    candidate_limit: 2,
    partitioning_candidate_limit: [1, 1, 1],
    db_limit: 35.0,
    mse_overshoot: 1.0,
    partition_early_out_limit_factor: 1.0,
    plane_early_out_limit_correlation: 0.5,
    search_mode0_enable: true,
  },
  Tuning {
    max_partition_count: 3,
    partition_index_limit: [128, 64, 32],
    block_mode_limit: 16,
    refinement_limit: 2,
    candidate_limit: 3,
    partitioning_candidate_limit: [2, 2, 2],
    db_limit: 42.0,
    mse_overshoot: 1.2,
    partition_early_out_limit_factor: 1.2,
    plane_early_out_limit_correlation: 0.75,
    search_mode0_enable: true,
  },
  Tuning {
    max_partition_count: 4,
    partition_index_limit: [256, 128, 64],
    block_mode_limit: 35,
    refinement_limit: 3,
    candidate_limit: 4,
    partitioning_candidate_limit: [2, 2, 2],
    db_limit: 49.0,
    mse_overshoot: 2.0,
    partition_early_out_limit_factor: 1.5,
    plane_early_out_limit_correlation: 0.95,
    search_mode0_enable: true,
  },
  Tuning {
    max_partition_count: 4,
    partition_index_limit: [512, 256, 128],
    block_mode_limit: 60,
    refinement_limit: 4,
    candidate_limit: 6,
    partitioning_candidate_limit: [3, 3, 3],
    db_limit: 60.0,
    mse_overshoot: 2.0,
    partition_early_out_limit_factor: 2.0,
    plane_early_out_limit_correlation: 0.98,
    search_mode0_enable: true,
  },
  Tuning {
    max_partition_count: 4,
    partition_index_limit: [1024, 1024, 1024],
    block_mode_limit: 100,
    refinement_limit: 4,
    candidate_limit: 8,
    partitioning_candidate_limit: [4, 4, 4],
    db_limit: 999.0,
    mse_overshoot: 2.0,
    partition_early_out_limit_factor: 10.0,
    plane_early_out_limit_correlation: 0.99,
    search_mode0_enable: true,
  },
];

fn lerp_u32(a: u32, b: u32, t: f32) -> u32 {
  lerp(a as f32, b as f32, t).round() as u32
}

/// Blend the anchor presets at `quality` in [0, 100].
pub fn tuning_for_quality(quality: f32) -> Tuning {
  assert!((0.0..=100.0).contains(&quality));
  let hi = PRESET_QUALITY.iter().position(|&q| quality <= q).unwrap();
  if hi == 0 || quality == PRESET_QUALITY[hi] {
    return PRESETS[hi];
  }
  let lo = hi - 1;
  let t = (quality - PRESET_QUALITY[lo]) / (PRESET_QUALITY[hi] - PRESET_QUALITY[lo]);
  let a = &PRESETS[lo];
  let b = &PRESETS[hi];
  Tuning {
    max_partition_count: lerp_u32(a.max_partition_count, b.max_partition_count, t),
    partition_index_limit: [
      lerp_u32(a.partition_index_limit[0], b.partition_index_limit[0], t),
      lerp_u32(a.partition_index_limit[1], b.partition_index_limit[1], t),
      lerp_u32(a.partition_index_limit[2], b.partition_index_limit[2], t),
    ],
    block_mode_limit: lerp_u32(a.block_mode_limit, b.block_mode_limit, t),
    refinement_limit: lerp_u32(a.refinement_limit, b.refinement_limit, t),
    candidate_limit: lerp_u32(a.candidate_limit, b.candidate_limit, t),
    partitioning_candidate_limit: [
      lerp_u32(a.partitioning_candidate_limit[0], b.partitioning_candidate_limit[0], t),
      lerp_u32(a.partitioning_candidate_limit[1], b.partitioning_candidate_limit[1], t),
      lerp_u32(a.partitioning_candidate_limit[2], b.partitioning_candidate_limit[2], t),
    ],
    db_limit: lerp(a.db_limit, b.db_limit, t),
    mse_overshoot: lerp(a.mse_overshoot, b.mse_overshoot, t),
    partition_early_out_limit_factor: lerp(
      a.partition_early_out_limit_factor,
      b.partition_early_out_limit_factor,
      t,
    ),
    plane_early_out_limit_correlation: lerp(
      a.plane_early_out_limit_correlation,
      b.plane_early_out_limit_correlation,
      t,
    ),
    search_mode0_enable: true,
  }
}

/// Legal 2D footprints.
pub const LEGAL_BLOCK_SIZES_2D: [(u32, u32); 14] = [
  (4, 4),
  (5, 4),
  (5, 5),
  (6, 5),
  (6, 6),
  (8, 5),
  (8, 6),
  (8, 8),
  (10, 5),
  (10, 6),
  (10, 8),
  (10, 10),
  (12, 10),
  (12, 12),
];

/// Legal 3D footprints.
pub const LEGAL_BLOCK_SIZES_3D: [(u32, u32, u32); 10] = [
  (3, 3, 3),
  (4, 3, 3),
  (4, 4, 3),
  (4, 4, 4),
  (5, 4, 4),
  (5, 5, 4),
  (5, 5, 5),
  (6, 5, 5),
  (6, 6, 5),
  (6, 6, 6),
];

pub fn is_legal_block_size(x: u32, y: u32, z: u32) -> bool {
  if z == 1 {
    LEGAL_BLOCK_SIZES_2D.contains(&(x, y))
  } else {
    LEGAL_BLOCK_SIZES_3D.contains(&(x, y, z))
  }
}

/// Full codec configuration, validated at construction.
#[derive(Clone, Debug)]
pub struct Config {
  pub profile: Profile,
  pub flags: Flags,
  pub block_x: u32,
  pub block_y: u32,
  pub block_z: u32,
  pub quality: f32,
  pub cw_r: f32,
  pub cw_g: f32,
  pub cw_b: f32,
  pub cw_a: f32,
  /// Scale applied to RGBM data; >= 1.
  pub rgbm_scale: f32,
  /// Radius of the alpha averaging pre-pass; 0 disables it.
  pub alpha_scale_radius: u32,
  pub tune: Tuning,
}

impl Config {
  /// Build and validate a configuration the way the reference encoder's
  /// `config_init` does. Flag-dependent defaults are applied here.
  pub fn new(
    profile: Profile,
    block_x: u32,
    block_y: u32,
    block_z: u32,
    quality: f32,
    flags: Flags,
  ) -> Result<Config, Error> {
    if !is_legal_block_size(block_x, block_y, block_z) {
      return Err(Error::BadBlockSize);
    }
    if !(0.0..=100.0).contains(&quality) || quality.is_nan() {
      return Err(Error::BadQuality);
    }
    if flags.contains(Flags::MAP_NORMAL) && flags.contains(Flags::MAP_RGBM) {
      return Err(Error::BadFlags);
    }
    if flags.contains(Flags::USE_DECODE_UNORM8) && profile.is_hdr() {
      return Err(Error::BadDecodeMode);
    }

    let mut tune = tuning_for_quality(quality);

    let mut cw = [1.0f32; 4];
    let mut rgbm_scale = 1.0;
    if flags.contains(Flags::USE_PERCEPTUAL) || flags.contains(Flags::MAP_NORMAL) {
      // Rec.601 luma weights, lifted to keep green dominant after clamping
      cw = [0.30 * 2.25, 0.59 * 2.25, 0.11 * 2.25, 1.0];
    }
    if flags.contains(Flags::MAP_NORMAL) {
      // X in R, Y in A; the other channels carry no signal
      cw = [1.0, 0.0, 0.0, 1.0];
      tune.max_partition_count = (tune.max_partition_count + 1).min(4);
      tune.block_mode_limit = (tune.block_mode_limit * 2).min(100);
      for l in tune.partition_index_limit.iter_mut() {
        *l = (*l * 4).min(1024);
      }
      tune.plane_early_out_limit_correlation = 0.99;
    }
    if flags.contains(Flags::MAP_RGBM) {
      rgbm_scale = 5.0;
      cw[3] = 10.0;
    }

    let mut cfg = Config {
      profile: profile,
      flags: flags,
      block_x: block_x,
      block_y: block_y,
      block_z: block_z,
      quality: quality,
      cw_r: cw[0],
      cw_g: cw[1],
      cw_b: cw[2],
      cw_a: cw[3],
      rgbm_scale: rgbm_scale,
      alpha_scale_radius: 0,
      tune: tune,
    };
    cfg.clamp_channel_weights();
    Ok(cfg)
  }

  /// Channel weights never drop below 1/1000 of the largest one.
  pub fn clamp_channel_weights(&mut self) {
    let max = self.cw_r.max(self.cw_g).max(self.cw_b).max(self.cw_a);
    let floor = max / 1000.0;
    self.cw_r = self.cw_r.max(floor);
    self.cw_g = self.cw_g.max(floor);
    self.cw_b = self.cw_b.max(floor);
    self.cw_a = self.cw_a.max(floor);
  }

  pub fn texels_per_block(&self) -> u32 {
    self.block_x * self.block_y * self.block_z
  }
}
