// Scheduling, progress, cancellation and reset protocol.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tinyastc::{
  Config, Context, Error, Flags, ImageData, ImageView, Profile, SharedBlocks, Swizzle,
};

fn flat_image(w: u32, h: u32) -> Vec<u8> {
  let mut data = vec![0u8; (w * h * 4) as usize];
  for (i, v) in data.iter_mut().enumerate() {
    *v = if i % 4 == 3 { 255 } else { 99 };
  }
  data
}

#[test]
fn progress_emits_a_single_terminal_hundred_for_small_images() {
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 10.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();

  let src = flat_image(128, 128);
  let image = ImageView::new(128, 128, 1, ImageData::U8(&src)).unwrap();
  let mut out = vec![0u8; ctx.compressed_size(128, 128, 1)];

  let emissions: Mutex<Vec<f32>> = Mutex::new(Vec::new());
  let cb = |v: f32| emissions.lock().unwrap().push(v);
  ctx.compress_image(&image, Swizzle::rgba(), &mut out, 0, Some(&cb)).unwrap();

  let got = emissions.into_inner().unwrap();
  assert_eq!(got, vec![100.0]);
}

#[test]
fn progress_values_are_monotone_and_end_at_hundred() {
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 0.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();

  let src = flat_image(512, 512);
  let image = ImageView::new(512, 512, 1, ImageData::U8(&src)).unwrap();
  let mut out = vec![0u8; ctx.compressed_size(512, 512, 1)];

  let emissions: Mutex<Vec<f32>> = Mutex::new(Vec::new());
  let cb = |v: f32| emissions.lock().unwrap().push(v);
  ctx.compress_image(&image, Swizzle::rgba(), &mut out, 0, Some(&cb)).unwrap();

  let got = emissions.into_inner().unwrap();
  assert!(got.len() > 1);
  assert!(got.windows(2).all(|w| w[0] < w[1]));
  assert_eq!(*got.last().unwrap(), 100.0);
}

#[test]
fn cancellation_leaves_some_blocks_unwritten() {
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 0.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();

  let src = flat_image(512, 512);
  let image = ImageView::new(512, 512, 1, ImageData::U8(&src)).unwrap();
  let total_blocks = 128 * 128;
  let mut out = vec![0xAAu8; total_blocks * 16];

  let cb = |_v: f32| ctx.compress_cancel();
  ctx.compress_image(&image, Swizzle::rgba(), &mut out, 0, Some(&cb)).unwrap();

  let untouched = out
    .chunks_exact(16)
    .filter(|block| block.iter().all(|&b| b == 0xAA))
    .count();
  assert!(untouched > 0);
  assert!(untouched < total_blocks);
}

#[test]
fn reset_fails_while_workers_are_active() {
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 0.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();

  let src = flat_image(512, 512);
  let image = ImageView::new(512, 512, 1, ImageData::U8(&src)).unwrap();
  let mut out = vec![0u8; ctx.compressed_size(512, 512, 1)];

  // The callback runs inside a worker, so a reset from there must refuse
  let observed = AtomicU32::new(0);
  let cb = |_v: f32| {
    if ctx.compress_reset() == Err(Error::BadContext) {
      observed.fetch_add(1, Ordering::SeqCst);
    }
  };
  ctx.compress_image(&image, Swizzle::rgba(), &mut out, 0, Some(&cb)).unwrap();
  assert!(observed.load(Ordering::SeqCst) > 0);
}

#[test]
fn two_workers_produce_the_single_thread_result() {
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 10.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 2).unwrap();

  let mut src = flat_image(64, 64);
  for (i, v) in src.iter_mut().enumerate() {
    *v = (i * 13 % 251) as u8;
  }
  let image = ImageView::new(64, 64, 1, ImageData::U8(&src)).unwrap();

  let mut parallel_out = vec![0u8; ctx.compressed_size(64, 64, 1)];
  {
    let shared = SharedBlocks::new(&mut parallel_out);
    std::thread::scope(|scope| {
      for t in 0..2u32 {
        let ctx = &ctx;
        let image = &image;
        let shared = &shared;
        scope.spawn(move || {
          // A worker arriving after the operation already completed is
          // told to reset first; the work is done either way
          let r = ctx.compress_image_shared(image, Swizzle::rgba(), shared, t, None);
          assert!(r.is_ok() || r == Err(Error::BadContext));
        });
      }
    });
  }

  ctx.compress_reset().unwrap();
  let mut serial_out = vec![0u8; ctx.compressed_size(64, 64, 1)];
  ctx.compress_image(&image, Swizzle::rgba(), &mut serial_out, 0, None).unwrap();

  // Blocks land at their natural positions regardless of interleaving
  assert_eq!(parallel_out, serial_out);
}

#[test]
fn alpha_scale_rdo_zeroes_transparent_regions() {
  let mut cfg = Config::new(Profile::Ldr, 4, 4, 1, 10.0, Flags::empty()).unwrap();
  cfg.alpha_scale_radius = 1;
  let ctx = Context::new(cfg, 1).unwrap();

  // Left half fully transparent noise, right half opaque
  let (w, h) = (16u32, 8u32);
  let mut src = vec![0u8; (w * h * 4) as usize];
  for y in 0..h {
    for x in 0..w {
      let o = ((y * w + x) * 4) as usize;
      src[o] = (x * 31 + y * 7) as u8;
      src[o + 1] = 77;
      src[o + 2] = 13;
      src[o + 3] = if x < 8 { 0 } else { 255 };
    }
  }
  let image = ImageView::new(w, h, 1, ImageData::U8(&src)).unwrap();
  let mut out = vec![0u8; ctx.compressed_size(w, h, 1)];
  ctx.compress_image(&image, Swizzle::rgba(), &mut out, 0, None).unwrap();

  // Block (0, 0) sits fully inside the transparent region (its alpha
  // averages stay zero even with the radius-1 blur) and must be the
  // all-zero constant block
  let zero_block = &out[..16];
  assert_eq!(&zero_block[..8], &[0xFC, 0xFD, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
  assert_eq!(&zero_block[8..], &[0u8; 8]);

  // A block containing opaque texels survives
  let opaque_block = &out[3 * 16..4 * 16];
  assert_ne!(&opaque_block[8..], &[0u8; 8]);
}
