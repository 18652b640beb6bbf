// The reusable codec context: owns the configuration and the per-footprint
// tables, and schedules block work across caller-provided worker threads.
// The context never spawns threads; N callers invoke the same entry point
// with thread indices 0..N and pull block indices from a shared counter.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::blocksize::{self, BlockSizeInfo};
use crate::config::{Config, Flags, Selector, Swizzle};
use crate::encode;
use crate::encode_hdr;
use crate::error::Error;
use crate::header::{AstcHeader, BYTES_PER_BLOCK};
use crate::image::{ImageView, ImageViewMut};
use crate::paint;
use crate::symbolic;
use crate::util::div_ceil_u32;

const STATE_IDLE: u8 = 0;
const STATE_COMPRESS: u8 = 1;
const STATE_DECOMPRESS: u8 = 2;

const INIT_NONE: u32 = 0;
const INIT_RUNNING: u32 = 1;
const INIT_READY: u32 = 2;

// Sentinel meaning "no progress reported yet"
const PROGRESS_NONE: f32 = -1.0;

/// Per-operation scheduling state (one for compress, one for decompress).
struct OpState {
  init_state: AtomicU32,
  workers: AtomicU32,
  next_block: AtomicU32,
  done_blocks: AtomicU32,
  total_blocks: AtomicU32,
  cancel: AtomicBool,
  needs_reset: AtomicBool,
  // Last emitted progress value as an f32 bit pattern, for the lock-free
  // short circuit; emission itself serializes under the mutex
  progress_last: AtomicU32,
  progress_lock: Mutex<()>,
  // Alpha averages from the box-filter pre-pass, or empty
  alpha_averages: Mutex<Arc<Vec<f32>>>,
}

impl OpState {
  fn new() -> OpState {
    OpState {
      init_state: AtomicU32::new(INIT_NONE),
      workers: AtomicU32::new(0),
      next_block: AtomicU32::new(0),
      done_blocks: AtomicU32::new(0),
      total_blocks: AtomicU32::new(0),
      cancel: AtomicBool::new(false),
      needs_reset: AtomicBool::new(false),
      progress_last: AtomicU32::new(PROGRESS_NONE.to_bits()),
      progress_lock: Mutex::new(()),
      alpha_averages: Mutex::new(Arc::new(Vec::new())),
    }
  }

  fn reset(&self) {
    self.init_state.store(INIT_NONE, Ordering::SeqCst);
    self.next_block.store(0, Ordering::SeqCst);
    self.done_blocks.store(0, Ordering::SeqCst);
    self.total_blocks.store(0, Ordering::SeqCst);
    self.cancel.store(false, Ordering::SeqCst);
    self.needs_reset.store(false, Ordering::SeqCst);
    self.progress_last.store(PROGRESS_NONE.to_bits(), Ordering::SeqCst);
    *self.alpha_averages.lock() = Arc::new(Vec::new());
  }

  fn min_diff(total: u32) -> f32 {
    (4096.0 / total as f32 * 100.0).max(1.0)
  }

  /// Coalesced progress emission; monotone, at most one step per
  /// `min_diff`, terminal 100.0 guaranteed elsewhere.
  fn report_progress(&self, value: f32, min_diff: f32, cb: &dyn Fn(f32)) {
    let last = f32::from_bits(self.progress_last.load(Ordering::Relaxed));
    if value < 100.0 && value - last <= min_diff {
      return;
    }
    let _guard = self.progress_lock.lock();
    let last = f32::from_bits(self.progress_last.load(Ordering::Relaxed));
    if value >= 100.0 {
      if last < 100.0 {
        self.progress_last.store(100.0f32.to_bits(), Ordering::Relaxed);
        cb(100.0);
      }
      return;
    }
    if value - last > min_diff {
      self.progress_last.store(value.to_bits(), Ordering::Relaxed);
      cb(value);
    }
  }
}

/// Compressed-output buffer that worker threads share. Every written span
/// is a disjoint 16-byte block selected by the work counter, which is what
/// makes the shared mutation sound.
pub struct SharedBlocks<'a> {
  ptr: *mut u8,
  len: usize,
  _life: std::marker::PhantomData<&'a mut [u8]>,
}

unsafe impl<'a> Send for SharedBlocks<'a> {}
unsafe impl<'a> Sync for SharedBlocks<'a> {}

impl<'a> SharedBlocks<'a> {
  pub fn new(buf: &'a mut [u8]) -> SharedBlocks<'a> {
    SharedBlocks { ptr: buf.as_mut_ptr(), len: buf.len(), _life: std::marker::PhantomData }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  fn write_block(&self, index: usize, bytes: &[u8; BYTES_PER_BLOCK]) {
    let offset = index * BYTES_PER_BLOCK;
    assert!(offset + BYTES_PER_BLOCK <= self.len);
    // Disjointness: each block index is claimed by exactly one worker
    unsafe {
      std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), BYTES_PER_BLOCK);
    }
  }
}

/// A reusable compression/decompression context.
///
/// One operation may be active at a time; multiple threads join the same
/// operation by calling the entry point with distinct `thread_index`es.
pub struct Context {
  cfg: Config,
  bsi: Arc<BlockSizeInfo>,
  thread_count: u32,
  state: AtomicU8,
  compress_op: OpState,
  decompress_op: OpState,
}

struct BlockCoord {
  x: u32,
  y: u32,
  z: u32,
}

fn block_coord(index: u32, blocks_x: u32, blocks_y: u32) -> BlockCoord {
  let plane = blocks_x * blocks_y;
  let z = index / plane;
  let rem = index - z * plane;
  let y = rem / blocks_x;
  let x = rem - y * blocks_x;
  BlockCoord { x: x, y: y, z: z }
}

impl Context {
  pub fn new(cfg: Config, thread_count: u32) -> Result<Context, Error> {
    if thread_count == 0 {
      return Err(Error::BadParam);
    }
    let bsi = blocksize::block_size_info(cfg.block_x, cfg.block_y, cfg.block_z);
    Ok(Context {
      cfg: cfg,
      bsi: bsi,
      thread_count: thread_count,
      state: AtomicU8::new(STATE_IDLE),
      compress_op: OpState::new(),
      decompress_op: OpState::new(),
    })
  }

  pub fn config(&self) -> &Config {
    &self.cfg
  }

  /// Compressed size in bytes for an image of the given dimensions.
  pub fn compressed_size(&self, dim_x: u32, dim_y: u32, dim_z: u32) -> usize {
    let bx = div_ceil_u32(dim_x, self.cfg.block_x) as usize;
    let by = div_ceil_u32(dim_y, self.cfg.block_y) as usize;
    let bz = div_ceil_u32(dim_z, self.cfg.block_z) as usize;
    bx * by * bz * BYTES_PER_BLOCK
  }

  fn enter(&self, want: u8, op: &OpState) -> Result<(), Error> {
    if self.thread_count == 1 {
      // Single-threaded contexts reset implicitly on every call
      if op.workers.load(Ordering::SeqCst) == 0 {
        op.reset();
      }
    } else if op.needs_reset.load(Ordering::SeqCst) {
      return Err(Error::BadContext);
    }

    loop {
      let cur = self.state.load(Ordering::SeqCst);
      if cur == want {
        return Ok(());
      }
      if cur != STATE_IDLE {
        return Err(Error::BadContext);
      }
      if self
        .state
        .compare_exchange(STATE_IDLE, want, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
      {
        return Ok(());
      }
    }
  }

  /// Compress an image into `out` from a single caller thread.
  pub fn compress_image(
    &self,
    image: &ImageView,
    swizzle: Swizzle,
    out: &mut [u8],
    thread_index: u32,
    progress: Option<&(dyn Fn(f32) + Sync)>,
  ) -> Result<(), Error> {
    let shared = SharedBlocks::new(out);
    self.compress_image_shared(image, swizzle, &shared, thread_index, progress)
  }

  /// Compress an image with caller-provided worker threads: each of the
  /// `thread_count` threads invokes this with its own `thread_index`,
  /// sharing the image, the output wrapper and the work counter.
  pub fn compress_image_shared(
    &self,
    image: &ImageView,
    swizzle: Swizzle,
    out: &SharedBlocks,
    thread_index: u32,
    progress: Option<&(dyn Fn(f32) + Sync)>,
  ) -> Result<(), Error> {
    if self.cfg.flags.contains(Flags::DECOMPRESS_ONLY) {
      return Err(Error::BadContext);
    }
    if thread_index >= self.thread_count {
      return Err(Error::BadParam);
    }
    swizzle.validate(false)?;

    let blocks_x = div_ceil_u32(image.dim_x, self.cfg.block_x);
    let blocks_y = div_ceil_u32(image.dim_y, self.cfg.block_y);
    let blocks_z = div_ceil_u32(image.dim_z, self.cfg.block_z);
    let total = blocks_x * blocks_y * blocks_z;
    if out.len() < total as usize * BYTES_PER_BLOCK {
      return Err(Error::OutOfMem);
    }

    let op = &self.compress_op;
    self.enter(STATE_COMPRESS, op)?;
    op.workers.fetch_add(1, Ordering::SeqCst);

    // One thread initializes; late arrivals spin until it is done
    if op
      .init_state
      .compare_exchange(INIT_NONE, INIT_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      op.total_blocks.store(total, Ordering::SeqCst);
      op.next_block.store(0, Ordering::SeqCst);
      op.done_blocks.store(0, Ordering::SeqCst);
      if self.wants_alpha_scale(swizzle) {
        *op.alpha_averages.lock() = Arc::new(compute_alpha_averages(
          image,
          swizzle,
          self.cfg.alpha_scale_radius,
        ));
      }
      op.init_state.store(INIT_READY, Ordering::SeqCst);
    } else {
      while op.init_state.load(Ordering::SeqCst) != INIT_READY {
        std::thread::yield_now();
      }
    }

    let alpha_averages = op.alpha_averages.lock().clone();
    let min_diff = OpState::min_diff(total);
    let texels = self.bsi.texel_count as usize;
    let zero_threshold = 0.9 / (255.0 * texels as f32);
    let hdr = self.cfg.profile.is_hdr();

    let mut block_u8: Box<[[u8; 4]]> = bytemuck::allocation::zeroed_slice_box(texels);
    let mut block_f32: Box<[[f32; 4]]> = bytemuck::allocation::zeroed_slice_box(texels);

    log::debug!(
      "compress {}x{}x{}: {} blocks of {}x{}x{}, thread {}",
      image.dim_x,
      image.dim_y,
      image.dim_z,
      total,
      self.cfg.block_x,
      self.cfg.block_y,
      self.cfg.block_z,
      thread_index
    );

    loop {
      if op.cancel.load(Ordering::SeqCst) {
        break;
      }
      let index = op.next_block.fetch_add(1, Ordering::SeqCst);
      if index >= total {
        break;
      }
      let coord = block_coord(index, blocks_x, blocks_y);

      let bytes = if !alpha_averages.is_empty()
        && block_alpha_is_zero(
          &alpha_averages,
          image,
          &self.cfg,
          &coord,
          zero_threshold,
        ) {
        symbolic::constant_block_bytes([0, 0, 0, 0], false)
      } else if hdr {
        image.gather_block_f32(
          swizzle,
          self.cfg.block_x,
          self.cfg.block_y,
          self.cfg.block_z,
          coord.x,
          coord.y,
          coord.z,
          &mut block_f32,
        );
        encode_hdr::compress_block_hdr(&self.cfg, &self.bsi, &block_f32)
      } else {
        image.gather_block_u8(
          swizzle,
          self.cfg.block_x,
          self.cfg.block_y,
          self.cfg.block_z,
          coord.x,
          coord.y,
          coord.z,
          &mut block_u8,
        );
        encode::compress_block_u8(&self.cfg, &self.bsi, &block_u8)
      };

      out.write_block(index as usize, &bytes);

      let done = op.done_blocks.fetch_add(1, Ordering::SeqCst) + 1;
      if let Some(cb) = progress {
        let value = done as f32 / total as f32 * 100.0;
        op.report_progress(value, min_diff, cb);
        if done == op.total_blocks.load(Ordering::SeqCst) {
          op.report_progress(100.0, min_diff, cb);
        }
      }
    }

    self.leave(op);
    Ok(())
  }

  /// Decompress a block payload into an image.
  pub fn decompress_image(
    &self,
    data: &[u8],
    image: &mut ImageViewMut,
    swizzle: Swizzle,
    thread_index: u32,
  ) -> Result<(), Error> {
    if thread_index >= self.thread_count {
      return Err(Error::BadParam);
    }
    swizzle.validate(true)?;

    let blocks_x = div_ceil_u32(image.dim_x, self.cfg.block_x);
    let blocks_y = div_ceil_u32(image.dim_y, self.cfg.block_y);
    let blocks_z = div_ceil_u32(image.dim_z, self.cfg.block_z);
    let total = blocks_x * blocks_y * blocks_z;
    if data.len() < total as usize * BYTES_PER_BLOCK {
      return Err(Error::OutOfMem);
    }

    let op = &self.decompress_op;
    self.enter(STATE_DECOMPRESS, op)?;
    op.workers.fetch_add(1, Ordering::SeqCst);

    if op
      .init_state
      .compare_exchange(INIT_NONE, INIT_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      op.total_blocks.store(total, Ordering::SeqCst);
      op.next_block.store(0, Ordering::SeqCst);
      op.done_blocks.store(0, Ordering::SeqCst);
      op.init_state.store(INIT_READY, Ordering::SeqCst);
    } else {
      while op.init_state.load(Ordering::SeqCst) != INIT_READY {
        std::thread::yield_now();
      }
    }

    let texels = self.bsi.texel_count as usize;
    let use_u8_paint = !self.cfg.profile.is_hdr()
      && (matches!(&image.data, crate::image::ImageDataMut::U8(_))
        || self.cfg.flags.contains(Flags::USE_DECODE_UNORM8));
    let mut texels_u8: Box<[[u8; 4]]> = bytemuck::allocation::zeroed_slice_box(texels);
    let mut texels_f32: Box<[[f32; 4]]> = bytemuck::allocation::zeroed_slice_box(texels);

    loop {
      if op.cancel.load(Ordering::SeqCst) {
        break;
      }
      let index = op.next_block.fetch_add(1, Ordering::SeqCst);
      if index >= total {
        break;
      }
      let coord = block_coord(index, blocks_x, blocks_y);
      let offset = index as usize * BYTES_PER_BLOCK;
      let block: &[u8; 16] = data[offset..offset + BYTES_PER_BLOCK].try_into().unwrap();
      let sym = symbolic::physical_to_symbolic(&self.bsi, block);

      if use_u8_paint {
        paint::decode_block_u8(&self.bsi, self.cfg.profile, &sym, &mut texels_u8);
        image.scatter_block_u8(
          swizzle,
          self.cfg.block_x,
          self.cfg.block_y,
          self.cfg.block_z,
          coord.x,
          coord.y,
          coord.z,
          &texels_u8,
        );
      } else {
        paint::decode_block_f32(&self.bsi, self.cfg.profile, &sym, &mut texels_f32);
        image.scatter_block_f32(
          swizzle,
          self.cfg.block_x,
          self.cfg.block_y,
          self.cfg.block_z,
          coord.x,
          coord.y,
          coord.z,
          &texels_f32,
        );
      }

      op.done_blocks.fetch_add(1, Ordering::SeqCst);
    }

    self.leave(op);
    Ok(())
  }

  /// Decompress a whole `.astc` file into an image sized per its header.
  pub fn decompress_file(
    &self,
    file: &[u8],
    image: &mut ImageViewMut,
    swizzle: Swizzle,
  ) -> Result<(), Error> {
    let header = AstcHeader::parse(file)?;
    if header.block_x != self.cfg.block_x
      || header.block_y != self.cfg.block_y
      || header.block_z != self.cfg.block_z
    {
      return Err(Error::BadBlockSize);
    }
    if header.dim_x != image.dim_x
      || header.dim_y != image.dim_y
      || header.dim_z != image.dim_z
    {
      return Err(Error::BadParam);
    }
    let payload = header.payload_of(file)?;
    self.decompress_image(payload, image, swizzle, 0)
  }

  fn leave(&self, op: &OpState) {
    let remaining = op.workers.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining == 0 {
      op.needs_reset.store(true, Ordering::SeqCst);
      self.state.store(STATE_IDLE, Ordering::SeqCst);
    }
  }

  /// Ask running compression workers to stop after their current block.
  /// Sticky until the next reset.
  pub fn compress_cancel(&self) {
    self.compress_op.cancel.store(true, Ordering::SeqCst);
  }

  pub fn decompress_cancel(&self) {
    self.decompress_op.cancel.store(true, Ordering::SeqCst);
  }

  /// Rearm the compression side between images. Required for
  /// multi-threaded contexts; fails while workers are still inside.
  pub fn compress_reset(&self) -> Result<(), Error> {
    if self.compress_op.workers.load(Ordering::SeqCst) != 0 {
      return Err(Error::BadContext);
    }
    self.compress_op.reset();
    Ok(())
  }

  pub fn decompress_reset(&self) -> Result<(), Error> {
    if self.decompress_op.workers.load(Ordering::SeqCst) != 0 {
      return Err(Error::BadContext);
    }
    self.decompress_op.reset();
    Ok(())
  }

  fn wants_alpha_scale(&self, swizzle: Swizzle) -> bool {
    self.cfg.alpha_scale_radius > 0
      && self.bsi.is_2d()
      && swizzle.a != Selector::Zero
      && swizzle.a != Selector::One
  }
}

fn block_alpha_is_zero(
  averages: &[f32],
  image: &ImageView,
  cfg: &Config,
  coord: &BlockCoord,
  threshold: f32,
) -> bool {
  for dy in 0..cfg.block_y {
    let y = coord.y * cfg.block_y + dy;
    if y >= image.dim_y {
      continue;
    }
    for dx in 0..cfg.block_x {
      let x = coord.x * cfg.block_x + dx;
      if x >= image.dim_x {
        continue;
      }
      if averages[(y * image.dim_x + x) as usize] > threshold {
        return false;
      }
    }
  }
  true
}

// Mean alpha over a (2r+1)^2 box with edge replication, done as two
// separable passes.
fn compute_alpha_averages(image: &ImageView, swizzle: Swizzle, radius: u32) -> Vec<f32> {
  let w = image.dim_x as i64;
  let h = image.dim_y as i64;
  let r = radius as i64;
  let inv = 1.0 / (2 * r + 1) as f32;

  let alpha_of = |x: i64, y: i64| -> f32 {
    let x = x.clamp(0, w - 1) as u32;
    let y = y.clamp(0, h - 1) as u32;
    crate::image::swizzle_f32(image.texel_f32(x, y, 0), swizzle)[3]
  };

  // X pass
  let mut pass_x = vec![0f32; (w * h) as usize];
  for y in 0..h {
    for x in 0..w {
      let mut sum = 0.0;
      for dx in -r..=r {
        sum += alpha_of(x + dx, y);
      }
      pass_x[(y * w + x) as usize] = sum * inv;
    }
  }

  // Y pass over the X results, replicating edges
  let fetch = |x: i64, y: i64| -> f32 {
    pass_x[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize]
  };
  let mut out = vec![0f32; (w * h) as usize];
  for y in 0..h {
    for x in 0..w {
      let mut sum = 0.0;
      for dy in -r..=r {
        sum += fetch(x, y + dy);
      }
      out[(y * w + x) as usize] = sum * inv;
    }
  }
  out
}
