// Decoder fixtures with pinned expected texels.

use tinyastc::{
  AstcHeader, Config, Context, Flags, ImageDataMut, ImageViewMut, Profile, Selector,
  Swizzle,
};

// Hand-built void-extent block holding one UNORM16 color.
fn constant_block(rgba8: [u8; 4], hdr: bool) -> [u8; 16] {
  let mut out = [0xFFu8; 16];
  out[0] = 0xFC;
  out[1] = if hdr { 0xFF } else { 0xFD };
  for (i, &c) in rgba8.iter().enumerate() {
    let v = c as u16 * 257;
    out[8 + 2 * i..10 + 2 * i].copy_from_slice(&v.to_le_bytes());
  }
  out
}

fn decode_u8(ctx: &Context, file: &[u8], w: u32, h: u32, swz: Swizzle) -> Vec<u8> {
  let mut pixels = vec![0u8; (w * h * 4) as usize];
  let mut view = ImageViewMut::new(w, h, 1, ImageDataMut::U8(&mut pixels)).unwrap();
  ctx.decompress_file(file, &mut view, swz).unwrap();
  pixels
}

fn sample(pixels: &[u8], w: u32, x: u32, y: u32) -> [u8; 4] {
  let o = ((y * w + x) * 4) as usize;
  [pixels[o], pixels[o + 1], pixels[o + 2], pixels[o + 3]]
}

#[test]
fn tiles_8x8_fixture_corners() {
  // Four constant 4x4 tiles: black, red / white, (64,192,0,221)
  let header = AstcHeader::new(4, 4, 1, 8, 8, 1).unwrap();
  let mut file = header.marshal().to_vec();
  file.extend_from_slice(&constant_block([0, 0, 0, 255], false));
  file.extend_from_slice(&constant_block([255, 0, 0, 255], false));
  file.extend_from_slice(&constant_block([255, 255, 255, 255], false));
  file.extend_from_slice(&constant_block([64, 192, 0, 221], false));

  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let pixels = decode_u8(&ctx, &file, 8, 8, Swizzle::rgba());

  assert_eq!(sample(&pixels, 8, 0, 0), [0, 0, 0, 255]);
  assert_eq!(sample(&pixels, 8, 7, 0), [255, 0, 0, 255]);
  assert_eq!(sample(&pixels, 8, 0, 7), [255, 255, 255, 255]);
  assert_eq!(sample(&pixels, 8, 7, 7), [64, 192, 0, 221]);
}

#[test]
fn hdr_constant_block_under_ldr_profile_paints_magenta() {
  let header = AstcHeader::new(4, 4, 1, 4, 4, 1).unwrap();
  let mut file = header.marshal().to_vec();
  file.extend_from_slice(&constant_block([100, 100, 100, 255], true));

  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let pixels = decode_u8(&ctx, &file, 4, 4, Swizzle::rgba());
  for i in 0..16 {
    assert_eq!(sample(&pixels, 4, i % 4, i / 4), [255, 0, 255, 255]);
  }
}

#[test]
fn z_swizzle_reconstructs_the_normal() {
  let header = AstcHeader::new(4, 4, 1, 4, 4, 1).unwrap();
  let mut file = header.marshal().to_vec();
  file.extend_from_slice(&constant_block([64, 0, 0, 192], false));

  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let swz = Swizzle { r: Selector::R, g: Selector::A, b: Selector::Z, a: Selector::One };
  let pixels = decode_u8(&ctx, &file, 4, 4, swz);

  let x = 64.0 / 255.0 * 2.0 - 1.0;
  let y = 192.0 / 255.0 * 2.0 - 1.0;
  let z = 0.5 * (1.0f32 - x * x - y * y).max(0.0).sqrt() + 0.5;
  let expect = [64, 192, (z * 255.0 + 0.5) as u8, 255];
  for i in 0..16 {
    assert_eq!(sample(&pixels, 4, i % 4, i / 4), expect);
  }
}

#[test]
fn decompress_file_validates_header_against_context_and_image() {
  let header = AstcHeader::new(4, 4, 1, 4, 4, 1).unwrap();
  let mut file = header.marshal().to_vec();
  file.extend_from_slice(&constant_block([1, 2, 3, 4], false));

  // Footprint mismatch
  let cfg = Config::new(Profile::Ldr, 5, 5, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let mut pixels = vec![0u8; 4 * 4 * 4];
  let mut view = ImageViewMut::new(4, 4, 1, ImageDataMut::U8(&mut pixels)).unwrap();
  assert_eq!(
    ctx.decompress_file(&file, &mut view, Swizzle::rgba()).unwrap_err(),
    tinyastc::Error::BadBlockSize
  );

  // Dimension mismatch
  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let mut pixels8 = vec![0u8; 8 * 8 * 4];
  let mut view = ImageViewMut::new(8, 8, 1, ImageDataMut::U8(&mut pixels8)).unwrap();
  assert_eq!(
    ctx.decompress_file(&file, &mut view, Swizzle::rgba()).unwrap_err(),
    tinyastc::Error::BadParam
  );

  // Nonzero trailing byte
  let mut with_tail = file.clone();
  with_tail.push(7);
  let mut pixels = vec![0u8; 4 * 4 * 4];
  let mut view = ImageViewMut::new(4, 4, 1, ImageDataMut::U8(&mut pixels)).unwrap();
  assert_eq!(
    ctx.decompress_file(&with_tail, &mut view, Swizzle::rgba()).unwrap_err(),
    tinyastc::Error::BadParam
  );
}

#[test]
fn malformed_blocks_paint_magenta_without_failing_the_image() {
  let header = AstcHeader::new(4, 4, 1, 8, 4, 1).unwrap();
  let mut file = header.marshal().to_vec();
  // Reserved block mode
  let mut bad = [0u8; 16];
  bad[0] = 0x10;
  file.extend_from_slice(&bad);
  file.extend_from_slice(&constant_block([1, 2, 3, 255], false));

  let cfg = Config::new(Profile::Ldr, 4, 4, 1, 60.0, Flags::empty()).unwrap();
  let ctx = Context::new(cfg, 1).unwrap();
  let pixels = decode_u8(&ctx, &file, 8, 4, Swizzle::rgba());
  assert_eq!(sample(&pixels, 8, 0, 0), [255, 0, 255, 255]);
  assert_eq!(sample(&pixels, 8, 4, 0), [1, 2, 3, 255]);
}
