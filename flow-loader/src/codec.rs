//! Flow and occlusion file codecs.

use image::{ColorType, DynamicImage};
use nalgebra as na;
use oftrain::prelude::v1::*;

/// Magic number at the start of every `.flo` file.
pub const FLO_MAGIC: f32 = 202021.25;

/// Offset of the KITTI 16-bit flow encoding.
const KITTI_OFFSET: f32 = 32768.0;
/// Scale of the KITTI 16-bit flow encoding.
const KITTI_SCALE: f32 = 64.0;

/// Decode a dense flow file.
///
/// # Arguments
///
/// * `bytes` - file contents.
/// * `suffix` - file format, as given by the last 3 characters of the file name.
pub fn flow_from_bytes(bytes: &[u8], suffix: &str) -> Result<FlowField> {
    match suffix {
        "flo" => read_flo(bytes),
        "pfm" => read_pfm(bytes),
        _ => Err(anyhow!("unsupported flow format: {suffix}")),
    }
}

fn le_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_f32(bytes: &[u8]) -> f32 {
    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Number of payload bytes of a `width x height` map of `channels` f32 values.
///
/// Header dimensions are untrusted, so empty and overflowing sizes are rejected.
fn payload_len(width: usize, height: usize, channels: usize) -> Result<usize> {
    ensure!(width > 0 && height > 0, "empty {width}x{height} flow");
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels * 4))
        .ok_or_else(|| anyhow!("flow dimensions {width}x{height} overflow"))
}

/// Decode a Middlebury `.flo` file.
pub fn read_flo(bytes: &[u8]) -> Result<FlowField> {
    ensure!(bytes.len() >= 12, "truncated .flo header");

    let magic = le_f32(&bytes[0..4]);
    ensure!(magic == FLO_MAGIC, "invalid .flo magic number {magic}");

    let width = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let height = i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    ensure!(
        width >= 0 && height >= 0,
        "invalid .flo dimensions {width}x{height}"
    );
    let (width, height) = (width as usize, height as usize);

    let payload = &bytes[12..];
    let expected = payload_len(width, height, 2)?;
    ensure!(
        payload.len() == expected,
        "expected {expected} bytes of flow data for {width}x{height}, got {}",
        payload.len()
    );

    let data = payload.chunks_exact(4).map(le_f32).collect::<Vec<_>>();
    FlowField::from_interleaved(width, height, &data)
}

/// Encode a flow field as a Middlebury `.flo` file.
pub fn write_flo(flow: &FlowField) -> Vec<u8> {
    let (w, h) = flow.dim();
    let mut out = Vec::with_capacity(12 + flow.size() * 8);
    out.extend_from_slice(&FLO_MAGIC.to_le_bytes());
    out.extend_from_slice(&(w as i32).to_le_bytes());
    out.extend_from_slice(&(h as i32).to_le_bytes());
    for v in flow.as_slice() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a Portable Float Map.
///
/// Only 3-channel (`PF`) maps hold flow. The first two channels are used, and rows are flipped
/// from the bottom-to-top storage order.
pub fn read_pfm(bytes: &[u8]) -> Result<FlowField> {
    // Header is 3 whitespace separated lines: type, dimensions, scale.
    let mut pos = 0;
    let mut tokens = Vec::with_capacity(4);

    while tokens.len() < 4 {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        ensure!(start < pos, "truncated .pfm header");
        tokens.push(std::str::from_utf8(&bytes[start..pos])?);
    }
    // Exactly one whitespace character separates the header from the data.
    ensure!(pos < bytes.len(), "truncated .pfm header");
    pos += 1;

    let channels = match tokens[0] {
        "PF" => 3,
        "Pf" => bail!("single channel .pfm files do not contain flow"),
        t => bail!("invalid .pfm type {t}"),
    };
    let width: usize = tokens[1].parse()?;
    let height: usize = tokens[2].parse()?;
    let scale: f32 = tokens[3].parse()?;
    let read = if scale < 0.0 { le_f32 } else { be_f32 };

    let payload = &bytes[pos..];
    let expected = payload_len(width, height, channels)?;
    ensure!(
        payload.len() >= expected,
        "expected {expected} bytes of .pfm data for {width}x{height}, got {}",
        payload.len()
    );

    let px = |x: usize, y: usize, c: usize| {
        let idx = ((height - 1 - y) * width + x) * channels + c;
        read(&payload[idx * 4..idx * 4 + 4])
    };

    Ok(FlowField::from_fn(width, height, |x, y| {
        na::Vector2::new(px(x, y, 0), px(x, y, 1))
    }))
}

/// Decode a KITTI style sparse flow PNG.
///
/// The file is a 16-bit RGB image where `R` and `G` hold `flow * 64 + 2^15`, and `B` marks the
/// pixels that have ground truth. Returns the flow and the validity mask.
pub fn sparse_flow_from_bytes(bytes: &[u8]) -> Result<(FlowField, Mask)> {
    let img = image::load_from_memory(bytes)?;

    ensure!(
        matches!(img.color(), ColorType::Rgb16 | ColorType::Rgba16),
        "sparse flow must be a 16-bit RGB image, got {:?}",
        img.color()
    );

    let img = img.to_rgb16();
    let (w, h) = (img.width() as usize, img.height() as usize);

    let decode = |v: u16| (v as f32 - KITTI_OFFSET) / KITTI_SCALE;

    let flow = FlowField::from_fn(w, h, |x, y| {
        let p = img.get_pixel(x as u32, y as u32);
        na::Vector2::new(decode(p[0]), decode(p[1]))
    });

    let valid = Mask::from_fn(w, h, |x, y| {
        if img.get_pixel(x as u32, y as u32)[2] > 0 {
            1.0
        } else {
            0.0
        }
    });

    Ok((flow, valid))
}

/// Encode a sparse flow as a KITTI style 16-bit PNG.
pub fn write_sparse_flow(flow: &FlowField, valid: &Mask) -> Result<Vec<u8>> {
    ensure!(
        flow.dim() == valid.dim(),
        "flow {:?} and mask {:?} differ in size",
        flow.dim(),
        valid.dim()
    );

    let (w, h) = flow.dim();
    let encode = |v: f32| (v * KITTI_SCALE + KITTI_OFFSET).round().clamp(0.0, 65535.0) as u16;

    let img = image::ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let m = flow.get_motion(x, y);
        let v = if valid.get(x, y) >= 0.5 { 1 } else { 0 };
        image::Rgb([encode(m.x), encode(m.y), v])
    });

    encode_png(DynamicImage::ImageRgb16(img))
}

/// Decode an occlusion map image into `[0, 1]` probabilities.
pub fn occ_from_bytes(bytes: &[u8]) -> Result<Mask> {
    let img = image::load_from_memory(bytes)?.to_luma8();
    let (w, h) = (img.width() as usize, img.height() as usize);

    Ok(Mask::from_fn(w, h, |x, y| {
        img.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
    }))
}

pub(crate) fn encode_png(img: DynamicImage) -> Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(vec![]);
    img.write_to(&mut out, image::ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
