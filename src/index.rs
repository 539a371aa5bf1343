//! FVIX (FoldVote Index) — in-memory top-k inner-product search plus its
//! binary artifact format.
//!
//! Format overview (little-endian):
//!
//! Header (15 bytes + CRC):
//!   Magic: "FVIX" (4 bytes)
//!   Version: u16
//!   Dimension: u32
//!   Quantization: u8 (0=f32, 1=f16)
//!   Count: u32
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Vector slab:
//!   Zero padding up to a 32-byte-aligned offset, then
//!   Count × Dimension × bytes_per_quant, contiguous.
//!
//! Vectors are stored pre-normalized by the training side, so the inner
//! product of a normalized query against a stored vector is its cosine
//! similarity. The slab is widened to f32 at load time regardless of the
//! on-disk quantization; search always runs in f32.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use half::f16;
use memmap2::Mmap;

use crate::error::EnsembleError;

pub const FVIX_MAGIC: [u8; 4] = *b"FVIX";
pub const FVIX_VERSION: u16 = 1;
pub const VECTOR_ALIGN_BYTES: usize = 32;

const HEADER_BODY_BYTES: usize = 4 + 2 + 4 + 1 + 4;

/// On-disk component width. In memory the slab is always f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    F32,
    F16,
}

impl Quantization {
    pub fn to_u8(self) -> u8 {
        match self {
            Quantization::F32 => 0,
            Quantization::F16 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Quantization::F32),
            1 => Ok(Quantization::F16),
            other => bail!("unknown quantization value: {other}"),
        }
    }

    pub fn bytes_per_component(self) -> usize {
        match self {
            Quantization::F32 => 4,
            Quantization::F16 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FvixHeader {
    version: u16,
    dimension: u32,
    quantization: Quantization,
    count: u32,
}

impl FvixHeader {
    fn validate(&self) -> Result<()> {
        if self.version != FVIX_VERSION {
            bail!("unsupported FVIX version: {}", self.version);
        }
        if self.dimension == 0 {
            bail!("dimension must be non-zero");
        }
        Ok(())
    }

    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        self.validate()?;
        let mut buf = Vec::with_capacity(HEADER_BODY_BYTES);
        buf.extend_from_slice(&FVIX_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.dimension.to_le_bytes());
        buf.push(self.quantization.to_u8());
        buf.extend_from_slice(&self.count.to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();

        writer.write_all(&buf)?;
        writer.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    fn read_from(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .get(..HEADER_BODY_BYTES)
            .ok_or_else(|| anyhow!("FVIX file too short for header"))?;
        if body[0..4] != FVIX_MAGIC {
            bail!("invalid FVIX magic: {:?}", &body[0..4]);
        }
        let version = u16::from_le_bytes(body[4..6].try_into()?);
        let dimension = u32::from_le_bytes(body[6..10].try_into()?);
        let quantization = Quantization::from_u8(body[10])?;
        let count = u32::from_le_bytes(body[11..15].try_into()?);

        let crc_bytes = bytes
            .get(HEADER_BODY_BYTES..HEADER_BODY_BYTES + 4)
            .ok_or_else(|| anyhow!("FVIX file too short for header CRC"))?;
        let crc_expected = u32::from_le_bytes(crc_bytes.try_into()?);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        let crc_actual = hasher.finalize();
        if crc_actual != crc_expected {
            bail!("header CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})");
        }

        let header = Self {
            version,
            dimension,
            quantization,
            count,
        };
        header.validate()?;
        Ok(header)
    }
}

/// One search hit: a position into the fold's training set and its
/// similarity score (inner product, higher is closer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: u32,
    pub score: f32,
}

/// Brute-force inner-product index over a contiguous f32 slab.
///
/// Read-only after construction; safe for concurrent searches.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    quantization: Quantization,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Build from per-vector rows. Rows must all match `dimension`.
    pub fn build<I>(dimension: usize, quantization: Quantization, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        if dimension == 0 {
            bail!("dimension must be non-zero");
        }
        let mut vectors = Vec::new();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                bail!(
                    "vector {idx} dimension mismatch: expected {dimension}, got {}",
                    row.len()
                );
            }
            vectors.extend_from_slice(&row);
        }
        u32::try_from(vectors.len() / dimension).map_err(|_| anyhow!("vector count out of range"))?;
        Ok(Self {
            dimension,
            quantization,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn quantization(&self) -> Quantization {
        self.quantization
    }

    /// Stored vector at `position`. Panics if out of bounds, like slice
    /// indexing; positions returned by [`search`](Self::search) are always
    /// valid.
    pub fn vector_at(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Top-`k` nearest stored vectors for a normalized query, ranked by
    /// inner product descending. Equal scores rank by ascending position so
    /// results are fully deterministic. Returns fewer than `k` hits only
    /// when the index holds fewer than `k` vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EnsembleError> {
        if query.len() != self.dimension {
            return Err(EnsembleError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (position, vector) in self.vectors.chunks_exact(self.dimension).enumerate() {
            let score = dot_product(vector, query);
            heap.push(Reverse(Scored {
                score,
                position: position as u32,
            }));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut results: Vec<Neighbor> = heap
            .into_iter()
            .map(|entry| Neighbor {
                position: entry.0.position,
                score: entry.0.score,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
        });
        Ok(results)
    }

    /// Serialize to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if cfg!(target_endian = "big") {
            bail!("FVIX write is only supported on little-endian targets");
        }
        let count =
            u32::try_from(self.len()).map_err(|_| anyhow!("vector count out of range"))?;
        let header = FvixHeader {
            version: FVIX_VERSION,
            dimension: self.dimension as u32,
            quantization: self.quantization,
            count,
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let temp_path = path.with_extension("fvix.tmp");
        let mut file = File::create(&temp_path)
            .with_context(|| format!("create temp FVIX file {temp_path:?}"))?;

        header.write_to(&mut file)?;
        let padding = slab_offset_bytes() - (HEADER_BODY_BYTES + 4);
        if padding > 0 {
            file.write_all(&vec![0u8; padding])?;
        }
        match self.quantization {
            Quantization::F32 => file.write_all(f32_as_bytes(&self.vectors))?,
            Quantization::F16 => {
                let narrowed: Vec<f16> = self.vectors.iter().map(|v| f16::from_f32(*v)).collect();
                file.write_all(f16_as_bytes(&narrowed))?;
            }
        }
        file.sync_all().context("fsync FVIX temp file")?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("rename FVIX temp file {temp_path:?}"))?;

        tracing::info!(?path, count, dimension = self.dimension, "saved FVIX index");
        Ok(())
    }

    /// Load from `path`, validating magic, version, CRC, and file size.
    pub fn load(path: &Path) -> Result<Self> {
        if cfg!(target_endian = "big") {
            bail!("FVIX load is only supported on little-endian targets");
        }
        let file = File::open(path).with_context(|| format!("open FVIX file {path:?}"))?;
        let mmap = unsafe { Mmap::map(&file).context("mmap FVIX file")? };
        let header = FvixHeader::read_from(&mmap).context("read FVIX header")?;

        let slab_offset = slab_offset_bytes();
        let slab_size = slab_size_bytes(header.count, header.dimension, header.quantization)?;
        let expected_len = slab_offset
            .checked_add(slab_size)
            .ok_or_else(|| anyhow!("FVIX file size overflow"))?;
        if mmap.len() != expected_len {
            bail!(
                "FVIX file size mismatch (expected {expected_len}, got {})",
                mmap.len()
            );
        }

        let slab = mmap
            .get(slab_offset..slab_offset + slab_size)
            .ok_or_else(|| anyhow!("vector slab out of bounds"))?;
        let vectors = match header.quantization {
            Quantization::F32 => bytes_as_f32(slab)?.to_vec(),
            Quantization::F16 => bytes_as_f16(slab)?.iter().map(|v| f32::from(*v)).collect(),
        };

        tracing::debug!(
            ?path,
            count = header.count,
            dimension = header.dimension,
            "loaded FVIX index"
        );
        Ok(Self {
            dimension: header.dimension as usize,
            quantization: header.quantization,
            vectors,
        })
    }
}

fn slab_offset_bytes() -> usize {
    align_up(HEADER_BODY_BYTES + 4, VECTOR_ALIGN_BYTES)
}

fn slab_size_bytes(count: u32, dimension: u32, quantization: Quantization) -> Result<usize> {
    let components = (count as usize)
        .checked_mul(dimension as usize)
        .ok_or_else(|| anyhow!("vector slab size overflow"))?;
    components
        .checked_mul(quantization.bytes_per_component())
        .ok_or_else(|| anyhow!("vector slab size overflow"))
}

fn align_up(value: usize, align: usize) -> usize {
    let rem = value % align;
    if rem == 0 { value } else { value + (align - rem) }
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    position: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.score.total_cmp(&other.score) == Ordering::Equal && self.position == other.position
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        // On equal scores the higher position orders first for eviction, so
        // the bounded heap retains the lower positions.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.position.cmp(&self.position))
    }
}

fn bytes_as_f32(bytes: &[u8]) -> Result<&[f32]> {
    if !bytes.len().is_multiple_of(4) {
        bail!("f32 byte slice length is not a multiple of 4");
    }
    // SAFETY: length and alignment are validated before reinterpreting.
    let (prefix, aligned, suffix) = unsafe { bytes.align_to::<f32>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        bail!("f32 byte slice is not aligned");
    }
    Ok(aligned)
}

fn bytes_as_f16(bytes: &[u8]) -> Result<&[f16]> {
    if !bytes.len().is_multiple_of(2) {
        bail!("f16 byte slice length is not a multiple of 2");
    }
    // SAFETY: length and alignment are validated before reinterpreting.
    let (prefix, aligned, suffix) = unsafe { bytes.align_to::<f16>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        bail!("f16 byte slice is not aligned");
    }
    Ok(aligned)
}

fn f32_as_bytes(values: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, values.len() * 4) }
}

fn f16_as_bytes(values: &[f16]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, values.len() * 2) }
}

/// Scalar dot product (fallback when SIMD is disabled).
#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 8-lane SIMD dot product. FP reassociation shifts results by ~1e-7
/// relative to scalar, which does not change neighbor ranking.
#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        // SAFETY-adjacent: chunks_exact guarantees exactly 8 elements.
        let arr_a: [f32; 8] = ca.try_into().expect("chunk of 8");
        let arr_b: [f32; 8] = cb.try_into().expect("chunk of 8");
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += x * y;
    }
    scalar_sum
}

/// Cached SIMD enable flag (checked once at first use).
/// Set FOLDVOTE_SIMD_DOT=0 to force the scalar path.
static SIMD_DOT_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("FOLDVOTE_SIMD_DOT")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if *SIMD_DOT_ENABLED {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}
