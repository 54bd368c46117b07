use std::io::Write;

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use quantization::error::RabitqError;
use quantization::estimator::BatchFactors;
use quantization::fastscan::{batch_bytes, num_batches, pack_batch, unpack_single_vector, BATCH_SIZE};
use quantization::rabitq::code::{ex_code_len, BinaryCode, ExCodeRef, SplitCode};
use utils::io::wrap_write;

use crate::ivf::reader::ByteReader;

/// Slots `slot_offset..slot_offset + len` of the arena. Every cluster starts on a batch boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClusterRange {
    slot_offset: usize,
    len: usize,
}

/// Codes of every cluster in a handful of contiguous buffers.
///
/// Points are addressed by `(cluster, offset)`. Each cluster owns a whole number of 32-slot
/// FastScan batches; per-slot arrays (ids, factors, extended codes) follow the same slot
/// numbering, and the unused tail slots of a cluster's last batch are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterArena {
    padded_dim: usize,
    ex_bits: usize,
    ranges: Vec<ClusterRange>,
    centroids: Vec<f32>,
    ids: Vec<u32>,
    batches: Vec<u8>,
    f_add: Vec<f32>,
    f_rescale: Vec<f32>,
    f_error: Vec<f32>,
    ex_data: Vec<u8>,
    f_add_ex: Vec<f32>,
    f_rescale_ex: Vec<f32>,
}

impl ClusterArena {
    /// `centroids` are rotated, `padded_dim` floats each.
    pub fn new(padded_dim: usize, ex_bits: usize, centroids: Vec<f32>) -> Self {
        debug_assert!(centroids.len() % padded_dim == 0);
        Self {
            padded_dim,
            ex_bits,
            ranges: Vec::with_capacity(centroids.len() / padded_dim),
            centroids,
            ids: vec![],
            batches: vec![],
            f_add: vec![],
            f_rescale: vec![],
            f_error: vec![],
            ex_data: vec![],
            f_add_ex: vec![],
            f_rescale_ex: vec![],
        }
    }

    /// Appends the members of the next cluster, in insertion order.
    pub fn push_cluster(&mut self, members: &[(u32, SplitCode)]) -> Result<()> {
        if self.ranges.len() >= self.num_clusters() {
            return Err(RabitqError::InvalidConfig(format!(
                "arena already holds all {} clusters",
                self.num_clusters()
            ))
            .into());
        }
        let ex_len = ex_code_len(self.padded_dim, self.ex_bits);
        for (_, code) in members {
            if code.bin.words.len() != self.padded_dim / 64 || code.ex.data.len() != ex_len {
                return Err(RabitqError::DimensionMismatch {
                    expected: self.padded_dim,
                    got: code.bin.words.len() * 64,
                }
                .into());
            }
        }

        let slot_offset = self.ids.len();
        let slots = num_batches(members.len()) * BATCH_SIZE;
        self.ranges.push(ClusterRange {
            slot_offset,
            len: members.len(),
        });

        for chunk in members.chunks(BATCH_SIZE) {
            let words: Vec<&[u64]> = chunk.iter().map(|(_, code)| code.bin.words.as_slice()).collect();
            let start = self.batches.len();
            self.batches.resize(start + batch_bytes(self.padded_dim), 0);
            pack_batch(&words, self.padded_dim, &mut self.batches[start..]);
        }
        for (id, code) in members {
            self.ids.push(*id);
            self.f_add.push(code.bin.f_add);
            self.f_rescale.push(code.bin.f_rescale);
            self.f_error.push(code.bin.f_error);
            self.ex_data.extend_from_slice(&code.ex.data);
            self.f_add_ex.push(code.ex.f_add_ex);
            self.f_rescale_ex.push(code.ex.f_rescale_ex);
        }
        let end = slot_offset + slots;
        self.ids.resize(end, 0);
        self.f_add.resize(end, 0.0);
        self.f_rescale.resize(end, 0.0);
        self.f_error.resize(end, 0.0);
        self.ex_data.resize(end * ex_len, 0);
        self.f_add_ex.resize(end, 0.0);
        self.f_rescale_ex.resize(end, 0.0);
        Ok(())
    }

    pub fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    pub fn ex_bits(&self) -> usize {
        self.ex_bits
    }

    pub fn num_clusters(&self) -> usize {
        self.centroids.len() / self.padded_dim
    }

    pub fn num_points(&self) -> usize {
        self.ranges.iter().map(|r| r.len).sum()
    }

    pub fn centroid(&self, cluster: usize) -> &[f32] {
        &self.centroids[cluster * self.padded_dim..(cluster + 1) * self.padded_dim]
    }

    pub fn cluster_len(&self, cluster: usize) -> usize {
        self.ranges[cluster].len
    }

    pub fn ids(&self, cluster: usize) -> &[u32] {
        let range = self.ranges[cluster];
        &self.ids[range.slot_offset..range.slot_offset + range.len]
    }

    pub fn num_batches(&self, cluster: usize) -> usize {
        num_batches(self.ranges[cluster].len)
    }

    pub fn batch(&self, cluster: usize, batch: usize) -> &[u8] {
        let bytes = batch_bytes(self.padded_dim);
        let start = (self.ranges[cluster].slot_offset / BATCH_SIZE + batch) * bytes;
        &self.batches[start..start + bytes]
    }

    pub fn batch_factors(&self, cluster: usize, batch: usize) -> BatchFactors<'_> {
        let start = self.ranges[cluster].slot_offset + batch * BATCH_SIZE;
        let end = start + BATCH_SIZE;
        BatchFactors {
            f_add: &self.f_add[start..end],
            f_rescale: &self.f_rescale[start..end],
            f_error: &self.f_error[start..end],
        }
    }

    pub fn ex_code(&self, cluster: usize, offset: usize) -> ExCodeRef<'_> {
        let slot = self.ranges[cluster].slot_offset + offset;
        let ex_len = ex_code_len(self.padded_dim, self.ex_bits);
        ExCodeRef {
            data: &self.ex_data[slot * ex_len..(slot + 1) * ex_len],
            f_add_ex: self.f_add_ex[slot],
            f_rescale_ex: self.f_rescale_ex[slot],
        }
    }

    /// Binary code of one point, unpacked from its FastScan batch.
    pub fn binary_code(&self, cluster: usize, offset: usize) -> BinaryCode {
        let slot = self.ranges[cluster].slot_offset + offset;
        BinaryCode {
            words: unpack_single_vector(self.batch(cluster, offset / BATCH_SIZE), self.padded_dim, offset % BATCH_SIZE),
            f_add: self.f_add[slot],
            f_rescale: self.f_rescale[slot],
            f_error: self.f_error[slot],
        }
    }

    /// Serialized length in bytes.
    pub fn size(&self) -> usize {
        let num_slots = self.ids.len();
        3 * 8
            + self.ranges.len() * 16
            + self.centroids.len() * 4
            + num_slots * 4
            + self.batches.len()
            + num_slots * 5 * 4
            + self.ex_data.len()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = 0;
        for value in [self.num_clusters(), self.padded_dim, self.ex_bits] {
            written += wrap_write(writer, &(value as u64).to_le_bytes())?;
        }
        for range in &self.ranges {
            written += wrap_write(writer, &(range.slot_offset as u64).to_le_bytes())?;
            written += wrap_write(writer, &(range.len as u64).to_le_bytes())?;
        }
        written += write_f32s(writer, &self.centroids)?;
        let mut ids = vec![0u8; self.ids.len() * 4];
        LittleEndian::write_u32_into(&self.ids, &mut ids);
        written += wrap_write(writer, &ids)?;
        written += wrap_write(writer, &self.batches)?;
        written += write_f32s(writer, &self.f_add)?;
        written += write_f32s(writer, &self.f_rescale)?;
        written += write_f32s(writer, &self.f_error)?;
        written += wrap_write(writer, &self.ex_data)?;
        written += write_f32s(writer, &self.f_add_ex)?;
        written += write_f32s(writer, &self.f_rescale_ex)?;
        Ok(written)
    }

    pub(crate) fn read_from(reader: &mut ByteReader) -> Result<Self> {
        let num_clusters = reader.read_u64()? as usize;
        let padded_dim = reader.read_u64()? as usize;
        let ex_bits = reader.read_u64()? as usize;
        if padded_dim == 0 || padded_dim % 64 != 0 || ex_bits > 8 {
            return Err(RabitqError::CorruptedFile("invalid arena dimensions".into()).into());
        }

        let mut ranges = Vec::with_capacity(num_clusters.min(reader.remaining() / 16));
        let mut num_slots = 0;
        for _ in 0..num_clusters {
            let slot_offset = reader.read_u64()? as usize;
            let len = reader.read_u64()? as usize;
            if slot_offset != num_slots {
                return Err(RabitqError::CorruptedFile("cluster ranges are not contiguous".into()).into());
            }
            num_slots += num_batches(len) * BATCH_SIZE;
            ranges.push(ClusterRange { slot_offset, len });
        }

        let ex_len = ex_code_len(padded_dim, ex_bits);
        let centroids = reader.read_f32s(num_clusters * padded_dim)?;
        let ids = reader.read_u32s(num_slots)?;
        let batches = reader.read_bytes(num_slots / BATCH_SIZE * batch_bytes(padded_dim))?.to_vec();
        let f_add = reader.read_f32s(num_slots)?;
        let f_rescale = reader.read_f32s(num_slots)?;
        let f_error = reader.read_f32s(num_slots)?;
        let ex_data = reader.read_bytes(num_slots * ex_len)?.to_vec();
        let f_add_ex = reader.read_f32s(num_slots)?;
        let f_rescale_ex = reader.read_f32s(num_slots)?;

        Ok(Self {
            padded_dim,
            ex_bits,
            ranges,
            centroids,
            ids,
            batches,
            f_add,
            f_rescale,
            f_error,
            ex_data,
            f_add_ex,
            f_rescale_ex,
        })
    }
}

fn write_f32s<W: Write>(writer: &mut W, values: &[f32]) -> Result<usize> {
    let mut buf = vec![0u8; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut buf);
    wrap_write(writer, &buf)
}
