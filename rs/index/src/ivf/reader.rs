use std::fs::File;

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use config::enums::MetricType;
use config::ivf::IvfRabitqConfig;
use log::debug;
use memmap2::Mmap;
use quantization::error::RabitqError;
use quantization::rabitq::config::RabitqConfig;
use quantization::rotator::Rotator;
use utils::mem::align_to_next_boundary;
use xxhash_rust::xxh3::xxh3_64;

use crate::ivf::cluster::ClusterArena;
use crate::ivf::index::IvfRabitq;
use crate::ivf::writer::{Header, Version, HEADER_LEN, INDEX_MAGIC, SECTION_ALIGNMENT};
use crate::ivf::{CONFIG_FILE_NAME, INDEX_FILE_NAME};

fn corrupted(msg: impl Into<String>) -> anyhow::Error {
    RabitqError::CorruptedFile(msg.into()).into()
}

/// Bounds-checked little-endian cursor over a byte buffer.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(corrupted(format!(
                "expected {} bytes at offset {}, only {} left",
                len,
                self.offset,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    pub(crate) fn read_u32s(&mut self, count: usize) -> Result<Vec<u32>> {
        let len = count.checked_mul(4).ok_or_else(|| corrupted("length overflow"))?;
        let bytes = self.read_bytes(len)?;
        let mut values = vec![0u32; count];
        LittleEndian::read_u32_into(bytes, &mut values);
        Ok(values)
    }

    pub(crate) fn read_f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let len = count.checked_mul(4).ok_or_else(|| corrupted("length overflow"))?;
        let bytes = self.read_bytes(len)?;
        let mut values = vec![0f32; count];
        LittleEndian::read_f32_into(bytes, &mut values);
        Ok(values)
    }

    /// Skips padding up to the next multiple of `alignment`.
    pub(crate) fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = align_to_next_boundary(self.offset, alignment) - self.offset;
        self.read_bytes(padding)?;
        Ok(())
    }
}

fn read_header(reader: &mut ByteReader) -> Result<Header> {
    if reader.read_bytes(4)? != INDEX_MAGIC {
        return Err(corrupted("bad index magic"));
    }
    let version_bytes = reader.read_bytes(4)?;
    let version = Version::from_byte(version_bytes[0])
        .ok_or_else(|| corrupted(format!("unknown index version {}", version_bytes[0])))?;
    let metric = MetricType::try_from(reader.read_u32()?).map_err(|e| corrupted(e.to_string()))?;
    let flags = reader.read_u32()?;
    let num_features = reader.read_u64()?;
    let num_clusters = reader.read_u64()?;
    let total_bits = reader.read_u64()?;
    let seed = reader.read_u64()?;
    let t_const = reader.read_f64()?;
    let eps0 = reader.read_f32()?;
    reader.read_bytes(4)?;
    let rotator_len = reader.read_u64()?;
    let arena_len = reader.read_u64()?;
    Ok(Header {
        version,
        metric,
        flags,
        num_features,
        num_clusters,
        total_bits,
        seed,
        t_const,
        eps0,
        rotator_len,
        arena_len,
    })
}

pub struct IvfRabitqReader {
    base_directory: String,
}

impl IvfRabitqReader {
    pub fn new(base_directory: String) -> Self {
        Self { base_directory }
    }

    pub fn read(&self) -> Result<IvfRabitq> {
        let config_path = format!("{}/{}", self.base_directory, CONFIG_FILE_NAME);
        let config: IvfRabitqConfig = serde_yaml::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("Failed to read {}", config_path))?,
        )
        .with_context(|| format!("Failed to parse {}", config_path))?;
        config
            .validate()
            .map_err(|e| RabitqError::InvalidConfig(e.to_string()))?;

        let index_path = format!("{}/{}", self.base_directory, INDEX_FILE_NAME);
        let file = File::open(&index_path).map_err(RabitqError::Io)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(RabitqError::Io)?;
        if mmap.len() < HEADER_LEN + 8 {
            return Err(corrupted(format!("index file is too short ({} bytes)", mmap.len())));
        }

        let (body, checksum) = mmap.split_at(mmap.len() - 8);
        let expected = LittleEndian::read_u64(checksum);
        let actual = xxh3_64(body);
        if expected != actual {
            return Err(corrupted(format!(
                "checksum mismatch: stored {:#018x}, computed {:#018x}",
                expected, actual
            )));
        }

        let mut reader = ByteReader::new(body);
        let header = read_header(&mut reader)?;
        if header.num_features != config.num_features as u64
            || header.num_clusters != config.num_clusters as u64
            || header.total_bits != config.total_bits as u64
            || header.seed != config.seed
            || header.faster_quant() != config.faster_quant
            || header.metric != config.metric
        {
            return Err(corrupted("index header does not match the config file"));
        }

        let mut rotator_bytes = reader.read_bytes(header.rotator_len as usize)?;
        let rotator = Rotator::read_from(&mut rotator_bytes)?;
        if !rotator_bytes.is_empty() {
            return Err(corrupted("trailing bytes after rotator"));
        }
        reader.align(SECTION_ALIGNMENT)?;

        let mut arena_reader = ByteReader::new(reader.read_bytes(header.arena_len as usize)?);
        let arena = ClusterArena::read_from(&mut arena_reader)?;
        if arena_reader.remaining() != 0 {
            return Err(corrupted("trailing bytes after clusters"));
        }
        reader.align(SECTION_ALIGNMENT)?;
        if reader.remaining() != 0 {
            return Err(corrupted("trailing bytes at end of index"));
        }

        let rabitq_config = RabitqConfig {
            t_const: header.t_const(),
            eps0: header.eps0,
        };
        debug!(
            "Read index with {} clusters and {} points from {}",
            arena.num_clusters(),
            arena.num_points(),
            index_path
        );
        IvfRabitq::new(config, rotator, rabitq_config, arena)
            .map_err(|e| corrupted(format!("inconsistent index: {:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use config::search_params::SearchParams;
    use tempdir::TempDir;
    use utils::test_utils::SyntheticDataset;

    use super::*;
    use crate::ivf::builder::IvfRabitqBuilder;
    use crate::ivf::writer::IvfRabitqWriter;
    use crate::utils::SearchContext;

    fn base_directory(temp_dir: &TempDir) -> String {
        temp_dir
            .path()
            .to_str()
            .expect("Failed to convert temporary directory path to string")
            .to_string()
    }

    fn build_and_write(base_directory: &str, metric: MetricType, faster_quant: bool) -> (IvfRabitq, SyntheticDataset) {
        let dataset = SyntheticDataset::random(1000, 96, 10, 21);
        let config = IvfRabitqConfig::new(96, 10, 5)
            .with_metric(metric)
            .with_faster_quant(faster_quant);
        let index = IvfRabitqBuilder::new(config)
            .expect("Failed to create builder")
            .construct(&dataset.data, &dataset.centroids, &dataset.cluster_ids)
            .expect("Failed to construct index");
        IvfRabitqWriter::new(base_directory.to_string())
            .write(&index)
            .expect("Failed to write index");
        (index, dataset)
    }

    fn is_corrupted(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<RabitqError>(), Some(RabitqError::CorruptedFile(_)))
    }

    #[test]
    fn test_read_round_trip() {
        for (metric, faster_quant) in [(MetricType::L2, false), (MetricType::InnerProduct, true)] {
            let temp_dir = TempDir::new("test_read_round_trip").expect("Failed to create temporary directory");
            let base_directory = base_directory(&temp_dir);
            let (index, dataset) = build_and_write(&base_directory, metric, faster_quant);

            let read = IvfRabitqReader::new(base_directory)
                .read()
                .expect("Failed to read index");
            assert_eq!(read, index);
            assert_eq!(read.rabitq_config(), index.rabitq_config());

            let params = SearchParams::new(10, 4);
            for i in 0..dataset.num_queries() {
                let expected = index
                    .search_with_params(dataset.query(i), &params, &mut SearchContext::new())
                    .expect("Failed to search");
                let got = read
                    .search_with_params(dataset.query(i), &params, &mut SearchContext::new())
                    .expect("Failed to search");
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_read_detects_corruption() {
        let temp_dir = TempDir::new("test_read_detects_corruption").expect("Failed to create temporary directory");
        let base_directory = base_directory(&temp_dir);
        build_and_write(&base_directory, MetricType::L2, false);

        let index_path = format!("{}/{}", base_directory, INDEX_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&index_path)
            .expect("Failed to open index file");
        file.seek(SeekFrom::Start(HEADER_LEN as u64 + 40))
            .expect("Failed to seek");
        file.write_all(&[0xAB]).expect("Failed to write");
        drop(file);

        let err = IvfRabitqReader::new(base_directory.clone())
            .read()
            .expect_err("Corrupted index should not load");
        assert!(is_corrupted(&err), "unexpected error: {:#}", err);

        let len = std::fs::metadata(&index_path).expect("Failed to stat index").len();
        OpenOptions::new()
            .write(true)
            .open(&index_path)
            .expect("Failed to open index file")
            .set_len(len / 2)
            .expect("Failed to truncate");
        let err = IvfRabitqReader::new(base_directory)
            .read()
            .expect_err("Truncated index should not load");
        assert!(is_corrupted(&err), "unexpected error: {:#}", err);
    }

    #[test]
    fn test_read_rejects_unknown_metric() {
        let temp_dir = TempDir::new("test_read_rejects_unknown_metric").expect("Failed to create temporary directory");
        let base_directory = base_directory(&temp_dir);
        build_and_write(&base_directory, MetricType::L2, false);

        // Patch the metric field and reseal the file so only the metric is wrong.
        let index_path = format!("{}/{}", base_directory, INDEX_FILE_NAME);
        let mut bytes = std::fs::read(&index_path).expect("Failed to read index");
        let body_len = bytes.len() - 8;
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        let checksum = xxh3_64(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());
        std::fs::write(&index_path, &bytes).expect("Failed to write index");

        let err = IvfRabitqReader::new(base_directory)
            .read()
            .expect_err("Unknown metric should not load");
        assert!(is_corrupted(&err), "unexpected error: {:#}", err);
        assert!(format!("{:#}", err).contains("unknown metric type 7"), "unexpected error: {:#}", err);
    }

    #[test]
    fn test_read_config_mismatch() {
        let temp_dir = TempDir::new("test_read_config_mismatch").expect("Failed to create temporary directory");
        let base_directory = base_directory(&temp_dir);
        build_and_write(&base_directory, MetricType::L2, false);

        let config_path = format!("{}/{}", base_directory, CONFIG_FILE_NAME);
        let config = IvfRabitqConfig::new(96, 10, 5).with_metric(MetricType::InnerProduct);
        std::fs::write(&config_path, serde_yaml::to_string(&config).expect("Failed to serialize config"))
            .expect("Failed to write config");
        let err = IvfRabitqReader::new(base_directory)
            .read()
            .expect_err("Mismatched config should not load");
        assert!(is_corrupted(&err), "unexpected error: {:#}", err);
    }

    #[test]
    fn test_read_missing_files() {
        let temp_dir = TempDir::new("test_read_missing_files").expect("Failed to create temporary directory");
        let base_directory = base_directory(&temp_dir);
        assert!(IvfRabitqReader::new(base_directory.clone()).read().is_err());

        build_and_write(&base_directory, MetricType::L2, false);
        std::fs::remove_file(format!("{}/{}", base_directory, INDEX_FILE_NAME)).expect("Failed to remove index");
        let err = IvfRabitqReader::new(base_directory)
            .read()
            .expect_err("Missing index should not load");
        assert!(matches!(err.downcast_ref::<RabitqError>(), Some(RabitqError::Io(_))));
    }
}
