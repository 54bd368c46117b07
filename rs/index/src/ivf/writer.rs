use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use config::enums::MetricType;
use log::debug;
use utils::io::{wrap_write, write_pad, HashingWriter};

use crate::ivf::index::IvfRabitq;
use crate::ivf::{CONFIG_FILE_NAME, INDEX_FILE_NAME};

pub(crate) const INDEX_MAGIC: [u8; 4] = *b"RQIV";
pub(crate) const HEADER_LEN: usize = 80;
pub(crate) const SECTION_ALIGNMENT: usize = 8;

const FLAG_FASTER_QUANT: u32 = 1;
const FLAG_T_CONST: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Version {
    V0,
}

impl Version {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Version::V0),
            _ => None,
        }
    }

    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Version::V0 => 0,
        }
    }
}

/// Fixed-size header at the start of the index file.
///
/// Layout (little-endian): magic, version byte and 3 zero bytes, metric, flags, num_features,
/// num_clusters, total_bits, seed, t_const, eps0, 4 zero bytes, rotator_len, arena_len.
/// The rotator and arena sections follow, each padded to 8 bytes, and the file ends with the
/// xxh3-64 checksum of everything before it.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: Version,
    pub metric: MetricType,
    pub flags: u32,
    pub num_features: u64,
    pub num_clusters: u64,
    pub total_bits: u64,
    pub seed: u64,
    pub t_const: f64,
    pub eps0: f32,
    pub rotator_len: u64,
    pub arena_len: u64,
}

impl Header {
    pub(crate) fn faster_quant(&self) -> bool {
        self.flags & FLAG_FASTER_QUANT != 0
    }

    pub(crate) fn t_const(&self) -> Option<f64> {
        if self.flags & FLAG_T_CONST != 0 {
            Some(self.t_const)
        } else {
            None
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = wrap_write(writer, &INDEX_MAGIC)?;
        written += wrap_write(writer, &[self.version.as_byte(), 0, 0, 0])?;
        written += wrap_write(writer, &u32::from(self.metric).to_le_bytes())?;
        written += wrap_write(writer, &self.flags.to_le_bytes())?;
        for value in [self.num_features, self.num_clusters, self.total_bits, self.seed] {
            written += wrap_write(writer, &value.to_le_bytes())?;
        }
        written += wrap_write(writer, &self.t_const.to_le_bytes())?;
        written += wrap_write(writer, &self.eps0.to_le_bytes())?;
        written += wrap_write(writer, &[0u8; 4])?;
        written += wrap_write(writer, &self.rotator_len.to_le_bytes())?;
        written += wrap_write(writer, &self.arena_len.to_le_bytes())?;
        Ok(written)
    }
}

/// Persists an `IvfRabitq` as `<base_directory>/ivf_rabitq_config.yaml` plus a single
/// checksummed `<base_directory>/index` file.
pub struct IvfRabitqWriter {
    base_directory: String,
}

impl IvfRabitqWriter {
    pub fn new(base_directory: String) -> Self {
        Self { base_directory }
    }

    pub fn write(&self, index: &IvfRabitq) -> Result<()> {
        create_dir_all(&self.base_directory)
            .with_context(|| format!("Failed to create directory {}", self.base_directory))?;

        let config_path = format!("{}/{}", self.base_directory, CONFIG_FILE_NAME);
        std::fs::write(&config_path, serde_yaml::to_string(index.config())?)
            .with_context(|| format!("Failed to write config to {}", config_path))?;
        debug!("Finish writing config");

        let index_path = format!("{}/{}", self.base_directory, INDEX_FILE_NAME);
        let file = File::create(&index_path).with_context(|| format!("Failed to create {}", index_path))?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        let total = self.write_index(index, &mut writer)?;
        if writer.bytes_written() != total {
            return Err(anyhow!(
                "Expected {} bytes to reach {}, but {} did",
                total,
                index_path,
                writer.bytes_written()
            ));
        }

        let checksum = writer.checksum();
        let mut inner = writer.into_inner();
        wrap_write(&mut inner, &checksum.to_le_bytes())?;
        inner.flush()?;
        debug!("Wrote {} bytes to {} (checksum {:#018x})", total + 8, index_path, checksum);
        Ok(())
    }

    fn write_index<W: Write>(&self, index: &IvfRabitq, writer: &mut W) -> Result<usize> {
        let config = index.config();
        let rabitq_config = index.rabitq_config();
        let mut flags = 0;
        if config.faster_quant {
            flags |= FLAG_FASTER_QUANT;
        }
        if rabitq_config.t_const.is_some() {
            flags |= FLAG_T_CONST;
        }
        let header = Header {
            version: Version::V0,
            metric: config.metric,
            flags,
            num_features: config.num_features as u64,
            num_clusters: config.num_clusters as u64,
            total_bits: config.total_bits as u64,
            seed: config.seed,
            t_const: rabitq_config.t_const.unwrap_or(0.0),
            eps0: rabitq_config.eps0,
            rotator_len: index.rotator().size() as u64,
            arena_len: index.arena().size() as u64,
        };

        let mut written = header.write_to(writer)?;
        if written != HEADER_LEN {
            return Err(anyhow!("Expected to write {} header bytes, but wrote {}", HEADER_LEN, written));
        }

        let rotator_len = index.rotator().write_to(writer).context("Failed to write rotator")?;
        if rotator_len as u64 != header.rotator_len {
            return Err(anyhow!(
                "Expected to write {} bytes of rotator, but wrote {}",
                header.rotator_len,
                rotator_len
            ));
        }
        written += rotator_len;
        written += write_pad(writer, written, SECTION_ALIGNMENT)?;
        debug!("Finish writing rotator");

        let arena_len = index.arena().write_to(writer).context("Failed to write clusters")?;
        if arena_len as u64 != header.arena_len {
            return Err(anyhow!(
                "Expected to write {} bytes of clusters, but wrote {}",
                header.arena_len,
                arena_len
            ));
        }
        written += arena_len;
        written += write_pad(writer, written, SECTION_ALIGNMENT)?;
        debug!("Finish writing clusters");
        Ok(written)
    }
}
