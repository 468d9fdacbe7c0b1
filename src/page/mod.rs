//! 年份列数据页读写
//!
//! 一页 = 一个年份在所有实体行上的观测值。
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ row_count    (u32 LE)            │  == 实体字典长度
//! │ year         (i32 LE)            │
//! │ raw_size     (u32 LE)            │  压缩前负载长度
//! │ codec        (u8)                │
//! │ payload      (compressed)        │
//! │   ├ states_len (u32 LE)          │
//! │   ├ states     (RLE tags)        │
//! │   └ values     (f64 × present)   │
//! │ CRC32        (u32 LE)            │
//! └──────────────────────────────────┘
//! ```

use crate::common::{AggError, Result, Year};
use crate::compression::{self, CompressionType};
use crate::encoding;
use crate::indicator::Observation;

const HEADER_LEN: usize = 13;

// ── PageBuilder ───────────────────────────────────────────────────────────────

pub struct PageBuilder {
    year:        Year,
    compression: CompressionType,
    tags:        Vec<u8>,
    values:      Vec<f64>,
}

impl PageBuilder {
    pub fn new(year: Year, compression: CompressionType) -> Self {
        Self { year, compression, tags: Vec::new(), values: Vec::new() }
    }

    pub fn add(&mut self, obs: Observation) {
        self.tags.push(obs.tag());
        if let Observation::Present(v) = obs {
            self.values.push(v);
        }
    }

    pub fn len(&self)      -> usize { self.tags.len() }
    pub fn is_empty(&self) -> bool  { self.tags.is_empty() }

    /// 序列化为页字节（encode → compress → 加 header+CRC）
    pub fn build(self) -> Result<Vec<u8>> {
        let states = encoding::encode_states(&self.tags);
        let mut raw = Vec::with_capacity(4 + states.len() + self.values.len() * 8);
        raw.extend_from_slice(&(states.len() as u32).to_le_bytes());
        raw.extend_from_slice(&states);
        raw.extend_from_slice(&encoding::encode_values(&self.values));

        let compressed = compression::compress(&raw, self.compression)?;

        let mut page = Vec::with_capacity(HEADER_LEN + compressed.len() + 4);
        page.extend_from_slice(&(self.tags.len() as u32).to_le_bytes());
        page.extend_from_slice(&self.year.to_le_bytes());
        page.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        page.push(self.compression.tag());
        page.extend_from_slice(&compressed);

        let crc = crc32fast::hash(&page);
        page.extend_from_slice(&crc.to_le_bytes());
        Ok(page)
    }
}

// ── PageDecoder ───────────────────────────────────────────────────────────────

pub struct PageDecoder {
    pub year:         Year,
    pub observations: Vec<Observation>,
}

impl PageDecoder {
    /// 解码一页；任何结构问题都报告为 `code` 的 `CorruptData`
    pub fn decode(code: &str, data: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| AggError::corrupt(code, reason);

        if data.len() < HEADER_LEN + 4 {
            return Err(corrupt("page data too short".into()));
        }
        let payload_end = data.len() - 4;
        if crc32fast::hash(&data[..payload_end]) != read_u32(data, payload_end) {
            return Err(corrupt("page checksum mismatch".into()));
        }

        let row_count = read_u32(data, 0) as usize;
        let year      = read_u32(data, 4) as i32;
        let raw_size  = read_u32(data, 8) as usize;
        let codec     = CompressionType::from_tag(data[12])
            .ok_or_else(|| corrupt(format!("unknown codec tag {}", data[12])))?;

        let raw = compression::decompress(&data[HEADER_LEN..payload_end], codec, raw_size)
            .map_err(|e| corrupt(e.to_string()))?;
        if raw.len() != raw_size || raw.len() < 4 {
            return Err(corrupt(format!("year {year}: page payload size mismatch")));
        }

        let states_len = read_u32(&raw, 0) as usize;
        let states_end = 4usize.checked_add(states_len)
            .filter(|&end| end <= raw.len())
            .ok_or_else(|| corrupt(format!("year {year}: state block overruns page")))?;
        let tags = encoding::decode_states(&raw[4..states_end], row_count)
            .map_err(|r| corrupt(format!("year {year}: {r}")))?;

        let present = tags.iter().filter(|&&t| t == 1).count();
        let values  = encoding::decode_values(&raw[states_end..], present)
            .map_err(|r| corrupt(format!("year {year}: {r}")))?;

        let mut values = values.into_iter();
        let mut observations = Vec::with_capacity(row_count);
        for tag in tags {
            let obs = match tag {
                0 => Observation::Missing,
                2 => Observation::Invalid,
                1 => {
                    let v = values.next()
                        .ok_or_else(|| corrupt(format!("year {year}: value block exhausted")))?;
                    if !v.is_finite() {
                        return Err(corrupt(format!("year {year}: non-finite stored value")));
                    }
                    Observation::Present(v)
                }
                other => return Err(corrupt(format!("year {year}: unknown observation tag {other}"))),
            };
            observations.push(obs);
        }

        Ok(Self { year, observations })
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}
