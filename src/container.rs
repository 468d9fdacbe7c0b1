//! 指标容器文件读写（每个指标一个文件，按年份列存）
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC  (8 bytes) "INDCSEG\0"      │
//! │  Version(4 bytes) = 1              │
//! │  code / name / unit (len-prefixed) │
//! ├────────────────────────────────────┤
//! │  DATA REGION                       │
//! │    [Page year 0]                   │ ← RLE 状态 + f64 值，LZ4 压缩
//! │    [Page year 1]                   │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  ENTITY DICTIONARY                 │
//! │    count + (u16 len, utf8)*        │ ← 严格升序，行键
//! │    CRC32 (4 bytes)                 │
//! ├────────────────────────────────────┤
//! │  FOOTER                            │
//! │    num_entities, num_years         │
//! │    dict_offset, dict_size          │
//! │    (year, page_offset, page_size)* │
//! │    Footer CRC32  (4 bytes)         │
//! │    Footer length (4 bytes)         │
//! │    MAGIC         (8 bytes)         │
//! └────────────────────────────────────┘
//! ```
//!
//! 写出是确定性的（实体、年份均升序），所以加载后原样保存得到逐字节相同的文件。
//! 读取端先定位 footer，只解码请求年份范围内的页，因此按实体/年份的
//! 选择性加载不需要物化整个指标。

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{AggError, EntityCode, Result, Year};
use crate::compression::CompressionType;
use crate::encoding;
use crate::indicator::{Indicator, LoadFilter};
use crate::page::{PageBuilder, PageDecoder};

const MAGIC: &[u8; 8] = b"INDCSEG\0";
const VERSION: u32    = 1;
/// footer 尾部：crc(4) + len(4) + magic(8)
const TRAILER_LEN: u64  = 16;
const COLUMN_ENTRY_LEN: usize = 20;

// ── Footer 结构 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ColumnEntry {
    pub year:        Year,
    pub page_offset: u64,
    pub page_size:   u64,
}

#[derive(Debug)]
pub struct ContainerFooter {
    pub num_entities: u32,
    pub dict_offset:  u64,
    pub dict_size:    u64,
    pub columns:      Vec<ColumnEntry>,
}

impl ContainerFooter {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.columns.len() * COLUMN_ENTRY_LEN);
        out.extend_from_slice(&self.num_entities.to_le_bytes());
        out.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.dict_offset.to_le_bytes());
        out.extend_from_slice(&self.dict_size.to_le_bytes());
        for c in &self.columns {
            out.extend_from_slice(&c.year.to_le_bytes());
            out.extend_from_slice(&c.page_offset.to_le_bytes());
            out.extend_from_slice(&c.page_size.to_le_bytes());
        }
        out
    }

    fn deserialize(data: &[u8]) -> Option<Self> {
        let mut rdr = Cursor::new(data);
        let num_entities = rdr.read_u32::<LittleEndian>().ok()?;
        let num_years    = rdr.read_u32::<LittleEndian>().ok()? as usize;
        let dict_offset  = rdr.read_u64::<LittleEndian>().ok()?;
        let dict_size    = rdr.read_u64::<LittleEndian>().ok()?;
        if data.len() != 24 + num_years * COLUMN_ENTRY_LEN {
            return None;
        }
        let mut columns = Vec::with_capacity(num_years);
        for _ in 0..num_years {
            columns.push(ColumnEntry {
                year:        rdr.read_i32::<LittleEndian>().ok()?,
                page_offset: rdr.read_u64::<LittleEndian>().ok()?,
                page_size:   rdr.read_u64::<LittleEndian>().ok()?,
            });
        }
        Some(Self { num_entities, dict_offset, dict_size, columns })
    }
}

// ── ContainerWriter ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerWriter {
    compression: CompressionType,
}

impl ContainerWriter {
    pub fn new(compression: CompressionType) -> Self {
        Self { compression }
    }

    /// 将整个指标序列化到字节流，返回写出的字节数
    pub fn write<W: Write>(&self, ind: &Indicator, mut writer: W) -> Result<u64> {
        let mut pos: u64 = 0;

        // ── 文件头 ────────────────────────────────────────────────────────────
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        pos += 12;
        pos += write_str16(&mut writer, &ind.code)?;
        pos += write_str32(&mut writer, &ind.name)?;
        pos += write_str16(&mut writer, &ind.unit)?;

        // ── DATA REGION ───────────────────────────────────────────────────────
        let entities: Vec<&EntityCode> = ind.entities().collect();
        if let Some(e) = entities.iter().find(|e| e.len() > u16::MAX as usize) {
            return Err(AggError::Invariant(format!("entity code too long: {} bytes", e.len())));
        }
        let mut columns = Vec::new();

        for year in ind.years() {
            let mut pb = PageBuilder::new(year, self.compression);
            for e in &entities {
                pb.add(ind.get(e, year));
            }
            let page = pb.build()?;
            writer.write_all(&page)?;
            columns.push(ColumnEntry { year, page_offset: pos, page_size: page.len() as u64 });
            pos += page.len() as u64;
        }

        // ── ENTITY DICTIONARY ─────────────────────────────────────────────────
        let mut dict = encoding::encode_strings(&entities);
        let dict_crc = crc32fast::hash(&dict);
        dict.extend_from_slice(&dict_crc.to_le_bytes());
        let dict_offset = pos;
        writer.write_all(&dict)?;
        pos += dict.len() as u64;

        // ── FOOTER ────────────────────────────────────────────────────────────
        let footer = ContainerFooter {
            num_entities: entities.len() as u32,
            dict_offset,
            dict_size: dict.len() as u64,
            columns,
        };
        let footer_bytes = footer.serialize();
        writer.write_all(&footer_bytes)?;
        writer.write_u32::<LittleEndian>(crc32fast::hash(&footer_bytes))?;
        writer.write_u32::<LittleEndian>(footer_bytes.len() as u32)?;
        writer.write_all(MAGIC)?;
        pos += footer_bytes.len() as u64 + TRAILER_LEN;

        writer.flush()?;
        Ok(pos)
    }

    pub fn to_bytes(&self, ind: &Indicator) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(ind, &mut buf)?;
        Ok(buf)
    }
}

fn write_str16<W: Write>(w: &mut W, s: &str) -> Result<u64> {
    let len = u16::try_from(s.len())
        .map_err(|_| AggError::Invariant(format!("header field too long: {} bytes", s.len())))?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(s.as_bytes())?;
    Ok(2 + s.len() as u64)
}

fn write_str32<W: Write>(w: &mut W, s: &str) -> Result<u64> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(4 + s.len() as u64)
}

// ── ContainerReader ───────────────────────────────────────────────────────────

/// 容器头部信息
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub code: String,
    pub name: String,
    pub unit: String,
}

pub struct ContainerReader<R> {
    inner:    R,
    /// 用于错误信息的指标代码（打开前未知时用调用方提供的代码）
    label:    String,
    header:   ContainerHeader,
    footer:   ContainerFooter,
    entities: Vec<EntityCode>,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// 解析头部、footer 与实体字典；数据页延迟到 `read_column` 读取
    pub fn open(label: &str, mut inner: R) -> Result<Self> {
        let corrupt = |reason: &str| AggError::corrupt(label, reason);
        let eof     = |e: std::io::Error| header_err(label, e);

        // ── 文件头 ────────────────────────────────────────────────────────────
        inner.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic).map_err(eof)?;
        if &magic != MAGIC {
            return Err(corrupt("invalid container magic"));
        }
        let version = inner.read_u32::<LittleEndian>().map_err(eof)?;
        if version != VERSION {
            return Err(AggError::corrupt(label, format!("unsupported container version {version}")));
        }
        let header = ContainerHeader {
            code: read_str16(label, &mut inner)?,
            name: read_str32(label, &mut inner)?,
            unit: read_str16(label, &mut inner)?,
        };
        let header_end = inner.stream_position()?;

        // ── FOOTER ────────────────────────────────────────────────────────────
        let n = inner.seek(SeekFrom::End(0))?;
        if n < header_end + TRAILER_LEN {
            return Err(corrupt("truncated container"));
        }
        inner.seek(SeekFrom::Start(n - TRAILER_LEN))?;
        let footer_crc = inner.read_u32::<LittleEndian>().map_err(eof)?;
        let footer_len = inner.read_u32::<LittleEndian>().map_err(eof)? as u64;
        inner.read_exact(&mut magic).map_err(eof)?;
        if &magic != MAGIC {
            return Err(corrupt("invalid trailing magic"));
        }
        let footer_start = (n - TRAILER_LEN)
            .checked_sub(footer_len)
            .filter(|&s| s >= header_end)
            .ok_or_else(|| corrupt("footer length out of range"))?;

        inner.seek(SeekFrom::Start(footer_start))?;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        inner.read_exact(&mut footer_bytes).map_err(eof)?;
        if crc32fast::hash(&footer_bytes) != footer_crc {
            return Err(corrupt("footer checksum mismatch"));
        }
        let footer = ContainerFooter::deserialize(&footer_bytes)
            .ok_or_else(|| corrupt("cannot parse footer"))?;

        let in_data = |off: u64, size: u64| {
            off >= header_end && off.checked_add(size).map_or(false, |end| end <= footer_start)
        };
        if !in_data(footer.dict_offset, footer.dict_size) || footer.dict_size < 4 {
            return Err(corrupt("entity dictionary out of range"));
        }
        for c in &footer.columns {
            if !in_data(c.page_offset, c.page_size) {
                return Err(AggError::corrupt(label, format!("page for year {} out of range", c.year)));
            }
        }
        if footer.columns.windows(2).any(|w| w[0].year >= w[1].year) {
            return Err(corrupt("year columns duplicated or out of order"));
        }

        // ── ENTITY DICTIONARY ─────────────────────────────────────────────────
        inner.seek(SeekFrom::Start(footer.dict_offset))?;
        let mut dict = vec![0u8; footer.dict_size as usize];
        inner.read_exact(&mut dict).map_err(eof)?;
        let (body, crc) = dict.split_at(dict.len() - 4);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(crc);
        if crc32fast::hash(body) != u32::from_le_bytes(crc_bytes) {
            return Err(corrupt("entity dictionary checksum mismatch"));
        }
        let entities = encoding::decode_strings(body)
            .map_err(|r| AggError::corrupt(label, r))?;
        if entities.len() != footer.num_entities as usize {
            return Err(corrupt("entity count does not match footer"));
        }
        if let Some(w) = entities.windows(2).find(|w| w[0] >= w[1]) {
            let reason = if w[0] == w[1] {
                format!("duplicate entity key {}", w[0])
            } else {
                format!("entity keys out of order at {}", w[1])
            };
            return Err(AggError::corrupt(label, reason));
        }

        Ok(Self { inner, label: label.into(), header, footer, entities })
    }

    pub fn header(&self)   -> &ContainerHeader { &self.header }
    pub fn entities(&self) -> &[EntityCode]    { &self.entities }

    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.footer.columns.iter().map(|c| c.year)
    }

    /// 读取第 `idx` 个年份列
    pub fn read_column(&mut self, idx: usize) -> Result<PageDecoder> {
        let entry = *self.footer.columns.get(idx)
            .ok_or_else(|| AggError::NotFound(format!("{}: column {idx}", self.label)))?;

        self.inner.seek(SeekFrom::Start(entry.page_offset))?;
        let mut buf = vec![0u8; entry.page_size as usize];
        self.inner.read_exact(&mut buf)?;

        let page = PageDecoder::decode(&self.label, &buf)?;
        if page.year != entry.year {
            return Err(AggError::corrupt(
                &self.label,
                format!("page year {} does not match footer year {}", page.year, entry.year),
            ));
        }
        if page.observations.len() != self.entities.len() {
            return Err(AggError::corrupt(&self.label, format!("year {}: row count mismatch", entry.year)));
        }
        Ok(page)
    }

    /// 按条件加载：只读取范围内的年份页，只保留选中的实体行
    pub fn load(&mut self, filter: &LoadFilter) -> Result<Indicator> {
        let mut ind = Indicator::new(&self.header.code, &self.header.name, &self.header.unit);

        let rows: Vec<usize> = (0..self.entities.len())
            .filter(|&i| filter.accepts_entity(&self.entities[i]))
            .collect();
        for &r in &rows {
            ind.add_entity(&self.entities[r]);
        }
        if rows.is_empty() {
            return Ok(ind);
        }

        let cols: Vec<usize> = (0..self.footer.columns.len())
            .filter(|&i| filter.accepts_year(self.footer.columns[i].year))
            .collect();
        for idx in cols {
            let page = self.read_column(idx)?;
            for &r in &rows {
                ind.insert(&self.entities[r], page.year, page.observations[r])?;
            }
        }
        Ok(ind)
    }
}

fn read_str16<R: Read>(label: &str, r: &mut R) -> Result<String> {
    let len = r.read_u16::<LittleEndian>().map_err(|e| header_err(label, e))? as usize;
    read_utf8(label, r, len)
}

fn read_str32<R: Read>(label: &str, r: &mut R) -> Result<String> {
    let len = r.read_u32::<LittleEndian>().map_err(|e| header_err(label, e))? as usize;
    read_utf8(label, r, len)
}

fn read_utf8<R: Read>(label: &str, r: &mut R, len: usize) -> Result<String> {
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf).map_err(|e| header_err(label, e))?;
    if buf.len() != len {
        return Err(AggError::corrupt(label, "truncated container"));
    }
    String::from_utf8(buf).map_err(|_| AggError::corrupt(label, "header is not utf-8"))
}

fn header_err(label: &str, e: std::io::Error) -> AggError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        AggError::corrupt(label, "truncated container")
    } else {
        AggError::Io(e)
    }
}
