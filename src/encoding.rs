//! 列编码
//!
//! 容器中用到三种编码：
//! - **RunLength**：(count u32, tag u8) 对，用于观测状态列；真实数据中缺失
//!   往往成片出现（早年份、未覆盖的国家），游程压缩效果好
//! - **Plain f64**：仅对 `Present` 槽位按序写出原始 f64
//! - **StringList**：实体字典，(u16 len, utf8) 序列

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

/// 解码失败原因，由调用方补上指标代码后转为 `CorruptData`
pub type DecodeResult<T> = std::result::Result<T, String>;

fn short(what: &str) -> impl Fn(std::io::Error) -> String + '_ {
    move |_| format!("{what}: unexpected end of data")
}

// ── Run-Length（状态标签）────────────────────────────────────────────────────

pub fn encode_states(tags: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let Some((&first, rest)) = tags.split_first() else { return out; };
    let mut cur = first;
    let mut run: u32 = 1;

    for &t in rest {
        if t == cur {
            run += 1;
        } else {
            out.extend_from_slice(&run.to_le_bytes());
            out.push(cur);
            cur = t;
            run = 1;
        }
    }
    out.extend_from_slice(&run.to_le_bytes());
    out.push(cur);
    out
}

/// 解码后的总长度必须恰好等于 `count`
pub fn decode_states(data: &[u8], count: usize) -> DecodeResult<Vec<u8>> {
    if data.len() % 5 != 0 {
        return Err(format!("state runs: length {} is not a multiple of 5", data.len()));
    }
    let mut out = Vec::with_capacity(count);
    let mut rdr = Cursor::new(data);
    while (rdr.position() as usize) < data.len() {
        let run = rdr.read_u32::<LittleEndian>().map_err(short("state runs"))? as usize;
        let tag = rdr.read_u8().map_err(short("state runs"))?;
        if run == 0 || out.len() + run > count {
            return Err(format!("state runs overflow row count {count}"));
        }
        out.resize(out.len() + run, tag);
    }
    if out.len() != count {
        return Err(format!("state runs cover {} rows, expected {count}", out.len()));
    }
    Ok(out)
}

// ── Plain f64 ─────────────────────────────────────────────────────────────────

pub fn encode_values(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_values(data: &[u8], count: usize) -> DecodeResult<Vec<f64>> {
    if data.len() != count * 8 {
        return Err(format!("value block holds {} bytes, expected {}", data.len(), count * 8));
    }
    let mut rdr = Cursor::new(data);
    (0..count)
        .map(|_| rdr.read_f64::<LittleEndian>().map_err(short("values")))
        .collect()
}

// ── StringList（实体字典）────────────────────────────────────────────────────

pub fn encode_strings<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for s in items {
        let b = s.as_ref().as_bytes();
        out.extend_from_slice(&(b.len() as u16).to_le_bytes());
        out.extend_from_slice(b);
    }
    out
}

pub fn decode_strings(data: &[u8]) -> DecodeResult<Vec<String>> {
    let mut rdr = Cursor::new(data);
    let n = rdr.read_u32::<LittleEndian>().map_err(short("dictionary"))? as usize;
    let mut out = Vec::with_capacity(n.min(data.len()));
    for _ in 0..n {
        let len = rdr.read_u16::<LittleEndian>().map_err(short("dictionary"))? as usize;
        let mut buf = vec![0u8; len];
        rdr.read_exact(&mut buf).map_err(short("dictionary"))?;
        out.push(String::from_utf8(buf).map_err(|_| "dictionary: entry is not utf-8".to_string())?);
    }
    if (rdr.position() as usize) != data.len() {
        return Err("dictionary: trailing bytes".into());
    }
    Ok(out)
}
