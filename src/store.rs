//! 指标存储：每个指标一个容器文件
//!
//! 目录布局：`<root>/<prefix>/<CODE>.ind`，`prefix` 取代码第一个 `.` 之前的部分，
//! 例如 `SP.POP.TOTL` → `<root>/SP/SP.POP.TOTL.ind`。

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::{normalize_code, AggError, IndicatorCode, Result};
use crate::compression::CompressionType;
use crate::container::{ContainerReader, ContainerWriter};
use crate::indicator::{Indicator, LoadFilter};

pub const CONTAINER_EXT: &str = "ind";

/// 聚合器读取指标的来源
///
/// 由 `IndicatorStore`（工作目录）与 `SnapshotView`（历史快照）实现。
pub trait IndicatorSource: Sync {
    fn list_indicators(&self) -> Result<Vec<IndicatorCode>>;
    fn load(&self, code: &str, filter: &LoadFilter) -> Result<Indicator>;
}

pub struct IndicatorStore {
    root:   PathBuf,
    writer: ContainerWriter,
}

impl IndicatorStore {
    /// 打开（必要时创建）存储根目录
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, writer: ContainerWriter::default() })
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.writer = ContainerWriter::new(compression);
        self
    }

    pub fn root(&self) -> &Path { &self.root }

    /// 生成指标容器在磁盘上的路径
    pub fn path_for(&self, code: &str) -> Result<PathBuf> {
        let code = normalize_code(code);
        if code.is_empty() || code.starts_with('.') {
            return Err(AggError::Config(format!("invalid indicator code {code:?}")));
        }
        if code.contains(|c| c == '/' || c == '\\') || code.contains("..") {
            return Err(AggError::Config(format!("indicator code {code:?} is not a plain name")));
        }
        let prefix = code.split('.').next().unwrap_or(&code);
        Ok(self.root.join(prefix).join(format!("{code}.{CONTAINER_EXT}")))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.path_for(code).map(|p| p.is_file()).unwrap_or(false)
    }

    /// 覆盖写入一个指标。先写临时文件再 rename，单个指标的替换是原子的；
    /// 多个指标之间不保证批量原子性。
    pub fn save(&self, indicator: &Indicator) -> Result<()> {
        let path = self.path_for(&indicator.code)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension(format!("{CONTAINER_EXT}.tmp"));
        let written = File::create(&tmp)
            .map_err(AggError::from)
            .and_then(|f| {
                let mut out = BufWriter::new(f);
                let n = self.writer.write(indicator, &mut out)?;
                out.flush()?;
                Ok(n)
            })
            .and_then(|n| fs::rename(&tmp, &path).map(|_| n).map_err(AggError::from));
        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        debug!(code = %indicator.code, bytes = written, "saved indicator");
        Ok(())
    }

    /// 删除一个指标；不存在时报 `NotFound`
    pub fn remove(&self, code: &str) -> Result<()> {
        let path = self.path_for(code)?;
        if !path.is_file() {
            return Err(AggError::NotFound(format!("indicator {}", normalize_code(code))));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

impl IndicatorSource for IndicatorStore {
    /// 枚举所有已落盘的指标（排序后返回）
    fn list_indicators(&self) -> Result<Vec<IndicatorCode>> {
        let mut codes = Vec::new();
        for dir in fs::read_dir(&self.root)? {
            let dir = dir?;
            if !dir.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(dir.path())? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXT) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
                // 只列出 `load` 能按代码找回的文件
                match self.path_for(stem) {
                    Ok(expected) if expected == path => codes.push(stem.to_string()),
                    _ => warn!(path = %path.display(), "ignoring misplaced indicator container"),
                }
            }
        }
        codes.sort();
        Ok(codes)
    }

    fn load(&self, code: &str, filter: &LoadFilter) -> Result<Indicator> {
        let code = normalize_code(code);
        let path = self.path_for(&code)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound =>
                return Err(AggError::NotFound(format!("indicator {code}"))),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ContainerReader::open(&code, BufReader::new(file))?;
        if reader.header().code != code {
            return Err(AggError::corrupt(
                &code,
                format!("container holds indicator {}", reader.header().code),
            ));
        }
        reader.load(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::Observation;

    #[test]
    fn test_path_layout() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        assert_eq!(
            store.path_for("sp.pop.totl").unwrap(),
            dir.path().join("SP").join("SP.POP.TOTL.ind"),
        );
        assert_eq!(store.path_for("GDP").unwrap(), dir.path().join("GDP").join("GDP.ind"));
        assert!(store.path_for("").is_err());
        assert!(store.path_for("../etc").is_err());
    }

    #[test]
    fn test_save_list_load() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        let a = Indicator::new("SP.POP.TOTL", "Population", "people").with("USA", 2020, Some(331.0));
        let b = Indicator::new("NY.GDP.MKTP.CD", "GDP", "US$").with("USA", 2020, None);
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        store.save(&a).unwrap();

        assert_eq!(store.list_indicators().unwrap(), vec!["NY.GDP.MKTP.CD", "SP.POP.TOTL"]);
        let got = store.load("sp.pop.totl", &LoadFilter::all()).unwrap();
        assert_eq!(got, a);
        assert_eq!(got.get("USA", 2020), Observation::Present(331.0));
    }

    #[test]
    fn test_misplaced_containers_not_listed() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        store.save(&Indicator::new("AA.OK", "", "").with("USA", 2020, Some(1.0))).unwrap();
        let src = store.path_for("AA.OK").unwrap();

        fs::create_dir_all(dir.path().join("ZZ")).unwrap();
        fs::copy(&src, dir.path().join("ZZ").join("AA.OK2.ind")).unwrap();
        fs::copy(&src, dir.path().join("AA").join("aa.lower.ind")).unwrap();

        let codes = store.list_indicators().unwrap();
        assert_eq!(codes, vec!["AA.OK"]);
        for code in &codes {
            assert!(store.load(code, &LoadFilter::all()).is_ok());
        }
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        // unit 超过 u16 长度上限，写入中途失败
        let ind = Indicator::new("AA.LONG", "", &"x".repeat(70_000));
        assert!(store.save(&ind).is_err());

        let path = store.path_for("AA.LONG").unwrap();
        assert!(!path.exists());
        assert!(!path.with_extension("ind.tmp").exists());
        assert!(store.list_indicators().unwrap().is_empty());
    }

    #[test]
    fn test_missing_indicator_is_not_found() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        let err   = store.load("NOPE", &LoadFilter::all()).unwrap_err();
        assert!(matches!(err, AggError::NotFound(_)));
        assert!(matches!(store.remove("NOPE").unwrap_err(), AggError::NotFound(_)));
    }

    #[test]
    fn test_misnamed_container_is_corrupt() {
        let dir   = tempfile::tempdir().unwrap();
        let store = IndicatorStore::open(dir.path()).unwrap();
        store.save(&Indicator::new("A.B", "", "")).unwrap();
        fs::copy(store.path_for("A.B").unwrap(), store.path_for("A.C").unwrap()).unwrap();
        assert!(store.load("A.C", &LoadFilter::all()).unwrap_err().is_corrupt());
    }
}
