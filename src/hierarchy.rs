//! 分类层级（聚合实体 → 直接成员）
//!
//! 有向无环图：每个聚合实体有一组直接成员（基础实体或其他聚合实体）。
//! 构造时一次性分层：
//!   • level 0 = 基础实体
//!   • 反复剥离"所有成员都已分层"的聚合实体，剥离轮次即其 level
//!   • 剥离停滞而仍有实体未分层 ⇒ 存在环，返回 `Cycle`

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::common::{normalize_code, AggError, EntityCode, Result};

static NO_MEMBERS: BTreeSet<EntityCode> = BTreeSet::new();

#[derive(Debug, Clone)]
pub struct Hierarchy {
    base:     BTreeSet<EntityCode>,
    /// aggregate → 直接成员
    members:  BTreeMap<EntityCode, BTreeSet<EntityCode>>,
    levels:   HashMap<EntityCode, u32>,
    /// 升序 (level, entities)；下标 0 为基础实体
    by_level: Vec<(u32, BTreeSet<EntityCode>)>,
}

impl Hierarchy {
    /// 校验并构建层级
    ///
    /// - 每个成员必须是已声明的基础实体或聚合实体，否则 `NotFound`
    /// - 同一代码不得既是基础实体又是聚合实体，也不得重复定义
    /// - 有环则 `Cycle`
    pub fn new<B, G, M, S>(base_entities: B, groups: G) -> Result<Self>
    where
        B: IntoIterator<Item = S>,
        G: IntoIterator<Item = (S, M)>,
        M: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base: BTreeSet<EntityCode> = base_entities
            .into_iter()
            .map(|e| normalize_code(e.as_ref()))
            .collect();

        let mut members: BTreeMap<EntityCode, BTreeSet<EntityCode>> = BTreeMap::new();
        for (group, list) in groups {
            let group = normalize_code(group.as_ref());
            if base.contains(&group) {
                return Err(AggError::Config(format!("{group} is declared both as base entity and as group")));
            }
            let set: BTreeSet<EntityCode> = list.into_iter().map(|m| normalize_code(m.as_ref())).collect();
            if members.insert(group.clone(), set).is_some() {
                return Err(AggError::Config(format!("group {group} defined more than once")));
            }
        }

        for (group, set) in &members {
            if let Some(m) = set.iter().find(|m| !base.contains(*m) && !members.contains_key(*m)) {
                return Err(AggError::NotFound(format!("member {m} of group {group}")));
            }
        }

        let (levels, by_level) = Self::layer(&base, &members)?;
        debug!(
            base = base.len(),
            groups = members.len(),
            levels = by_level.len(),
            "classification hierarchy built"
        );
        Ok(Self { base, members, levels, by_level })
    }

    /// 拓扑分层（逐轮剥离）
    fn layer(
        base:    &BTreeSet<EntityCode>,
        members: &BTreeMap<EntityCode, BTreeSet<EntityCode>>,
    ) -> Result<(HashMap<EntityCode, u32>, Vec<(u32, BTreeSet<EntityCode>)>)> {
        let mut levels: HashMap<EntityCode, u32> = base.iter().map(|e| (e.clone(), 0)).collect();
        let mut by_level = vec![(0u32, base.clone())];
        let mut pending: BTreeSet<&EntityCode> = members.keys().collect();
        let mut level = 0u32;

        while !pending.is_empty() {
            level += 1;
            let ready: BTreeSet<EntityCode> = pending
                .iter()
                .filter(|g| members[**g].iter().all(|m| levels.contains_key(m)))
                .map(|g| (*g).clone())
                .collect();

            if ready.is_empty() {
                return Err(AggError::Cycle(pending.into_iter().cloned().collect()));
            }
            for g in &ready {
                pending.remove(g);
                levels.insert(g.clone(), level);
            }
            by_level.push((level, ready));
        }
        Ok((levels, by_level))
    }

    /// 直接成员；基础实体返回空集
    pub fn members_of(&self, entity: &str) -> Result<&BTreeSet<EntityCode>> {
        if let Some(set) = self.members.get(entity) {
            return Ok(set);
        }
        if self.base.contains(entity) {
            return Ok(&NO_MEMBERS);
        }
        Err(AggError::NotFound(format!("entity {entity}")))
    }

    pub fn level_of(&self, entity: &str) -> Result<u32> {
        self.levels
            .get(entity)
            .copied()
            .ok_or_else(|| AggError::NotFound(format!("entity {entity}")))
    }

    /// 升序的 (level, entities)，驱动聚合顺序
    pub fn all_entities_by_level(&self) -> &[(u32, BTreeSet<EntityCode>)] {
        &self.by_level
    }

    /// 只含聚合实体的层（level ≥ 1）
    pub fn aggregate_levels(&self) -> &[(u32, BTreeSet<EntityCode>)] {
        &self.by_level[1..]
    }

    pub fn base_entities(&self) -> &BTreeSet<EntityCode> { &self.base }

    pub fn aggregate_entities(&self) -> impl Iterator<Item = &EntityCode> {
        self.members.keys()
    }

    pub fn is_aggregate(&self, entity: &str) -> bool {
        self.members.contains_key(entity)
    }

    pub fn max_level(&self) -> u32 {
        self.by_level.last().map(|(l, _)| *l).unwrap_or(0)
    }

    pub fn num_aggregates(&self) -> usize { self.members.len() }
}
