// 地址索引：编号 / 分组编号 / 别名 -> 主机位置

use std::collections::HashMap;

use super::catalog::{Catalog, HostRecord};

/// 索引项所在的容器
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// 未分组主机列表
    Flat,
    /// 分组内主机
    Grouped,
}

/// 索引项：定位到目录中的唯一主机
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub kind: IndexKind,
    pub group_index: Option<usize>,
    pub position: usize,
}

impl IndexEntry {
    /// 校验错误中使用的位置，如 servers[0]、groups[1].servers[2]
    pub fn path(&self) -> String {
        match (self.kind, self.group_index) {
            (IndexKind::Grouped, Some(group)) => {
                format!("groups[{}].servers[{}]", group, self.position)
            }
            _ => format!("servers[{}]", self.position),
        }
    }
}

/// token 统一规范化：去空白并转小写
fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}

/// 地址索引，每次目录重新加载或修改后重建
///
/// 同一个 token 只保留第一次注册的主机，后续冲突（例如重复别名）直接忽略。
#[derive(Clone, Debug, Default)]
pub struct AddressIndex {
    entries: HashMap<String, IndexEntry>,
}

impl AddressIndex {
    /// 单次遍历：先未分组主机 "1","2"...，再各分组 "<prefix>1"...；别名紧随其编号注册
    pub fn build(catalog: &Catalog) -> Self {
        let mut index = Self::default();

        for (position, host) in catalog.servers.iter().enumerate() {
            let entry = IndexEntry {
                kind: IndexKind::Flat,
                group_index: None,
                position,
            };
            index.register_host(&(position + 1).to_string(), host, entry);
        }

        for (group_index, group) in catalog.groups.iter().enumerate() {
            let prefix = group.prefix.trim();
            for (position, host) in group.servers.iter().enumerate() {
                let entry = IndexEntry {
                    kind: IndexKind::Grouped,
                    group_index: Some(group_index),
                    position,
                };
                index.register_host(&format!("{}{}", prefix, position + 1), host, entry);
            }
        }

        index
    }

    fn register_host(&mut self, token: &str, host: &HostRecord, entry: IndexEntry) {
        self.register(token, entry);
        if !host.alias.trim().is_empty() {
            self.register(&host.alias, entry);
        }
    }

    fn register(&mut self, token: &str, entry: IndexEntry) {
        let key = normalize(token);
        if key.is_empty() {
            return;
        }
        if self.entries.contains_key(&key) {
            tracing::debug!("[Index] token '{}' already registered, ignored", key);
            return;
        }
        self.entries.insert(key, entry);
    }

    pub fn resolve(&self, token: &str) -> Option<IndexEntry> {
        self.entries.get(&normalize(token)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 已注册的全部 token（排序后）
    #[cfg(test)]
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.entries.keys().cloned().collect();
        tokens.sort();
        tokens
    }
}
