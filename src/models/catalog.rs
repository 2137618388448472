// 主机目录数据结构：Catalog / HostRecord / Group / Proxy

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::CatalogError;
use super::index::{AddressIndex, IndexEntry, IndexKind};
use crate::constants::{DEFAULT_METHOD, DEFAULT_PORT};

/// 选项表（ConnectTimeout、ServerAliveInterval 等），按键排序保证保存结果稳定
pub type Options = BTreeMap<String, Value>;

pub const METHOD_PASSWORD: &str = "password";
pub const METHOD_KEY: &str = "key";
pub const PROXY_TYPE_SOCKS5: &str = "SOCKS5";

/// JSON 中的 null 按默认值处理
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ======================== 会话日志 ========================

/// 日志文件打开方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogMode {
    /// 覆盖（截断）
    Cover,
    /// 追加
    Append,
}

/// 会话输出日志配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionLog {
    #[serde(default)]
    pub enable: bool,
    /// 文件名模板，支持 %g %n %u %a %d %dt
    #[serde(default)]
    pub filename: String,
    /// "cover" / "append"，空值等同 cover
    #[serde(default)]
    pub mode: String,
}

impl SessionLog {
    pub fn mode(&self) -> LogMode {
        if self.mode.eq_ignore_ascii_case("append") {
            LogMode::Append
        } else {
            LogMode::Cover
        }
    }

    fn validate(&self, path: &str) -> Result<(), CatalogError> {
        let mode = self.mode.to_ascii_lowercase();
        if !matches!(mode.as_str(), "" | "cover" | "append") {
            return Err(CatalogError::validation(
                format!("{path}.log.mode"),
                "log mode must be 'cover' or 'append'",
            ));
        }
        if self.enable && self.filename.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.log.filename"),
                "log filename is required when logging is enabled",
            ));
        }
        Ok(())
    }
}

// ======================== 主机 ========================

/// 单台主机记录
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    /// 按有符号整数读取，越界值交给 validate 报告
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,
    #[serde(default)]
    pub alias: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub log: SessionLog,

    /// 所属分组名称（仅内存，用于日志文件名 %g）
    #[serde(skip)]
    pub(crate) group_name: String,
}

impl HostRecord {
    /// 赋予默认值：端口 22，认证方式 password
    pub fn format(&mut self) {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.method.trim().is_empty() {
            self.method = DEFAULT_METHOD.to_string();
        } else {
            self.method = self.method.trim().to_ascii_lowercase();
        }
    }

    /// 合并默认选项；overwrite 为 false 时保留主机自身已有的键
    pub fn merge_options(&mut self, options: &Options, overwrite: bool) {
        for (key, value) in options {
            if overwrite || !self.options.contains_key(key) {
                self.options.insert(key.clone(), value.clone());
            }
        }
    }

    /// 连接池键：user@ip:port
    pub fn connection_key(&self) -> String {
        format!("{}@{}:{}", self.user, self.ip, self.port)
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// 列表展示行：` [flag|alias]\tname [user@ip]`
    pub fn display_line(&self, flag: &str, show_detail: bool) -> String {
        let mut line = String::with_capacity(64);
        line.push_str(" [");
        line.push_str(flag);
        if !self.alias.is_empty() {
            line.push('|');
            line.push_str(&self.alias);
        }
        line.push_str("]\t");
        line.push_str(&self.name);
        if show_detail {
            line.push_str(" [");
            line.push_str(&self.user);
            line.push('@');
            line.push_str(&self.ip);
            line.push(']');
        }
        line
    }

    /// 校验单台主机，path 为其在目录中的位置（如 servers[0]）
    pub fn validate(&self, path: &str) -> Result<(), CatalogError> {
        let required = [
            ("name", &self.name, "server name is required"),
            ("ip", &self.ip, "server ip is required"),
            ("user", &self.user, "user is required"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                return Err(CatalogError::validation(format!("{path}.{field}"), message));
            }
        }
        if !(1..=65535).contains(&self.port) {
            return Err(CatalogError::validation(
                format!("{path}.port"),
                "port must be between 1 and 65535",
            ));
        }
        let method = self.method.to_ascii_lowercase();
        if method != METHOD_PASSWORD && method != METHOD_KEY {
            return Err(CatalogError::validation(
                format!("{path}.method"),
                "method must be 'password' or 'key'",
            ));
        }
        if method == METHOD_KEY && self.key.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.key"),
                "key path is required when method is 'key'",
            ));
        }
        validate_options(&self.options, &format!("{path}.options"))?;
        self.log.validate(path)
    }
}

fn validate_options(options: &Options, path: &str) -> Result<(), CatalogError> {
    for (key, value) in options {
        if value.is_array() || value.is_object() {
            return Err(CatalogError::validation(
                format!("{path}.{key}"),
                "option values must be scalars",
            ));
        }
    }
    Ok(())
}

// ======================== 分组 / 代理 ========================

/// 代理配置（目前仅支持 SOCKS5）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proxy {
    #[serde(rename = "type", default)]
    pub proxy_type: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Proxy {
    fn validate(&self, path: &str) -> Result<(), CatalogError> {
        if self.proxy_type.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.type"),
                "proxy type is required",
            ));
        }
        if !self.proxy_type.eq_ignore_ascii_case(PROXY_TYPE_SOCKS5) {
            return Err(CatalogError::validation(
                format!("{path}.type"),
                format!("unsupported proxy type '{}'", self.proxy_type),
            ));
        }
        if self.server.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.server"),
                "proxy server is required",
            ));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(CatalogError::validation(
                format!("{path}.port"),
                "proxy port must be between 1 and 65535",
            ));
        }
        Ok(())
    }
}

/// 主机分组
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    #[serde(default)]
    pub group_name: String,
    /// 编号前缀，组内主机编号为 <prefix>1, <prefix>2 ...
    #[serde(default)]
    pub prefix: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: Vec<HostRecord>,
    /// 列表中是否折叠
    #[serde(default)]
    pub collapse: bool,
    #[serde(default)]
    pub proxy: Option<Proxy>,
}

impl Group {
    fn validate(&self, path: &str) -> Result<(), CatalogError> {
        if self.group_name.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.group_name"),
                "group name is required",
            ));
        }
        if self.prefix.trim().is_empty() {
            return Err(CatalogError::validation(
                format!("{path}.prefix"),
                "group prefix is required",
            ));
        }
        for (i, server) in self.servers.iter().enumerate() {
            server.validate(&format!("{path}.servers[{i}]"))?;
        }
        if let Some(proxy) = &self.proxy {
            proxy.validate(&format!("{path}.proxy"))?;
        }
        Ok(())
    }
}

// ======================== 目录 ========================

/// 索引解析结果
#[derive(Clone, Copy, Debug)]
pub struct ResolvedHost<'a> {
    pub entry: IndexEntry,
    pub host: &'a HostRecord,
    pub group: Option<&'a Group>,
}

/// 新主机插入位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Flat,
    Group(usize),
}

impl Placement {
    /// 该容器中第 position 台主机的校验路径
    pub fn host_path(&self, position: usize) -> String {
        match self {
            Placement::Flat => format!("servers[{position}]"),
            Placement::Group(group) => format!("groups[{group}].servers[{position}]"),
        }
    }
}

/// 主机目录（对应配置文件）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub show_detail: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: Vec<HostRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<Group>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,

    #[serde(skip)]
    index: AddressIndex,
    #[serde(skip)]
    file: PathBuf,
    #[serde(skip)]
    dirty: bool,
}

impl Catalog {
    /// 创建绑定到指定文件的空目录
    pub fn with_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub(crate) fn set_file(&mut self, file: PathBuf) {
        self.file = file;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    /// 对所有主机赋默认值、合并全局选项并重建索引
    pub fn prepare(&mut self) {
        let globals = self.options.clone();
        for server in &mut self.servers {
            server.format();
            server.group_name.clear();
            server.merge_options(&globals, false);
        }
        for group in &mut self.groups {
            for server in &mut group.servers {
                server.format();
                server.group_name = group.group_name.clone();
                server.merge_options(&globals, false);
            }
        }
        self.rebuild_index();
    }

    pub fn rebuild_index(&mut self) {
        let index = AddressIndex::build(self);
        self.index = index;
    }

    /// 校验整个目录，错误中携带容器与下标
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (i, server) in self.servers.iter().enumerate() {
            server.validate(&format!("servers[{i}]"))?;
        }
        for (i, group) in self.groups.iter().enumerate() {
            group.validate(&format!("groups[{i}]"))?;
        }
        validate_options(&self.options, "options")
    }

    /// 按编号 / 分组编号 / 别名查找主机（大小写不敏感）
    pub fn resolve(&self, token: &str) -> Option<ResolvedHost<'_>> {
        let entry = self.index.resolve(token)?;
        let (host, group) = self.entry_host(&entry)?;
        Some(ResolvedHost { entry, host, group })
    }

    fn entry_host(&self, entry: &IndexEntry) -> Option<(&HostRecord, Option<&Group>)> {
        match entry.kind {
            IndexKind::Flat => self.servers.get(entry.position).map(|h| (h, None)),
            IndexKind::Grouped => {
                let group = self.groups.get(entry.group_index?)?;
                group.servers.get(entry.position).map(|h| (h, Some(group)))
            }
        }
    }

    fn entry_host_mut(&mut self, entry: &IndexEntry) -> Option<&mut HostRecord> {
        match entry.kind {
            IndexKind::Flat => self.servers.get_mut(entry.position),
            IndexKind::Grouped => self
                .groups
                .get_mut(entry.group_index?)?
                .servers
                .get_mut(entry.position),
        }
    }

    /// 按前缀查找分组下标（大小写不敏感）
    pub fn find_group(&self, prefix: &str) -> Option<usize> {
        let prefix = prefix.trim();
        self.groups
            .iter()
            .position(|g| g.prefix.eq_ignore_ascii_case(prefix))
    }

    /// 切换分组折叠状态，返回新的状态；索引保持不变
    pub fn toggle_collapse(&mut self, prefix: &str) -> Option<bool> {
        let index = self.find_group(prefix)?;
        let group = &mut self.groups[index];
        group.collapse = !group.collapse;
        let collapsed = group.collapse;
        self.mark_dirty();
        Some(collapsed)
    }

    /// prefix 命中分组时放入该组，否则放入未分组列表
    pub fn placement_for(&self, prefix: &str) -> Placement {
        match self.find_group(prefix) {
            Some(index) if !prefix.trim().is_empty() => Placement::Group(index),
            _ => Placement::Flat,
        }
    }

    /// 下一台经 add_host(prefix, ..) 加入的主机将占用的校验路径
    pub fn next_host_path(&self, prefix: &str) -> String {
        let placement = self.placement_for(prefix);
        let position = match placement {
            Placement::Flat => self.servers.len(),
            Placement::Group(index) => self.groups[index].servers.len(),
        };
        placement.host_path(position)
    }

    /// 添加主机：prefix 命中分组时加入该组，否则加入未分组列表
    pub fn add_host(&mut self, prefix: &str, host: HostRecord) -> Placement {
        let placement = self.placement_for(prefix);
        match placement {
            Placement::Group(index) => self.groups[index].servers.push(host),
            Placement::Flat => self.servers.push(host),
        }
        self.prepare();
        self.mark_dirty();
        placement
    }

    /// 修改 token 对应的主机，返回是否找到
    pub fn edit_host<F>(&mut self, token: &str, edit: F) -> bool
    where
        F: FnOnce(&mut HostRecord),
    {
        let Some(entry) = self.index.resolve(token) else {
            return false;
        };
        let Some(host) = self.entry_host_mut(&entry) else {
            return false;
        };
        edit(host);
        self.prepare();
        self.mark_dirty();
        true
    }

    /// 删除 token 对应的主机
    pub fn remove_host(&mut self, token: &str) -> Option<HostRecord> {
        let entry = self.index.resolve(token)?;
        let removed = match entry.kind {
            IndexKind::Flat => {
                if entry.position >= self.servers.len() {
                    return None;
                }
                self.servers.remove(entry.position)
            }
            IndexKind::Grouped => {
                let group = self.groups.get_mut(entry.group_index?)?;
                if entry.position >= group.servers.len() {
                    return None;
                }
                group.servers.remove(entry.position)
            }
        };
        self.rebuild_index();
        self.mark_dirty();
        Some(removed)
    }
}
