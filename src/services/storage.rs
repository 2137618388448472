// 目录持久化服务：加载 / 原子保存 / 备份轮转

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::{
    BACKUP_KEEP, BACKUP_PREFIX, BACKUP_SUFFIX, BACKUP_TIMESTAMP_FORMAT, CATALOG_FILE_NAME,
    CONFIG_DIR_NAME,
};
use crate::models::{Catalog, CatalogError};

/// 获取默认目录文件路径
/// macOS: ~/Library/Application Support/hostdeck/config.json
/// Linux: ~/.config/hostdeck/config.json
pub fn default_catalog_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine the system config directory")?
        .join(CONFIG_DIR_NAME);
    Ok(config_dir.join(CATALOG_FILE_NAME))
}

/// 展开开头的 `~`
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ======================== 加载 ========================

/// 加载目录：文件不存在返回 NotFound，解析或校验失败时不返回任何部分结果
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let path = expand_path(&path.to_string_lossy());
    if !path.exists() {
        return Err(CatalogError::NotFound(path));
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| CatalogError::io(format!("Failed to read {}", path.display()), e))?;
    let mut catalog: Catalog =
        serde_json::from_str(&content).map_err(|e| CatalogError::Parse(e.to_string()))?;

    catalog.set_file(path);
    catalog.prepare();
    catalog.validate()?;

    debug!(
        "[Catalog] Loaded {} ({} tokens)",
        catalog.file().display(),
        catalog.index().len()
    );
    Ok(catalog)
}

// ======================== 保存 ========================

/// 序列化为制表符缩进的 JSON，末尾带换行
pub fn encode_catalog(catalog: &Catalog) -> Result<Vec<u8>, CatalogError> {
    let mut buf = Vec::with_capacity(4096);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    catalog
        .serialize(&mut ser)
        .map_err(|e| CatalogError::Parse(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// 保存目录。未修改时直接返回 Ok(false)
///
/// 先校验，再按需备份，最后写临时文件并 rename 覆盖目标文件。
pub fn save_catalog(catalog: &mut Catalog, backup: bool) -> Result<bool, CatalogError> {
    save_catalog_with(catalog, backup, |from, to| fs::rename(from, to))
}

fn save_catalog_with<R>(catalog: &mut Catalog, backup: bool, rename: R) -> Result<bool, CatalogError>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
{
    if !catalog.is_dirty() {
        debug!("[Catalog] Not modified, skip saving");
        return Ok(false);
    }
    catalog.validate()?;
    let data = encode_catalog(catalog)?;
    let path = catalog.file().to_path_buf();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CatalogError::io(format!("Failed to create {}", parent.display()), e)
        })?;
    }

    let backed_up = if backup { backup_catalog(&path)? } else { None };

    atomic_write_with(&path, &data, rename)?;
    catalog.clear_dirty();
    info!("[Catalog] Saved {}", path.display());

    if backed_up.is_some() {
        if let Err(e) = prune_backups(&path, BACKUP_KEEP) {
            warn!("[Catalog] Failed to prune backups: {}", e);
        }
    }
    Ok(true)
}

/// 写入 `<file>.tmp` 后 rename；rename 失败时删除临时文件
fn atomic_write_with<R>(path: &Path, data: &[u8], rename: R) -> Result<(), CatalogError>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data)
        .map_err(|e| CatalogError::io(format!("Failed to write {}", tmp.display()), e))?;

    if let Err(e) = rename(&tmp, path) {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            warn!("[Catalog] Failed to remove {}: {}", tmp.display(), cleanup);
        }
        return Err(CatalogError::io(
            format!("Failed to replace {}", path.display()),
            e,
        ));
    }
    Ok(())
}

// ======================== 备份 ========================

fn backup_dir(catalog_path: &Path) -> PathBuf {
    match catalog_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// 复制当前文件为 config-<时间戳>.json；源文件不存在时跳过
fn backup_catalog(catalog_path: &Path) -> Result<Option<PathBuf>, CatalogError> {
    if !catalog_path.exists() {
        warn!(
            "[Catalog] {} does not exist yet, skip backup",
            catalog_path.display()
        );
        return Ok(None);
    }
    let stamp = chrono::Local::now().format(BACKUP_TIMESTAMP_FORMAT);
    let target = backup_dir(catalog_path).join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));
    fs::copy(catalog_path, &target)
        .map_err(|e| CatalogError::io(format!("Failed to back up to {}", target.display()), e))?;
    debug!("[Catalog] Backup written to {}", target.display());
    Ok(Some(target))
}

/// 文件名是否为 config-<YYYYMMDDHHMMSS>.json
fn is_backup_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix(BACKUP_PREFIX)
        .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
    else {
        return false;
    };
    stamp.len() == 14
        && stamp.bytes().all(|b| b.is_ascii_digit())
        && NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT).is_ok()
}

/// 按修改时间倒序保留最新的 keep 个备份，返回删除数量
///
/// 只处理时间戳命名的备份，同目录下其他 config-*.json 文件不受影响。
pub fn prune_backups(catalog_path: &Path, keep: usize) -> Result<usize, CatalogError> {
    let dir = backup_dir(catalog_path);
    let pattern = format!(
        "{}/{BACKUP_PREFIX}*{BACKUP_SUFFIX}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| CatalogError::Parse(format!("Invalid backup pattern: {e}")))?;

    let mut backups: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.as_path() != catalog_path)
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_backup_name)
        })
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((path, modified))
        })
        .collect();
    backups.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in backups.iter().skip(keep) {
        fs::remove_file(path)
            .map_err(|e| CatalogError::io(format!("Failed to remove {}", path.display()), e))?;
        removed += 1;
    }
    if removed > 0 {
        debug!("[Catalog] Pruned {} old backups", removed);
    }
    Ok(removed)
}
