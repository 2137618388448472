// known_hosts 文件读写

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use russh::keys::PublicKey;
use tracing::debug;

use super::error::SshError;

/// 公钥比对结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// 已记录且一致
    Match,
    /// 未记录（或未记录该算法的密钥）
    Unknown,
    /// 同算法的记录与当前公钥不一致
    Changed,
}

/// 默认路径 ~/.ssh/known_hosts
pub fn default_known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// known_hosts 中的主机写法：22 端口为 host，其他为 [host]:port
fn host_pattern(host: &str, port: u16) -> String {
    let host = host.to_lowercase();
    if port == 22 {
        host
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// 在 known_hosts 中查找主机公钥，文件不存在视为未知
pub fn check(path: &Path, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyStatus, SshError> {
    if !path.exists() {
        return Ok(HostKeyStatus::Unknown);
    }
    let pattern = host_pattern(host, port);
    let file = fs::File::open(path)?;
    let mut status = HostKeyStatus::Unknown;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(hosts), Some(key_type), Some(key_b64)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        // 跳过哈希主机名（|1|...）
        if !hosts
            .split(',')
            .any(|h| !h.starts_with('|') && h.eq_ignore_ascii_case(&pattern))
        {
            continue;
        }
        let Ok(stored) = PublicKey::from_openssh(&format!("{} {}", key_type, key_b64)) else {
            debug!("[SSH] Skipping unparsable known_hosts entry for {}", pattern);
            continue;
        };
        if stored.key_data() == key.key_data() {
            return Ok(HostKeyStatus::Match);
        }
        if stored.algorithm() == key.algorithm() {
            status = HostKeyStatus::Changed;
        }
    }
    Ok(status)
}

/// 追加一条记录
pub fn learn(path: &Path, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let encoded = key
        .to_openssh()
        .map_err(|e| SshError::HostKey(format!("Failed to encode host key: {}", e)))?;
    // to_openssh 会带上注释，只保留算法与密钥两段
    let mut fields = encoded.split_whitespace();
    let (Some(key_type), Some(key_b64)) = (fields.next(), fields.next()) else {
        return Err(SshError::HostKey("Malformed host key encoding".to_string()));
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} {} {}", host_pattern(host, port), key_type, key_b64)?;
    Ok(())
}
