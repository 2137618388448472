// 认证凭据解析：主机记录 -> 可用的认证凭据

use std::fmt;
use std::sync::Arc;

use russh::client::{AuthResult, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use tracing::debug;

use super::error::SshError;
use crate::constants::DEFAULT_KEY_PATH;
use crate::models::catalog::{METHOD_KEY, METHOD_PASSWORD};
use crate::models::HostRecord;
use crate::services::storage::expand_path;

/// 认证凭据
#[derive(Clone)]
pub enum AuthProof {
    Password(String),
    PublicKey(Arc<PrivateKey>),
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProof::Password(_) => f.write_str("Password(***)"),
            AuthProof::PublicKey(key) => write!(f, "PublicKey({})", key.algorithm()),
        }
    }
}

/// 根据认证方式生成凭据
///
/// - password：密码不能为空
/// - key：未填写路径时使用 ~/.ssh/id_rsa，密码字段非空时作为私钥口令
pub async fn resolve_auth(host: &HostRecord) -> Result<AuthProof, SshError> {
    let method = host.method.trim().to_ascii_lowercase();
    match method.as_str() {
        "" | METHOD_PASSWORD => {
            if host.password.is_empty() {
                return Err(SshError::Auth(format!(
                    "no password configured for {}",
                    host.name
                )));
            }
            Ok(AuthProof::Password(host.password.clone()))
        }
        METHOD_KEY => {
            let key_path = if host.key.trim().is_empty() {
                DEFAULT_KEY_PATH
            } else {
                host.key.trim()
            };
            let path = expand_path(key_path);
            debug!("[SSH] Loading private key from {:?}", path);

            let key_data = tokio::fs::read(&path)
                .await
                .map_err(|source| SshError::KeyRead {
                    path: path.clone(),
                    source,
                })?;

            let passphrase = (!host.password.is_empty()).then_some(host.password.as_str());
            let key = russh::keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
                .map_err(|e| {
                    if passphrase.is_some() {
                        SshError::KeyParse(format!("Failed to decode key (passphrase mismatch?): {}", e))
                    } else {
                        SshError::KeyParse(format!("Failed to decode key: {}", e))
                    }
                })?;
            Ok(AuthProof::PublicKey(Arc::new(key)))
        }
        other => Err(SshError::UnsupportedMethod(other.to_string())),
    }
}

/// 使用凭据在已握手的连接上认证
pub async fn authenticate<H>(
    handle: &mut Handle<H>,
    user: &str,
    proof: AuthProof,
) -> Result<(), SshError>
where
    H: russh::client::Handler,
{
    let (method, result) = match proof {
        AuthProof::Password(password) => {
            debug!("[SSH] Using password authentication");
            let result = handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| SshError::Handshake(e.to_string()))?;
            ("Password", result)
        }
        AuthProof::PublicKey(key) => {
            debug!("[SSH] Using public key authentication");
            let key_with_alg = PrivateKeyWithHashAlg::new(key, None);
            let result = handle
                .authenticate_publickey(user, key_with_alg)
                .await
                .map_err(|e| SshError::Handshake(e.to_string()))?;
            ("Public key", result)
        }
    };

    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            if partial_success {
                return Err(SshError::Auth(
                    "Partial authentication - additional auth required".to_string(),
                ));
            }
            Err(SshError::Auth(format!(
                "{} authentication failed. Server suggests: {:?}",
                method, remaining_methods
            )))
        }
    }
}
