// 拨号模块
// 直连 TCP 与 SOCKS5 代理

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use super::config::{ProxyConfig, ProxyType};
use super::error::SshError;

/// 直连目标主机；域名的每个解析地址依次尝试
pub async fn connect_direct(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, SshError> {
    debug!("[SSH] Connecting to {}:{}...", host, port);
    timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| SshError::Timeout(connect_timeout.as_secs()))?
        .map_err(|e| SshError::Dial(format!("{}:{}: {}", host, port, e)))
}

/// 通过代理连接到目标主机
pub async fn connect_via_proxy(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, SshError> {
    debug!(
        "[SSH] Connecting to {}:{} via proxy {}:{}",
        target_host, target_port, proxy.host, proxy.port
    );
    let socket = timeout(
        connect_timeout,
        TcpStream::connect((proxy.host.as_str(), proxy.port)),
    )
    .await
    .map_err(|_| SshError::Timeout(connect_timeout.as_secs()))?
    .map_err(|e| {
        SshError::Proxy(format!(
            "Failed to reach proxy {}:{}: {}",
            proxy.host, proxy.port, e
        ))
    })?;

    match proxy.proxy_type {
        ProxyType::Socks5 => {
            connect_socks5(socket, proxy, target_host, target_port, connect_timeout).await
        }
    }
}

/// 在已连通的代理连接上完成 SOCKS5 握手
async fn connect_socks5(
    socket: TcpStream,
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, SshError> {
    let target = (target_host, target_port);

    let stream = if let Some((username, password)) = &proxy.auth {
        timeout(
            connect_timeout,
            Socks5Stream::connect_with_password_and_socket(socket, target, username, password),
        )
        .await
        .map_err(|_| SshError::Timeout(connect_timeout.as_secs()))?
        .map_err(|e| {
            let err_str = e.to_string();
            if err_str.contains("authentication") || err_str.contains("auth") {
                SshError::Proxy(format!("SOCKS5 proxy authentication failed: {}", e))
            } else {
                SshError::Proxy(format!("SOCKS5 proxy connection failed: {}", e))
            }
        })?
    } else {
        timeout(connect_timeout, Socks5Stream::connect_with_socket(socket, target))
            .await
            .map_err(|_| SshError::Timeout(connect_timeout.as_secs()))?
            .map_err(|e| SshError::Proxy(format!("SOCKS5 proxy connection failed: {}", e)))?
    };

    Ok(stream.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const BANNER: &[u8] = b"SSH-2.0-test\r\n";

    /// 单连接 SOCKS5 服务端：完成握手后发送 BANNER，并回报客户端请求的目标
    async fn socks5_responder(
        credentials: Option<(&'static str, &'static str)>,
    ) -> (u16, oneshot::Receiver<(String, u16)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (target_tx, target_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");

            let mut head = [0u8; 2];
            socket.read_exact(&mut head).await.expect("greeting");
            assert_eq!(head[0], 5);
            let mut methods = vec![0u8; head[1] as usize];
            socket.read_exact(&mut methods).await.expect("methods");

            match credentials {
                Some((user, pass)) => {
                    assert!(methods.contains(&2));
                    socket.write_all(&[5, 2]).await.expect("choose auth");
                    let mut version_len = [0u8; 2];
                    socket.read_exact(&mut version_len).await.expect("auth head");
                    let mut got_user = vec![0u8; version_len[1] as usize];
                    socket.read_exact(&mut got_user).await.expect("user");
                    let mut pass_len = [0u8; 1];
                    socket.read_exact(&mut pass_len).await.expect("pass len");
                    let mut got_pass = vec![0u8; pass_len[0] as usize];
                    socket.read_exact(&mut got_pass).await.expect("pass");
                    let ok = got_user == user.as_bytes() && got_pass == pass.as_bytes();
                    socket
                        .write_all(&[1, if ok { 0 } else { 1 }])
                        .await
                        .expect("auth reply");
                    if !ok {
                        return;
                    }
                }
                None => {
                    assert!(methods.contains(&0));
                    socket.write_all(&[5, 0]).await.expect("choose none");
                }
            }

            let mut request = [0u8; 4];
            socket.read_exact(&mut request).await.expect("request");
            assert_eq!(request[1], 1, "CONNECT");
            let host = match request[3] {
                1 => {
                    let mut ip = [0u8; 4];
                    socket.read_exact(&mut ip).await.expect("ipv4");
                    std::net::Ipv4Addr::from(ip).to_string()
                }
                3 => {
                    let mut len = [0u8; 1];
                    socket.read_exact(&mut len).await.expect("len");
                    let mut name = vec![0u8; len[0] as usize];
                    socket.read_exact(&mut name).await.expect("name");
                    String::from_utf8(name).expect("utf8")
                }
                other => panic!("unexpected address type {other}"),
            };
            let mut port = [0u8; 2];
            socket.read_exact(&mut port).await.expect("port");
            let _ = target_tx.send((host, u16::from_be_bytes(port)));

            socket
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 22])
                .await
                .expect("reply");
            socket.write_all(BANNER).await.expect("banner");
        });
        (port, target_rx)
    }

    fn local_proxy(port: u16, auth: Option<(&str, &str)>) -> ProxyConfig {
        ProxyConfig {
            proxy_type: ProxyType::Socks5,
            host: "127.0.0.1".into(),
            port,
            auth: auth.map(|(u, p)| (u.to_string(), p.to_string())),
        }
    }

    async fn read_banner(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; BANNER.len()];
        stream.read_exact(&mut buf).await.expect("banner");
        buf
    }

    #[tokio::test]
    async fn socks5_without_auth_tunnels_to_target() {
        let (port, target) = socks5_responder(None).await;
        let mut stream = connect_via_proxy(
            &local_proxy(port, None),
            "10.0.0.1",
            2222,
            Duration::from_secs(2),
        )
        .await
        .expect("proxied stream");

        assert_eq!(read_banner(&mut stream).await, BANNER);
        assert_eq!(target.await.expect("target"), ("10.0.0.1".to_string(), 2222));
    }

    #[tokio::test]
    async fn socks5_with_password_tunnels_to_hostname() {
        let (port, target) = socks5_responder(Some(("alice", "secret"))).await;
        let mut stream = connect_via_proxy(
            &local_proxy(port, Some(("alice", "secret"))),
            "db.internal",
            22,
            Duration::from_secs(2),
        )
        .await
        .expect("proxied stream");

        assert_eq!(read_banner(&mut stream).await, BANNER);
        assert_eq!(target.await.expect("target"), ("db.internal".to_string(), 22));
    }

    #[tokio::test]
    async fn socks5_wrong_password_is_proxy_error() {
        let (port, _target) = socks5_responder(Some(("alice", "secret"))).await;
        let result = connect_via_proxy(
            &local_proxy(port, Some(("alice", "wrong"))),
            "10.0.0.1",
            22,
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(SshError::Proxy(_))));
    }

    #[tokio::test]
    async fn direct_dial_tries_every_resolved_address() {
        // localhost 可能先解析为 ::1，监听只在 IPv4 上
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let stream = connect_direct("localhost", port, Duration::from_secs(2)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn direct_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let stream = connect_direct("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn refused_dial_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let result = connect_direct("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SshError::Dial(_))));
    }

    #[tokio::test]
    async fn proxy_that_closes_is_proxy_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let proxy = ProxyConfig {
            proxy_type: ProxyType::Socks5,
            host: "127.0.0.1".into(),
            port,
            auth: None,
        };
        let result =
            connect_via_proxy(&proxy, "10.0.0.1", 22, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SshError::Proxy(_))));
    }
}
