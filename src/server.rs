//! Line-oriented TCP transport.
//!
//! Each accepted connection gets its own task and [`Session`]. The transport
//! writes the banner and prompt, then loops: read a line, dispatch it, write
//! the response and the next prompt. A closed connection drops the session,
//! which discards any staged edit and releases the device edit lock.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grammar::GrammarRegistry;
use crate::session::{Response, Session};
use crate::state::DeviceStore;

/// Serves one simulated device to any number of clients.
#[derive(Clone)]
pub struct DeviceServer {
    registry: Arc<GrammarRegistry>,
    device: Arc<DeviceStore>,
    base_prompt: String,
    config: EngineConfig,
}

impl DeviceServer {
    pub fn new(
        registry: Arc<GrammarRegistry>,
        device: Arc<DeviceStore>,
        base_prompt: &str,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            device,
            base_prompt: base_prompt.to_string(),
            config,
        }
    }

    pub fn device(&self) -> &Arc<DeviceStore> {
        &self.device
    }

    /// Opens a fresh session on this server's device.
    pub fn session(&self) -> Result<Session, EngineError> {
        Session::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.device),
            &self.base_prompt,
            self.config.clone(),
        )
    }

    /// Accepts connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), EngineError> {
        if let Ok(addr) = listener.local_addr() {
            info!("serving '{}' on {addr}", self.base_prompt);
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle(stream, peer).await {
                    warn!("connection {peer} ended with error: {err}");
                }
            });
        }
    }

    /// Drives one connection until the client disconnects or the session
    /// terminates.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<(), EngineError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        let mut session = self.session()?;
        let newline = self.config.newline.clone();
        debug!("connection {peer} opened session {}", session.id());

        let intro = session.intro();
        if !intro.is_empty() {
            writer.write_all(intro.as_bytes()).await?;
            writer.write_all(newline.as_bytes()).await?;
        }
        writer.write_all(session.prompt().text().as_bytes()).await?;
        writer.flush().await?;

        while let Some(line) = lines.next_line().await? {
            match session.dispatch(&line)? {
                Response::Output(text) => {
                    if !text.is_empty() {
                        writer.write_all(text.as_bytes()).await?;
                        writer.write_all(newline.as_bytes()).await?;
                    }
                    writer.write_all(session.prompt().text().as_bytes()).await?;
                    writer.flush().await?;
                }
                Response::Terminate => {
                    writer.shutdown().await?;
                    debug!("connection {peer} terminated by session {}", session.id());
                    return Ok(());
                }
            }
        }

        session.close("client disconnected")?;
        debug!("connection {peer} closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;
    use tokio::io::AsyncReadExt;

    fn server() -> DeviceServer {
        let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax").expect("grammar"));
        let device = Arc::new(DeviceStore::new(
            templates::sample_state("huawei_smartax").expect("sample"),
        ));
        DeviceServer::new(registry, device, "OLT", EngineConfig::default())
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 2323))
    }

    #[tokio::test]
    async fn connection_writes_prompts_and_ends_on_quit() {
        let server = server();
        let (mut client, remote) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.handle(remote, peer()).await });

        client.write_all(b"enable\r\nquit\nquit\n").await.expect("write");
        let mut received = String::new();
        client.read_to_string(&mut received).await.expect("read");
        task.await.expect("join").expect("handle");

        assert_eq!(received, "OLT>OLT#OLT>");
    }

    #[tokio::test]
    async fn disconnect_releases_edit_lock() {
        let server = server();
        let device = Arc::clone(server.device());
        let (mut client, remote) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.handle(remote, peer()).await });

        client
            .write_all(b"enable\nconfig\nont-lineprofile gpon profile-id 1\n")
            .await
            .expect("write");
        let mut buf = vec![0u8; 256];
        let mut seen = String::new();
        while !seen.ends_with("OLT(config-gpon-lineprofile-1)#") {
            let n = client.read(&mut buf).await.expect("read");
            assert!(n > 0, "connection closed early: {seen}");
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(device.edit_owner().is_some());

        drop(client);
        task.await.expect("join").expect("handle");
        assert_eq!(device.edit_owner(), None);
    }
}
