//! IRC 频道机器人
//!
//! 以 shape 名称作为昵称加入频道，频道里每条他人发言都交给 Shapes 回复

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_native_tls::{native_tls, TlsConnector};
use tracing::{debug, error, info};

use crate::errors::{BridgeError, Result};
use crate::infrastructure::irc::{
    flatten_reply, normalize_channel, privmsg_budget, split_message, IrcMessage,
};
use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};

/// 生成回复失败时发到频道的文本
pub const ERROR_REPLY: &str = "Sorry, I encountered an error while generating a response.";
/// API 没有给出回复时的文本
pub const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response.";

/// IRC 机器人
pub struct IrcBot {
    backend: Arc<dyn ChatBackend>,
    shape: String,
    channel: String,
}

impl IrcBot {
    pub fn new(backend: Arc<dyn ChatBackend>, shape: impl Into<String>, channel: &str) -> Self {
        Self {
            backend,
            shape: shape.into(),
            channel: normalize_channel(channel),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 发言人昵称作为 X-User-Id，频道名作为 X-Channel-Id
    pub async fn generate_response(&self, sender: &str, text: &str) -> String {
        let request = CompletionRequest::single(&self.shape, text)
            .user(sender)
            .channel(self.channel.clone());

        match self.backend.complete(request).await {
            Ok(reply) => reply,
            Err(BridgeError::InvalidResponse(e)) => {
                error!("No choices in response: {}", e);
                EMPTY_REPLY.to_string()
            }
            Err(e) => {
                error!("Error generating response: {}", e);
                ERROR_REPLY.to_string()
            }
        }
    }

    /// 处理一条服务器消息，返回需要发送的命令
    ///
    /// `nick` 是当前使用的昵称，昵称被占用时会在末尾追加 `_`
    pub async fn handle(&self, nick: &mut String, msg: &IrcMessage) -> Vec<IrcMessage> {
        match msg.command.as_str() {
            "PING" => vec![IrcMessage::pong(msg.param(0).unwrap_or_default())],
            "001" => {
                info!("Connected as {}", nick);
                vec![IrcMessage::join(&self.channel)]
            }
            "433" => {
                nick.push('_');
                info!("Nickname in use, retrying as {}", nick);
                vec![IrcMessage::nick_cmd(nick)]
            }
            "JOIN" => {
                if msg.nick() == Some(nick.as_str()) {
                    info!("Joined {}", msg.param(0).unwrap_or(self.channel.as_str()));
                }
                Vec::new()
            }
            "PRIVMSG" => {
                let (Some(target), Some(text), Some(sender)) =
                    (msg.param(0), msg.param(1), msg.nick())
                else {
                    return Vec::new();
                };
                if sender == nick.as_str() || !target.eq_ignore_ascii_case(&self.channel) {
                    return Vec::new();
                }

                info!("Message from {}: {}", sender, text);
                let reply = flatten_reply(&self.generate_response(sender, text).await);
                if reply.trim().is_empty() {
                    debug!("Empty reply, nothing to send");
                    return Vec::new();
                }
                debug!("Sending to IRC: {}", reply);
                split_message(&reply, privmsg_budget(&self.channel))
                    .iter()
                    .map(|part| IrcMessage::privmsg(&self.channel, part))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// 在已建立的连接上注册并处理消息，直到连接关闭
    pub async fn run<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        let mut nick = self.shape.clone();

        for command in [IrcMessage::nick_cmd(&nick), IrcMessage::user_cmd(&nick, &nick)] {
            writer.write_all(format!("{}\r\n", command).as_bytes()).await?;
        }
        writer.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };
            for out in self.handle(&mut nick, &msg).await {
                writer.write_all(format!("{}\r\n", out).as_bytes()).await?;
            }
            writer.flush().await?;
        }

        info!("Connection closed by server");
        Ok(())
    }

    /// 连接服务器并运行，`tls` 为真时先完成 TLS 握手
    pub async fn connect(&self, server: &str, port: u16, tls: bool) -> Result<()> {
        info!(
            "Connecting to {}:{} as {} ({})...",
            server,
            port,
            self.shape,
            if tls { "TLS" } else { "plain" }
        );
        let stream = TcpStream::connect((server, port)).await.map_err(|e| {
            BridgeError::Network(format!("failed to connect to {}:{}: {}", server, port, e))
        })?;
        if !tls {
            return self.run(stream).await;
        }

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| BridgeError::Network(format!("failed to set up TLS: {}", e)))?;
        let stream = TlsConnector::from(connector)
            .connect(server, stream)
            .await
            .map_err(|e| {
                BridgeError::Network(format!("TLS handshake with {} failed: {}", server, e))
            })?;
        self.run(stream).await
    }
}
