//! IRC 行协议
//!
//! 解析 `:prefix COMMAND params :trailing` 格式的消息并渲染出站命令

use std::fmt;

/// 一条 IRC 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// 解析一行（可带 `\r\n`），空行返回 None
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, tail) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = tail.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => match rest.strip_prefix(':') {
                Some(trailing) => ("", Some(trailing)),
                None => (rest, None),
            },
        };

        let mut words = head.split_whitespace();
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// 前缀中的昵称部分（`nick!user@host` 中的 nick）
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn nick_cmd(nick: &str) -> Self {
        Self::new("NICK", vec![nick.to_string()])
    }

    pub fn user_cmd(user: &str, realname: &str) -> Self {
        Self::new(
            "USER",
            vec![user.to_string(), "0".into(), "*".into(), realname.to_string()],
        )
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", vec![channel.to_string()])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", vec![token.to_string()])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }
}

impl fmt::Display for IrcMessage {
    /// 渲染为不含结尾 `\r\n` 的一行；最后一个参数含空格或以 `:` 开头时加 `:`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;

        let count = self.params.len();
        for (i, param) in self.params.iter().enumerate() {
            let last = i + 1 == count;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// 频道名补全 `#`
pub fn normalize_channel(channel: &str) -> String {
    if channel.starts_with('#') {
        channel.to_string()
    } else {
        format!("#{}", channel)
    }
}

/// 把回复压成一行
pub fn flatten_reply(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

/// 一行 IRC 消息（含 `\r\n`）的字节上限
pub const MAX_LINE_BYTES: usize = 512;

/// 服务器转发时会加上 `:nick!user@host ` 前缀，预留这部分长度
const PREFIX_RESERVE: usize = 64;

/// 发往 `target` 的 PRIVMSG 正文最多可用的字节数
pub fn privmsg_budget(target: &str) -> usize {
    let overhead = "PRIVMSG  :\r\n".len() + target.len() + PREFIX_RESERVE;
    MAX_LINE_BYTES.saturating_sub(overhead).max(16)
}

/// 按字节上限切分文本，尽量在空格处断开，不会切开 UTF-8 字符
pub fn split_message(text: &str, max_bytes: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim();

    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(space) = rest[..cut].rfind(' ').filter(|&i| i > 0) {
            cut = space;
        }
        parts.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
