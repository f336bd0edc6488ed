//! 命令行与环境变量配置
//!
//! 全局的 Shapes API 选项加上每个渠道一个子命令，所有参数都可以从环境变量读取

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::core::access::{DEFAULT_ACCESS_FILE, DEFAULT_ADMIN_PASSWORD};
use crate::core::conversation::DEFAULT_CONTEXT_MESSAGES;
use crate::core::switchboard::DEFAULT_OPERATOR_SHAPE;
use crate::errors::{BridgeError, Result};
use crate::infrastructure::shapes::{ShapesClient, DEFAULT_BASE_URL};
use crate::infrastructure::{sendblue, slack, telegram, twilio};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Relay chat channels to Shapes characters"
)]
pub struct Cli {
    /// Shapes API key
    #[arg(long, env = "SHAPESINC_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Shapes API 地址
    #[arg(long, env = "SHAPESINC_BASE_URL", global = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// 单次请求超时（秒）
    #[arg(long, env = "SHAPES_REQUEST_TIMEOUT", global = true, default_value_t = 60)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// 渠道适配器
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Telegram 长轮询机器人
    Telegram(TelegramArgs),
    /// Slack Events API webhook
    Slack(SlackArgs),
    /// 短信（Twilio）与 iMessage（Sendblue）webhook
    Text(TextArgs),
    /// Mailgun 收信 webhook
    Mail(MailArgs),
    /// IRC 频道机器人
    Irc(IrcArgs),
    /// 流式 OpenAI 兼容代理
    Proxy(ProxyArgs),
    /// 发送一条消息并打印回复
    Ask(AskArgs),
    /// 主动发送短信或 iMessage
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TelegramArgs {
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// 回复使用的 shape（用户名或 `shapesinc/` 开头的模型名）
    #[arg(long, env = "SHAPESINC_SHAPE_USERNAME")]
    pub shape: Option<String>,

    #[arg(
        long,
        env = "BOT_ADMIN_PASSWORD",
        default_value = DEFAULT_ADMIN_PASSWORD,
        hide_env_values = true
    )]
    pub admin_password: String,

    /// 已授权聊天列表文件
    #[arg(long, env = "APPROVED_CHATS_FILE", default_value = DEFAULT_ACCESS_FILE)]
    pub access_file: PathBuf,

    /// 是否检查聊天授权
    #[arg(long, env = "ACCESS_CHECK_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub access_check: bool,

    /// 每个会话保留的上下文消息数
    #[arg(long, env = "MAX_CONTEXT_MESSAGES", default_value_t = DEFAULT_CONTEXT_MESSAGES)]
    pub context_messages: usize,

    /// 长轮询超时（秒）
    #[arg(long, env = "TELEGRAM_POLL_TIMEOUT", default_value_t = 30)]
    pub poll_timeout_secs: u64,

    #[arg(long, env = "TELEGRAM_API_BASE", default_value = telegram::DEFAULT_API_BASE)]
    pub api_base: String,
}

#[derive(Args, Debug, Clone)]
pub struct SlackArgs {
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, env = "SHAPESINC_SHAPE_USERNAME")]
    pub shape: Option<String>,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Events API 回调路径
    #[arg(long, env = "SLACK_EVENTS_PATH", default_value = "/slack/events")]
    pub events_path: String,

    #[arg(long, env = "SLACK_API_BASE", default_value = slack::DEFAULT_API_BASE)]
    pub api_base: String,
}

#[derive(Args, Debug, Clone)]
pub struct TextArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// 尚未选择 shape 时接待用户的 shape
    #[arg(long, env = "OPERATOR_SHAPE_USERNAME", default_value = DEFAULT_OPERATOR_SHAPE)]
    pub operator_shape: String,

    /// SQLite 数据库路径，不设置时绑定关系只保存在内存
    #[arg(long, env = "PERSONA_DB")]
    pub persona_db: Option<PathBuf>,

    #[arg(long, env = "TWILIO_ACCOUNT_SID")]
    pub twilio_account_sid: Option<String>,

    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    pub twilio_auth_token: Option<String>,

    #[arg(long, env = "TWILIO_PHONE_NUMBER")]
    pub twilio_phone_number: Option<String>,

    #[arg(long, env = "TWILIO_API_BASE", default_value = twilio::DEFAULT_API_BASE)]
    pub twilio_api_base: String,

    #[arg(long, env = "SENDBLUE_API_KEY_ID", hide_env_values = true)]
    pub sendblue_api_key_id: Option<String>,

    #[arg(long, env = "SENDBLUE_API_SECRET_KEY", hide_env_values = true)]
    pub sendblue_api_secret_key: Option<String>,

    #[arg(long, env = "SENDBLUE_PHONE_NUMBER")]
    pub sendblue_phone_number: Option<String>,

    #[arg(long, env = "SENDBLUE_API_BASE", default_value = sendblue::DEFAULT_API_BASE)]
    pub sendblue_api_base: String,
}

#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Mailgun 收信回调路径
    #[arg(long, env = "MAILGUN_WEBHOOK_PATH")]
    pub webhook_path: Option<String>,

    /// Mailgun 发信地址
    #[arg(long, env = "MAILGUN_API_URL")]
    pub mailgun_api_url: Option<String>,

    #[arg(long, env = "MAILGUN_API_KEY", hide_env_values = true)]
    pub mailgun_api_key: Option<String>,

    /// 忽略的发件人后缀（逗号分隔）
    #[arg(long, env = "IGNORE_LIST", value_delimiter = ',')]
    pub ignore_list: Vec<String>,

    /// 不受忽略列表影响的完整地址（逗号分隔）
    #[arg(long, env = "ALLOW_LIST", value_delimiter = ',')]
    pub allow_list: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IrcArgs {
    #[arg(long, env = "IRC_SERVER")]
    pub server: String,

    /// 要加入的频道，可省略 `#`
    #[arg(long, env = "IRC_CHANNEL")]
    pub channel: String,

    /// shape 名称，同时作为昵称；不设置时向 API 查询
    #[arg(long, env = "SHAPESINC_SHAPE_USERNAME")]
    pub shape: Option<String>,

    /// 端口，默认 TLS 为 6697，明文为 6667
    #[arg(long, env = "IRC_PORT")]
    pub port: Option<u16>,

    /// 是否使用 TLS 连接
    #[arg(long, env = "IRC_TLS", default_value_t = true, action = ArgAction::Set)]
    pub tls: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// 转发时使用的 X-User-Id
    #[arg(long, env = "PROXY_USER_ID", default_value = "default")]
    pub user_id: String,

    /// 转发时使用的 X-Channel-Id
    #[arg(long, env = "PROXY_CHANNEL_ID", default_value = "public")]
    pub channel_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    #[arg(long, env = "SHAPESINC_SHAPE_USERNAME")]
    pub shape: Option<String>,

    #[arg(long, env = "SHAPES_USER_ID")]
    pub user_id: Option<String>,

    #[arg(long, env = "SHAPES_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// 消息内容，多个单词以空格连接
    pub message: Vec<String>,
}

/// 主动发送使用的渠道
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVia {
    Sms,
    Imessage,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[arg(long, value_enum, default_value_t = SendVia::Sms)]
    pub via: SendVia,

    /// 收件号码，可重复或逗号分隔；iMessage 多个号码时新建群聊
    #[arg(long, value_delimiter = ',')]
    pub to: Vec<String>,

    /// 已有的 iMessage 群组，`--to` 中的号码会先被加入
    #[arg(long)]
    pub group_id: Option<String>,

    #[command(flatten)]
    pub channels: TextArgs,

    /// 消息内容，多个单词以空格连接
    pub message: Vec<String>,
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BridgeError::Config(format!("{} is required", name)))
}

impl Cli {
    pub fn api_key(&self) -> Result<&str> {
        require(&self.api_key, "SHAPESINC_API_KEY")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 按全局选项创建 Shapes 客户端
    pub fn shapes_client(&self) -> Result<ShapesClient> {
        ShapesClient::new(self.api_key()?, self.base_url.clone(), self.timeout())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if let Command::Send(args) = &self.command {
            return args.validate();
        }
        self.api_key()?;
        match &self.command {
            Command::Telegram(args) => args.validate(),
            Command::Slack(args) => args.validate(),
            Command::Text(args) => args.validate(),
            Command::Mail(args) => args.validate(),
            Command::Irc(args) => args.validate(),
            Command::Proxy(_) => Ok(()),
            Command::Ask(args) => args.validate(),
            Command::Send(args) => args.validate(),
        }
    }
}

impl TelegramArgs {
    pub fn validate(&self) -> Result<()> {
        require(&self.token, "TELEGRAM_TOKEN")?;
        require(&self.shape, "SHAPESINC_SHAPE_USERNAME")?;
        Ok(())
    }
}

impl SlackArgs {
    pub fn validate(&self) -> Result<()> {
        require(&self.bot_token, "SLACK_BOT_TOKEN")?;
        require(&self.shape, "SHAPESINC_SHAPE_USERNAME")?;
        if !self.events_path.starts_with('/') {
            return Err(BridgeError::Config(
                "SLACK_EVENTS_PATH must start with '/'".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TextArgs {
    /// 至少要配置一个渠道；配置了的渠道必须完整
    pub fn validate(&self) -> Result<()> {
        if !self.twilio_enabled() && !self.sendblue_enabled() {
            return Err(BridgeError::Config(
                "configure Twilio (TWILIO_ACCOUNT_SID) or Sendblue (SENDBLUE_API_KEY_ID)".to_string(),
            ));
        }
        if self.twilio_enabled() {
            require(&self.twilio_auth_token, "TWILIO_AUTH_TOKEN")?;
            require(&self.twilio_phone_number, "TWILIO_PHONE_NUMBER")?;
        }
        if self.sendblue_enabled() {
            require(&self.sendblue_api_secret_key, "SENDBLUE_API_SECRET_KEY")?;
            require(&self.sendblue_phone_number, "SENDBLUE_PHONE_NUMBER")?;
        }
        Ok(())
    }

    pub fn twilio_enabled(&self) -> bool {
        self.twilio_account_sid.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn sendblue_enabled(&self) -> bool {
        self.sendblue_api_key_id.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Twilio 客户端（未配置时为 None）
    pub fn twilio_client(&self) -> Option<twilio::TwilioClient> {
        match (
            self.twilio_account_sid.as_deref(),
            self.twilio_auth_token.as_deref(),
            self.twilio_phone_number.as_deref(),
        ) {
            (Some(sid), Some(token), Some(from)) if !sid.is_empty() => Some(
                twilio::TwilioClient::new(sid, token, from, &self.twilio_api_base),
            ),
            _ => None,
        }
    }

    /// Sendblue 客户端（未配置时为 None）
    pub fn sendblue_client(&self) -> Option<sendblue::SendblueClient> {
        match (
            self.sendblue_api_key_id.as_deref(),
            self.sendblue_api_secret_key.as_deref(),
            self.sendblue_phone_number.as_deref(),
        ) {
            (Some(id), Some(secret), Some(from)) if !id.is_empty() => Some(
                sendblue::SendblueClient::new(id, secret, from, &self.sendblue_api_base),
            ),
            _ => None,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl MailArgs {
    pub fn validate(&self) -> Result<()> {
        let path = require(&self.webhook_path, "MAILGUN_WEBHOOK_PATH")?;
        if !path.starts_with('/') {
            return Err(BridgeError::Config(
                "MAILGUN_WEBHOOK_PATH must start with '/'".to_string(),
            ));
        }
        require(&self.mailgun_api_url, "MAILGUN_API_URL")?;
        require(&self.mailgun_api_key, "MAILGUN_API_KEY")?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// IRC over TLS 默认端口
pub const IRC_TLS_PORT: u16 = 6697;
/// 明文 IRC 默认端口
pub const IRC_PLAIN_PORT: u16 = 6667;

impl IrcArgs {
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.tls { IRC_TLS_PORT } else { IRC_PLAIN_PORT })
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(BridgeError::Config("IRC server is required".to_string()));
        }
        if self.channel.trim_start_matches('#').is_empty() {
            return Err(BridgeError::Config("IRC channel is required".to_string()));
        }
        Ok(())
    }
}

impl ProxyArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 未提供消息时使用的问题
pub const DEFAULT_ASK_MESSAGE: &str = "Hello. What's your name?";

impl AskArgs {
    pub fn validate(&self) -> Result<()> {
        require(&self.shape, "SHAPESINC_SHAPE_USERNAME")?;
        Ok(())
    }

    /// 拼接后的消息
    pub fn message_text(&self) -> String {
        if self.message.is_empty() {
            DEFAULT_ASK_MESSAGE.to_string()
        } else {
            self.message.join(" ")
        }
    }
}

impl SendArgs {
    pub fn validate(&self) -> Result<()> {
        match self.via {
            SendVia::Sms => {
                if self.channels.twilio_client().is_none() {
                    return Err(BridgeError::Config(
                        "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_PHONE_NUMBER are required"
                            .to_string(),
                    ));
                }
            }
            SendVia::Imessage => {
                if self.channels.sendblue_client().is_none() {
                    return Err(BridgeError::Config(
                        "SENDBLUE_API_KEY_ID, SENDBLUE_API_SECRET_KEY and SENDBLUE_PHONE_NUMBER \
are required"
                            .to_string(),
                    ));
                }
            }
        }
        if self.to.is_empty() && self.group_id.is_none() {
            return Err(BridgeError::Config("--to or --group-id is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_defaults() {
        let cli = Cli::parse_from(["test", "proxy", "--api-key", "sk-test"]);

        assert_eq!(cli.base_url, DEFAULT_BASE_URL);
        assert_eq!(cli.timeout_secs, 60);
        assert_eq!(cli.api_key().unwrap(), "sk-test");
        match cli.command {
            Command::Proxy(args) => {
                assert_eq!(args.port, 8000);
                assert_eq!(args.user_id, "default");
                assert_eq!(args.channel_id, "public");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key() {
        let cli = Cli::parse_from(["test", "--api-key", "", "proxy"]);
        assert!(matches!(cli.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_telegram_defaults() {
        let cli = Cli::parse_from([
            "test",
            "--api-key",
            "k",
            "telegram",
            "--token",
            "t",
            "--shape",
            "tenshi",
        ]);
        assert!(cli.validate().is_ok());
        let Command::Telegram(args) = cli.command else {
            panic!("expected telegram");
        };
        assert_eq!(args.admin_password, DEFAULT_ADMIN_PASSWORD);
        assert_eq!(args.access_file, PathBuf::from(DEFAULT_ACCESS_FILE));
        assert!(args.access_check);
        assert_eq!(args.context_messages, 1);
    }

    #[test]
    fn test_telegram_access_check_can_be_disabled() {
        let cli = Cli::parse_from(["test", "telegram", "--access-check", "false"]);
        let Command::Telegram(args) = cli.command else {
            panic!("expected telegram");
        };
        assert!(!args.access_check);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_text_requires_a_channel() {
        let cli = Cli::parse_from(["test", "--api-key", "k", "text"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from([
            "test",
            "--api-key",
            "k",
            "text",
            "--twilio-account-sid",
            "AC1",
            "--twilio-auth-token",
            "tok",
            "--twilio-phone-number",
            "+1000",
        ]);
        assert!(cli.validate().is_ok());
        let Command::Text(args) = cli.command else {
            panic!("expected text");
        };
        assert!(args.twilio_client().is_some());
        assert!(args.sendblue_client().is_none());
        assert_eq!(args.operator_shape, DEFAULT_OPERATOR_SHAPE);
    }

    #[test]
    fn test_mail_lists_split_on_comma() {
        let cli = Cli::parse_from([
            "test",
            "mail",
            "--webhook-path",
            "/inbound",
            "--mailgun-api-url",
            "http://mg",
            "--mailgun-api-key",
            "key",
            "--ignore-list",
            "noreply.com,bounce.io",
            "--allow-list",
            "ok@noreply.com",
        ]);
        let Command::Mail(args) = cli.command else {
            panic!("expected mail");
        };
        assert!(args.validate().is_ok());
        assert_eq!(args.ignore_list, vec!["noreply.com", "bounce.io"]);
        assert_eq!(args.allow_list, vec!["ok@noreply.com"]);
    }

    #[test]
    fn test_mail_path_must_be_absolute() {
        let cli = Cli::parse_from([
            "test",
            "mail",
            "--webhook-path",
            "inbound",
            "--mailgun-api-url",
            "http://mg",
            "--mailgun-api-key",
            "key",
        ]);
        let Command::Mail(args) = cli.command else {
            panic!("expected mail");
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_ask_message_text() {
        let cli = Cli::parse_from(["test", "ask", "--shape", "tenshi", "how", "are", "you"]);
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.message_text(), "how are you");

        let cli = Cli::parse_from(["test", "ask"]);
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.message_text(), DEFAULT_ASK_MESSAGE);
    }

    #[test]
    fn test_irc_validation() {
        let cli = Cli::parse_from(["test", "irc", "--server", "irc.libera.chat", "--channel", "#"]);
        let Command::Irc(args) = cli.command else {
            panic!("expected irc");
        };
        assert!(args.validate().is_err());
        assert!(args.tls);
        assert_eq!(args.port(), IRC_TLS_PORT);
    }

    #[test]
    fn test_irc_plain_port() {
        let cli = Cli::parse_from([
            "test", "irc", "--server", "irc.example", "--channel", "shapes", "--tls", "false",
        ]);
        let Command::Irc(args) = cli.command else {
            panic!("expected irc");
        };
        assert!(!args.tls);
        assert_eq!(args.port(), IRC_PLAIN_PORT);

        let cli = Cli::parse_from([
            "test", "irc", "--server", "irc.example", "--channel", "shapes", "--port", "7000",
        ]);
        let Command::Irc(args) = cli.command else {
            panic!("expected irc");
        };
        assert_eq!(args.port(), 7000);
    }

    #[test]
    fn test_send_args() {
        let cli = Cli::parse_from([
            "test",
            "send",
            "--via",
            "imessage",
            "--to",
            "+15550001,+15550002",
            "--sendblue-api-key-id",
            "id",
            "--sendblue-api-secret-key",
            "secret",
            "--sendblue-phone-number",
            "+19990000",
            "hello",
            "there",
        ]);
        // 主动发送不需要 Shapes API key
        assert!(cli.validate().is_ok());
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.via, SendVia::Imessage);
        assert_eq!(args.to, vec!["+15550001", "+15550002"]);
        assert_eq!(args.message.join(" "), "hello there");

        let cli = Cli::parse_from(["test", "send", "--to", "+15550001", "hi"]);
        assert!(matches!(cli.validate(), Err(BridgeError::Config(_))));
    }
}
