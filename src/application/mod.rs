//! 应用层：每个渠道一个适配器
//!
//! 把核心层与基础设施层组装成 webhook 服务、轮询循环或一次性命令

pub mod ask;
pub mod irc;
pub mod mail;
pub mod proxy;
pub mod send;
pub mod slack;
pub mod telegram;
pub mod text;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{
    AskArgs, Cli, Command, IrcArgs, MailArgs, ProxyArgs, SendArgs, SlackArgs, TelegramArgs,
    TextArgs,
};
use crate::core::access::AccessManager;
use crate::core::persona::{LayeredPersonaStore, PersonaStore};
use crate::core::switchboard::Switchboard;
use crate::infrastructure::mailgun::MailgunClient;
use crate::infrastructure::shapes::{ChatBackend, ShapesClient};
use crate::infrastructure::slack::SlackClient;
use crate::infrastructure::store::SqlitePersonaStore;
use crate::infrastructure::telegram::TelegramApi;
use crate::infrastructure::web;

/// Telegram 适配器两次请求的最小间隔
const TELEGRAM_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// 按子命令启动对应的适配器
pub async fn run(cli: Cli) -> Result<()> {
    cli.validate()?;
    // 主动发送不需要 Shapes 客户端
    if let Command::Send(args) = &cli.command {
        return run_send(args.clone()).await;
    }
    let client = cli.shapes_client()?;

    match cli.command {
        Command::Telegram(args) => run_telegram(client, args).await,
        Command::Slack(args) => run_slack(client, args).await,
        Command::Text(args) => run_text(client, args).await,
        Command::Mail(args) => run_mail(client, args).await,
        Command::Irc(args) => run_irc(client, args).await,
        Command::Proxy(args) => run_proxy(client, args).await,
        Command::Ask(args) => run_ask(client, args).await,
        Command::Send(args) => run_send(args).await,
    }
}

async fn run_telegram(client: ShapesClient, args: TelegramArgs) -> Result<()> {
    let backend: Arc<dyn ChatBackend> = Arc::new(client.with_min_interval(TELEGRAM_MIN_INTERVAL));
    let api = TelegramApi::new(args.token.as_deref().unwrap_or_default(), &args.api_base);
    let access = AccessManager::load(&args.access_file, args.admin_password.clone());
    if !args.access_check {
        warn!("Access checking is disabled, every chat can talk to the bot");
    }

    let settings = telegram::BotSettings {
        shape: args.shape.clone().unwrap_or_default(),
        access_check: args.access_check,
        context_messages: args.context_messages,
    };
    let bot = telegram::TelegramBot::connect(api, backend, access, settings)
        .await
        .context("failed to reach the Telegram Bot API")?;
    bot.run(args.poll_timeout_secs).await?;
    Ok(())
}

async fn run_slack(client: ShapesClient, args: SlackArgs) -> Result<()> {
    let state = slack::SlackState {
        backend: Arc::new(client),
        slack: SlackClient::new(args.bot_token.clone().unwrap_or_default(), &args.api_base),
        shape: args.shape.clone().unwrap_or_default(),
    };
    let app = slack::create_router(state, &args.events_path);
    web::serve(&args.bind_addr(), app).await
}

async fn run_text(client: ShapesClient, args: TextArgs) -> Result<()> {
    let durable: Option<Arc<dyn PersonaStore>> = match &args.persona_db {
        Some(path) => {
            let store = SqlitePersonaStore::new(path)
                .with_context(|| format!("failed to open persona database {}", path.display()))?;
            info!("Persona bindings persisted to {}", path.display());
            let store: Arc<dyn PersonaStore> = Arc::new(store);
            Some(store)
        }
        None => None,
    };
    let store: Arc<dyn PersonaStore> = Arc::new(LayeredPersonaStore::new(durable));

    if args.twilio_client().is_some() {
        info!("SMS webhook enabled at /sms");
    }
    let state = text::TextState {
        backend: Arc::new(client),
        switchboard: Switchboard::new(store, args.operator_shape.clone()),
        sendblue: args.sendblue_client(),
    };
    if state.sendblue.is_some() {
        info!("iMessage webhook enabled at /imsg");
    }

    let app = text::create_router(state);
    web::serve(&args.bind_addr(), app).await
}

async fn run_mail(client: ShapesClient, args: MailArgs) -> Result<()> {
    let webhook_path = args.webhook_path.clone().unwrap_or_default();
    let state = mail::MailState {
        backend: Arc::new(client),
        mailgun: MailgunClient::new(
            args.mailgun_api_url.clone().unwrap_or_default(),
            args.mailgun_api_key.clone().unwrap_or_default(),
        ),
        policy: mail::IgnorePolicy::new(args.ignore_list.clone(), args.allow_list.clone()),
    };
    let app = mail::create_router(state, &webhook_path);
    web::serve(&args.bind_addr(), app).await
}

async fn run_irc(client: ShapesClient, args: IrcArgs) -> Result<()> {
    let shape = match args.shape.clone().filter(|s| !s.is_empty()) {
        Some(shape) => shape,
        None => {
            info!("No shape name provided, fetching from API...");
            let name = client
                .shape_name()
                .await
                .context("Could not fetch shape name from API")?;
            info!("Using shape name: {}", name);
            name
        }
    };

    let bot = irc::IrcBot::new(Arc::new(client), shape, &args.channel);
    bot.connect(&args.server, args.port(), args.tls).await?;
    Ok(())
}

async fn run_proxy(client: ShapesClient, args: ProxyArgs) -> Result<()> {
    let state = proxy::ProxyState {
        client,
        user_id: args.user_id.clone(),
        channel_id: args.channel_id.clone(),
    };
    let app = proxy::create_router(state);
    web::serve(&args.bind_addr(), app).await
}

async fn run_ask(client: ShapesClient, args: AskArgs) -> Result<()> {
    let shape = args.shape.clone().unwrap_or_default();
    let reply = ask::ask(
        &client,
        &shape,
        &args.message_text(),
        args.user_id.as_deref(),
        args.channel_id.as_deref(),
    )
    .await?;
    println!("{}", reply);
    Ok(())
}

async fn run_send(args: SendArgs) -> Result<()> {
    let outbound = send::Outbound {
        via: args.via,
        to: args.to.clone(),
        group_id: args.group_id.clone(),
        body: args.message.join(" "),
    };
    let twilio = args.channels.twilio_client();
    let sendblue = args.channels.sendblue_client();
    for id in send::send(&outbound, twilio.as_ref(), sendblue.as_ref()).await? {
        println!("{}", id);
    }
    Ok(())
}
