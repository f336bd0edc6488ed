//! 邮件适配器
//!
//! Mailgun 收到发给 `{shape}@{domain}` 的邮件后回调 webhook，
//! 这里生成 shape 的回复并作为同一会话的邮件发回给发件人和其余收件人。

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Router,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{error, info};

use crate::errors::{BridgeError, Result};
use crate::infrastructure::mailgun::{
    new_message_id, updated_references, MailgunClient, OutboundReply,
};
use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};

/// 附件开始标记的前缀
pub const ATTACHMENT_MARKER: &str = "--- ATTACHMENT:";

const PROMPT_PREAMBLE: &str = "[Note: The user has emailed you and your task is to write a thoughtful \
and engaging email back to the User. Your reply should be engaging for the user to pay attention to \
and read it. and also to reply back to it. Don't add Subject and address user by name.]";

const ATTACHMENT_NOTE: &str = "[Note: The email contains attachments. The content of these attachments \
has been included below, enclosed between markers. Please incorporate this information into your \
understanding and response as appropriate.]";

/// Office 文档不做解析，只留占位说明
const EXTRACTION_UNAVAILABLE: &str = "[Text extraction is not available for this attachment type]";

/// PDF 里没有可提取的文字
pub const PDF_NO_TEXT: &str = "[PDF contains no extractable text or contains only images]";

// ==================== 地址处理 ====================

/// `Name <email>` 形式的地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAddress {
    pub name: String,
    pub email: String,
}

impl NamedAddress {
    /// 渲染为抄送列表中的一项
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            self.email.clone()
        } else {
            format!("\"{}\" <{}>", self.name, self.email)
        }
    }
}

/// 解析逗号分隔的地址列表
///
/// 支持 `Name <a@b.c>` 与裸地址，名字里的引号会被去掉，空项跳过
pub fn parse_address_list(raw: &str) -> Vec<NamedAddress> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (name, email) = match (item.rfind('<'), item.contains('>')) {
                (Some(idx), true) => (
                    item[..idx].trim().to_string(),
                    item[idx + 1..].replace('>', "").trim().to_string(),
                ),
                _ => (String::new(), item.to_string()),
            };
            NamedAddress {
                name: name.replace(['"', '\''], ""),
                email,
            }
        })
        .collect()
}

/// 合并 To 和 Cc，去掉 shape 自己与发件人，得到回复时的抄送列表
pub fn extract_cc_list(to: &str, cc: &str, shape_address: &str, sender: &str) -> Vec<NamedAddress> {
    let blocked: Vec<String> = [shape_address, sender]
        .iter()
        .filter_map(|raw| parse_address_list(raw).into_iter().next())
        .map(|addr| addr.email)
        .collect();

    parse_address_list(to)
        .into_iter()
        .chain(parse_address_list(cc))
        .filter(|addr| !blocked.contains(&addr.email))
        .collect()
}

/// 发件人过滤
///
/// 与允许列表完全一致的地址永远不被忽略；否则以忽略列表中任一后缀结尾即忽略
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    ignore: Vec<String>,
    allow: Vec<String>,
}

impl IgnorePolicy {
    pub fn new(ignore: Vec<String>, allow: Vec<String>) -> Self {
        let clean = |list: Vec<String>| -> Vec<String> {
            list.into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            ignore: clean(ignore),
            allow: clean(allow),
        }
    }

    pub fn should_ignore(&self, email: &str) -> bool {
        if self.allow.iter().any(|allowed| allowed == email) {
            return false;
        }
        self.ignore.iter().any(|pattern| email.ends_with(pattern.as_str()))
    }
}

/// 回复正文：回复在前，原文附在 “On {date}, {sender} wrote:” 之后
pub fn format_reply_body(
    sender_name: &str,
    original_body: &str,
    reply_body: &str,
    sent_at: NaiveDateTime,
) -> String {
    format!(
        "{}\n\nOn {}, {} wrote:\n{}",
        reply_body,
        sent_at.format("%a, %b %d, %Y at %I:%M %p"),
        sender_name,
        original_body
    )
}

// ==================== 收信记录 ====================

/// 整理后的收信
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedEmail {
    pub shape_username: String,
    pub domain: String,
    pub sender_name: String,
    pub sender_address: String,
    pub cc: Vec<NamedAddress>,
    pub subject: String,
    pub body: String,
    pub message_id: String,
    /// shape 自己的地址
    pub recipient: String,
    pub in_reply_to: String,
    pub references: String,
}

impl QualifiedEmail {
    /// 从 Mailgun 的表单字段构造
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| form.get(name).cloned().unwrap_or_default();

        let from = field("from").replace('"', "");
        let sender = parse_address_list(&from)
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::Validation("missing sender".to_string()))?;

        let recipient = field("recipient");
        let (shape_username, domain) = recipient
            .split_once('@')
            .filter(|(local, host)| !local.is_empty() && !host.is_empty())
            .ok_or_else(|| BridgeError::Validation(format!("invalid recipient: {}", recipient)))?;

        let cc = extract_cc_list(&field("To"), &field("Cc"), &recipient, &from);

        Ok(Self {
            shape_username: shape_username.to_string(),
            domain: domain.to_string(),
            sender_name: sender.name,
            sender_address: sender.email,
            cc,
            subject: field("subject"),
            body: field("body-plain"),
            message_id: field("Message-Id"),
            recipient: recipient.clone(),
            in_reply_to: field("In-Reply-To"),
            references: field("References"),
        })
    }

    /// 交给 shape 的邮件文本
    pub fn prompt_body(&self) -> String {
        let cc: Vec<String> = self.cc.iter().map(NamedAddress::display).collect();
        format!(
            "From:\n{}<{}>\nTo:\n{}\nSubject:\n{}\nBody:\n{}",
            self.sender_name,
            self.sender_address,
            cc.join(", "),
            self.subject,
            self.body
        )
    }
}

/// 完整的补全提示
pub fn build_prompt(email_text: &str) -> String {
    let mut prompt = PROMPT_PREAMBLE.to_string();
    if email_text.contains(ATTACHMENT_MARKER) {
        prompt.push_str("\n\n");
        prompt.push_str(ATTACHMENT_NOTE);
    }
    prompt.push_str("\n\nHere is the email:\n");
    prompt.push_str(email_text);
    prompt
}

fn attachment_block(name: &str, content: &str) -> String {
    format!(
        "\n\n{} {} ---\n{}\n--- END ATTACHMENT ---\n\n",
        ATTACHMENT_MARKER, name, content
    )
}

// ==================== 附件 ====================

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "content-type", default)]
    pub content_type: String,
    #[serde(default)]
    pub url: String,
}

impl Attachment {
    fn is_pdf(&self) -> bool {
        self.content_type == "application/pdf"
    }

    fn is_office_document(&self) -> bool {
        self.content_type == "application/msword"
            || self
                .content_type
                .starts_with("application/vnd.openxmlformats-officedocument")
    }
}

/// 提取 PDF 文字；解析在阻塞线程池里进行，失败时返回错误说明
pub async fn pdf_text(name: &str, bytes: Vec<u8>) -> String {
    let extracted = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
    })
    .await
    .unwrap_or_else(|e| Err(e.to_string()));

    match extracted {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => PDF_NO_TEXT.to_string(),
        Err(e) => {
            error!("Error extracting text from PDF {}: {}", name, e);
            format!("[Error extracting PDF text: {}]", e)
        }
    }
}

/// 下载文本和 PDF 附件，拼接成带标记的附加正文；图片跳过，Office 文档只留占位说明
pub async fn collect_attachments(mailgun: &MailgunClient, raw_json: &str) -> String {
    let attachments: Vec<Attachment> = match serde_json::from_str(raw_json) {
        Ok(list) => list,
        Err(e) => {
            error!("Error processing attachments JSON: {}", e);
            return String::new();
        }
    };

    let mut content = String::new();
    for attachment in attachments {
        if attachment.content_type.starts_with("image/") || attachment.name.is_empty() {
            continue;
        }

        if attachment.is_office_document() {
            content.push_str(&attachment_block(&attachment.name, EXTRACTION_UNAVAILABLE));
            continue;
        }
        if !attachment.is_pdf() && !attachment.content_type.starts_with("text/") {
            continue;
        }

        let bytes = match mailgun.download_attachment(&attachment.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error downloading attachment {}: {}", attachment.name, e);
                continue;
            }
        };
        let text = if attachment.is_pdf() {
            pdf_text(&attachment.name, bytes).await
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        content.push_str(&attachment_block(&attachment.name, &text));
    }
    content
}

// ==================== 状态 ====================

#[derive(Clone)]
pub struct MailState {
    pub backend: Arc<dyn ChatBackend>,
    pub mailgun: MailgunClient,
    pub policy: IgnorePolicy,
}

/// 处理一封收信；被忽略的发件人返回 Ok 但不调用 API
pub async fn process_message(state: &MailState, form: &HashMap<String, String>) -> Result<()> {
    let mut email = QualifiedEmail::from_form(form)?;

    if state.policy.should_ignore(&email.sender_address) {
        info!("Ignoring email from {}", email.sender_address);
        return Ok(());
    }
    email.cc.retain(|addr| !state.policy.should_ignore(&addr.email));

    if let Some(raw) = form.get("attachments").filter(|raw| !raw.is_empty()) {
        let extra = collect_attachments(&state.mailgun, raw).await;
        email.body.push_str(&extra);
    }

    let prompt = build_prompt(&email.prompt_body());
    let request = CompletionRequest::single(&email.shape_username, prompt)
        .user(email.sender_address.clone());
    let reply = state.backend.complete(request).await?;

    let outbound = OutboundReply {
        from_name: email.shape_username.clone(),
        from_email: format!("{}@{}", email.shape_username, email.domain),
        to_email: email.sender_address.clone(),
        cc: email.cc.iter().map(NamedAddress::display).collect(),
        subject: email.subject.clone(),
        text: format_reply_body(
            &email.sender_name,
            &email.body,
            &reply,
            chrono::Local::now().naive_local(),
        ),
        in_reply_to: email.message_id.clone(),
        references: updated_references(&email.references, &email.message_id),
        message_id: new_message_id(&email.domain),
    };
    state.mailgun.send_reply(&outbound).await?;
    info!("Replied to {} as {}", email.sender_address, email.shape_username);
    Ok(())
}

/// 以 shape 的名义主动发一封邮件
///
/// `generate_body` 为 true 时由 shape 写一封自我介绍，忽略 `body`
#[allow(clippy::too_many_arguments)]
pub async fn send_shape_email(
    state: &MailState,
    shape_username: &str,
    domain: &str,
    recipient_email: &str,
    recipient_name: &str,
    cc: &[String],
    subject: &str,
    body: &str,
    generate_body: bool,
) -> Result<()> {
    let text = if generate_body {
        let context = format!(
            "[There is no email from the user. You are sending an email to {}. Write a friendly \
introduction email to the user. Make sure to make it interesting and engaging for them to reply back. \
Write it in email format.]\n\n",
            recipient_name
        );
        let request =
            CompletionRequest::single(shape_username, build_prompt(&context)).user(recipient_email);
        state.backend.complete(request).await?
    } else {
        body.to_string()
    };

    state
        .mailgun
        .send_shape_email(shape_username, domain, recipient_email, cc, subject, &text)
        .await
}

async fn welcome() -> &'static str {
    info!("Hello World!");
    "Hello World!"
}

async fn mailgun_webhook(
    State(state): State<Arc<MailState>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    match process_message(&state, &form).await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            error!("Error processing email: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// 创建路由
pub fn create_router(state: MailState, webhook_path: &str) -> Router {
    Router::new()
        .route("/hello/", get(welcome).post(welcome))
        .route(webhook_path, post(mailgun_webhook))
        .with_state(Arc::new(state))
}
