//! Shapes API 客户端
//!
//! OpenAI 兼容的 `POST /chat/completions`，额外带上 `X-User-Id` / `X-Channel-Id`
//! 头，让同一个 API key 下的不同用户、不同频道互不串台。
//!
//! 请求和响应体使用 async-openai 的 chat 类型；发送走自己的 reqwest 客户端，
//! 因为身份头每次请求都不同，429 也要立即交给调用方而不是在库内重试。

use std::sync::Arc;
use std::time::Duration;

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::logger::mask_secret;
use crate::core::message::{ChatMessage, Role};
use crate::core::shape::model_name;
use crate::errors::{BridgeError, Result};

/// 默认 API 地址
pub const DEFAULT_BASE_URL: &str = "https://api.shapes.inc/v1";

/// 用户标识头
pub const USER_ID_HEADER: &str = "X-User-Id";
/// 频道标识头
pub const CHANNEL_ID_HEADER: &str = "X-Channel-Id";

/// 一次补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// 面向某个 shape 的请求，模型名为 `shapesinc/{shape}`
    pub fn for_shape(shape: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model_name(shape),
            messages,
            user_id: None,
            channel_id: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// 只包含一条用户消息的请求
    pub fn single(shape: &str, text: impl Into<String>) -> Self {
        Self::for_shape(shape, vec![ChatMessage::user(text)])
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// 补全后端
///
/// 各渠道适配器只依赖这个接口，测试中用假实现替换
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 返回回复文本（已去掉首尾空白）
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct ShapeNameResponse {
    name: Option<String>,
}

fn to_openai_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let content = message.content.clone();
    let built = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::Assistant),
    };
    built.map_err(|e| BridgeError::Validation(format!("failed to build message: {}", e)))
}

/// 转成 OpenAI 格式的请求体
pub fn build_chat_request(request: &CompletionRequest) -> Result<CreateChatCompletionRequest> {
    let messages = request
        .messages
        .iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>>>()?;

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(request.model.as_str()).messages(messages);
    if let Some(temperature) = request.temperature {
        args.temperature(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        args.max_tokens(max_tokens);
    }
    args.build()
        .map_err(|e| BridgeError::Validation(format!("failed to build request: {}", e)))
}

/// 补全响应中第一条回复的原文（不做裁剪）
pub fn completion_content(body: &str) -> Result<String> {
    let parsed: CreateChatCompletionResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BridgeError::InvalidResponse("no choices in response".to_string()))
}

/// Shapes API 客户端
#[derive(Clone)]
pub struct ShapesClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    min_interval: Option<Duration>,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl ShapesClient {
    /// 创建新的客户端
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build http client: {}", e)))?;

        if api_key.trim().is_empty() {
            error!("Shapes API key is empty or not set!");
        }
        info!(
            "Initialized Shapes client at {} with key {}",
            base_url,
            mask_secret(&api_key)
        );

        Ok(Self {
            api_key,
            base_url,
            http,
            min_interval: None,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    /// 两次请求之间至少间隔 `interval`
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn throttle(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                debug!("Rate limiting: sleeping for {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn with_identity(
        builder: RequestBuilder,
        user_id: Option<&str>,
        channel_id: Option<&str>,
    ) -> RequestBuilder {
        let builder = match user_id.filter(|id| !id.is_empty()) {
            Some(id) => builder.header(USER_ID_HEADER, id),
            None => builder,
        };
        match channel_id.filter(|id| !id.is_empty()) {
            Some(id) => builder.header(CHANNEL_ID_HEADER, id),
            None => builder,
        }
    }

    /// 查询当前 API key 对应的 shape 名称
    pub async fn shape_name(&self) -> Result<String> {
        let url = self.endpoint("shape_name");
        info!("Fetching shape name from: {}", url);

        let res = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(BridgeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ShapeNameResponse = serde_json::from_str(&body)?;
        parsed
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| BridgeError::InvalidResponse("shape name missing".to_string()))
    }

    /// 原样转发补全请求，返回上游状态码和响应体
    pub async fn raw_completion(
        &self,
        body: &serde_json::Value,
        user_id: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<(u16, String)> {
        self.throttle().await;
        let builder = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(body);
        let res = Self::with_identity(builder, user_id, channel_id)
            .send()
            .await?;
        let status = res.status().as_u16();
        Ok((status, res.text().await?))
    }

    /// 原样转发模型列表
    pub async fn list_models(&self) -> Result<(u16, String)> {
        let res = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = res.status().as_u16();
        Ok((status, res.text().await?))
    }
}

#[async_trait]
impl ChatBackend for ShapesClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.throttle().await;

        let body = build_chat_request(&request)?;

        debug!(
            "Sending request to Shapes API for {} with {} messages",
            request.model,
            request.messages.len()
        );

        let builder = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body);
        let res = Self::with_identity(
            builder,
            request.user_id.as_deref(),
            request.channel_id.as_deref(),
        )
        .send()
        .await?;

        let status = res.status();
        let text = res.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            error!("Rate limit exceeded: {}", text);
            return Err(BridgeError::RateLimited(text));
        }
        if !status.is_success() {
            error!("Error calling Shapes API ({}): {}", status, text);
            return Err(BridgeError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply = completion_content(&text)?.trim().to_string();
        debug!(
            "Received response from Shapes API: {}",
            reply.chars().take(50).collect::<String>()
        );
        Ok(reply)
    }
}
