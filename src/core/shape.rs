//! Shape 标识解析
//!
//! shapes.inc 主页链接 -> shape 用户名，补全模型名，以及回复里的文件链接检测

use std::sync::OnceLock;

use regex::Regex;

/// 补全请求中 shape 模型名的前缀
pub const MODEL_PREFIX: &str = "shapesinc/";

/// 由 shape 用户名得到模型名
pub fn model_name(username: &str) -> String {
    if username.starts_with(MODEL_PREFIX) {
        username.to_string()
    } else {
        format!("{}{}", MODEL_PREFIX, username)
    }
}

fn profile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"shapes\.inc/([a-zA-Z0-9_-]+)(?:/\w*)?").expect("valid profile regex")
    })
}

fn file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https://files\.shapes\.inc/\S+").expect("valid file regex"))
}

/// 从消息里提取 shapes.inc 主页链接中的用户名
///
/// 支持 `shapes.inc/tenshi` 与 `shapes.inc/tenshi/chat`
pub fn extract_shape_username(text: &str) -> Option<String> {
    profile_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// 检测 files.shapes.inc 的文件链接
pub fn detect_shapes_file_url(text: &str) -> Option<&str> {
    file_pattern().find(text).map(|m| m.as_str())
}
