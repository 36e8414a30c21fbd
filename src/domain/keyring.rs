//! Keyring 文本处理

/// 截取 keyring 的前两行（`[client.x]` 与 `key = ...`）
///
/// Dashboard 导出的 keyring 可能是 JSON 字符串字面量（带引号和 `\n` 转义），
/// 先反转义再截取
pub fn keyring_minimal(text: &str) -> String {
    let unescaped = unquote(text);
    let head: Vec<&str> = unescaped.lines().take(2).collect();
    format!("{}\n", head.join("\n"))
}

/// 如果是 JSON 字符串字面量则反转义，否则原样返回
pub fn unquote(text: &str) -> String {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(text) {
            return s;
        }
    }
    text.to_string()
}

/// 读取 keyring 中第一个 `[entity]` 段名
pub fn entity_from_keyring(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|l| l.starts_with('[') && l.ends_with(']'))
        .map(|l| l.trim_matches(|c| c == '[' || c == ']').trim())
        .filter(|e| !e.is_empty())
}
