/// Fallback ceiling for models missing from [`MODEL_MAX_TOKENS`].
pub const DEFAULT_MAX_TOKENS: u32 = 16384;

/// 已知模型的最大输出令牌数
pub const MODEL_MAX_TOKENS: &[(&str, u32)] = &[
    ("gpt-4", 8192),
    ("gpt-4-turbo", 128000),
    ("gpt-3.5-turbo", 4096),
    ("gpt-3.5-turbo-16k", 16384),
    ("gemini-pro", 8192),
    ("gemini-ultra", 32768),
    ("deepseek-chat", 8192),
    ("deepseek-coder", 16384),
    ("qwq", 32768),
    ("qwen3", 32768),
    ("qwen3:32b", 32768),
    ("qwq:latest", 32768),
];

/// Looks up the output-token ceiling for `model`.
///
/// Exact names win; otherwise the longest known name that prefixes `model` is used, and
/// unknown models get [`DEFAULT_MAX_TOKENS`].
///
/// # Examples
///
/// ```
/// use unillm::models::max_tokens_for_model;
///
/// assert_eq!(max_tokens_for_model("gpt-4"), 8192);
/// assert_eq!(max_tokens_for_model("gpt-4-turbo-2024-04-09"), 128000);
/// assert_eq!(max_tokens_for_model("mistral-large"), 16384);
/// ```
pub fn max_tokens_for_model(model: &str) -> u32 {
    if let Some((_, ceiling)) = MODEL_MAX_TOKENS.iter().find(|(name, _)| *name == model) {
        return *ceiling;
    }
    MODEL_MAX_TOKENS
        .iter()
        .filter(|(name, _)| model.starts_with(*name))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, ceiling)| *ceiling)
        .unwrap_or(DEFAULT_MAX_TOKENS)
}
