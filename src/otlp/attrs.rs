//! Attribute key constants across the dialects the converter understands:
//! OTEL GenAI semantic conventions, OpenInference, and the Vercel AI SDK.

pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";

pub const GEN_AI_INPUT_MESSAGES: &str = "gen_ai.input.messages";
pub const GEN_AI_OUTPUT_MESSAGES: &str = "gen_ai.output.messages";
pub const GEN_AI_SYSTEM_INSTRUCTIONS: &str = "gen_ai.system_instructions";

pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const GEN_AI_USAGE_CACHE_READ_INPUT_TOKENS: &str = "gen_ai.usage.cache_read_input_tokens";
pub const GEN_AI_USAGE_CACHE_CREATION_INPUT_TOKENS: &str =
    "gen_ai.usage.cache_creation_input_tokens";
pub const GEN_AI_USAGE_REASONING_TOKENS: &str = "gen_ai.usage.reasoning_tokens";
pub const GEN_AI_USAGE_AUDIO_INPUT_TOKENS: &str = "gen_ai.usage.audio_input_tokens";
pub const GEN_AI_USAGE_AUDIO_OUTPUT_TOKENS: &str = "gen_ai.usage.audio_output_tokens";
pub const GEN_AI_USAGE_IMAGE_TOKENS: &str = "gen_ai.usage.image_tokens";
pub const GEN_AI_USAGE_VIDEO_TOKENS: &str = "gen_ai.usage.video_tokens";

pub const GEN_AI_TOOL_NAME: &str = "gen_ai.tool.name";
pub const GEN_AI_TOOL_CALL_ID: &str = "gen_ai.tool.call.id";
pub const GEN_AI_TOOL_PARAMETERS: &str = "gen_ai.tool.parameters";
pub const GEN_AI_TOOL_RESULT: &str = "gen_ai.tool.result";

pub const GEN_AI_EVENT_USER_MESSAGE: &str = "gen_ai.user.message";
pub const GEN_AI_EVENT_SYSTEM_MESSAGE: &str = "gen_ai.system.message";
pub const GEN_AI_EVENT_ASSISTANT_MESSAGE: &str = "gen_ai.assistant.message";
pub const GEN_AI_EVENT_TOOL_MESSAGE: &str = "gen_ai.tool.message";
pub const GEN_AI_EVENT_CHOICE: &str = "gen_ai.choice";

pub const OPENINFERENCE_INPUT_VALUE: &str = "input.value";
pub const OPENINFERENCE_INPUT_MIME_TYPE: &str = "input.mime_type";
pub const OPENINFERENCE_OUTPUT_VALUE: &str = "output.value";
pub const OPENINFERENCE_OUTPUT_MIME_TYPE: &str = "output.mime_type";

pub const VERCEL_PROMPT_MESSAGES: &str = "ai.prompt.messages";
pub const VERCEL_RESPONSE_TEXT: &str = "ai.response.text";
pub const VERCEL_RESPONSE_TOOL_CALLS: &str = "ai.response.tool_calls";
pub const VERCEL_RESULT_TEXT: &str = "ai.result.text";
pub const VERCEL_RESULT_TOOL_CALLS: &str = "ai.result.toolCalls";

pub const VERCEL_SCOPE_NAME: &str = "ai";

pub const BROKLE_RELEASE: &str = "brokle.release";
pub const BROKLE_VERSION: &str = "brokle.version";
pub const BROKLE_SPAN_TYPE: &str = "brokle.span.type";

/// Framework I/O keys consumed by extraction; these must not leak into the
/// stored attribute maps alongside the large payloads they duplicate.
pub const IO_KEYS_TO_EXCLUDE: &[&str] = &[
    VERCEL_PROMPT_MESSAGES,
    VERCEL_RESPONSE_TEXT,
    VERCEL_RESPONSE_TOOL_CALLS,
    VERCEL_RESULT_TEXT,
    VERCEL_RESULT_TOOL_CALLS,
    GEN_AI_INPUT_MESSAGES,
    GEN_AI_OUTPUT_MESSAGES,
    GEN_AI_SYSTEM_INSTRUCTIONS,
    OPENINFERENCE_INPUT_VALUE,
    OPENINFERENCE_INPUT_MIME_TYPE,
    OPENINFERENCE_OUTPUT_VALUE,
    OPENINFERENCE_OUTPUT_MIME_TYPE,
];
