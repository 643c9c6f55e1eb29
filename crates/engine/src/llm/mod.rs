//! Conversation layer on top of the inference pipeline.

mod protocol;
mod session;
mod tools;

pub use protocol::{
    contains_tool_call, extract_tool_call_block, parse_tool_call, serialize_conversation,
    tool_message, ArgValue, Message, Role, ToolCall, ToolCallOutput, ToolCallParseError,
    ToolResult, TOOL_CALL_END, TOOL_CALL_START,
};
pub use session::{
    ChatResult, ChatResultKind, QueryRole, SessionManager, SessionState, ToolBinding,
    TIMEOUT_MESSAGE,
};
pub use tools::{ArgKind, FromArg, PredefinedMessages, ToolError, ToolExecutor, ToolParam};
