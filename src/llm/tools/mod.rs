pub mod show_answer_tool;
mod tool;

pub use show_answer_tool::ShowAnswerTool;
pub use tool::{FunctionDescriptor, LlmTool, ToolDescriptor};
