use crate::error::{QuartoChatError, Result};
use crate::llm::tools::{FunctionDescriptor, LlmTool, ToolDescriptor};
use crate::writer::UniqueWriter;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

pub const SHOW_ANSWER_TOOL_NAME: &str = "show_answer";

/// Arguments the model supplies to `show_answer`.
#[derive(Debug, Deserialize, JsonSchema)]
struct ShowAnswerArgs {
    /// The output filename for the Quarto document, with extension "qmd".
    filename: String,
    /// The answer and explanation in Quarto markdown format.
    answer: String,
}

/// Tool that receives a Quarto markdown answer and saves it to the output directory.
///
/// Each call persists the document through a [`UniqueWriter`], so an earlier answer with
/// the same filename is never replaced. The tool result handed back to the model is the
/// answer wrapped in quadruple backticks.
///
/// Both arguments must be strings. An empty `filename` skips the write. Write failures are returned as errors so
/// the turn never reports a document that was not saved.
///
/// # Examples
///
/// ```no_run
/// use quarto_chat::llm::tools::show_answer_tool::ShowAnswerTool;
/// use quarto_chat::llm::tools::LlmTool;
/// use quarto_chat::writer::UniqueWriter;
/// use serde_json::json;
/// use std::collections::HashMap;
///
/// let tool = ShowAnswerTool::new(UniqueWriter::new("."));
/// let mut args = HashMap::new();
/// args.insert("filename".to_string(), json!("what-is-a-p-value"));
/// args.insert("answer".to_string(), json!("---\ntitle: P-values\n---\n"));
///
/// let result = tool.run(&args).unwrap();
/// // ./what-is-a-p-value.qmd now exists
/// ```
#[derive(Debug, Clone)]
pub struct ShowAnswerTool {
    writer: UniqueWriter,
}

impl ShowAnswerTool {
    pub fn new(writer: UniqueWriter) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &UniqueWriter {
        &self.writer
    }
}

/// Strip the metadata keys schemars adds at the schema root; providers only need the
/// object schema itself.
fn parameters_schema() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(ShowAnswerArgs))
        .unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

impl LlmTool for ShowAnswerTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let object: Map<String, Value> =
            args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let ShowAnswerArgs { filename, answer } =
            serde_json::from_value(Value::Object(object)).map_err(|e| {
                QuartoChatError::ToolError(format!("Invalid show_answer arguments: {}", e))
            })?;

        info!(filename = %filename, bytes = answer.len(), "Received Quarto markdown answer");
        debug!("{}", answer);

        match self.writer.write(&filename, &answer)? {
            Some(path) => info!(path = %path.display(), "Wrote answer"),
            None => info!("Empty filename, answer not saved"),
        }

        Ok(json!(format!("````\n{}````\n", answer)))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: SHOW_ANSWER_TOOL_NAME.to_string(),
                description: "Reports an answer in Quarto markdown format. Returns the same answer, wrapped in quadruple backticks.".to_string(),
                parameters: parameters_schema(),
            },
        }
    }
}
