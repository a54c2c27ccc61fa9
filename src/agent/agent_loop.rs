//! Core agent loop implementation.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::console::{InputError, LineReader, OutputSink};
use crate::conversation::{ContentBlock, Role, Transcript, TranscriptError, Turn};
use crate::llm::{InferenceClient, InferenceError};
use crate::tools::{ToolRegistry, ToolSchema};

/// Where the loop is between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    AwaitingInference,
    DispatchingTools,
    Terminated,
}

/// Errors that end the loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("transcript contract violated: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("agent loop has already terminated")]
    Terminated,
}

impl AgentError {
    /// Whether the loop ended because the user closed the input.
    pub fn is_end_of_input(&self) -> bool {
        matches!(self, AgentError::Input(InputError::EndOfInput))
    }
}

/// Per-run knobs for the loop.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Output token limit passed to every inference call.
    pub max_output_tokens: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: crate::config::DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// The interactive chat agent.
///
/// Owns the transcript for the whole session. Each call to [`Agent::step`]
/// performs one state transition; [`Agent::run`] steps until an error.
pub struct Agent {
    llm: Arc<dyn InferenceClient>,
    tools: ToolRegistry,
    tool_schemas: Vec<ToolSchema>,
    input: Box<dyn LineReader>,
    output: Box<dyn OutputSink>,
    settings: AgentSettings,
    transcript: Transcript,
    state: LoopState,
    inference_calls: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn InferenceClient>,
        tools: ToolRegistry,
        input: Box<dyn LineReader>,
        output: Box<dyn OutputSink>,
        settings: AgentSettings,
    ) -> Self {
        // The registry is fixed for the session, so the schemas are too.
        let tool_schemas = tools.tool_schemas();

        Self {
            llm,
            tools,
            tool_schemas,
            input,
            output,
            settings,
            transcript: Transcript::new(),
            state: LoopState::AwaitingUserInput,
            inference_calls: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Number of inference calls issued so far.
    pub fn inference_calls(&self) -> usize {
        self.inference_calls
    }

    /// Chat until input ends or a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        self.output.banner();

        loop {
            self.step().await?;
        }
    }

    /// Perform one transition and return the new state.
    ///
    /// Any error moves the loop to [`LoopState::Terminated`].
    pub async fn step(&mut self) -> Result<LoopState, AgentError> {
        let outcome = match self.state {
            LoopState::AwaitingUserInput => self.read_user_input().await,
            LoopState::AwaitingInference => self.run_inference().await,
            LoopState::DispatchingTools => self.dispatch_tools().await,
            LoopState::Terminated => return Err(AgentError::Terminated),
        };

        match outcome {
            Ok(next) => {
                tracing::debug!("Agent state {:?} -> {:?}", self.state, next);
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                tracing::debug!("Agent terminated in {:?}: {}", self.state, e);
                self.state = LoopState::Terminated;
                Err(e)
            }
        }
    }

    /// Read one user line and append it as a user turn.
    ///
    /// Unlike every other successful read, a whitespace-only line is not
    /// appended: the loop prompts again without calling the model, because
    /// the inference service rejects empty text blocks.
    async fn read_user_input(&mut self) -> Result<LoopState, AgentError> {
        self.output.prompt();
        let line = self.input.read_line().await?;

        if line.trim().is_empty() {
            return Ok(LoopState::AwaitingUserInput);
        }

        self.transcript.push(Turn::user_text(line))?;
        Ok(LoopState::AwaitingInference)
    }

    async fn run_inference(&mut self) -> Result<LoopState, AgentError> {
        self.inference_calls += 1;
        tracing::debug!(
            "Agent inference {} over {} turns",
            self.inference_calls,
            self.transcript.len()
        );

        let turn = self
            .llm
            .infer(
                self.transcript.turns(),
                &self.tool_schemas,
                self.settings.max_output_tokens,
            )
            .await?;

        // A reused request id is bad model output, not a loop bug.
        self.transcript.push(turn).map_err(|e| match e {
            TranscriptError::DuplicateRequestId(id) => AgentError::Inference(
                InferenceError::MalformedResponse(format!("tool request id reused: {}", id)),
            ),
            other => other.into(),
        })?;
        Ok(LoopState::DispatchingTools)
    }

    async fn dispatch_tools(&mut self) -> Result<LoopState, AgentError> {
        let blocks = match self.transcript.last() {
            Some(turn) if turn.role == Role::Assistant => turn.content.clone(),
            _ => return Err(TranscriptError::MissingAssistantTurn.into()),
        };

        let mut results = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text { text } => self.output.assistant_text(&text),
                ContentBlock::ToolRequest { id, name, input } => {
                    self.output.tool_call(&id, &name, &input);
                    let result = self.execute_tool(&id, &name, input).await;
                    if let ContentBlock::ToolResult {
                        content, is_error, ..
                    } = &result
                    {
                        self.output.tool_result(&id, content, *is_error);
                    }
                    results.push(result);
                }
                ContentBlock::ToolResult { .. } => {
                    return Err(TranscriptError::ResultInAssistantTurn.into());
                }
            }
        }

        if results.is_empty() {
            return Ok(LoopState::AwaitingUserInput);
        }

        self.transcript.push(Turn::tool_results(results))?;
        Ok(LoopState::AwaitingInference)
    }

    /// Run one tool request. Failures become error results for the model.
    async fn execute_tool(&self, id: &str, name: &str, input: Value) -> ContentBlock {
        tracing::info!("Executing tool {} (id {})", name, id);

        match self.tools.execute(name, input).await {
            Ok(output) => ContentBlock::tool_result(id, output, false),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", name, e);
                ContentBlock::tool_result(id, e.to_string(), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::{Tool, ToolError};

    /// Inference client that replays canned turns and records what it saw.
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<Turn, InferenceError>>>,
        seen: Mutex<Vec<(Vec<Turn>, Vec<String>)>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<Turn, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn transcript_lengths(&self) -> Vec<usize> {
            self.seen.lock().unwrap().iter().map(|(t, _)| t.len()).collect()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn infer(
            &self,
            transcript: &[Turn],
            tools: &[ToolSchema],
            _max_tokens: u32,
        ) -> Result<Turn, InferenceError> {
            self.seen.lock().unwrap().push((
                transcript.to_vec(),
                tools.iter().map(|t| t.name.clone()).collect(),
            ));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(InferenceError::MalformedResponse("script exhausted".into()))
                })
        }
    }

    /// Reader whose input device has failed.
    struct BrokenReader;

    #[async_trait]
    impl LineReader for BrokenReader {
        async fn read_line(&mut self) -> Result<String, InputError> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed").into())
        }
    }

    /// Reader that yields fixed lines, then end of input.
    struct ScriptedReader {
        lines: VecDeque<String>,
        reads: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LineReader for ScriptedReader {
        async fn read_line(&mut self) -> Result<String, InputError> {
            *self.reads.lock().unwrap() += 1;
            self.lines.pop_front().ok_or(InputError::EndOfInput)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl OutputSink for RecordingSink {
        fn banner(&mut self) {}

        fn prompt(&mut self) {
            self.record("prompt".to_string());
        }

        fn assistant_text(&mut self, text: &str) {
            self.record(format!("text:{text}"));
        }

        fn tool_call(&mut self, id: &str, name: &str, _input: &Value) {
            self.record(format!("call:{id}:{name}"));
        }

        fn tool_result(&mut self, id: &str, output: &str, is_error: bool) {
            self.record(format!("result:{id}:{is_error}:{output}"));
        }
    }

    /// Tool that upper-cases its `text` argument.
    struct Shout;

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Upper-case some text."
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, args: Value, _workspace: &Path) -> Result<String, ToolError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Missing 'text' argument"))?;
            Ok(text.to_uppercase())
        }
    }

    struct Harness {
        agent: Agent,
        client: Arc<ScriptedClient>,
        sink: RecordingSink,
        reads: Arc<Mutex<usize>>,
    }

    impl Harness {
        fn reads(&self) -> usize {
            *self.reads.lock().unwrap()
        }
    }

    fn harness(
        lines: &[&str],
        replies: Vec<Result<Turn, InferenceError>>,
        tools: ToolRegistry,
    ) -> Harness {
        let client = ScriptedClient::new(replies);
        let sink = RecordingSink::default();
        let reads = Arc::new(Mutex::new(0));
        let reader = ScriptedReader {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            reads: reads.clone(),
        };
        let agent = Agent::new(
            client.clone(),
            tools,
            Box::new(reader),
            Box::new(sink.clone()),
            AgentSettings::default(),
        );
        Harness {
            agent,
            client,
            sink,
            reads,
        }
    }

    fn shout_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::empty(".");
        registry.register(Arc::new(Shout)).unwrap();
        registry
    }

    fn text(s: &str) -> Result<Turn, InferenceError> {
        Ok(Turn::assistant(vec![ContentBlock::text(s)]))
    }

    fn request(id: &str, name: &str, input: Value) -> ContentBlock {
        ContentBlock::tool_request(id, name, input)
    }

    fn results_of(turn: &Turn) -> Vec<(String, String, bool)> {
        assert_eq!(turn.role, Role::User);
        turn.content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => (tool_use_id.clone(), content.clone(), *is_error),
                other => panic!("expected tool result, got {other:?}"),
            })
            .collect()
    }

    async fn run_to_end(agent: &mut Agent) -> AgentError {
        agent.run().await.unwrap_err()
    }

    #[tokio::test]
    async fn results_echo_requests_in_order() {
        let mut h = harness(
            &["do three things"],
            vec![
                Ok(Turn::assistant(vec![
                    request("t1", "shout", json!({"text": "a"})),
                    request("t2", "missing", json!({})),
                    request("t3", "shout", json!({"text": "c"})),
                ])),
                text("done"),
            ],
            shout_registry(),
        );

        let err = run_to_end(&mut h.agent).await;
        assert!(err.is_end_of_input());

        let turns = h.agent.transcript().turns();
        assert_eq!(
            results_of(&turns[2]),
            vec![
                ("t1".to_string(), "A".to_string(), false),
                ("t2".to_string(), "tool not found".to_string(), true),
                ("t3".to_string(), "C".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn plain_reply_returns_to_user_input_without_more_inference() {
        let mut h = harness(&["hello"], vec![text("hi there")], shout_registry());

        assert_eq!(h.agent.step().await.unwrap(), LoopState::AwaitingInference);
        assert_eq!(h.agent.step().await.unwrap(), LoopState::DispatchingTools);
        assert_eq!(h.agent.step().await.unwrap(), LoopState::AwaitingUserInput);
        assert_eq!(h.client.calls(), 1);
        assert_eq!(h.agent.inference_calls(), 1);

        let err = h.agent.step().await.unwrap_err();
        assert!(err.is_end_of_input());
        assert_eq!(h.agent.state(), LoopState::Terminated);
        assert_eq!(h.client.calls(), 1);
        assert_eq!(h.agent.transcript().len(), 2);
    }

    #[tokio::test]
    async fn multi_hop_tool_use_skips_user_input() {
        let mut h = harness(
            &["shout twice"],
            vec![
                Ok(Turn::assistant(vec![request("t1", "shout", json!({"text": "one"}))])),
                Ok(Turn::assistant(vec![request("t2", "shout", json!({"text": "two"}))])),
                text("ONE TWO"),
            ],
            shout_registry(),
        );

        let mut states = Vec::new();
        while h.agent.state() != LoopState::AwaitingUserInput || states.is_empty() {
            states.push(h.agent.step().await.unwrap());
        }

        assert_eq!(
            states,
            vec![
                LoopState::AwaitingInference,
                LoopState::DispatchingTools,
                LoopState::AwaitingInference,
                LoopState::DispatchingTools,
                LoopState::AwaitingInference,
                LoopState::DispatchingTools,
                LoopState::AwaitingUserInput,
            ]
        );
        assert_eq!(h.reads(), 1);
        assert_eq!(h.client.calls(), 3);
        assert_eq!(h.client.transcript_lengths(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_fatal() {
        let mut h = harness(
            &["list files in /tmp"],
            vec![
                Ok(Turn::assistant(vec![request("t1", "list_dir", json!({"path": "/tmp"}))])),
                text("I can't list directories."),
            ],
            ToolRegistry::new("."),
        );

        let err = run_to_end(&mut h.agent).await;
        assert!(err.is_end_of_input());

        let turns = h.agent.transcript().turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(
            results_of(&turns[2]),
            vec![("t1".to_string(), "tool not found".to_string(), true)]
        );
        assert_eq!(turns[3].content, vec![ContentBlock::text("I can't list directories.")]);
        assert_eq!(h.client.calls(), 2);
        assert_eq!(h.reads(), 2);
    }

    #[tokio::test]
    async fn read_file_result_feeds_second_inference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "buy milk\ncall bob\n").unwrap();

        let mut h = harness(
            &["what's in ./notes.txt"],
            vec![
                Ok(Turn::assistant(vec![
                    ContentBlock::text("Let me read it."),
                    request("t1", "read_file", json!({"path": "./notes.txt"})),
                ])),
                text("Two errands: milk and Bob."),
            ],
            ToolRegistry::new(dir.path()),
        );

        let err = run_to_end(&mut h.agent).await;
        assert!(err.is_end_of_input());
        assert_eq!(h.client.calls(), 2);

        let turns = h.agent.transcript().turns();
        assert_eq!(
            results_of(&turns[2]),
            vec![("t1".to_string(), "buy milk\ncall bob\n".to_string(), false)]
        );

        // The second call saw the tool result as its last turn.
        let seen = h.client.seen.lock().unwrap();
        assert_eq!(seen[1].0.last(), Some(&turns[2]));
        assert_eq!(seen[1].1, vec!["read_file", "list_files"]);
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_results() {
        let mut h = harness(
            &["read something"],
            vec![
                Ok(Turn::assistant(vec![request("t1", "read_file", json!({"path": 3}))])),
                text("Sorry."),
            ],
            ToolRegistry::new("."),
        );

        run_to_end(&mut h.agent).await;

        let (id, output, is_error) = results_of(&h.agent.transcript().turns()[2]).remove(0);
        assert_eq!(id, "t1");
        assert!(is_error);
        assert!(output.starts_with("invalid arguments"), "{output}");
    }

    #[tokio::test]
    async fn display_follows_block_order() {
        let mut h = harness(
            &["go"],
            vec![
                Ok(Turn::assistant(vec![
                    ContentBlock::text("first"),
                    request("t1", "shout", json!({"text": "x"})),
                    ContentBlock::text("second"),
                ])),
                text("third"),
            ],
            shout_registry(),
        );

        run_to_end(&mut h.agent).await;

        assert_eq!(
            h.sink.events(),
            vec![
                "prompt",
                "text:first",
                "call:t1:shout",
                "result:t1:false:X",
                "text:second",
                "text:third",
                "prompt",
            ]
        );
    }

    #[tokio::test]
    async fn transcript_only_grows() {
        let mut h = harness(
            &["one", "two"],
            vec![
                Ok(Turn::assistant(vec![request("t1", "shout", json!({"text": "a"}))])),
                text("A"),
                text("plain"),
            ],
            shout_registry(),
        );

        let mut snapshot: Vec<Turn> = Vec::new();
        loop {
            match h.agent.step().await {
                Ok(_) => {
                    let turns = h.agent.transcript().turns();
                    assert!(turns.len() >= snapshot.len());
                    assert_eq!(&turns[..snapshot.len()], snapshot.as_slice());
                    snapshot = turns.to_vec();
                }
                Err(e) => {
                    assert!(e.is_end_of_input());
                    break;
                }
            }
        }

        // First iteration: user, assistant, results, assistant. Second: user, assistant.
        assert_eq!(h.agent.transcript().len(), 6);
        assert_eq!(snapshot.len(), 6);
    }

    #[tokio::test]
    async fn inference_failure_terminates_and_propagates() {
        let mut h = harness(
            &["hello"],
            vec![Err(InferenceError::RateLimited("slow down".into()))],
            shout_registry(),
        );

        let err = run_to_end(&mut h.agent).await;
        assert!(matches!(err, AgentError::Inference(InferenceError::RateLimited(_))));
        assert_eq!(h.agent.state(), LoopState::Terminated);
        assert_eq!(h.agent.transcript().len(), 1);

        assert!(matches!(h.agent.step().await, Err(AgentError::Terminated)));
    }

    #[tokio::test]
    async fn end_of_input_appends_nothing() {
        let mut h = harness(&[], vec![], shout_registry());

        let err = run_to_end(&mut h.agent).await;
        assert!(err.is_end_of_input());
        assert!(h.agent.transcript().is_empty());
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn blank_lines_are_not_sent() {
        let mut h = harness(&["   ", "hi"], vec![text("hello")], shout_registry());

        run_to_end(&mut h.agent).await;

        assert_eq!(h.client.calls(), 1);
        assert_eq!(h.client.transcript_lengths(), vec![1]);
        assert_eq!(h.agent.transcript().turns()[0], Turn::user_text("hi"));
    }

    #[tokio::test]
    async fn reused_request_id_is_malformed_inference() {
        let mut h = harness(
            &["go"],
            vec![
                Ok(Turn::assistant(vec![request("t1", "shout", json!({"text": "a"}))])),
                Ok(Turn::assistant(vec![request("t1", "shout", json!({"text": "b"}))])),
            ],
            shout_registry(),
        );

        let err = run_to_end(&mut h.agent).await;
        assert!(matches!(
            err,
            AgentError::Inference(InferenceError::MalformedResponse(ref m)) if m.contains("t1")
        ));
        assert_eq!(h.agent.state(), LoopState::Terminated);
        assert_eq!(h.agent.transcript().len(), 3);
    }

    #[tokio::test]
    async fn read_error_terminates_without_appending() {
        let client = ScriptedClient::new(vec![text("unused")]);
        let mut agent = Agent::new(
            client.clone(),
            shout_registry(),
            Box::new(BrokenReader),
            Box::new(RecordingSink::default()),
            AgentSettings::default(),
        );

        let err = agent.step().await.unwrap_err();
        assert!(matches!(err, AgentError::Input(InputError::Io(_))));
        assert!(!err.is_end_of_input());
        assert_eq!(agent.state(), LoopState::Terminated);
        assert!(agent.transcript().is_empty());
        assert_eq!(client.calls(), 0);
    }
}
