//! The ReAct loop controller.
//!
//! One `call` runs Reason → Act → Observe rounds until the model answers
//! without requesting a tool, the iteration limit is hit, or the agent is
//! interrupted. Every stage fires its hook event; mutable events may rewrite
//! what flows into the next stage.

use std::collections::HashMap;
use std::sync::Arc;

use reagent_core::hook::{
    ActingChunk, ErrorEvent, PostActing, PostCall, PostReasoning, PreActing, PreCall,
    PreReasoning, ReasoningChunk,
};
use reagent_core::provider::ChatResponse;
use reagent_core::{
    AgentRef, ContentBlock, Error, Hook, HookChain, HookEvent, HookPhase, LongTermMemory, Memory,
    Message, Result, Role, ToolChunk, ToolResultBlock, ToolSchema, ToolUseBlock,
};
use reagent_memory::InMemoryMemory;
use reagent_providers::ChatModel;
use reagent_tools::{ExecutionContext, Toolkit};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::interrupt::{AgentHandle, InterruptHandle};
use crate::structured::{self, GENERATE_RESPONSE, STRUCTURED_OUTPUT_KEY, STRUCTURED_REMINDER};

/// Name of the message carrying retrieved long-term memory.
pub const LONG_TERM_MEMORY_NAME: &str = "long_term_memory";

const MAX_ITERS_MESSAGE: &str =
    "I've reached the maximum number of reasoning iterations without finishing the task.";

const EMPTY_RESPONSE_MESSAGE: &str = "The model returned no response (empty content).";

/// Collaborators an agent is built from.
pub struct AgentParts {
    pub model: Arc<ChatModel>,
    pub toolkit: Toolkit,
    pub memory: Arc<dyn Memory>,
    pub long_term_memory: Option<Arc<dyn LongTermMemory>>,
    pub hooks: HookChain,
}

impl AgentParts {
    /// Parts with an empty toolkit, in-process memory and no hooks.
    pub fn new(model: Arc<ChatModel>) -> Self {
        Self {
            model,
            toolkit: Toolkit::new(),
            memory: Arc::new(InMemoryMemory::new()),
            long_term_memory: None,
            hooks: HookChain::new(),
        }
    }
}

/// A reasoning-and-acting agent.
///
/// `call` takes `&mut self`: one agent serves one conversation at a time.
pub struct ReActAgent {
    config: AgentConfig,
    model: Arc<ChatModel>,
    toolkit: Toolkit,
    memory: Arc<dyn Memory>,
    long_term_memory: Option<Arc<dyn LongTermMemory>>,
    hooks: HookChain,
    interrupt: InterruptHandle,
}

/// How the current `call` ends.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Free,
    Structured,
}

impl ReActAgent {
    pub fn new(config: AgentConfig, parts: AgentParts) -> Result<Self> {
        config.validate()?;
        let mut toolkit = parts.toolkit;
        if config.tool_timeout.is_some() {
            toolkit.set_timeout(config.tool_timeout);
        }
        Ok(Self {
            config,
            model: parts.model,
            toolkit,
            memory: parts.memory,
            long_term_memory: parts.long_term_memory,
            hooks: parts.hooks,
            interrupt: InterruptHandle::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &ChatModel {
        &self.model
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    pub fn toolkit_mut(&mut self) -> &mut Toolkit {
        &mut self.toolkit
    }

    pub fn register_hook(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.register(hook);
    }

    /// A clone of the interrupt flag, usable from other tasks.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Request a stop at the next reasoning step.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Clear a previous interrupt so the next `call` reasons again.
    pub fn reset_interrupt(&self) {
        self.interrupt.reset();
    }

    /// Run one conversational turn.
    pub async fn call(&mut self, input: Vec<Message>) -> Result<Message> {
        self.run(input, Mode::Free).await
    }

    /// Run one turn whose answer must match `schema`.
    ///
    /// The structured value lands in the final message's
    /// `metadata.structured_output`.
    pub async fn call_structured(&mut self, input: Vec<Message>, schema: Value) -> Result<Message> {
        let wrapped = !self.model.formatter().unwraps_wrapper();
        self.toolkit.register(structured::response_tool(schema, wrapped))?;
        let result = self.run(input, Mode::Structured).await;
        self.toolkit.unregister(GENERATE_RESPONSE);
        result
    }

    async fn run(&mut self, input: Vec<Message>, mode: Mode) -> Result<Message> {
        let pre_call = PreCall {
            agent: self.config.name.clone(),
            input: input.clone(),
        };
        self.fire(HookEvent::PreCall(&pre_call)).await?;

        let turn_start = self.memory.size().await?;
        for message in input.into_iter().filter(|m| !m.is_empty()) {
            self.memory.append(message).await?;
        }

        info!(
            agent = %self.config.name,
            max_iters = self.config.max_iters,
            stream = self.config.stream,
            "ReAct loop starting"
        );

        let mut iteration: u32 = 0;
        let mut tool_calls_made = 0usize;
        loop {
            if self.interrupt.is_interrupted() {
                info!(agent = %self.config.name, iteration, "Agent interrupted");
                let reply = Message::assistant(&self.config.name, &self.config.interrupt_message);
                return self.finish(reply, None).await;
            }

            debug!(agent = %self.config.name, iteration, "ReAct iteration");
            let response = self.reason(iteration).await?;

            if !response.has_tool_use() {
                if mode == Mode::Structured {
                    self.memory.append(response).await?;
                    self.memory
                        .append(Message::new(
                            "system",
                            Role::User,
                            vec![ContentBlock::text(STRUCTURED_REMINDER)],
                        ))
                        .await?;
                } else {
                    info!(
                        agent = %self.config.name,
                        iterations = iteration + 1,
                        tool_calls = tool_calls_made,
                        "ReAct loop completed"
                    );
                    return self.finish(response, Some(turn_start)).await;
                }
            } else {
                let calls: Vec<ToolUseBlock> = response.tool_uses().cloned().collect();
                tool_calls_made += calls.len();

                let mut outcomes = Vec::with_capacity(calls.len());
                let acted = self.act(iteration, calls.clone(), &mut outcomes).await;
                self.commit_round(&response, &calls, &outcomes, acted.as_ref().err())
                    .await?;
                acted?;

                if mode == Mode::Structured {
                    let wrapped = !self.model.formatter().unwraps_wrapper();
                    if let Some(value) = structured_value(&outcomes, wrapped) {
                        let reply = structured_reply(&self.config.name, &response, value);
                        return self.finish(reply, Some(turn_start)).await;
                    }
                }
            }

            iteration += 1;
            if iteration >= self.config.max_iters {
                warn!(
                    agent = %self.config.name,
                    max_iters = self.config.max_iters,
                    "ReAct: max iterations reached"
                );
                let reply = Message::assistant(&self.config.name, MAX_ITERS_MESSAGE)
                    .with_metadata("finish_reason", Value::String("max_iters".into()));
                return self.finish(reply, Some(turn_start)).await;
            }
        }
    }

    /// One model call with its PreReasoning/PostReasoning events.
    async fn reason(&self, iteration: u32) -> Result<Message> {
        let mut pre = PreReasoning {
            agent: self.config.name.clone(),
            iteration,
            messages: self.assemble().await?,
            tools: self.toolkit.available_schemas(),
        };
        self.fire(HookEvent::PreReasoning(&mut pre)).await?;

        let response = match self.invoke_model(&pre.messages, &pre.tools).await {
            Ok(response) => response,
            Err(e @ Error::Hook { .. }) => return Err(e),
            Err(e) => {
                self.report_error(HookPhase::Reasoning, &e).await;
                return Err(e);
            }
        };

        let mut post = PostReasoning {
            agent: self.config.name.clone(),
            iteration,
            message: self.response_message(response),
        };
        self.fire(HookEvent::PostReasoning(&mut post)).await?;
        Ok(post.message)
    }

    /// System prompt, long-term memory hint, then the whole log.
    async fn assemble(&self) -> Result<Vec<Message>> {
        let log = self.memory.read_all().await?;
        let mut messages = Vec::with_capacity(log.len() + 2);
        if !self.config.system_prompt.trim().is_empty() {
            messages.push(Message::system(&self.config.system_prompt));
        }
        if let Some(ltm) = &self.long_term_memory {
            match ltm.retrieve(&log).await {
                Ok(Some(hint)) => messages.push(Message::new(
                    LONG_TERM_MEMORY_NAME,
                    Role::User,
                    vec![ContentBlock::text(format!(
                        "<long_term_memory>\n{hint}\n</long_term_memory>"
                    ))],
                )),
                Ok(None) => {}
                Err(e) => warn!(backend = ltm.name(), error = %e, "Long-term memory retrieval failed"),
            }
        }
        messages.extend(log);
        Ok(messages)
    }

    async fn invoke_model(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ChatResponse> {
        if !self.config.stream {
            return self.model.call(messages, tools).await;
        }

        let mut stream = self.model.stream(messages, tools).await?;
        while let Some(deltas) = stream.next().await {
            for delta in deltas? {
                let chunk = ReasoningChunk {
                    agent: self.config.name.clone(),
                    delta,
                };
                self.fire(HookEvent::ReasoningChunk(&chunk)).await?;
            }
        }
        Ok(stream.finish())
    }

    fn response_message(&self, response: ChatResponse) -> Message {
        let content = if response.content.is_empty() {
            vec![ContentBlock::text(EMPTY_RESPONSE_MESSAGE)]
        } else {
            response.content
        };
        let mut message = Message::new(&self.config.name, Role::Assistant, content);
        if let Ok(reason) = serde_json::to_value(&response.finish_reason) {
            message.metadata.insert("finish_reason".into(), reason);
        }
        if let Some(usage) = response.usage.and_then(|u| serde_json::to_value(u).ok()) {
            message.metadata.insert("usage".into(), usage);
        }
        if !response.id.is_empty() {
            message
                .metadata
                .insert("response_id".into(), Value::String(response.id));
        }
        message
    }

    /// Execute the calls of one response, collecting outcomes in call order.
    ///
    /// On error `outcomes` holds the calls that completed before it.
    async fn act(
        &self,
        iteration: u32,
        calls: Vec<ToolUseBlock>,
        outcomes: &mut Vec<(ToolUseBlock, ToolResultBlock)>,
    ) -> Result<()> {
        if self.config.parallel_tool_calls {
            let mut prepared = Vec::with_capacity(calls.len());
            for call in calls {
                prepared.push(self.pre_acting(iteration, call).await?);
            }
            let results = self.execute(&prepared, true).await?;
            for (call, result) in prepared.into_iter().zip(results) {
                let (call, result) = self.post_acting(iteration, call, result).await?;
                outcomes.push((call, result));
            }
        } else {
            for call in calls {
                let call = self.pre_acting(iteration, call).await?;
                let mut results = self.execute(std::slice::from_ref(&call), false).await?;
                let result = results
                    .pop()
                    .unwrap_or_else(|| ToolResultBlock::error(&call.id, &call.name, "no result"));
                let (call, result) = self.post_acting(iteration, call, result).await?;
                outcomes.push((call, result));
            }
        }
        Ok(())
    }

    /// Store a tool-calling response together with a result for every call.
    ///
    /// Calls left unanswered by a failed acting phase get an error result, so
    /// the log never holds a tool use without its result.
    async fn commit_round(
        &self,
        response: &Message,
        calls: &[ToolUseBlock],
        outcomes: &[(ToolUseBlock, ToolResultBlock)],
        failure: Option<&Error>,
    ) -> Result<()> {
        self.memory.append(response.clone()).await?;
        for (_, result) in outcomes {
            self.memory
                .append(Message::tool_result(&self.config.name, result.clone()))
                .await?;
        }
        if let Some(error) = failure {
            let unanswered = calls
                .iter()
                .filter(|call| !outcomes.iter().any(|(_, r)| r.id == call.id));
            for call in unanswered {
                warn!(agent = %self.config.name, tool = %call.name, error = %error, "Tool call aborted");
                let result = ToolResultBlock::error(
                    &call.id,
                    &call.name,
                    format!("Tool call aborted: {error}"),
                );
                self.memory
                    .append(Message::tool_result(&self.config.name, result))
                    .await?;
            }
        }
        Ok(())
    }

    async fn pre_acting(&self, iteration: u32, call: ToolUseBlock) -> Result<ToolUseBlock> {
        let mut pre = PreActing {
            agent: self.config.name.clone(),
            iteration,
            tool_use: call,
        };
        self.fire(HookEvent::PreActing(&mut pre)).await?;
        Ok(pre.tool_use)
    }

    async fn post_acting(
        &self,
        iteration: u32,
        call: ToolUseBlock,
        result: ToolResultBlock,
    ) -> Result<(ToolUseBlock, ToolResultBlock)> {
        let mut post = PostActing {
            agent: self.config.name.clone(),
            iteration,
            tool_use: call,
            result,
        };
        self.fire(HookEvent::PostActing(&mut post)).await?;
        Ok((post.tool_use, post.result))
    }

    /// Run tools while relaying their progress chunks as ActingChunk events.
    async fn execute(&self, calls: &[ToolUseBlock], parallel: bool) -> Result<Vec<ToolResultBlock>> {
        let names: HashMap<&str, &str> = calls
            .iter()
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<ToolChunk>();
        let ctx = ExecutionContext {
            chunks: Some(tx),
            agent: Some(self.agent_ref()),
        };

        let results = {
            let execution = self.toolkit.execute_all(calls, parallel, &ctx);
            tokio::pin!(execution);
            loop {
                tokio::select! {
                    biased;
                    Some(chunk) = rx.recv() => self.relay_chunk(&names, chunk).await?,
                    results = &mut execution => break results,
                }
            }
        };

        drop(ctx);
        while let Ok(chunk) = rx.try_recv() {
            self.relay_chunk(&names, chunk).await?;
        }
        Ok(results)
    }

    async fn relay_chunk(&self, names: &HashMap<&str, &str>, chunk: ToolChunk) -> Result<()> {
        let event = ActingChunk {
            agent: self.config.name.clone(),
            tool_name: names
                .get(chunk.tool_use_id.as_str())
                .map(|n| n.to_string())
                .unwrap_or_default(),
            chunk,
        };
        self.fire(HookEvent::ActingChunk(&event)).await
    }

    /// Store the final message, fire PostCall and record the turn.
    ///
    /// `turn_start` is the log position where this call's input begins;
    /// `None` leaves memory untouched.
    async fn finish(&self, message: Message, turn_start: Option<usize>) -> Result<Message> {
        let mut post = PostCall {
            agent: self.config.name.clone(),
            message,
        };
        self.fire(HookEvent::PostCall(&mut post)).await?;

        if let Some(start) = turn_start {
            self.memory.append(post.message.clone()).await?;
            if let Some(ltm) = &self.long_term_memory {
                let log = self.memory.read_all().await?;
                let turn = log.get(start..).unwrap_or_default();
                if let Err(e) = ltm.record(turn).await {
                    warn!(backend = ltm.name(), error = %e, "Long-term memory record failed");
                }
            }
        }
        Ok(post.message)
    }

    async fn fire(&self, event: HookEvent<'_>) -> Result<()> {
        let phase = event.phase();
        self.hooks
            .fire(event)
            .await
            .map_err(|source| Error::Hook { phase, source })
    }

    /// Error events are notifications; a failing handler cannot mask the
    /// error being reported.
    async fn report_error(&self, phase: HookPhase, error: &Error) {
        let event = ErrorEvent {
            agent: self.config.name.clone(),
            phase,
            error: error.to_string(),
        };
        if let Err(e) = self.hooks.fire(HookEvent::Error(&event)).await {
            warn!(agent = %self.config.name, error = %e, "Error hook failed");
        }
    }

    fn agent_ref(&self) -> Arc<dyn AgentRef> {
        Arc::new(AgentHandle {
            name: self.config.name.clone(),
            interrupt: self.interrupt.clone(),
        })
    }
}

impl std::fmt::Debug for ReActAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReActAgent")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("memory", &self.memory.name())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// The value of the first successful `generate_response` call.
fn structured_value(outcomes: &[(ToolUseBlock, ToolResultBlock)], wrapped: bool) -> Option<Value> {
    outcomes
        .iter()
        .find(|(call, result)| call.name == GENERATE_RESPONSE && !result.is_error)
        .map(|(call, _)| structured::extract(call, wrapped))
}

fn structured_reply(agent: &str, response: &Message, value: Value) -> Message {
    let text = response.joined_text();
    let content = if text.trim().is_empty() {
        value.to_string()
    } else {
        text
    };
    Message::assistant(agent, content).with_metadata(STRUCTURED_OUTPUT_KEY, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedTransport, scripted_model};
    use serde_json::json;

    #[test]
    fn invalid_config_is_rejected() {
        let model = scripted_model(Arc::new(ScriptedTransport::default()));
        let mut config = AgentConfig::new("bot");
        config.max_iters = 0;
        let err = ReActAgent::new(config, AgentParts::new(model)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn structured_reply_prefers_model_text() {
        let value = json!({"answer": 42});
        let spoken = Message::assistant("bot", "Here you go.");
        let reply = structured_reply("bot", &spoken, value.clone());
        assert_eq!(reply.text(), "Here you go.");
        assert_eq!(reply.metadata[STRUCTURED_OUTPUT_KEY], value);

        let silent = Message::new("bot", Role::Assistant, vec![]);
        assert_eq!(structured_reply("bot", &silent, value).text(), r#"{"answer":42}"#);
    }

    #[test]
    fn only_successful_response_calls_count() {
        let mut args = serde_json::Map::new();
        args.insert("response".into(), json!({"ok": true}));
        let call = ToolUseBlock::new("c1", GENERATE_RESPONSE, args);
        let failed = ToolResultBlock::error("c1", GENERATE_RESPONSE, "missing fields");
        assert!(structured_value(&[(call.clone(), failed)], true).is_none());

        let ok = ToolResultBlock::text("c1", GENERATE_RESPONSE, "done");
        assert_eq!(structured_value(&[(call, ok)], true), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn response_metadata_is_attached() {
        let model = scripted_model(Arc::new(ScriptedTransport::default()));
        let agent = ReActAgent::new(AgentConfig::new("bot"), AgentParts::new(model)).unwrap();
        let response = ChatResponse::new(
            "r1",
            vec![ContentBlock::text("hi")],
            reagent_core::FinishReason::Stop,
            Some(reagent_core::Usage::new(3, 4)),
        );
        let message = agent.response_message(response);
        assert_eq!(message.name, "bot");
        assert_eq!(message.metadata["finish_reason"], "stop");
        assert_eq!(message.metadata["usage"]["total_tokens"], 7);
        assert_eq!(message.metadata["response_id"], "r1");

        let empty = agent.response_message(ChatResponse::default());
        assert_eq!(empty.text(), EMPTY_RESPONSE_MESSAGE);
    }
}
