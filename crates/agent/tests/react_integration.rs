//! End-to-end tests for the ReAct loop.
//!
//! These drive a full agent (formatter, toolkit, memory and hooks) against a
//! scripted transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reagent_agent::test_helpers::{
    Scripted, ScriptedTransport, scripted_model, text_response, text_stream, tool_call_response,
};
use reagent_agent::{
    AgentConfig, AgentParts, AgentStreamEvent, DEFAULT_INTERRUPT_MESSAGE, ReActAgent,
    STRUCTURED_OUTPUT_KEY, StreamEventHook,
};
use reagent_core::error::{HookError, ProviderError, ToolError};
use reagent_core::hook::{Hook, HookEvent, HookPhase};
use reagent_core::{ContentBlock, Error, LongTermMemory, Message, Role};
use reagent_memory::StaticLongTermMemory;
use reagent_tools::{FnTool, ToolInput, Toolkit, TypedTool};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct WeatherArgs {
    /// City to look up
    city: String,
}

fn weather_toolkit() -> Toolkit {
    let mut kit = Toolkit::new();
    kit.register(TypedTool::new(
        "get_weather",
        "Current weather for a city",
        |args: WeatherArgs, _input| async move {
            if args.city == "Paris" {
                Ok::<_, ToolError>("Sunny, 20°C".to_string())
            } else {
                Ok(format!("No data for {}", args.city))
            }
        },
    ))
    .unwrap();
    kit
}

fn build(transport: &Arc<ScriptedTransport>, toolkit: Toolkit, config: AgentConfig) -> ReActAgent {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("reagent_agent=debug,reagent_tools=debug")
        .with_test_writer()
        .try_init();
    let mut parts = AgentParts::new(scripted_model(transport.clone()));
    parts.toolkit = toolkit;
    ReActAgent::new(config, parts).unwrap()
}

fn tool_results(log: &[Message]) -> Vec<(String, bool, String)> {
    log.iter()
        .flat_map(|m| m.tool_results())
        .map(|r| (r.id.clone(), r.is_error, r.output_text()))
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn weather_in_paris() {
    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("call_1", "get_weather", json!({"city": "Paris"}))]),
        text_response("It's sunny, 20°C in Paris."),
    ]));
    let mut agent = build(&transport, weather_toolkit(), AgentConfig::new("assistant"));

    let reply = agent
        .call(vec![Message::user("What's the weather in Paris?")])
        .await
        .unwrap();

    assert_eq!(reply.text(), "It's sunny, 20°C in Paris.");
    assert_eq!(reply.role, Role::Assistant);

    let log = agent.memory().read_all().await.unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0].role, Role::User);
    assert!(log[1].has_tool_use());
    assert_eq!(log[2].role, Role::Tool);
    assert_eq!(
        tool_results(&log),
        vec![("call_1".to_string(), false, "Sunny, 20°C".to_string())]
    );
    assert_eq!(log[3].text(), "It's sunny, 20°C in Paris.");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["tools"][0]["function"]["name"], "get_weather");
    assert!(requests[1].to_string().contains("Sunny, 20°C"));
}

#[tokio::test]
async fn failing_tool_is_recorded_and_the_loop_continues() {
    let mut kit = Toolkit::new();
    kit.register(FnTool::new(
        "fetch",
        "Fetch a page",
        json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        |_input: ToolInput| async move { Err::<String, _>(ToolError::failed("fetch", "timeout")) },
    ))
    .unwrap();

    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("call_1", "fetch", json!({"url": "https://example.com"}))]),
        text_response("The page could not be fetched."),
    ]));
    let mut agent = build(&transport, kit, AgentConfig::new("assistant"));

    let reply = agent.call(vec![Message::user("Fetch it")]).await.unwrap();
    assert_eq!(reply.text(), "The page could not be fetched.");
    assert_eq!(transport.call_count(), 2);

    let results = tool_results(&agent.memory().read_all().await.unwrap());
    assert_eq!(results.len(), 1);
    assert!(results[0].1, "result must be error-flagged");
    assert!(results[0].2.contains("timeout"));
}

#[tokio::test(start_paused = true)]
async fn slow_tool_times_out_into_an_error_result() {
    let mut kit = Toolkit::new();
    kit.register(FnTool::new("slow", "Sleeps", json!({}), |_input: ToolInput| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, ToolError>("finished")
    }))
    .unwrap();

    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("call_1", "slow", json!({}))]),
        text_response("Gave up waiting."),
    ]));
    let mut config = AgentConfig::new("assistant");
    config.tool_timeout = Some(Duration::from_secs(2));
    let mut agent = build(&transport, kit, config);

    let reply = agent.call(vec![Message::user("go")]).await.unwrap();
    assert_eq!(reply.text(), "Gave up waiting.");

    let results = tool_results(&agent.memory().read_all().await.unwrap());
    assert!(results[0].1);
    assert!(results[0].2.contains("timeout"));
}

#[tokio::test]
async fn iteration_bound_stops_an_endless_tool_loop() {
    let transport = Arc::new(ScriptedTransport::repeating(tool_call_response(&[(
        "call_again",
        "get_weather",
        json!({"city": "Oslo"}),
    )])));
    let mut config = AgentConfig::new("assistant");
    config.max_iters = 3;
    let mut agent = build(&transport, weather_toolkit(), config);

    let reply = agent.call(vec![Message::user("loop forever")]).await.unwrap();

    assert_eq!(transport.call_count(), 3);
    assert!(reply.text().contains("maximum number of reasoning iterations"));
    assert_eq!(reply.metadata["finish_reason"], "max_iters");

    let log = agent.memory().read_all().await.unwrap();
    assert_eq!(tool_results(&log).len(), 3);
    assert_eq!(log.last().unwrap().id, reply.id);
}

#[tokio::test]
async fn interrupt_is_idempotent_and_never_reaches_the_model() {
    let transport = Arc::new(ScriptedTransport::replies(vec![text_response("back again")]));
    let mut agent = build(&transport, Toolkit::new(), AgentConfig::new("assistant"));

    agent.interrupt();
    let first = agent.call(vec![Message::user("hello?")]).await.unwrap();
    let second = agent.call(vec![]).await.unwrap();

    assert_eq!(first.text(), DEFAULT_INTERRUPT_MESSAGE);
    assert_eq!(second.text(), first.text());
    assert_eq!(transport.call_count(), 0);
    // Input is kept, acknowledgements are not.
    assert_eq!(agent.memory().size().await.unwrap(), 1);

    agent.reset_interrupt();
    let resumed = agent.call(vec![]).await.unwrap();
    assert_eq!(resumed.text(), "back again");
}

#[tokio::test]
async fn tool_can_interrupt_its_agent() {
    let mut kit = Toolkit::new();
    kit.register(FnTool::new("stop", "Stop working", json!({}), |input: ToolInput| async move {
        if let Some(agent) = input.agent() {
            agent.interrupt();
        }
        Ok::<_, ToolError>("stopping")
    }))
    .unwrap();

    let transport = Arc::new(ScriptedTransport::replies(vec![tool_call_response(&[(
        "call_1", "stop", json!({}),
    )])]));
    let mut config = AgentConfig::new("assistant");
    config.interrupt_message = "Stopped as requested.".into();
    let mut agent = build(&transport, kit, config);

    let reply = agent.call(vec![Message::user("please stop")]).await.unwrap();
    assert_eq!(reply.text(), "Stopped as requested.");
    assert_eq!(transport.call_count(), 1);

    // The in-flight tool finished and was recorded before the halt.
    let log = agent.memory().read_all().await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(tool_results(&log)[0].2, "stopping");
    assert!(agent.interrupt_handle().is_interrupted());
}

#[tokio::test]
async fn zero_candidates_produce_an_explanation() {
    let transport = Arc::new(ScriptedTransport::replies(vec![json!({"choices": []})]));
    let mut agent = build(&transport, Toolkit::new(), AgentConfig::new("assistant"));

    let reply = agent.call(vec![Message::user("hi")]).await.unwrap();
    assert!(!reply.is_empty());
    assert!(reply.text().contains("no response"));
}

#[tokio::test(start_paused = true)]
async fn parallel_results_keep_request_order() {
    let mut kit = Toolkit::new();
    kit.register(FnTool::new(
        "sleepy",
        "Sleeps for `ms` milliseconds",
        json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        |input: ToolInput| async move {
            let ms: u64 = input.resolve("ms")?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ToolError>(format!("slept {ms}"))
        },
    ))
    .unwrap();

    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[
            ("a", "sleepy", json!({"ms": 80})),
            ("b", "sleepy", json!({"ms": 5})),
            ("c", "sleepy", json!({"ms": 40})),
        ]),
        text_response("done"),
    ]));
    let mut config = AgentConfig::new("assistant");
    config.parallel_tool_calls = true;
    let mut agent = build(&transport, kit, config);

    let started = tokio::time::Instant::now();
    agent.call(vec![Message::user("sleep")]).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(120));

    let ids: Vec<String> = tool_results(&agent.memory().read_all().await.unwrap())
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

// ── Hooks ────────────────────────────────────────────────────────────────

/// Rewrites tool arguments, tool results and the final answer.
struct Editor;

#[async_trait]
impl Hook for Editor {
    fn name(&self) -> &str {
        "editor"
    }

    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
        match event {
            HookEvent::PreActing(e) => {
                e.tool_use.input.insert("city".into(), json!("Paris"));
            }
            HookEvent::PostActing(e) => {
                e.result.output.push(ContentBlock::text("(verified)"));
            }
            HookEvent::PostCall(e) => {
                e.message = Message::assistant(&e.agent, format!("[edited] {}", e.message.text()));
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test]
async fn mutable_hooks_rewrite_calls_results_and_replies() {
    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("call_1", "get_weather", json!({"city": "Lyon"}))]),
        text_response("Sunny."),
    ]));
    let mut agent = build(&transport, weather_toolkit(), AgentConfig::new("assistant"));
    agent.register_hook(Arc::new(Editor));

    let reply = agent.call(vec![Message::user("weather?")]).await.unwrap();
    assert_eq!(reply.text(), "[edited] Sunny.");

    let log = agent.memory().read_all().await.unwrap();
    let results = tool_results(&log);
    assert_eq!(results[0].2, "Sunny, 20°C\n(verified)");
    assert_eq!(log.last().unwrap().text(), "[edited] Sunny.");
}

struct RejectResponses;

#[async_trait]
impl Hook for RejectResponses {
    fn name(&self) -> &str {
        "guard"
    }

    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
        if let HookEvent::PostReasoning(_) = event {
            return Err(HookError::new("guard", "response rejected"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn hook_error_fails_the_stage_that_fired_it() {
    let transport = Arc::new(ScriptedTransport::replies(vec![text_response("hi")]));
    let mut agent = build(&transport, Toolkit::new(), AgentConfig::new("assistant"));
    agent.register_hook(Arc::new(RejectResponses));

    let err = agent.call(vec![Message::user("hi")]).await.unwrap_err();
    match err {
        Error::Hook { phase, source } => {
            assert_eq!(phase, HookPhase::Reasoning);
            assert_eq!(source.hook, "guard");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[derive(PartialEq)]
enum ActingStage {
    Before,
    After,
}

/// Fails the acting event of one tool call.
struct FailActing {
    stage: ActingStage,
    call_id: &'static str,
}

#[async_trait]
impl Hook for FailActing {
    fn name(&self) -> &str {
        "acting_guard"
    }

    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
        let failing = match &event {
            HookEvent::PreActing(e) => {
                self.stage == ActingStage::Before && e.tool_use.id == self.call_id
            }
            HookEvent::PostActing(e) => {
                self.stage == ActingStage::After && e.tool_use.id == self.call_id
            }
            _ => false,
        };
        if failing {
            return Err(HookError::new("acting_guard", "call blocked"));
        }
        Ok(())
    }
}

/// Every tool use in `log` has exactly one result.
fn assert_calls_answered(log: &[Message]) {
    let uses: Vec<String> = log.iter().flat_map(|m| m.tool_uses()).map(|u| u.id.clone()).collect();
    let mut answered: Vec<String> = tool_results(log).into_iter().map(|(id, ..)| id).collect();
    answered.sort();
    let mut expected = uses.clone();
    expected.sort();
    assert_eq!(answered, expected, "tool uses {uses:?} must each have one result");
}

#[tokio::test]
async fn acting_hook_error_leaves_no_unanswered_tool_use() {
    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("c1", "get_weather", json!({"city": "Paris"}))]),
        text_response("Let's try again."),
    ]));
    let mut agent = build(&transport, weather_toolkit(), AgentConfig::new("assistant"));
    agent.register_hook(Arc::new(FailActing {
        stage: ActingStage::Before,
        call_id: "c1",
    }));

    let err = agent.call(vec![Message::user("weather?")]).await.unwrap_err();
    assert!(matches!(err, Error::Hook { phase: HookPhase::Acting, .. }));

    let log = agent.memory().read_all().await.unwrap();
    assert_calls_answered(&log);
    let results = tool_results(&log);
    assert_eq!(results.len(), 1);
    assert!(results[0].1);
    assert!(results[0].2.contains("aborted"));

    // The next call sends a well-formed history
    let reply = agent.call(vec![Message::user("and now?")]).await.unwrap();
    assert_eq!(reply.text(), "Let's try again.");

    let requests = transport.requests();
    let entries = requests[1]["messages"].as_array().unwrap();
    let roles: Vec<_> = entries.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "tool", "user"]);
    assert_eq!(entries[2]["tool_calls"][0]["id"], "c1");
    assert_eq!(entries[3]["tool_call_id"], "c1");
}

#[tokio::test]
async fn parallel_post_acting_error_keeps_completed_results() {
    let transport = Arc::new(ScriptedTransport::replies(vec![tool_call_response(&[
        ("a", "get_weather", json!({"city": "Paris"})),
        ("b", "get_weather", json!({"city": "Oslo"})),
    ])]));
    let mut config = AgentConfig::new("assistant");
    config.parallel_tool_calls = true;
    let mut agent = build(&transport, weather_toolkit(), config);
    agent.register_hook(Arc::new(FailActing {
        stage: ActingStage::After,
        call_id: "b",
    }));

    let err = agent.call(vec![Message::user("weather?")]).await.unwrap_err();
    assert!(matches!(err, Error::Hook { phase: HookPhase::Acting, .. }));

    let log = agent.memory().read_all().await.unwrap();
    assert_calls_answered(&log);
    let results = tool_results(&log);
    assert_eq!(results[0], ("a".to_string(), false, "Sunny, 20°C".to_string()));
    assert_eq!(results[1].0, "b");
    assert!(results[1].1);
}

#[tokio::test]
async fn transport_error_fires_error_event_and_is_returned() {
    let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Fail(
        ProviderError::RateLimited {
            retry_after_secs: 5,
        },
    )]));
    let mut agent = build(&transport, Toolkit::new(), AgentConfig::new("assistant"));
    let (hook, mut events) = StreamEventHook::channel(16);
    agent.register_hook(Arc::new(hook));

    let err = agent.call(vec![Message::user("hi")]).await.unwrap_err();
    assert!(matches!(err, Error::Provider(ProviderError::RateLimited { .. })));

    match events.try_recv().unwrap() {
        AgentStreamEvent::Error { phase, message } => {
            assert_eq!(phase, "reasoning");
            assert!(message.contains("Rate limited"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn streamed_deltas_arrive_in_order() {
    let transport = Arc::new(ScriptedTransport::new(vec![Scripted::Chunks(text_stream(&[
        "It's ", "sunny ", "today.",
    ]))]));
    let mut config = AgentConfig::new("assistant");
    config.stream = true;
    let mut agent = build(&transport, Toolkit::new(), config);
    let (hook, mut events) = StreamEventHook::channel(64);
    agent.register_hook(Arc::new(hook));

    let reply = agent.call(vec![Message::user("weather?")]).await.unwrap();
    assert_eq!(reply.text(), "It's sunny today.");
    assert_eq!(transport.requests()[0]["stream"], true);

    let mut chunks = Vec::new();
    let mut done = None;
    while let Ok(event) = events.try_recv() {
        match event {
            AgentStreamEvent::Chunk { content } => chunks.push(content),
            AgentStreamEvent::Done { content, .. } => done = Some(content),
            _ => {}
        }
    }
    assert_eq!(chunks, vec!["It's ", "sunny ", "today."]);
    assert_eq!(done.as_deref(), Some("It's sunny today."));
}

#[tokio::test]
async fn tool_progress_surfaces_as_events() {
    let mut kit = Toolkit::new();
    kit.register(FnTool::new("download", "Download", json!({}), |input: ToolInput| async move {
        if let Some(emitter) = input.emitter() {
            emitter.emit_text("50%");
            emitter.emit_text("100%");
        }
        Ok::<_, ToolError>("saved")
    }))
    .unwrap();

    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("dl_1", "download", json!({}))]),
        text_response("Downloaded."),
    ]));
    let mut agent = build(&transport, kit, AgentConfig::new("assistant"));
    let (hook, mut events) = StreamEventHook::channel(64);
    agent.register_hook(Arc::new(hook));

    agent.call(vec![Message::user("get it")]).await.unwrap();

    let mut progress = Vec::new();
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.event_type());
        if let AgentStreamEvent::ToolProgress { id, name, content } = event {
            assert_eq!(id, "dl_1");
            assert_eq!(name, "download");
            progress.push(content);
        }
    }
    assert_eq!(progress, vec!["50%", "100%"]);
    assert_eq!(
        kinds,
        vec!["tool_call", "tool_progress", "tool_progress", "tool_result", "done"]
    );
}

// ── Memory collaborators and structured output ──────────────────────────

#[tokio::test]
async fn long_term_hint_precedes_the_log() {
    let transport = Arc::new(ScriptedTransport::replies(vec![text_response("Noted.")]));
    let mut parts = AgentParts::new(scripted_model(transport.clone()));
    let ltm: Arc<dyn LongTermMemory> = Arc::new(StaticLongTermMemory::new("The user prefers Celsius."));
    parts.long_term_memory = Some(ltm);
    let mut agent = ReActAgent::new(AgentConfig::new("assistant"), parts).unwrap();

    agent.call(vec![Message::user("Weather?")]).await.unwrap();

    let body = transport.requests()[0].to_string();
    let system = body.find("You are a helpful assistant.").unwrap();
    let hint = body.find("The user prefers Celsius.").unwrap();
    let question = body.find("Weather?").unwrap();
    assert!(system < hint && hint < question);
    // Hints are not stored in the log.
    assert_eq!(agent.memory().size().await.unwrap(), 2);
}

#[tokio::test]
async fn structured_output_lands_in_metadata() {
    let transport = Arc::new(ScriptedTransport::replies(vec![
        text_response("Let me think."),
        tool_call_response(&[(
            "s1",
            "generate_response",
            json!({"response": {"city": "Paris", "temp": 20}}),
        )]),
    ]));
    let mut agent = build(&transport, Toolkit::new(), AgentConfig::new("assistant"));
    let schema = json!({
        "type": "object",
        "properties": {"city": {"type": "string"}, "temp": {"type": "number"}},
        "required": ["city", "temp"]
    });

    let reply = agent
        .call_structured(vec![Message::user("Weather as JSON")], schema)
        .await
        .unwrap();

    assert_eq!(reply.metadata[STRUCTURED_OUTPUT_KEY], json!({"city": "Paris", "temp": 20}));
    assert_eq!(transport.call_count(), 2);
    assert!(transport.requests()[1].to_string().contains("generate_response tool"));
    assert!(agent.toolkit().resolve("generate_response").is_none());
}

/// Never modifies anything; records which events it saw.
struct Observer {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Hook for Observer {
    fn name(&self) -> &str {
        "observer"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
        self.seen.lock().unwrap().push(event.kind());
        Ok(())
    }
}

#[tokio::test]
async fn lifecycle_events_fire_in_loop_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(ScriptedTransport::replies(vec![
        tool_call_response(&[("call_1", "get_weather", json!({"city": "Paris"}))]),
        text_response("Sunny."),
    ]));
    let mut agent = build(&transport, weather_toolkit(), AgentConfig::new("assistant"));
    agent.register_hook(Arc::new(Observer { seen: seen.clone() }));

    agent.call(vec![Message::user("weather?")]).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "pre_call",
            "pre_reasoning",
            "post_reasoning",
            "pre_acting",
            "post_acting",
            "pre_reasoning",
            "post_reasoning",
            "post_call",
        ]
    );
}
