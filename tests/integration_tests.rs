mod common;

use autoloop::agent::agent_loop::{LoopExit, StopReason};
use autoloop::agent::logging::LOG_DIR_NAME;
use autoloop::config::PartialConfig;
use autoloop::console::ScriptedConsole;
use autoloop::error::ProviderError;
use autoloop::memory::MemoryStore;
use common::{continuous, results, Harness};
use std::fs;

// ============================================================
// Plans run to completion
// ============================================================

#[tokio::test]
async fn two_command_plan_writes_then_finishes() {
    let h = Harness::new([
        r#"{
        "thoughts": {"text": "write the greeting", "speak": "On it"},
        "commands": [
            {"name": "write_to_file", "args": {"file": "hello.txt", "text": "hi"}},
            {"name": "task_complete", "args": {"reason": "done"}}
        ]
    }"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "second plan"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.exit, LoopExit::Done);
    assert_eq!(outcome.reason, StopReason::FatalCommand);
    assert_eq!(outcome.output, "done");
    assert_eq!(outcome.turns, 1);
    assert_eq!(h.model.calls().len(), 1);
    assert_eq!(fs::read_to_string(h.workspace().join("hello.txt")).unwrap(), "hi");
    assert_eq!(
        results(&agent)[0],
        "Command write_to_file returned: File written to successfully."
    );
    // One memory write per executed command.
    assert_eq!(h.memory.len(), 2);
}

#[tokio::test]
async fn synonyms_and_prose_wrapped_json_are_accepted() {
    let h = Harness::new([
        "Sure! Here is my plan:\n```json\n{\"commands\": [{\"name\": \"write_file\", \"args\": \
         {\"filename\": \"a.txt\", \"text\": \"x\"},}, {\"name\": \"task_complete\", \"args\": {\"reason\": \"ok\"}}]}\n```",
    ]);
    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.output, "ok");
    assert!(h.workspace().join("a.txt").exists());
}

// ============================================================
// Authorization
// ============================================================

#[tokio::test]
async fn approve_many_skips_the_next_prompts() {
    let h = Harness::new([r#"{"commands": [
        {"name": "do_nothing"},
        {"name": "do_nothing"},
        {"name": "do_nothing"},
        {"name": "task_complete", "args": {"reason": "finished"}}
    ]}"#]);
    let mut agent = h.agent(PartialConfig::default(), false).await;
    let mut console = ScriptedConsole::new(["y -3"]);
    let outcome = agent.run(&mut console).await.unwrap();

    assert_eq!(outcome.output, "finished");
    assert_eq!(console.prompts, 1);
}

#[tokio::test]
async fn exit_key_aborts() {
    let h = Harness::new([r#"{"commands": [{"name": "do_nothing"}]}"#]);
    let mut agent = h.agent(PartialConfig::default(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::new(["n"])).await.unwrap();

    assert_eq!(outcome.exit, LoopExit::Aborted);
    assert_eq!(outcome.reason, StopReason::ExitKey);
    assert!(results(&agent).is_empty());
}

#[tokio::test]
async fn closed_console_aborts() {
    let h = Harness::new([r#"{"commands": [{"name": "do_nothing"}]}"#]);
    let mut agent = h.agent(PartialConfig::default(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.exit, LoopExit::Aborted);
    assert_eq!(outcome.reason, StopReason::ConsoleClosed);
}

#[tokio::test]
async fn console_feedback_replaces_the_command() {
    let h = Harness::new([
        r#"{"commands": [{"name": "write_to_file", "args": {"filename": "x.txt", "text": "x"}}]}"#,
        r#"{"commands": [{"name": "human_feedback"}, {"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let mut agent = h.agent(PartialConfig::default(), false).await;
    let mut console = ScriptedConsole::new(["write a poem first", "y", "y"]);
    let outcome = agent.run(&mut console).await.unwrap();

    assert_eq!(outcome.output, "ok");
    assert!(!h.workspace().join("x.txt").exists());
    let results = results(&agent);
    assert_eq!(results[0], "Human feedback: write a poem first");
    assert_eq!(results[1], "Command human_feedback returned: Human feedback: write a poem first");
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn malformed_plan_gets_a_corrective_message() {
    let h = Harness::new([
        r#"{"thoughts": {"text": "hmm"}}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "recovered"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.output, "recovered");
    assert_eq!(outcome.turns, 2);
    let second = &h.model.calls()[1].messages;
    assert!(second
        .iter()
        .any(|m| m.content.starts_with("Your last reply could not be used") && m.content.contains("commands")));
}

#[tokio::test]
async fn prose_reply_is_fixed_by_the_fast_model() {
    let h = Harness::new([
        "I will now finish the task.",
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "fixed"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.output, "fixed");
    assert_eq!(outcome.turns, 1);
    let calls = h.model.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].messages.iter().any(|m| m.content.contains("I will now finish the task.")));
}

#[tokio::test]
async fn provider_failures_past_the_ceiling_abort() {
    let h = Harness::new(Vec::<String>::new());
    for _ in 0..4 {
        h.model.push_error(ProviderError::Request("connection refused".to_string()));
    }
    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.exit, LoopExit::Aborted);
    assert_eq!(outcome.reason, StopReason::ProviderFailures);
    assert!(outcome.output.contains("connection refused"));
    assert_eq!(h.model.calls().len(), 4);
}

#[tokio::test]
async fn a_good_reply_resets_the_failure_count() {
    let h = Harness::new(Vec::<String>::new());
    for _ in 0..3 {
        h.model.push_error(ProviderError::Timeout(5));
    }
    h.model.push_reply(r#"{"commands": [{"name": "do_nothing"}]}"#);
    for _ in 0..3 {
        h.model.push_error(ProviderError::EmptyReply);
    }
    h.model
        .push_reply(r#"{"commands": [{"name": "task_complete", "args": {"reason": "survived"}}]}"#);

    let mut agent = h.agent(continuous(), false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.output, "survived");
}

#[tokio::test]
async fn max_turns_ends_in_done() {
    let h = Harness::new([
        r#"{"commands": [{"name": "do_nothing"}]}"#,
        r#"{"commands": [{"name": "do_nothing"}]}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "too late"}}]}"#,
    ]);
    let partial = PartialConfig {
        max_turns: Some(2),
        ..continuous()
    };
    let mut agent = h.agent(partial, false).await;
    let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert_eq!(outcome.exit, LoopExit::Done);
    assert_eq!(outcome.reason, StopReason::MaxTurns);
    assert_eq!(outcome.turns, 2);
    assert_eq!(h.model.remaining(), 1);
}

#[tokio::test]
async fn oversized_output_is_downgraded_and_refunds_credit() {
    let h = Harness::new([
        r#"{"commands": [{"name": "do_nothing"}, {"name": "read_file", "args": {"filename": "big.txt"}}]}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let partial = PartialConfig {
        fast_token_limit: Some(1000),
        ..PartialConfig::default()
    };
    let mut agent = h.agent(partial, false).await;
    fs::write(h.workspace().join("big.txt"), "word ".repeat(2000)).unwrap();

    // `y -1` approves do_nothing and grants one credit, which read_file
    // spends. The downgrade hands it back, so task_complete runs unprompted.
    let mut console = ScriptedConsole::new(["y -1"]);
    let outcome = agent.run(&mut console).await.unwrap();

    assert_eq!(outcome.output, "ok");
    assert_eq!(console.prompts, 1);
    assert!(results(&agent)[1].contains("returned too much output"));
}

// ============================================================
// Session log and memory
// ============================================================

#[tokio::test]
async fn session_log_records_the_run() {
    let h = Harness::new([
        r#"{"commands": [{"name": "do_nothing"}, {"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), true).await;
    agent.run(&mut ScriptedConsole::default()).await.unwrap();

    let log_dir = h.tmp.path().join(LOG_DIR_NAME);
    let log_file = fs::read_dir(&log_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .unwrap();
    let events: Vec<String> = fs::read_to_string(log_file)
        .unwrap()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["event_type"].as_str().unwrap().to_string()
        })
        .collect();

    assert_eq!(events.first().map(String::as_str), Some("session_start"));
    assert_eq!(events.last().map(String::as_str), Some("session_end"));
    assert_eq!(events.iter().filter(|e| *e == "command_call").count(), 2);
    assert!(events.contains(&"model_reply".to_string()));
}

#[tokio::test]
async fn memory_is_recalled_into_later_prompts() {
    let h = Harness::new([
        r#"{"commands": [{"name": "memory_save", "args": {"string": "The launch code is pineapple"}}]}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), false).await;
    agent.run(&mut ScriptedConsole::default()).await.unwrap();

    assert!(h.memory.get("launch code").contains("pineapple"));
    let second = &h.model.calls()[1].messages;
    assert!(second
        .iter()
        .any(|m| m.content.starts_with("This reminds you of these events from your past:")));
}

// ============================================================
// Shell execution stays gated
// ============================================================

#[tokio::test]
async fn shell_commands_are_off_by_default() {
    let h = Harness::new([
        r#"{"commands": [{"name": "execute_shell", "args": {"command_line": "echo hi"}}]}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let mut agent = h.agent(continuous(), false).await;
    agent.run(&mut ScriptedConsole::default()).await.unwrap();

    let first = &results(&agent)[0];
    assert!(first.starts_with("Command execute_shell returned:"));
    assert!(!first.contains("\"stdout\""));
}

#[tokio::test]
async fn blocked_shell_lines_never_run() {
    let h = Harness::new([
        r#"{"commands": [{"name": "execute_shell", "args": {"command_line": "sudo rm -rf /tmp/x"}}]}"#,
        r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
    ]);
    let partial = PartialConfig {
        execute_local_commands: Some(true),
        ..continuous()
    };
    let mut agent = h.agent(partial, false).await;
    agent.run(&mut ScriptedConsole::default()).await.unwrap();

    let first = &results(&agent)[0];
    assert!(first.contains("126"));
    let security_log = fs::read_to_string(h.workspace().join("security.log")).unwrap();
    assert!(security_log.contains("sudo"));
}
