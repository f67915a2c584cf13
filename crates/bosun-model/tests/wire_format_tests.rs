// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire-format tests: the serialized shape of messages and details is a
//! compatibility surface for journal files and renderers, so it is pinned
//! here explicitly.

use serde_json::{json, Value};

use bosun_model::{
    BatchCallResult, ContentBlock, Message, StopReason, SubAgentResult, ToolContent,
    ToolResultDetails, Usage,
};

fn to_value(msg: &Message) -> Value {
    serde_json::to_value(msg).unwrap()
}

#[test]
fn user_message_shape() {
    let v = to_value(&Message::user("hi"));
    assert_eq!(v["role"], "user");
    assert_eq!(v["text"], "hi");
    assert!(v.get("attachments").is_none(), "empty list is omitted");
    assert!(v["id"].is_string());
    assert!(v["timestamp"].is_string());
}

#[test]
fn assistant_message_shape() {
    let msg = Message::assistant(
        vec![
            ContentBlock::Reasoning {
                text: "thinking".into(),
            },
            ContentBlock::Text {
                text: "answer".into(),
            },
            ContentBlock::ToolCall {
                id: "c1".into(),
                name: "read".into(),
                arguments: json!({"path": "a.txt"}),
            },
        ],
        StopReason::ToolUse,
        Usage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
            ..Default::default()
        },
        "mock",
        "mock-1",
    );
    let v = to_value(&msg);
    assert_eq!(v["role"], "assistant");
    assert_eq!(v["stopReason"], "toolUse");
    assert_eq!(v["blocks"][0]["type"], "reasoning");
    assert_eq!(v["blocks"][1]["type"], "text");
    assert_eq!(v["blocks"][2]["type"], "toolCall");
    assert_eq!(v["blocks"][2]["arguments"]["path"], "a.txt");
    assert_eq!(v["usage"]["inputTokens"], 100);
    assert_eq!(v["usage"]["totalTokens"], 120);
    assert!(v.get("errorMessage").is_none());
}

#[test]
fn tool_result_message_shape() {
    let msg = Message::tool_result(
        "c1",
        "read",
        vec![ToolContent::text("data")],
        Some(ToolResultDetails::Batch(vec![BatchCallResult {
            tool: "read".into(),
            success: true,
            output: "data".into(),
            error: None,
        }])),
        false,
    );
    let v = to_value(&msg);
    assert_eq!(v["role"], "toolResult");
    assert_eq!(v["toolCallId"], "c1");
    assert_eq!(v["toolName"], "read");
    assert_eq!(v["isError"], false);
    assert_eq!(v["details"]["kind"], "batch");
    assert_eq!(v["details"]["data"][0]["success"], true);
}

#[test]
fn auxiliary_message_shapes() {
    let v = to_value(&Message::bash_execution("ls", "a b", 0));
    assert_eq!(v["role"], "bashExecution");
    assert_eq!(v["exitCode"], 0);

    let v = to_value(&Message::branch_summary("took another path"));
    assert_eq!(v["role"], "branchSummary");

    let v = to_value(&Message::compaction_summary("earlier work", 4200));
    assert_eq!(v["role"], "compactionSummary");
    assert_eq!(v["tokensBefore"], 4200);
}

#[test]
fn sub_agent_result_shape() {
    let details = ToolResultDetails::Tasks(vec![SubAgentResult {
        id: "t-1".into(),
        agent: "general".into(),
        description: Some("short label".into()),
        task: "do the thing".into(),
        exit_code: 0,
        output: "done".into(),
        truncated: false,
        duration_ms: 1234,
        tokens: 56,
        error: None,
        aborted: false,
        session_file: Some("subagent-p-t-1.jsonl".into()),
    }]);
    let v = serde_json::to_value(&details).unwrap();
    assert_eq!(v["kind"], "tasks");
    assert_eq!(v["data"][0]["exitCode"], 0);
    assert_eq!(v["data"][0]["durationMs"], 1234);
    assert_eq!(v["data"][0]["sessionFile"], "subagent-p-t-1.jsonl");
}

#[test]
fn messages_survive_a_round_trip_losslessly() {
    let original = vec![
        Message::user("q"),
        Message::assistant(
            vec![ContentBlock::Text { text: "a".into() }],
            StopReason::Stop,
            Usage::default(),
            "mock",
            "mock-1",
        ),
        Message::tool_result("c", "grep", vec![ToolContent::text("hit")], None, false),
        Message::bash_execution("make", "ok", 0),
        Message::branch_summary("b"),
        Message::compaction_summary("s", 9),
        Message::custom("note", "free text"),
    ];
    for msg in original {
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}

#[test]
fn unknown_fields_are_tolerated_on_read() {
    // A newer writer may add fields; older readers must not choke.
    let line = json!({
        "id": "abc123def456",
        "timestamp": "2026-01-01T00:00:00Z",
        "role": "user",
        "text": "hello",
        "futureField": { "nested": true }
    });
    let msg: Message = serde_json::from_value(line).unwrap();
    assert_eq!(msg.text(), "hello");
}
