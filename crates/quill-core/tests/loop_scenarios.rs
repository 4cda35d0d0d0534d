//! End-to-end interaction scenarios against the scripted model
//!
//! These drive a full session: scripted model stream → parser →
//! interpreter / streamed targets / mounts → outbound frames, checking the
//! loop's termination, ordering, and isolation properties.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use quill_core::llm::{ScriptedChatModel, ScriptedInput};
use quill_core::protocol::{Outbound, UiSubmitPayload};
use quill_core::{QuillError, RuntimeConfig, Session};

async fn run_session(turns: Vec<Vec<&str>>, text: &str) -> (Vec<Outbound>, Vec<ScriptedInput>) {
    let model = ScriptedChatModel::new(turns);
    let inputs = model.inputs();
    let (session, mut rx) = Session::new(
        RuntimeConfig::default(),
        Box::new(model),
        HashMap::new(),
    )
    .unwrap();
    session.interact(text).await.unwrap();
    // Let the mount pump and collectors settle before draining.
    sleep(Duration::from_millis(150)).await;
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    let inputs = inputs.lock().clone();
    (frames, inputs)
}

fn markdown_texts(frames: &[Outbound]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            Outbound::MarkdownChunk(p) => Some(p.text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn echo_terminates_after_one_turn() {
    let (frames, inputs) = run_session(vec![vec!["Hi"]], "hello").await;

    assert_eq!(markdown_texts(&frames).concat(), "Hi");
    assert_eq!(inputs, vec![ScriptedInput::Opening("hello".to_string())]);
    assert_eq!(
        frames
            .iter()
            .filter(|f| matches!(f, Outbound::AssistantMessage(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn code_fence_feeds_logs_back() {
    let (frames, inputs) = run_session(
        vec![
            vec!["```tsx agent.run\nconsole.log(1+1);\n```\n"],
            vec!["All done."],
        ],
        "compute",
    )
    .await;

    assert_eq!(inputs.len(), 2);
    match &inputs[1] {
        ScriptedInput::Continuation(t) => {
            assert_eq!(t.logs.as_deref(), Some("2"));
            assert_eq!(t.error, None);
        }
        other => panic!("expected continuation, got {other:?}"),
    }

    // The captured console output also streams out as a trace frame.
    assert!(frames.iter().any(|f| matches!(
        f,
        Outbound::Trace(p) if p.category == "console" && p.text == "2\n"
    )));
    // Both turns produced an assistant message.
    assert_eq!(
        frames
            .iter()
            .filter(|f| matches!(f, Outbound::AssistantMessage(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn bindings_persist_across_interactions() {
    let model = ScriptedChatModel::new(vec![
        vec!["```tsx agent.run\nconst x = 41;\n```\n"],
        vec!["```tsx agent.run\nconsole.log(x+1);\n```\n"],
        vec![],
    ]);
    let inputs = model.inputs();
    let (session, _rx) = Session::new(
        RuntimeConfig::default(),
        Box::new(model),
        HashMap::new(),
    )
    .unwrap();

    session.interact("bind").await.unwrap();
    session.interact("read").await.unwrap();

    let recorded = inputs.lock().clone();
    assert_eq!(recorded.len(), 3);
    match &recorded[2] {
        ScriptedInput::Continuation(t) => assert_eq!(t.logs.as_deref(), Some("42")),
        other => panic!("expected continuation, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_data_target_is_logged_and_dropped() {
    let (frames, inputs) = run_session(
        vec![vec!["```json agent.data => \"ghost\"\n{\"a\":1}\n```\n"]],
        "stream",
    )
    .await;

    let unknown_logs = frames
        .iter()
        .filter(|f| matches!(
            f,
            Outbound::LogLine(p) if p.code.as_deref() == Some("unknown_target")
        ))
        .count();
    assert_eq!(unknown_logs, 1);
    assert!(!frames.iter().any(|f| matches!(
        f,
        Outbound::StreamedDataReset(_) | Outbound::StreamedDataChunk(_)
    )));
    // The empty transcript terminated the interaction after turn 0.
    assert_eq!(inputs.len(), 1);
}

#[tokio::test]
async fn reactive_mount_emits_snapshot_then_patch() {
    let code = "```tsx agent.run\n\
                const d = Data({n: 0});\n\
                const m = mount({data: d, ui: () => null, outputSchema: {type: 'object'}});\n\
                d.set('n', 7);\n\
                ```\n";
    let (frames, _inputs) = run_session(vec![vec![code]], "mount it").await;

    let mount_at = frames
        .iter()
        .position(|f| matches!(f, Outbound::Mount(p) if p.initial_data == Some(json!({"n": 0}))))
        .expect("mount frame");
    let patch_at = frames
        .iter()
        .position(|f| match f {
            Outbound::DataPatch(p) => {
                assert_eq!(p.patches.len(), 1);
                assert_eq!(p.patches[0].value, Some(json!(7)));
                assert_eq!(p.patches[0].prev, Some(json!(0)));
                true
            }
            _ => false,
        })
        .expect("data patch frame");
    assert!(mount_at < patch_at);
}

#[tokio::test]
async fn data_fence_streams_into_registered_target() {
    let model = ScriptedChatModel::new(vec![
        vec!["```tsx agent.run\nconst t = StreamedData('t');\n```\n"],
        vec![
            "before\n",
            "```json agent.data => 't'\n{\"a\":",
            " 1}\n```\nafter",
        ],
        vec![],
    ]);
    let (session, mut rx) = Session::new(
        RuntimeConfig::default(),
        Box::new(model),
        HashMap::new(),
    )
    .unwrap();

    session.interact("register").await.unwrap();
    session.interact("stream").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }

    // Frames reflect segment order: prose, reset, chunks, prose.
    let before_at = frames
        .iter()
        .position(|f| matches!(f, Outbound::MarkdownChunk(p) if p.text.contains("before")))
        .expect("leading prose");
    let reset_at = frames
        .iter()
        .position(|f| matches!(f, Outbound::StreamedDataReset(p) if p.streamed_data_id == "t"))
        .expect("reset frame");
    let after_at = frames
        .iter()
        .position(|f| matches!(f, Outbound::MarkdownChunk(p) if p.text.contains("after")))
        .expect("trailing prose");
    assert!(before_at < reset_at && reset_at < after_at);

    let streamed: String = frames
        .iter()
        .filter_map(|f| match f {
            Outbound::StreamedDataChunk(p) => Some(p.chunk.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "{\"a\": 1}\n");
    assert_eq!(session.targets().snapshot("t"), Some(json!({"a": 1})));
}

#[tokio::test]
async fn unknown_target_does_not_affect_later_segments() {
    let turn = "```json agent.data => 'ghost'\n{}\n```mid```tsx agent.run\nconsole.log('still runs');\n```\n";
    let (frames, inputs) = run_session(vec![vec![turn], vec![]], "go").await;

    assert_eq!(
        frames
            .iter()
            .filter(|f| matches!(
                f,
                Outbound::LogLine(p) if p.code.as_deref() == Some("unknown_target")
            ))
            .count(),
        1
    );
    assert!(markdown_texts(&frames).concat().contains("mid"));
    match &inputs[1] {
        ScriptedInput::Continuation(t) => assert_eq!(t.logs.as_deref(), Some("still runs")),
        other => panic!("expected continuation, got {other:?}"),
    }
}

#[tokio::test]
async fn code_error_stops_remaining_blocks_but_turn_ends_normally() {
    let turn = "```tsx agent.run\nconsole.log('a'); boom();\n```\
                ```tsx agent.run\nconsole.log('b');\n```\n";
    let (_frames, inputs) = run_session(vec![vec![turn], vec![]], "go").await;

    assert_eq!(inputs.len(), 2);
    match &inputs[1] {
        ScriptedInput::Continuation(t) => {
            assert_eq!(t.logs.as_deref(), Some("a"));
            let error = t.error.clone().unwrap();
            assert!(error.contains("boom"), "error was {error:?}");
        }
        other => panic!("expected continuation, got {other:?}"),
    }
}

#[tokio::test]
async fn turn_cap_bounds_divergent_loops() {
    let code_turn = vec!["```tsx agent.run\nconsole.log('again');\n```\n"];
    let turns: Vec<Vec<&str>> = (0..30).map(|_| code_turn.clone()).collect();
    let (_frames, inputs) = run_session(turns, "loop forever").await;
    // Opening plus continuations, bounded by the default cap of 15 turns.
    assert_eq!(inputs.len(), 15);
}

#[tokio::test]
async fn mount_submission_resolves_awaited_result() {
    let code = "```tsx agent.run\n\
                const m = mount({ui: () => null, outputSchema: {type: 'object'}});\n\
                const v = await m.result;\n\
                console.log('got', v.answer);\n\
                ```\n";
    let model = ScriptedChatModel::new(vec![vec![code], vec![]]);
    let inputs = model.inputs();
    let (session, mut rx) = Session::new(
        RuntimeConfig::default(),
        Box::new(model),
        HashMap::new(),
    )
    .unwrap();

    let driver = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.interact("show ui").await.unwrap() })
    };

    let mount_id = loop {
        match rx.recv().await.expect("outbound closed") {
            Outbound::Mount(m) => break m.mount_id,
            _ => {}
        }
    };

    // A concurrent start while the interaction awaits the mount result is
    // rejected.
    let err = session.interact("second").await.unwrap_err();
    assert!(matches!(err, QuillError::InteractionActive));

    session
        .handle_ui_submit(UiSubmitPayload {
            mount_id: mount_id.clone(),
            value: json!({"answer": 7}),
        })
        .await;
    driver.await.unwrap();

    let recorded = inputs.lock().clone();
    match &recorded[1] {
        ScriptedInput::Continuation(t) => assert_eq!(t.logs.as_deref(), Some("got 7")),
        other => panic!("expected continuation, got {other:?}"),
    }

    // A second submission for the same mount is stale.
    session
        .handle_ui_submit(UiSubmitPayload {
            mount_id,
            value: json!({"answer": 8}),
        })
        .await;
    sleep(Duration::from_millis(50)).await;
    let mut saw_stale_log = false;
    while let Ok(frame) = rx.try_recv() {
        if matches!(
            &frame,
            Outbound::LogLine(p) if p.code.as_deref() == Some("unknown_ui_submit")
        ) {
            saw_stale_log = true;
        }
    }
    assert!(saw_stale_log);
}

#[tokio::test]
async fn stop_ends_interaction_promptly() {
    let model = ScriptedChatModel::new(vec![vec![
        "```tsx agent.run\nawait new Promise(() => {});\n```\n",
    ]]);
    let (session, _rx) = Session::new(
        RuntimeConfig::default(),
        Box::new(model),
        HashMap::new(),
    )
    .unwrap();

    let driver = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.interact("hang").await })
    };
    sleep(Duration::from_millis(100)).await;
    session.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("interaction did not stop")
        .unwrap();
    assert!(outcome.is_ok());
}
