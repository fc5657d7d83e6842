//! Unit tests for IPC line framing and wire message shapes.
//!
//! Covers:
//! - codec: complete lines, batched lines, partial delivery, oversize lines
//! - inbound: `Ack`, `TaskEvent`, `Disconnect`, unknown and blank lines
//! - outbound: `StartNewTask`, `CancelTask`, `CloseTask` envelopes

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

use evals_runner::ipc::codec::{IpcCodec, MAX_LINE_BYTES};
use evals_runner::ipc::protocol::{
    encode_command, parse_line, Ack, CommandEnvelope, IpcMessage, TaskCommand,
};
use evals_runner::models::event::EventName;
use evals_runner::AppError;

// ── Codec ───────────────────────────────────────────────────────────────────

#[test]
fn codec_decodes_batched_lines_in_order() {
    let mut codec = IpcCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"Disconnect\"}\n{\"type\":\"Ack\"}\n");

    let first = codec.decode(&mut buf).expect("first decode");
    let second = codec.decode(&mut buf).expect("second decode");

    assert_eq!(first.as_deref(), Some("{\"type\":\"Disconnect\"}"));
    assert_eq!(second.as_deref(), Some("{\"type\":\"Ack\"}"));
    assert_eq!(codec.decode(&mut buf).expect("third decode"), None);
}

#[test]
fn codec_buffers_partial_delivery() {
    let mut codec = IpcCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"Disc");

    assert_eq!(codec.decode(&mut buf).expect("partial decode"), None);

    buf.extend_from_slice(b"onnect\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("complete decode").as_deref(),
        Some("{\"type\":\"Disconnect\"}")
    );
}

#[test]
fn codec_skips_oversize_line_and_keeps_decoding() {
    let mut codec = IpcCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 10].as_slice());
    buf.extend_from_slice(b"\n{\"type\":\"Disconnect\"}\n");

    let line = codec.decode(&mut buf).expect("oversize line is skipped");

    assert_eq!(line.as_deref(), Some("{\"type\":\"Disconnect\"}"));
    assert!(buf.is_empty());
}

#[test]
fn codec_discards_oversize_line_split_across_reads() {
    let mut codec = IpcCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());

    assert_eq!(codec.decode(&mut buf).expect("first chunk"), None);

    buf.extend_from_slice(b"tail of the long line\n{\"type\":\"Ack\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("second chunk").as_deref(),
        Some("{\"type\":\"Ack\"}")
    );
}

// ── Inbound messages ────────────────────────────────────────────────────────

#[test]
fn parses_ack() {
    let msg = parse_line(r#"{"type":"Ack","data":{"clientId":"c-1","pid":42,"ppid":1}}"#)
        .expect("parse")
        .expect("message");

    assert_eq!(
        msg,
        IpcMessage::Ack {
            data: Ack {
                client_id: "c-1".into(),
                pid: 42,
                ppid: 1,
            }
        }
    );
}

#[test]
fn parses_task_event() {
    let line = r#"{"type":"TaskEvent","data":{"eventName":"taskStarted","payload":["remote-1"]}}"#;

    let Some(IpcMessage::TaskEvent { data }) = parse_line(line).expect("parse") else {
        panic!("expected a task event");
    };

    assert_eq!(data.event_name, EventName::TaskStarted);
    assert_eq!(data.str_arg(0), Some("remote-1"));
}

#[test]
fn unknown_event_names_are_preserved() {
    let line = r#"{"type":"TaskEvent","data":{"eventName":"taskResumable","payload":[]}}"#;

    let Some(IpcMessage::TaskEvent { data }) = parse_line(line).expect("parse") else {
        panic!("expected a task event");
    };

    assert_eq!(data.event_name, EventName::Other("taskResumable".into()));
    assert_eq!(data.event_name.as_str(), "taskResumable");
}

#[test]
fn parses_disconnect() {
    assert_eq!(
        parse_line(r#"{"type":"Disconnect"}"#).expect("parse"),
        Some(IpcMessage::Disconnect)
    );
}

#[test]
fn blank_line_is_skipped() {
    assert_eq!(parse_line("   ").expect("parse"), None);
}

#[test]
fn unknown_message_type_is_an_ipc_error() {
    let err = parse_line(r#"{"type":"Shrug"}"#).expect_err("must fail");
    assert!(matches!(err, AppError::Ipc(ref msg) if msg.starts_with("malformed message")));
}

// ── Outbound commands ───────────────────────────────────────────────────────

#[test]
fn start_new_task_envelope_shape() {
    let mut configuration = serde_json::Map::new();
    configuration.insert("apiProvider".into(), json!("openrouter"));

    let line = encode_command(&CommandEnvelope {
        client_id: "c-1".into(),
        data: TaskCommand::StartNewTask {
            configuration,
            text: "Solve the exercise".into(),
            new_tab: true,
        },
    })
    .expect("encode");

    let value: serde_json::Value = serde_json::from_str(&line).expect("json");
    assert_eq!(
        value,
        json!({
            "type": "TaskCommand",
            "clientId": "c-1",
            "data": {
                "commandName": "StartNewTask",
                "data": {
                    "configuration": {"apiProvider": "openrouter"},
                    "text": "Solve the exercise",
                    "newTab": true
                }
            }
        })
    );
}

#[test]
fn cancel_and_close_carry_remote_task_id() {
    for (command, name) in [
        (TaskCommand::CancelTask("remote-9".into()), "CancelTask"),
        (TaskCommand::CloseTask("remote-9".into()), "CloseTask"),
    ] {
        assert_eq!(command.name(), name);
        let line = encode_command(&CommandEnvelope {
            client_id: "c-2".into(),
            data: command,
        })
        .expect("encode");

        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["type"], "TaskCommand");
        assert_eq!(value["data"]["commandName"], name);
        assert_eq!(value["data"]["data"], "remote-9");
        assert!(!line.contains('\n'));
    }
}
