//! Frame decoding against arbitrary and server-shaped input.

use keenotes_sync_protocol::{decode_server_frame, NotePayload, ServerMessage};
use proptest::prelude::*;

#[test]
fn realtime_update_decodes_nested_note() {
    let frame = r#"{"type":"realtime_update","note":{"id":111,"content":"AgQ=","created_at":"2024-02-02 08:00:00","channel":"web","encrypted":true}}"#;
    let expected = NotePayload::new(111, "AgQ=", "2024-02-02 08:00:00")
        .with_channel("web")
        .with_encrypted(true);
    assert_eq!(
        decode_server_frame(frame).unwrap(),
        ServerMessage::RealtimeUpdate { note: expected }
    );
}

#[test]
fn server_frames_survive_reencoding() {
    let frames = [
        ServerMessage::Ping,
        ServerMessage::Error {
            message: "bad token".into(),
        },
        ServerMessage::SyncBatch {
            batch_id: 2,
            total_batches: 2,
            notes: vec![NotePayload::new(106, "n", "t")],
        },
    ];
    for frame in frames {
        let text = frame.to_json().unwrap();
        assert_eq!(decode_server_frame(&text).unwrap(), frame);
    }
}

proptest! {
    #[test]
    fn decoding_never_panics(text in ".{0,200}") {
        let _ = decode_server_frame(&text);
    }

    #[test]
    fn any_unlisted_type_is_unknown(tag in "[a-z_]{1,16}") {
        prop_assume!(!matches!(
            tag.as_str(),
            "sync_batch" | "sync_complete" | "realtime_update" | "ping" | "pong" | "error" | "new_note_ack"
        ));
        let frame = format!(r#"{{"type":"{tag}"}}"#);
        prop_assert_eq!(decode_server_frame(&frame).unwrap(), ServerMessage::Unknown);
    }
}
