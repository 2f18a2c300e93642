//! Wire-level decoding against byte-exact payloads built by the shared
//! test encoders: each supported protocol's serialize → normalize path
//! must reproduce the logical event.

use chrono::Utc;
use logwarden_protocols::beats::BeatsDecoder;
use logwarden_protocols::gelf::{ChunkAssembler, ChunkOutcome};
use logwarden_protocols::normalize_frame;
use logwarden_testing::{
    beats_compressed, beats_json, beats_window, fluent_entry, gelf_chunks, gelf_payload,
    syslog_rfc3164, syslog_rfc5424,
};
use logwarden_types::{LogLevel, Protocol, RawFrame};

fn net_frame(proto: Protocol, payload: Vec<u8>) -> RawFrame {
    RawFrame::new(proto, payload, Some("198.51.100.20:40000".parse().unwrap()))
}

#[test]
fn syslog_rfc3164_end_to_end() {
    // PRI 34: facility 4 (auth), severity 2 (critical)
    let frame = net_frame(
        Protocol::SyslogUdp,
        syslog_rfc3164(34, "mymachine", "su", "'su root' failed for lonvick on /dev/pts/8"),
    );
    let events = normalize_frame(&frame).unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];

    assert_eq!(event.level, LogLevel::Critical);
    assert_eq!(event.source, "mymachine");
    assert_eq!(event.category, "auth");
    assert!(event.message.contains("'su root' failed"));
    assert!(event.peer_ip.is_some());
}

#[test]
fn syslog_rfc5424_end_to_end() {
    let frame = net_frame(
        Protocol::SyslogTcp,
        syslog_rfc5424(165, "web.example.com", "nginx", "upstream timed out"),
    );
    let event = normalize_frame(&frame).unwrap().remove(0);
    assert_eq!(event.level, LogLevel::Info); // severity 5
    assert_eq!(event.category, "local4");
    assert_eq!(event.message, "upstream timed out");
    assert_eq!(event.metadata.unwrap()["app_name"], "nginx");
}

#[test]
fn gelf_three_chunk_reassembly_end_to_end() {
    let payload = gelf_payload("h", "hi", 6);
    let chunks = gelf_chunks(42, &payload, 3);
    assert_eq!(chunks.len(), 3);

    let mut assembler = ChunkAssembler::new();
    let now = Utc::now();
    let mut complete = None;
    for chunk in &chunks {
        if let ChunkOutcome::Complete(bytes) = assembler.push(chunk, now).unwrap() {
            complete = Some(bytes);
        }
    }

    let frame = net_frame(Protocol::GelfUdp, complete.expect("reassembled"));
    let event = normalize_frame(&frame).unwrap().remove(0);
    assert_eq!(event.level, LogLevel::Info);
    assert_eq!(event.source, "h");
    assert_eq!(event.message, "hi");
    assert_eq!(event.metadata.unwrap()["_k"], "v");
}

#[test]
fn beats_window_and_compressed_frames_end_to_end() {
    let record_a = serde_json::json!({"message": "alpha", "log": {"level": "error"}});
    let record_b = serde_json::json!({"message": "beta"});

    let mut inner = beats_json(1, &record_a);
    inner.extend(beats_json(2, &record_b));

    let mut wire = beats_window(2);
    wire.extend(beats_compressed(&inner));

    let mut decoder = BeatsDecoder::new();
    let progress = decoder.push(&wire).unwrap();
    assert_eq!(progress.records.len(), 2);
    assert_eq!(progress.ack_due, Some(2), "ACK owed after the window");

    let frame = net_frame(Protocol::Beats, progress.records[0].1.clone());
    let event = normalize_frame(&frame).unwrap().remove(0);
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.message, "alpha");
}

#[test]
fn fluent_entry_end_to_end() {
    let record = serde_json::json!({"message": "queued job done", "source": "worker-2"});
    let frame = net_frame(Protocol::Fluent, fluent_entry("jobs.finished", 1_700_000_000, &record));
    let event = normalize_frame(&frame).unwrap().remove(0);
    assert_eq!(event.category, "jobs.finished");
    assert_eq!(event.source, "worker-2");
    assert_eq!(event.message, "queued job done");
}

#[test]
fn every_network_protocol_sets_peer_ip() {
    let frames = vec![
        net_frame(Protocol::SyslogUdp, syslog_rfc3164(13, "h", "app", "m")),
        net_frame(Protocol::GelfTcp, gelf_payload("h", "m", 6)),
        net_frame(
            Protocol::Http,
            serde_json::to_vec(&serde_json::json!({"message": "m"})).unwrap(),
        ),
        net_frame(Protocol::Fluent, fluent_entry("t", 1, &serde_json::json!({"message": "m"}))),
    ];
    for frame in frames {
        for event in normalize_frame(&frame).unwrap() {
            assert!(event.peer_ip.is_some(), "{:?} lost the peer", frame.proto);
        }
    }
}
