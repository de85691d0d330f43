use std::{
    io::{self, Write},
    sync::Arc,
    thread,
    time::Duration,
};

use systemg_wrapper::{
    constants::MAX_LINE_BYTES,
    logs::{EventId, EventLevel, Forwarder, forward},
    test_utils::MemorySink,
};

fn levels(sink: &MemorySink) -> Vec<(String, EventLevel)> {
    sink.entries()
        .into_iter()
        .map(|entry| (entry.message, entry.level))
        .collect()
}

#[test]
fn mixed_stream_is_classified_in_order() {
    let stream = b"2024/01/01 10:00:00 INFO starting up\r\n\
2024/01/01 10:00:01 WARNING slow response\n\
2024/01/01 10:00:02 DEBUG polling\n\
2024/01/01 10:00:03 CRITICAL out of memory\n\
2024/01/01 10:00:04 NOTICE odd level\n\
panic: runtime error\n\
2024/01/01 10:00:05 TRACE tail without newline";

    let sink = MemorySink::new();
    assert_eq!(forward(&stream[..], &sink), 7);

    assert_eq!(
        levels(&sink),
        vec![
            ("2024/01/01 10:00:00 INFO starting up".to_string(), EventLevel::Info),
            ("2024/01/01 10:00:01 WARNING slow response".to_string(), EventLevel::Warning),
            ("2024/01/01 10:00:02 DEBUG polling".to_string(), EventLevel::Info),
            ("2024/01/01 10:00:03 CRITICAL out of memory".to_string(), EventLevel::Error),
            ("2024/01/01 10:00:04 NOTICE odd level".to_string(), EventLevel::Error),
            ("panic: runtime error".to_string(), EventLevel::Error),
            ("2024/01/01 10:00:05 TRACE tail without newline".to_string(), EventLevel::Info),
        ]
    );
    assert!(
        sink.entries()
            .iter()
            .all(|entry| entry.event == EventId::Default)
    );
}

#[test]
fn invalid_utf8_is_relayed_lossily() {
    let sink = MemorySink::new();
    forward(&b"2024/01/01 10:00:00 ERROR bad \xff byte\n"[..], &sink);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, EventLevel::Error);
    assert!(entries[0].message.contains('\u{FFFD}'));
}

#[test]
fn forwarder_follows_a_live_pipe_until_writer_closes() {
    let (reader, mut writer) = io::pipe().unwrap();
    let sink = Arc::new(MemorySink::new());
    let forwarder = Forwarder::spawn(reader, sink.clone());

    let writer_thread = thread::spawn(move || {
        for n in 0..3 {
            writeln!(writer, "2024/01/01 10:00:0{n} INFO tick {n}").unwrap();
            thread::sleep(Duration::from_millis(20));
        }
    });
    writer_thread.join().unwrap();

    assert!(forwarder.drain(Duration::from_secs(2)));
    let messages: Vec<_> = sink.entries().into_iter().map(|entry| entry.message).collect();
    assert_eq!(
        messages,
        vec![
            "2024/01/01 10:00:00 INFO tick 0",
            "2024/01/01 10:00:01 INFO tick 1",
            "2024/01/01 10:00:02 INFO tick 2",
        ]
    );
}

#[test]
fn drain_gives_up_while_pipe_stays_open() {
    let (reader, writer) = io::pipe().unwrap();
    let forwarder = Forwarder::spawn(reader, Arc::new(MemorySink::new()));

    assert!(!forwarder.drain(Duration::from_millis(100)));
    drop(writer);
}

#[test]
fn full_sink_does_not_stop_forwarding() {
    let sink = MemorySink::failing_after(1);
    let seen = forward(&b"first\nsecond\nthird\n"[..], &sink);

    assert_eq!(seen, 3);
    assert_eq!(sink.entries().len(), 1);
    assert_eq!(sink.entries()[0].message, "first");
}

#[test]
fn overlong_line_on_a_pipe_does_not_stall_the_writer() {
    let (reader, mut writer) = io::pipe().unwrap();
    let sink = Arc::new(MemorySink::new());
    let forwarder = Forwarder::spawn(reader, sink.clone());

    let writer_thread = thread::spawn(move || {
        let chunk = vec![b'#'; 8 * 1024];
        for _ in 0..(MAX_LINE_BYTES * 4 / chunk.len()) {
            writer.write_all(&chunk).unwrap();
        }
        writer.write_all(b"\n2024/01/01 10:00:00 INFO recovered\n").unwrap();
    });
    writer_thread.join().unwrap();

    assert!(forwarder.drain(Duration::from_secs(2)));
    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event, EventId::Forwarder);
    assert_eq!(entries[0].level, EventLevel::Error);
    assert_eq!(entries[1].event, EventId::Default);
    assert_eq!(entries[1].message, "2024/01/01 10:00:00 INFO recovered");
}
