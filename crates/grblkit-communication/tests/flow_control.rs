//! Character-counting flow control invariants.

use grblkit_communication::feeder::{Command, Feeder};
use grblkit_communication::transport::MockTransport;
use proptest::prelude::*;

#[test]
fn three_forty_byte_commands_against_hundred_byte_budget() {
    let mock = MockTransport::new();
    let mut feeder = Feeder::new(mock.clone());
    feeder.set_budget(100);

    // 39 characters of text, 40 bytes on the wire with the newline
    let line = "G1 X123.456 Y123.456 Z-12.345 F1500 ;xy";
    assert_eq!(line.len() + 1, 40);

    for _ in 0..3 {
        feeder.enqueue(Command::normal(line)).unwrap();
    }
    feeder.pump().unwrap();

    // Two fit (80 <= 100), the third would overflow (120 > 100)
    assert_eq!(mock.written_commands().len(), 2);
    assert_eq!(feeder.pending_bytes(), 80);

    // The first ok frees 40 bytes and the third command follows
    feeder.on_ack();
    feeder.pump().unwrap();
    assert_eq!(mock.written_commands().len(), 3);
    assert_eq!(feeder.pending_bytes(), 80);

    feeder.on_ack();
    feeder.on_ack();
    assert_eq!(feeder.pending_bytes(), 0);
}

#[test]
fn acks_are_consumed_in_send_order() {
    let mock = MockTransport::new();
    let mut feeder = Feeder::new(mock);

    let first = Command::normal("G0 X1");
    let second = Command::normal("G0 X2");
    let first_id = first.id;
    let second_id = second.id;
    feeder.enqueue(first).unwrap();
    feeder.enqueue(second).unwrap();
    feeder.pump().unwrap();

    assert_eq!(feeder.on_ack().unwrap().id, first_id);
    assert_eq!(feeder.on_ack().unwrap().id, second_id);
    assert!(feeder.on_ack().is_none());
}

proptest! {
    /// Whatever the command mix and ack interleaving, the unacknowledged
    /// byte count never exceeds the budget and never goes negative.
    #[test]
    fn pending_bytes_never_exceed_budget(
        budget in 20usize..200,
        lengths in prop::collection::vec(1usize..60, 1..40),
        ack_every in 1usize..5,
    ) {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        feeder.set_budget(budget);

        let mut enqueued = 0usize;
        for (i, len) in lengths.iter().enumerate() {
            let text = "X".repeat(*len);
            match feeder.enqueue(Command::normal(text)) {
                Ok(()) => enqueued += 1,
                // Oversized commands are rejected up front, never queued
                Err(_) => prop_assert!(len + 1 > budget),
            }
            feeder.pump().unwrap();
            prop_assert!(feeder.pending_bytes() <= budget);

            if i % ack_every == 0 {
                feeder.on_ack();
                feeder.pump().unwrap();
                prop_assert!(feeder.pending_bytes() <= budget);
            }
        }

        // Drain: ack until nothing is queued or in flight
        let mut remaining = enqueued;
        while feeder.in_flight_len() > 0 && remaining > 0 {
            feeder.on_ack();
            remaining -= 1;
            feeder.pump().unwrap();
            prop_assert!(feeder.pending_bytes() <= budget);
        }

        // An unsolicited ack at the end must not underflow the counter
        feeder.on_ack();
        prop_assert_eq!(feeder.pending_bytes(), 0);
        prop_assert_eq!(feeder.in_flight_len(), 0);
        prop_assert_eq!(feeder.queued_len(), 0);
    }
}
