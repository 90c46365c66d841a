//! FIFO delivery and the single in-flight publish.

use super::{Harness, BETWEEN_PUBLISH};

#[test]
fn events_are_published_in_enqueue_order() {
    let h = Harness::online();
    for i in 0..5 {
        h.enqueue(&format!("evt-{i}"), &i.to_string());
    }

    for _ in 0..5 {
        h.queue.tick();
        assert!(h.publisher.complete_next(true));
        h.queue.tick();
        h.clock.advance(BETWEEN_PUBLISH);
    }

    assert_eq!(
        h.published_names(),
        vec!["evt-0", "evt-1", "evt-2", "evt-3", "evt-4"]
    );
    assert_eq!(h.queue.num_events(), 0);
    assert_eq!(h.publisher.max_outstanding(), 1);
}

#[test]
fn at_most_one_publish_outstanding() {
    let h = Harness::online();
    h.enqueue("a", "");
    h.enqueue("b", "");
    h.enqueue("c", "");

    // Completion never arrives; ticking must not start another publish
    for _ in 0..50 {
        h.advance_and_tick(60_000);
    }

    assert_eq!(h.publisher.requests().len(), 1);
    assert_eq!(h.publisher.outstanding(), 1);
    assert!(h.queue.metrics().in_flight);
    assert_eq!(h.queue.num_events(), 3);
}

#[test]
fn hold_between_publishes_is_respected() {
    let h = Harness::online();
    h.enqueue("first", "");
    h.enqueue("second", "");

    h.queue.tick();
    h.publisher.complete_next(true);
    h.queue.tick();

    h.advance_and_tick(BETWEEN_PUBLISH - 1);
    assert_eq!(h.published_names(), vec!["first"]);

    h.advance_and_tick(1);
    assert_eq!(h.published_names(), vec!["first", "second"]);
}

#[test]
fn failed_head_is_never_skipped() {
    let h = Harness::online();
    h.enqueue("head", "");
    h.enqueue("tail", "");

    for _ in 0..3 {
        h.queue.tick();
        h.publisher.complete_next(false);
        h.queue.tick();
        h.clock.advance(super::AFTER_FAILURE);
    }

    assert_eq!(h.published_names(), vec!["head", "head", "head"]);
    assert_eq!(h.queue.num_events(), 2);
}
