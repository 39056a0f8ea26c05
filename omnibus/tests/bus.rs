mod common;

use common::{CapturingHandler, CountingSubscriber, Gate, Recorder, wait_until};
use omnibus::pipe::AsynchronousConfiguration;
use omnibus::{
    AcceptingBehavior, BoxError, EventType, FilterOutcome, FilterStage, MessageBus, PipeError,
    ProcessingContext,
};
use std::collections::HashSet;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

const LONG: Duration = Duration::from_secs(5);

fn orders() -> EventType {
    EventType::of("order.placed")
}

fn shipments() -> EventType {
    EventType::of("shipment.sent")
}

#[test]
fn subscribers_receive_messages_of_their_event_type() {
    let bus = MessageBus::synchronous();
    let order_log = Recorder::new();
    let shipment_log = Recorder::new();
    bus.subscribe(orders(), {
        let order_log = order_log.clone();
        move |message: &String| {
            order_log.push(message.clone());
            Ok(AcceptingBehavior::Remain)
        }
    });
    bus.subscribe(shipments(), {
        let shipment_log = shipment_log.clone();
        move |message: &String| {
            shipment_log.push(message.clone());
            Ok(AcceptingBehavior::Remain)
        }
    });

    bus.send(orders(), String::from("order-1")).unwrap();
    bus.send(shipments(), String::from("shipment-1")).unwrap();
    bus.send(orders(), String::from("order-2")).unwrap();

    assert_eq!(order_log.items(), vec![String::from("order-1"), String::from("order-2")]);
    assert_eq!(shipment_log.items(), vec![String::from("shipment-1")]);

    let statistics = bus.statistics();
    assert_eq!(statistics.accepted, 3);
    assert_eq!(statistics.successful, 3);
    assert_eq!(statistics.queued, 0);
}

#[test]
fn every_send_yields_a_unique_message_id() {
    let bus = MessageBus::synchronous();
    let mut seen = HashSet::new();
    for n in 0..100 {
        let id = bus.send(orders(), format!("order-{n}")).unwrap();
        assert!(seen.insert(id));
    }
}

#[test]
fn sending_without_subscribers_is_not_an_error() {
    let bus = MessageBus::<String>::synchronous();
    bus.send(orders(), String::from("unheard")).unwrap();
    assert_eq!(bus.statistics().accepted, 1);
}

#[test]
fn unsubscribe_stops_delivery() {
    let bus = MessageBus::synchronous();
    let count = Arc::new(AtomicUsize::new(0));
    let id = bus.subscribe(orders(), CountingSubscriber::remaining(count.clone()));

    bus.send(orders(), String::from("first")).unwrap();
    assert!(bus.unsubscribe(id));
    bus.send(orders(), String::from("second")).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    // A handle detaches at most once.
    assert!(!bus.unsubscribe(id));
}

#[test]
fn raw_subscribers_see_the_whole_context() {
    let bus = MessageBus::synchronous();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe_raw(orders(), {
        let seen = seen.clone();
        move |context: &ProcessingContext<String>| {
            seen.lock().unwrap().push((
                context.event_type().cloned(),
                context.message_id(),
                context.payload().clone(),
            ));
            Ok(AcceptingBehavior::Remain)
        }
    });

    let id = bus.send(orders(), String::from("order-9")).unwrap();
    let recorded = seen.lock().unwrap().clone();
    assert_eq!(recorded, vec![(Some(orders()), id, String::from("order-9"))]);
}

#[test]
fn bus_wide_filters_run_before_routing() {
    let bus = MessageBus::synchronous();
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(orders(), CountingSubscriber::remaining(count.clone()));

    let embargo: Arc<omnibus::ChannelFilter<String>> = Arc::new(
        |context: &mut ProcessingContext<String>| -> Result<
            FilterOutcome<ProcessingContext<String>>,
            BoxError,
        > {
            if context.payload().starts_with("embargoed") {
                Ok(FilterOutcome::Block)
            } else {
                Ok(FilterOutcome::Pass)
            }
        },
    );
    bus.add_filter(FilterStage::Pre, embargo.clone());
    assert_eq!(bus.filters(FilterStage::Pre).len(), 1);

    bus.send(orders(), String::from("embargoed order")).unwrap();
    bus.send(orders(), String::from("regular order")).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.statistics().blocked, 1);

    assert!(bus.remove_filter(FilterStage::Pre, &embargo));
    bus.send(orders(), String::from("embargoed order")).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn asynchronous_bus_reports_queued_and_rejects_at_capacity() {
    let gate = Gate::new();
    let bus = MessageBus::builder()
        .asynchronous(AsynchronousConfiguration::with_pool_size(1).queue_bound(2))
        .build();
    bus.subscribe(orders(), {
        let gate = gate.clone();
        move |_message: &String| {
            gate.pass();
            Ok(AcceptingBehavior::Remain)
        }
    });

    // One in-flight at the gate, two in the queue.
    bus.send(orders(), String::from("in-flight")).unwrap();
    assert!(wait_until(LONG, || gate.waiting() == 1));
    bus.send(orders(), String::from("queued-1")).unwrap();
    bus.send(orders(), String::from("queued-2")).unwrap();
    assert_eq!(bus.statistics().queued, 2);

    let error = bus.send(orders(), String::from("rejected")).unwrap_err();
    assert!(matches!(error, PipeError::QueueFull));
    assert_eq!(bus.statistics().accepted, 3);

    gate.open();
    bus.close(true);
    assert!(bus.await_termination(LONG));
    assert_eq!(bus.statistics().successful, 3);
}

#[test]
fn close_discarding_never_delivers_the_backlog() {
    let gate = Gate::new();
    let delivered = Arc::new(AtomicUsize::new(0));
    let bus = MessageBus::builder()
        .asynchronous(AsynchronousConfiguration::with_pool_size(1).queue_bound(8))
        .build();
    bus.subscribe(orders(), {
        let gate = gate.clone();
        let delivered = delivered.clone();
        move |_message: &String| {
            gate.pass();
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(AcceptingBehavior::Remain)
        }
    });

    bus.send(orders(), String::from("in-flight")).unwrap();
    assert!(wait_until(LONG, || gate.waiting() == 1));
    bus.send(orders(), String::from("backlog-1")).unwrap();
    bus.send(orders(), String::from("backlog-2")).unwrap();

    bus.close(false);
    assert!(bus.is_shutdown());
    gate.open();
    assert!(bus.await_termination(LONG));

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert!(matches!(
        bus.send(orders(), String::from("late")).unwrap_err(),
        PipeError::Closed
    ));
}

#[test]
fn exception_listeners_observe_matching_errors_once() {
    let handler = CapturingHandler::aborting();
    let bus = MessageBus::builder().exception_handler(handler.clone()).build();
    bus.subscribe(orders(), |_message: &String| -> Result<AcceptingBehavior, BoxError> {
        Err("order handling failed".into())
    });
    bus.subscribe(shipments(), |_message: &String| Ok(AcceptingBehavior::Remain));

    let order_errors = Arc::new(Mutex::new(Vec::new()));
    let listener_id = bus.register_exception_listener(orders(), {
        let order_errors = order_errors.clone();
        move |context: &ProcessingContext<String>, error: &BoxError| {
            order_errors
                .lock()
                .unwrap()
                .push((context.payload().clone(), error.to_string()));
        }
    });
    let shipment_errors = Arc::new(Mutex::new(Vec::new()));
    bus.register_exception_listener(shipments(), {
        let shipment_errors = shipment_errors.clone();
        move |_context: &ProcessingContext<String>, error: &BoxError| {
            shipment_errors.lock().unwrap().push(error.to_string());
        }
    });

    bus.send(orders(), String::from("order-1")).unwrap();
    bus.send(shipments(), String::from("shipment-1")).unwrap();

    assert_eq!(
        order_errors.lock().unwrap().clone(),
        vec![(String::from("order-1"), String::from("order handling failed"))]
    );
    assert!(shipment_errors.lock().unwrap().is_empty());
    // The configured policy still saw the error as well.
    assert_eq!(handler.errors(), vec![String::from("order handling failed")]);
    assert_eq!(bus.statistics().failed, 1);

    assert!(bus.unregister_exception_listener(listener_id));
    bus.send(orders(), String::from("order-2")).unwrap();
    assert_eq!(order_errors.lock().unwrap().len(), 1);
}

#[test]
fn status_information_exposes_channels_and_subscribers() {
    let bus = MessageBus::synchronous();
    let id = bus.subscribe(orders(), |_message: &String| Ok(AcceptingBehavior::Remain));
    bus.send(orders(), String::from("order-1")).unwrap();

    let status = bus.status_information();
    assert_eq!(status.subscribers_of(&orders()), &[id]);
    assert!(status.subscribers_of(&shipments()).is_empty());

    let channel = status.channel_for(&orders()).expect("channel exists");
    assert_eq!(channel.statistics().successful, 1);
    assert!(status.channel_for(&shipments()).is_none());
}

#[test]
fn concurrent_senders_all_get_delivered() {
    let bus = Arc::new(
        MessageBus::builder()
            .asynchronous(AsynchronousConfiguration::with_pool_size(4))
            .build(),
    );
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(orders(), CountingSubscriber::remaining(count.clone()));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for n in 0..50 {
                    bus.send(orders(), format!("order-{t}-{n}")).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    bus.close(true);
    assert!(bus.await_termination(LONG));
    assert_eq!(count.load(Ordering::SeqCst), 400);
    assert_eq!(bus.statistics().accepted, 400);
    assert_eq!(bus.statistics().successful, 400);
}

#[test]
fn subscribing_while_messages_flow_is_safe() {
    let bus = Arc::new(
        MessageBus::builder()
            .asynchronous(AsynchronousConfiguration::with_pool_size(2))
            .build(),
    );
    let count = Arc::new(AtomicUsize::new(0));

    let sender = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for n in 0..200 {
                bus.send(orders(), format!("order-{n}")).unwrap();
            }
        })
    };
    for _ in 0..20 {
        let id = bus.subscribe(orders(), CountingSubscriber::remaining(count.clone()));
        bus.unsubscribe(id);
    }
    sender.join().unwrap();

    bus.close(true);
    assert!(bus.await_termination(LONG));
    // No lost messages and no torn registries; delivery counts depend on
    // timing, completion does not.
    assert_eq!(bus.statistics().accepted, 200);
}

#[test]
fn filter_churn_while_messages_flow_is_safe() {
    let bus = Arc::new(
        MessageBus::builder()
            .asynchronous(AsynchronousConfiguration::with_pool_size(2))
            .build(),
    );
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(orders(), CountingSubscriber::remaining(count.clone()));

    let sender = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for n in 0..200 {
                bus.send(orders(), format!("order-{n}")).unwrap();
            }
        })
    };
    for _ in 0..20 {
        let tag: Arc<omnibus::ChannelFilter<String>> = Arc::new(
            |_context: &mut ProcessingContext<String>| -> Result<
                FilterOutcome<ProcessingContext<String>>,
                BoxError,
            > { Ok(FilterOutcome::Pass) },
        );
        bus.add_filter(FilterStage::Pre, tag.clone());
        bus.add_filter_at(FilterStage::Process, tag.clone(), 0).unwrap();
        assert!(bus.remove_filter(FilterStage::Pre, &tag));
        assert!(bus.remove_filter(FilterStage::Process, &tag));
    }
    sender.join().unwrap();

    bus.close(true);
    assert!(bus.await_termination(LONG));
    // Pass-through filters added and removed mid-flight never block or
    // drop a message.
    assert_eq!(bus.statistics().accepted, 200);
    assert_eq!(count.load(Ordering::SeqCst), 200);
    assert!(bus.filters(FilterStage::Pre).is_empty());
    assert!(bus.filters(FilterStage::Process).is_empty());
}
