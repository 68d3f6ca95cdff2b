use pinlink::runtime::AUTH_TOKEN_KEY;
use pinlink::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type TestRuntime = DeviceRuntime<LoopbackTransport, MemoryStorage, ManualClock>;

fn setup_with(config: RuntimeConfig, storage: MemoryStorage) -> (TestRuntime, LoopbackTransport, ManualClock) {
    let transport = LoopbackTransport::new();
    let clock = ManualClock::new();
    let runtime = DeviceRuntime::new(config, transport.clone(), storage, clock.clone()).unwrap();
    (runtime, transport, clock)
}

fn setup() -> (TestRuntime, LoopbackTransport, ManualClock) {
    setup_with(RuntimeConfig::new("dev-1", "secret"), MemoryStorage::new())
}

fn payloads_on(transport: &LoopbackTransport, topic: &str) -> Vec<String> {
    transport
        .published()
        .into_iter()
        .filter(|p| p.topic == topic)
        .map(|p| p.payload)
        .collect()
}

#[test]
fn test_pin_write_reaches_bound_handler() {
    let (mut runtime, transport, _) = setup();
    let seen = Rc::new(Cell::new(0));
    let inner = Rc::clone(&seen);
    runtime.attach_virtual(5, move |value, _| inner.set(value.as_int()));

    assert!(runtime.connect());
    transport.inject("devices/dev-1/virtual-write/5", b"42");
    transport.inject("devices/dev-1/virtual-write/6", b"42");
    runtime.tick();

    assert_eq!(seen.get(), 42);
    let stats = runtime.stats();
    assert_eq!(stats.messages_routed, 2);
    assert_eq!(stats.messages_dropped, 0);
}

#[test]
fn test_second_attach_replaces_first() {
    let (mut runtime, transport, _) = setup();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let first = Rc::clone(&calls);
    runtime.attach_virtual(7, move |_, _| first.borrow_mut().push("first"));
    let second = Rc::clone(&calls);
    runtime.attach_virtual(7, move |_, _| second.borrow_mut().push("second"));

    runtime.connect();
    transport.inject("devices/dev-1/virtual-write/7", b"1");
    runtime.tick();

    assert_eq!(*calls.borrow(), vec!["second"]);
}

#[test]
fn test_out_of_range_attach_is_ignored() {
    let (mut runtime, transport, _) = setup();
    let hits = Rc::new(Cell::new(0));

    let inner = Rc::clone(&hits);
    assert!(!runtime.attach_virtual(MAX_VIRTUAL_PINS, move |_, _| inner.set(inner.get() + 100)));
    let inner = Rc::clone(&hits);
    assert!(runtime.attach_virtual(MAX_VIRTUAL_PINS - 1, move |_, _| inner.set(inner.get() + 1)));

    runtime.connect();
    transport.inject(&format!("devices/dev-1/virtual-write/{}", MAX_VIRTUAL_PINS), b"1");
    transport.inject(&format!("devices/dev-1/virtual-write/{}", MAX_VIRTUAL_PINS - 1), b"1");
    runtime.tick();

    assert_eq!(hits.get(), 1);
    assert_eq!(runtime.stats().messages_dropped, 1);
}

#[test]
fn test_unknown_topics_are_dropped() {
    let (mut runtime, transport, _) = setup();
    runtime.connect();

    transport.inject("other/dev-1/virtual-write/1", b"1");
    transport.inject("devices/dev-2/virtual-write/1", b"1");
    transport.inject("devices/dev-1/virtual-write/abc", b"1");
    transport.inject("devices/dev-1/system/self-destruct", b"");
    transport.inject("devices/dev-1/unknown/1", b"1");
    runtime.tick();

    let stats = runtime.stats();
    assert_eq!(stats.messages_dropped, 5);
    assert_eq!(stats.messages_routed, 0);
}

#[test]
fn test_handler_publishes_through_outbox() {
    let (mut runtime, transport, _) = setup();
    runtime.attach_virtual(0, |value, outbox| {
        outbox.virtual_write(10, value.as_int() * 2);
        outbox.notify(11, "doubled");
    });

    runtime.connect();
    transport.inject("devices/dev-1/virtual-write/0", b"21");
    runtime.tick();

    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/10"), vec!["42"]);
    assert_eq!(payloads_on(&transport, "devices/dev-1/notify/11"), vec!["doubled"]);
    assert_eq!(runtime.last_value(10), Some("42"));
}

#[test]
fn test_object_payload_fields_reach_handler() {
    let (mut runtime, transport, _) = setup();
    let captured = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&captured);
    runtime.attach_virtual(1, move |value, _| {
        *inner.borrow_mut() = Some((value.get("mode").as_str().to_string(), value.get("level").as_int()));
    });

    runtime.connect();
    transport.inject("devices/dev-1/virtual-write/1", br#"{"mode":"eco","level":3}"#);
    runtime.tick();

    assert_eq!(*captured.borrow(), Some(("eco".to_string(), 3)));
}

#[test]
fn test_binary_payload_stays_opaque() {
    let (mut runtime, transport, _) = setup();
    let captured = Rc::new(RefCell::new(Vec::new()));
    let inner = Rc::clone(&captured);
    runtime.attach_virtual(2, move |value, _| {
        assert_eq!(value.as_str(), "");
        inner.borrow_mut().extend_from_slice(value.as_bytes());
    });

    runtime.connect();
    transport.inject("devices/dev-1/virtual-write/2", &[0xff, 0x00, 0xfe]);
    runtime.tick();

    assert_eq!(*captured.borrow(), vec![0xff, 0x00, 0xfe]);
}

#[test]
fn test_read_request_republishes_last_value() {
    let (mut runtime, transport, _) = setup();
    runtime.connect();

    runtime.virtual_write(3, 7).unwrap();
    transport.inject("devices/dev-1/virtual-read/3", b"");
    runtime.tick();

    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/3"), vec!["7", "7"]);
}

#[test]
fn test_read_request_uses_read_handler() {
    let (mut runtime, transport, _) = setup();
    runtime.attach_virtual_read(4, |_, outbox| {
        outbox.virtual_write(4, "fresh");
    });

    runtime.connect();
    transport.inject("devices/dev-1/virtual-read/4", b"");
    runtime.tick();

    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/4"), vec!["fresh"]);
}

#[test]
fn test_system_commands_skip_pin_handlers() {
    let (mut runtime, transport, _) = setup();
    let hits = Rc::new(Cell::new(0));
    for pin in 0..4 {
        let inner = Rc::clone(&hits);
        runtime.attach_virtual(pin, move |_, _| inner.set(inner.get() + 1));
    }
    let events = Rc::new(RefCell::new(Vec::new()));
    let inner = Rc::clone(&events);
    runtime.on_event(move |name, _| inner.borrow_mut().push(name.to_string()));

    runtime.connect();
    transport.inject("devices/dev-1/system/ping", b"");
    transport.inject("devices/dev-1/system/reboot", b"0");
    runtime.tick();

    assert_eq!(hits.get(), 0);
    assert_eq!(*events.borrow(), vec!["ping", "reboot"]);
    assert_eq!(payloads_on(&transport, "devices/dev-1/system-reply/ping"), vec!["pong"]);
    assert!(runtime.take_reboot_request());
    assert!(!runtime.take_reboot_request());
}

#[test]
fn test_device_info_reply() {
    let (mut runtime, transport, clock) = setup();
    runtime.attach_virtual(0, |_, _| {});
    runtime.set_timer(1000, |_| {}).unwrap();
    clock.set(1234);

    runtime.connect();
    transport.inject("devices/dev-1/system/info", b"");
    runtime.tick();

    let replies = payloads_on(&transport, "devices/dev-1/system-reply/info");
    assert_eq!(replies.len(), 1);
    let info: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
    assert_eq!(info["device_id"], "dev-1");
    assert_eq!(info["uptime_ms"], 1234);
    assert_eq!(info["bound_pins"], 1);
    assert_eq!(info["active_timers"], 1);
    assert_eq!(info["state"], "Connected");
}

#[test]
fn test_factory_reset_clears_storage_and_requests_reboot() {
    let (mut runtime, transport, _) = setup();
    runtime.save("wifi", "home").unwrap();
    runtime.set_auth_token("rotated").unwrap();

    runtime.connect();
    transport.inject("devices/dev-1/system/factory-reset", b"");
    runtime.tick();

    assert_eq!(runtime.load("wifi"), None);
    assert_eq!(runtime.load(AUTH_TOKEN_KEY), None);
    assert!(runtime.storage().is_empty());
    assert!(runtime.reboot_requested());
}

#[test]
fn test_auth_token_update_is_persisted_and_used_on_reconnect() {
    let (mut runtime, transport, _) = setup();
    runtime.connect();
    assert_eq!(transport.last_password().as_deref(), Some("secret"));

    transport.inject("devices/dev-1/system/auth-token", br#"{"token":"rotated"}"#);
    runtime.tick();
    assert_eq!(runtime.load(AUTH_TOKEN_KEY).as_deref(), Some("rotated"));
    assert_eq!(runtime.config().auth_token, "rotated");

    runtime.disconnect();
    assert!(runtime.connect());
    assert_eq!(transport.last_password().as_deref(), Some("rotated"));
}

#[test]
fn test_bare_auth_token_payload() {
    let (mut runtime, transport, _) = setup();
    runtime.connect();

    transport.inject("devices/dev-1/system/auth-token", b"  plain-token \n");
    transport.inject("devices/dev-1/system/auth-token", b"");
    runtime.tick();

    assert_eq!(runtime.load(AUTH_TOKEN_KEY).as_deref(), Some("plain-token"));
}

#[test]
fn test_persisted_token_overrides_config() {
    let mut storage = MemoryStorage::new();
    storage.write(AUTH_TOKEN_KEY, "from-storage").unwrap();
    let (mut runtime, transport, _) = setup_with(RuntimeConfig::new("dev-1", "from-config"), storage);

    assert!(runtime.connect());
    assert_eq!(transport.last_password().as_deref(), Some("from-storage"));
}

#[test]
fn test_writes_while_disconnected_are_remembered() {
    let mut config = RuntimeConfig::new("dev-1", "secret");
    config.sync_on_connect = true;
    let (mut runtime, transport, _) = setup_with(config, MemoryStorage::new());

    assert_eq!(runtime.virtual_write(1, "on"), Err(RuntimeError::NotConnected));
    assert_eq!(runtime.send_sensor(2, 20.5), Err(RuntimeError::NotConnected));
    assert_eq!(runtime.last_value(1), Some("on"));
    assert!(transport.published().is_empty());

    assert!(runtime.connect());
    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/1"), vec!["on"]);
    assert!(payloads_on(&transport, "devices/dev-1/sensor/2").is_empty());
}

#[test]
fn test_sync_all_covers_bound_and_written_pins() {
    let (mut runtime, transport, _) = setup();
    runtime.attach_virtual(8, |_, _| {});
    runtime.connect();
    runtime.virtual_write(9, "x").unwrap();
    transport.take_published();

    assert_eq!(runtime.sync_all(), 2);
    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/8"), vec![""]);
    assert_eq!(payloads_on(&transport, "devices/dev-1/virtual/9"), vec!["x"]);
}

#[test]
fn test_sync_virtual_out_of_range() {
    let (mut runtime, _, _) = setup();
    runtime.connect();
    assert_eq!(
        runtime.sync_virtual(MAX_VIRTUAL_PINS),
        Err(RuntimeError::PinOutOfRange(MAX_VIRTUAL_PINS))
    );
}

#[test]
fn test_publish_failure_is_counted() {
    let (mut runtime, transport, _) = setup();
    runtime.connect();
    transport.set_publish_failure(true);

    assert!(matches!(runtime.virtual_write(0, 1), Err(RuntimeError::PublishFailed(_))));
    assert!(matches!(runtime.notify(0, "alarm"), Err(RuntimeError::PublishFailed(_))));

    let stats = runtime.stats();
    assert_eq!(stats.publishes_failed, 2);
    assert_eq!(stats.publishes_sent, 0);
}

#[test]
fn test_timer_publishes_sensor_reading() {
    let (mut runtime, transport, clock) = setup();
    let mut reading = 20.0;
    runtime
        .set_timer(1000, move |outbox| {
            reading += 0.5;
            outbox.send_sensor(2, reading);
        })
        .unwrap();
    runtime.connect();

    for now in [999, 1000, 1999, 2000] {
        clock.set(now);
        runtime.tick();
    }

    assert_eq!(payloads_on(&transport, "devices/dev-1/sensor/2"), vec!["20.5", "21"]);
    assert_eq!(runtime.stats().timer_fires, 2);
}

#[test]
fn test_one_shot_timer_fires_once() {
    let (mut runtime, _, clock) = setup();
    let fired = Rc::new(Cell::new(0));
    let inner = Rc::clone(&fired);
    runtime.set_timer_once(500, move |_| inner.set(inner.get() + 1)).unwrap();
    assert_eq!(runtime.active_timers(), 1);

    for now in [499, 500, 1000, 1500] {
        clock.set(now);
        runtime.tick();
    }

    assert_eq!(fired.get(), 1);
    assert_eq!(runtime.active_timers(), 0);
}

#[test]
fn test_timer_table_limit_and_slot_reuse() {
    let (mut runtime, _, _) = setup();
    let handles: Vec<TimerHandle> = (0..MAX_TIMERS)
        .map(|_| runtime.set_timer(100, |_| {}).unwrap())
        .collect();

    assert_eq!(runtime.set_timer(100, |_| {}).unwrap_err(), RuntimeError::TimerTableFull);
    assert_eq!(runtime.active_timers(), MAX_TIMERS);

    assert!(runtime.stop_timer(handles[3]));
    assert!(!runtime.stop_timer(handles[3]));
    let reused = runtime.set_timer(100, |_| {}).unwrap();
    assert_eq!(reused, handles[3]);
    assert_eq!(runtime.scheduler_stats().total_stopped, 1);
}

#[test]
fn test_zero_period_timer_rejected() {
    let (mut runtime, _, _) = setup();
    assert_eq!(runtime.set_timer(0, |_| {}).unwrap_err(), RuntimeError::InvalidTimerPeriod);
    assert_eq!(runtime.set_timer_once(0, |_| {}).unwrap_err(), RuntimeError::InvalidTimerPeriod);
    assert_eq!(runtime.active_timers(), 0);
}

#[test]
fn test_direct_message_entry_point() {
    let (mut runtime, _, _) = setup();
    let seen = Rc::new(Cell::new(0.0));
    let inner = Rc::clone(&seen);
    runtime.attach_virtual(12, move |value, _| inner.set(value.as_double()));

    runtime.handle_message("devices/dev-1/virtual-write/12", b"3.25");

    assert_eq!(seen.get(), 3.25);
}

#[test]
fn test_invalid_config_rejected() {
    let transport = LoopbackTransport::new();
    let result = DeviceRuntime::new(
        RuntimeConfig::new("bad/id", "secret"),
        transport,
        MemoryStorage::new(),
        ManualClock::new(),
    );
    assert!(matches!(result, Err(RuntimeError::Config(_))));
}

#[test]
fn test_sync_all_counts_failed_publishes() {
    let (mut runtime, transport, _) = setup();
    runtime.attach_virtual(1, |_, _| {});
    runtime.attach_virtual(2, |_, _| {});
    runtime.connect();
    transport.set_publish_failure(true);

    assert_eq!(runtime.sync_all(), 0);
    let stats = runtime.stats();
    assert_eq!(stats.publishes_failed, 2);
    assert_eq!(stats.publishes_sent, 0);

    transport.set_publish_failure(false);
    assert_eq!(runtime.sync_all(), 2);
    assert_eq!(runtime.stats().publishes_sent, 2);
}

#[test]
fn test_one_shot_schedules_follow_up_for_next_tick() {
    let (mut runtime, transport, clock) = setup();
    runtime.connect();
    runtime
        .set_timer_once(100, |outbox| {
            outbox.notify(0, "first");
            outbox.set_timer_once(1, |outbox| {
                outbox.notify(0, "second");
            });
        })
        .unwrap();

    clock.set(100);
    runtime.tick();
    assert_eq!(payloads_on(&transport, "devices/dev-1/notify/0"), vec!["first"]);
    assert_eq!(runtime.active_timers(), 1);

    clock.set(101);
    runtime.tick();
    assert_eq!(payloads_on(&transport, "devices/dev-1/notify/0"), vec!["first", "second"]);
    assert_eq!(runtime.active_timers(), 0);
}

#[test]
fn test_repeating_timer_stops_itself() {
    let (mut runtime, _, clock) = setup();
    let fired = Rc::new(Cell::new(0));
    let inner = Rc::clone(&fired);
    runtime
        .set_timer(10, move |outbox| {
            inner.set(inner.get() + 1);
            if inner.get() == 3 {
                if let Some(handle) = outbox.current_timer() {
                    outbox.stop_timer(handle);
                }
            }
        })
        .unwrap();

    for now in (10..=100).step_by(10) {
        clock.set(now);
        runtime.tick();
    }

    assert_eq!(fired.get(), 3);
    assert_eq!(runtime.active_timers(), 0);
}

#[test]
fn test_pin_handler_controls_timers() {
    let (mut runtime, transport, clock) = setup();
    let fired = Rc::new(Cell::new(0));
    let inner = Rc::clone(&fired);
    let blink = runtime.set_timer(10, move |_| inner.set(inner.get() + 1)).unwrap();

    runtime.attach_virtual(9, move |_, outbox| {
        outbox.stop_timer(blink);
    });
    runtime.attach_virtual(8, |value, outbox| {
        let delay = value.as_int().unsigned_abs();
        outbox.set_timer_once(delay, |outbox| {
            outbox.notify(8, "elapsed");
        });
    });
    runtime.connect();

    clock.set(10);
    runtime.tick();
    transport.inject("devices/dev-1/virtual-write/9", b"1");
    transport.inject("devices/dev-1/virtual-write/8", b"50");
    clock.set(20);
    runtime.tick();
    assert_eq!(fired.get(), 1);

    clock.set(69);
    runtime.tick();
    assert!(payloads_on(&transport, "devices/dev-1/notify/8").is_empty());
    clock.set(70);
    runtime.tick();
    assert_eq!(payloads_on(&transport, "devices/dev-1/notify/8"), vec!["elapsed"]);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_queued_zero_period_timer_is_ignored() {
    let (mut runtime, _, clock) = setup();
    runtime.attach_virtual(0, |_, outbox| {
        outbox.set_timer(0, |_| {});
    });
    runtime.handle_message("devices/dev-1/virtual-write/0", b"1");
    clock.set(100);
    runtime.tick();
    assert_eq!(runtime.active_timers(), 0);
}

fn pin_zero_counter(runtime: &mut TestRuntime) -> Rc<RefCell<Vec<usize>>> {
    let lengths = Rc::new(RefCell::new(Vec::new()));
    let inner = Rc::clone(&lengths);
    runtime.attach_virtual(0, move |value, _| inner.borrow_mut().push(value.len()));
    lengths
}

#[test]
fn test_oversized_payload_is_dropped() {
    let (mut runtime, transport, _) = setup();
    let lengths = pin_zero_counter(&mut runtime);
    runtime.connect();

    transport.inject("devices/dev-1/virtual-write/0", &vec![b'7'; MAX_PAYLOAD_LEN + 1]);
    transport.inject("devices/dev-1/virtual-write/0", &vec![b'7'; MAX_PAYLOAD_LEN]);
    runtime.tick();

    assert_eq!(*lengths.borrow(), vec![MAX_PAYLOAD_LEN]);
}

#[test]
fn test_oversized_topic_is_dropped() {
    let (mut runtime, transport, _) = setup();
    let hits = Rc::new(Cell::new(0));
    let inner = Rc::clone(&hits);
    runtime.attach_virtual(5, move |_, _| inner.set(inner.get() + 1));
    runtime.connect();

    // Leading zeros pad the pin segment; the index still decodes as 5.
    let prefix = "devices/dev-1/virtual-write/";
    let padding = MAX_TOPIC_LEN - prefix.len() - 1;
    let at_limit = format!("{prefix}{}5", "0".repeat(padding));
    let over_limit = format!("{prefix}{}5", "0".repeat(padding + 1));
    assert_eq!(at_limit.len(), MAX_TOPIC_LEN);

    transport.inject(&over_limit, b"1");
    runtime.tick();
    assert_eq!(hits.get(), 0);
    assert_eq!(runtime.stats().messages_dropped, 0);

    transport.inject(&at_limit, b"1");
    runtime.tick();
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_inbound_backlog_carries_over_to_next_tick() {
    let (mut runtime, transport, _) = setup();
    let lengths = pin_zero_counter(&mut runtime);
    runtime.connect();

    for _ in 0..MAX_INBOUND + 2 {
        transport.inject("devices/dev-1/virtual-write/0", b"1");
    }

    runtime.tick();
    assert_eq!(lengths.borrow().len(), MAX_INBOUND);
    runtime.tick();
    assert_eq!(lengths.borrow().len(), MAX_INBOUND + 2);
}

#[test]
fn test_outbox_overflow_drops_excess_publishes() {
    let (mut runtime, transport, _) = setup();
    runtime.attach_virtual(0, |_, outbox| {
        for i in 0..MAX_OUTBOUND + 8 {
            outbox.notify(1, i);
        }
    });
    runtime.connect();

    transport.inject("devices/dev-1/virtual-write/0", b"1");
    runtime.tick();

    let sent = payloads_on(&transport, "devices/dev-1/notify/1");
    assert_eq!(sent.len(), MAX_OUTBOUND);
    assert_eq!(sent.last().map(String::as_str), Some((MAX_OUTBOUND - 1).to_string().as_str()));
}
