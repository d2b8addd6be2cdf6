//! Idle-time timer processing


use std::{thread, time::Duration};

use stackgate::{DispatcherConfig, Net, Op, Timeout, stack::IpType};
use utils::{StubStack, eventually, start};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn idle_worker_follows_the_stack_timer_schedule() {
    let (dispatcher, recorder) = start::<16>(
        StubStack::new().with_sleeptime(Some(10)),
        DispatcherConfig::default().with_initial_deadline(20),
    );
    assert_eq!(dispatcher.config().initial_deadline, 20);

    assert!(eventually(TIMEOUT, || recorder.timeout_checks() >= 5));
    assert_eq!(dispatcher.deadline(), Timeout::Ticks(10));
    assert!(dispatcher.stats().maintenance >= 4);
}

#[test]
fn no_pending_timers_means_waiting_forever() {
    let (dispatcher, recorder) = start::<16>(
        StubStack::new(),
        DispatcherConfig::default().with_initial_deadline(5),
    );

    assert!(eventually(TIMEOUT, || dispatcher.deadline() == Timeout::Forever));
    let checks = recorder.timeout_checks();
    assert_eq!(checks, 1);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.timeout_checks(), checks);

    // Work does not count as idle time
    let net = Net::new(dispatcher);
    net.tcp_new(IpType::V4);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(recorder.timeout_checks(), checks);
}

#[test]
fn explicit_timer_pass_leaves_the_deadline_alone() {
    let (dispatcher, recorder) = start::<16>(
        StubStack::new(),
        DispatcherConfig::default().with_initial_deadline(5),
    );
    assert!(eventually(TIMEOUT, || dispatcher.deadline() == Timeout::Forever));

    // Only an idle timeout reschedules maintenance
    recorder.set_sleeptime(Some(3));
    let net = Net::new(dispatcher);
    net.check_timeouts();

    assert_eq!(recorder.calls_of(Op::CheckTimeouts).len(), 2);
    assert_eq!(dispatcher.stats().maintenance, 1);
    assert_eq!(dispatcher.deadline(), Timeout::Forever);
}
