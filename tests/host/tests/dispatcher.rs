//! Task-context calls through a running worker thread


use std::{ptr::NonNull, sync::Barrier, thread, time::Duration};

use stackgate::{
    DispatcherConfig, Fatal, Net, NetError, NetStack, Op, Port, WorkItem,
    stack::{DnsAddrType, IpType, PbufLayer, PbufType, WriteFlags},
};
use utils::{StubStack, eventually, start};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn worker_initializes_the_stack_once() {
    let (dispatcher, recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());

    let net = Net::new(dispatcher);
    net.tcp_new(IpType::V4);

    assert_eq!(recorder.inits(), 1);
    assert_eq!(recorder.calls()[0].op, Op::Init);
    assert!(dispatcher.worker().is_some());
}

#[test]
fn stack_is_never_entered_concurrently() {
    const TASKS: usize = 8;
    const CALLS: u32 = 40;

    let (dispatcher, recorder) = start::<16>(
        StubStack::new().with_dwell(Duration::from_micros(50)),
        DispatcherConfig::default(),
    );
    let barrier = Barrier::new(TASKS);

    thread::scope(|s| {
        for task in 0..TASKS as u32 {
            let barrier = &barrier;
            s.spawn(move || {
                let net = Net::new(dispatcher);
                barrier.wait();
                for i in 0..CALLS {
                    let pcb = net.tcp_new(IpType::V4).unwrap();
                    assert_eq!(net.tcp_write(pcb, &[task as u8; 3], WriteFlags::COPY), Ok(()));
                    net.tcp_recved(task, i as u16);
                }
            });
        }
    });

    assert_eq!(recorder.max_active(), 1);
    assert_eq!(recorder.calls_of(Op::TcpRecved).len(), TASKS * CALLS as usize);
    assert_eq!(dispatcher.stats().serviced, TASKS * CALLS as usize * 3);
}

#[test]
fn calls_from_one_task_run_in_issue_order() {
    const TASKS: u32 = 4;
    const CALLS: u16 = 100;

    // Small channel so that senders regularly wait for space
    let (dispatcher, recorder) = start::<2>(StubStack::new(), DispatcherConfig::default());

    thread::scope(|s| {
        for task in 0..TASKS {
            s.spawn(move || {
                let net = Net::new(dispatcher);
                for seq in 0..CALLS {
                    net.tcp_recved(task, seq);
                }
            });
        }
    });

    let calls = recorder.calls_of(Op::TcpRecved);
    assert_eq!(calls.len(), (TASKS * CALLS as u32) as usize);
    for task in 0..TASKS {
        let order: heapless::Vec<u32, { CALLS as usize }> = calls
            .iter()
            .filter(|call| call.a == task)
            .map(|call| call.b)
            .collect();
        assert!(order.iter().copied().eq(0..CALLS as u32), "task {task}: {order:?}");
    }
}

#[test]
fn results_match_direct_calls() {
    let (dispatcher, recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());
    assert!(eventually(TIMEOUT, || recorder.inits() == 1));

    let net = Net::new(dispatcher);
    let direct = StubStack::new();
    direct.init();

    assert_eq!(
        net.pbuf_alloc(PbufLayer::Transport, 64, PbufType::Ram),
        direct.pbuf_alloc(PbufLayer::Transport, 64, PbufType::Ram)
    );
    assert_eq!(
        net.pbuf_alloc(PbufLayer::Raw, 0, PbufType::Pool),
        direct.pbuf_alloc(PbufLayer::Raw, 0, PbufType::Pool)
    );
    assert_eq!(net.pbuf_header(1, -4), direct.pbuf_header(1, -4));
    assert_eq!(net.pbuf_take(1, &[0; 2000]), direct.pbuf_take(1, &[0; 2000]));
    assert_eq!(net.pbuf_get_at(7, 3), direct.pbuf_get_at(7, 3));

    let (mut via_worker, mut local) = ([0u8; 6], [0u8; 6]);
    assert_eq!(
        net.pbuf_copy_partial(5, &mut via_worker, 2),
        direct.pbuf_copy_partial(5, &mut local, 2)
    );
    assert_eq!(via_worker, local);

    let pcb = net.tcp_new(IpType::Any);
    assert_eq!(pcb, direct.tcp_new(IpType::Any));
    let pcb = pcb.unwrap();
    assert_eq!(net.tcp_listen(pcb, 2), direct.tcp_listen(pcb, 2));
    assert_eq!(
        net.tcp_write(pcb, &[], WriteFlags::default()),
        direct.tcp_write(pcb, &[], WriteFlags::default())
    );
    assert_eq!(net.tcp_shutdown(pcb, false, false), Err(NetError::Arg));
    assert_eq!(net.udp_sendto(3, 1, [10, 0, 0, 1], 0), Err(NetError::Val));
    assert_eq!(net.dns_gethostbyname("localhost", None, None), Ok([127, 0, 0, 1]));
    assert_eq!(
        net.dns_gethostbyname("example.org", None, None),
        Err(NetError::InProgress)
    );
    assert_eq!(net.raw_new(IpType::V4, 0), None);
    assert_eq!(net.netif_add(1, [0; 4], [0; 4], [0; 4]), None);
    assert_eq!(
        net.netif_add(1, [192, 168, 1, 2], [255, 255, 255, 0], [192, 168, 1, 1]),
        Some(1)
    );
    assert_eq!(net.input(9, 1), Ok(()));
}

#[test]
#[allow(clippy::unit_cmp)]
fn every_entry_point_round_trips() {
    // Long enough that no timer pass lands in the middle of the sequence
    let config = DispatcherConfig::default().with_initial_deadline(60_000);
    let (dispatcher, recorder) = start::<16>(StubStack::new(), config);
    let net = Net::new(dispatcher);
    let direct = StubStack::new();

    macro_rules! same {
        ( $method:ident ( $( $arg:expr ),* ) ) => {
            assert_eq!(
                net.$method($( $arg ),*),
                direct.$method($( $arg ),*),
                stringify!($method)
            )
        };
    }

    let addr = [10, 0, 0, 7];
    let src = [10, 0, 0, 1];

    same!(pbuf_header(4, 14));
    same!(pbuf_free(4));
    same!(pbuf_alloc(PbufLayer::Ip, 128, PbufType::Pool));
    same!(pbuf_take(4, &[1, 2, 3]));
    let (mut via_worker, mut local) = ([0u8; 8], [0u8; 8]);
    assert_eq!(
        net.pbuf_copy_partial(4, &mut via_worker, 3),
        direct.pbuf_copy_partial(4, &mut local, 3)
    );
    assert_eq!(via_worker, local);
    same!(pbuf_ref(4));
    same!(pbuf_get_at(4, 9));
    same!(pbuf_cat(4, 5));
    let (mut via_worker, mut local) = ([0u8; 4], [0u8; 4]);
    assert_eq!(
        net.pbuf_get_contiguous(4, &mut via_worker, 4, 2),
        direct.pbuf_get_contiguous(4, &mut local, 4, 2)
    );
    assert_eq!(via_worker, local);

    same!(tcp_close(7));
    same!(tcp_shutdown(7, true, false));
    same!(tcp_abort(7));
    same!(tcp_bind(7, None, 8080));
    same!(tcp_listen(7, 3));
    same!(tcp_recved(7, 512));
    same!(tcp_connect(7, addr, 443, None));
    same!(tcp_new(IpType::V4));
    same!(tcp_arg(7, Some(42)));
    same!(tcp_recv(7, None));
    same!(tcp_sent(7, None));
    same!(tcp_err(7, None));
    same!(tcp_accept(7, None));
    same!(tcp_write(7, b"payload", WriteFlags::COPY));
    same!(tcp_output(7));
    same!(tcp_bind_netif(7, Some(0)));
    same!(tcp_listen_with_err(7, 0));
    same!(tcp_poll(7, None, 4));
    same!(tcp_setprio(7, 64));
    same!(tcp_backlog_delayed(7));
    same!(tcp_backlog_accepted(7));

    same!(udp_send(9, 4));
    same!(udp_sendto(9, 4, addr, 53));
    same!(udp_bind(9, Some(addr), 68));
    same!(udp_connect(9, addr, 67));
    same!(udp_disconnect(9));
    same!(udp_recv(9, None, None));
    same!(udp_remove(9));
    same!(udp_new(IpType::Any));
    same!(udp_sendto_if(9, 4, addr, 53, 0));
    same!(udp_sendto_if_src(9, 4, addr, 53, 1, src));

    same!(check_timeouts());
    same!(dns_gethostbyname("localhost", None, None));
    same!(dns_gethostbyname_addrtype("localhost", None, None, DnsAddrType::Ipv6));

    same!(raw_bind(11, Some(addr)));
    same!(raw_connect(11, addr));
    same!(raw_sendto(11, 4, addr));
    same!(raw_remove(11));
    same!(raw_new(IpType::V4, 1));
    same!(raw_recv(11, None, Some(3)));
    same!(raw_send(11, 4));

    same!(netif_add(2, src, [255, 255, 255, 0], [10, 0, 0, 254]));
    same!(netif_remove(2));
    same!(input(4, 2));

    let expected: Vec<Op> = Op::ALL
        .iter()
        .copied()
        .filter(|op| !matches!(op, Op::Init | Op::Callback))
        .collect();
    let serviced: Vec<Op> = recorder
        .calls()
        .iter()
        .map(|call| call.op)
        .filter(|op| *op != Op::Init)
        .collect();
    assert_eq!(serviced, expected);
    assert_eq!(recorder.max_active(), 1);
}

#[test]
fn explicit_init_leaves_a_running_stack_alone() {
    let (dispatcher, recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());
    assert!(eventually(TIMEOUT, || recorder.inits() == 1));

    let net = Net::new(dispatcher);
    net.init();
    net.init();
    let pcb = net.tcp_new(IpType::V4);

    assert!(pcb.is_some());
    assert!(dispatcher.is_initialized());
    assert_eq!(recorder.inits(), 1);
    assert_eq!(recorder.calls_of(Op::Init).len(), 1);
}

#[test]
fn back_to_back_opens_from_two_tasks() {
    let (dispatcher, recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());

    let open = |port: u16| {
        move || {
            let net = Net::new(dispatcher);
            let pcb = net.tcp_new(IpType::V4).unwrap();
            (pcb, net.tcp_connect(pcb, [93, 184, 216, 34], port, None))
        }
    };
    let first = thread::spawn(open(80));
    let second = thread::spawn(open(0));
    let (first, second) = (first.join().unwrap(), second.join().unwrap());

    assert_eq!(first.1, Ok(()));
    assert_eq!(second.1, Err(NetError::Val));
    assert_ne!(first.0, second.0);

    assert_eq!(recorder.max_active(), 1);
    let connects = recorder.calls_of(Op::TcpConnect);
    assert_eq!(connects.len(), 2);
    assert!(connects.iter().any(|call| call.a == first.0 && call.b == 80));
    assert!(connects.iter().any(|call| call.a == second.0 && call.b == 0));
}

#[test]
fn stack_callbacks_can_call_back_in() {
    let (dispatcher, recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());
    let net = Net::new(dispatcher);

    let mut inner = None;
    dispatcher.run_in_worker(|_stack| {
        assert!(dispatcher.is_worker());
        // Would deadlock if queued behind ourselves
        inner = net.tcp_new(IpType::V6);
    });

    assert!(inner.is_some());
    assert!(!dispatcher.is_worker());
    assert_eq!(recorder.max_active(), 1);
}

#[test]
fn entering_the_stack_from_another_task_halts() {
    let (dispatcher, _recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());
    assert!(eventually(TIMEOUT, || dispatcher.worker().is_some()));

    let intruder = thread::spawn(move || {
        dispatcher.step();
    });

    assert!(intruder.join().is_err());
    assert_eq!(dispatcher.port().fatals(), vec![Fatal::ForeignContext]);
}

#[test]
fn unknown_tag_halts_the_worker() {
    let (dispatcher, _recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());

    let item = unsafe { WorkItem::from_raw(0xBEEF, NonNull::dangling(), None) };
    dispatcher.channel().send(dispatcher.port(), item);

    assert!(eventually(TIMEOUT, || !dispatcher.port().fatals().is_empty()));
    assert_eq!(dispatcher.port().fatals(), vec![Fatal::UnknownOp(0xBEEF)]);
}

#[test]
fn second_worker_on_the_same_dispatcher_halts() {
    let (dispatcher, _recorder) = start::<16>(StubStack::new(), DispatcherConfig::default());
    assert!(eventually(TIMEOUT, || dispatcher.worker().is_some()));

    let second = thread::spawn(move || {
        dispatcher.run();
    });

    assert!(second.join().is_err());
    assert_eq!(dispatcher.port().fatals(), vec![Fatal::WorkerAttached]);
    assert_ne!(Some(dispatcher.port().current_task()), dispatcher.worker());
}
