//! End-to-end timer scenarios: a real ticker thread, channel transport, and a wheel driven the
//! way an owning thread drives it.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use sigmid::timer::{TickTransport, Ticker, TimerCallback, TimerId, TimerWheel};

type Fired = Rc<RefCell<Vec<&'static str>>>;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn recorder(fired: &Fired) -> TimerCallback<&'static str> {
    let f = fired.clone();
    Box::new(move |_id: TimerId, data: &mut &'static str| f.borrow_mut().push(*data))
}

/// Pump transport messages into the wheel until the predicate holds or the deadline passes.
fn pump(
    rx: &crossbeam::channel::Receiver<sigmid::timer::TickMsg>,
    wheel: &mut TimerWheel<&'static str>,
    deadline: Duration,
    mut until: impl FnMut() -> bool,
) {
    let stop = Instant::now() + deadline;
    while !until() && Instant::now() < stop {
        if let Ok(msg) = rx.recv_timeout(Duration::from_millis(100)) {
            wheel.on_msg(msg).unwrap();
        }
    }
}

#[test]
fn callbacks_fire_in_deadline_order() {
    init_logs();
    let ticker = Ticker::start().unwrap();
    let (transport, rx) = TickTransport::channel();
    ticker.register(1, transport).unwrap();

    let mut wheel: TimerWheel<&'static str> = TimerWheel::new(None);
    let ready = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    wheel.on_msg(ready).unwrap();

    let fired: Fired = Rc::default();
    let armed_at = Instant::now();
    wheel.start_timer(150, Some(recorder(&fired)), "a").unwrap();
    wheel.start_timer(100, Some(recorder(&fired)), "b").unwrap();
    wheel.start_timer(200, Some(recorder(&fired)), "c").unwrap();

    pump(&rx, &mut wheel, Duration::from_secs(3), || {
        fired.borrow().len() >= 3
    });

    assert_eq!(*fired.borrow(), vec!["b", "a", "c"]);
    // All three deadlines were at most 200 ms out; generous slack for CI schedulers.
    assert!(armed_at.elapsed() < Duration::from_secs(2));
}

#[test]
fn stopped_timer_never_fires() {
    init_logs();
    let ticker = Ticker::start().unwrap();
    let (transport, rx) = TickTransport::channel();
    ticker.register(1, transport).unwrap();

    let mut wheel: TimerWheel<&'static str> = TimerWheel::new(None);
    let ready = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    wheel.on_msg(ready).unwrap();

    let fired: Fired = Rc::default();
    let keep = wheel.start_timer(100, Some(recorder(&fired)), "keep").unwrap();
    let gone = wheel.start_timer(100, Some(recorder(&fired)), "gone").unwrap();
    assert_ne!(keep, gone);
    wheel.stop_timer(gone).unwrap();

    pump(&rx, &mut wheel, Duration::from_secs(2), || {
        !fired.borrow().is_empty()
    });
    // Give the stopped timer's slot one more tick to prove it stays silent.
    pump(&rx, &mut wheel, Duration::from_millis(200), || false);

    assert_eq!(*fired.borrow(), vec!["keep"]);
}

#[test]
fn periodic_tick_keeps_firing_until_stopped() {
    init_logs();
    let ticker = Ticker::start().unwrap();
    let (transport, rx) = TickTransport::channel();
    ticker.register(1, transport).unwrap();

    let mut wheel: TimerWheel<&'static str> = TimerWheel::new(None);
    let ready = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    wheel.on_msg(ready).unwrap();

    let fired: Fired = Rc::default();
    wheel.start_tick(100, Some(recorder(&fired)), "t").unwrap();

    pump(&rx, &mut wheel, Duration::from_secs(3), || {
        fired.borrow().len() >= 3
    });
    assert!(fired.borrow().len() >= 3, "periodic timer re-arms");
}
