use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};
use yaar_thread::{AffinityError, Builder, Error, Policy, Priority, PriorityRange, Thread};

fn blocked_until_dropped() -> (mpsc::Sender<()>, impl FnOnce() + Send + 'static) {
    let (tx, rx) = mpsc::channel::<()>();
    (tx, move || {
        let _ = rx.recv();
    })
}

#[test]
fn join_without_start() {
    let thread = Thread::new();
    thread.join().unwrap();
    assert!(thread.join_timeout(Duration::from_millis(0)).unwrap());
    assert!(!thread.is_started());
    assert!(!thread.is_joined());
    assert!(!thread.is_running());
}

#[test]
fn join_observes_side_effects() {
    let counter = Arc::new(AtomicUsize::new(0));
    let thread = Thread::new();

    let c = counter.clone();
    thread
        .start(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    thread.join().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert!(thread.is_started());
    assert!(thread.is_joined());
    assert!(!thread.is_running());

    // joining twice is harmless
    thread.join().unwrap();
}

#[test]
fn join_timeout() {
    let thread = Thread::new();
    thread
        .start(|| yaar_thread::sleep(Duration::from_millis(500)))
        .unwrap();

    assert!(!thread.join_timeout(Duration::from_millis(50)).unwrap());
    assert!(thread.is_running());
    assert!(!thread.is_joined());

    assert!(thread.join_timeout(Duration::from_millis(1000)).unwrap());
    assert!(thread.is_joined());
    assert!(!thread.is_running());
}

#[test]
fn start_while_running() {
    let (release, wait) = blocked_until_dropped();
    let thread = Thread::new();
    thread.start(wait).unwrap();

    match thread.start(|| {}) {
        Err(Error::AlreadyRunning) => {}
        other => panic!("unexpected {:?}", other),
    }

    drop(release);
    thread.join().unwrap();
}

#[test]
fn restart_after_completion() {
    let runs = Arc::new(AtomicUsize::new(0));
    let thread = Thread::new();

    for _ in 0..3 {
        let runs = runs.clone();
        thread
            .start(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // a completed launch which was never joined is reaped by the next start
    thread.start(|| {}).unwrap();
    while thread.is_running() {
        yaar_thread::yield_now();
    }
    thread.start(|| {}).unwrap();
    thread.join().unwrap();
    assert!(thread.is_joined());
}

#[test]
fn drop_running_thread_detaches() {
    let (release, wait) = blocked_until_dropped();
    let (done_tx, done_rx) = mpsc::channel();

    let thread = Thread::new();
    thread
        .start(move || {
            wait();
            done_tx.send(()).unwrap();
        })
        .unwrap();

    let dropped = Instant::now();
    drop(thread);
    assert!(dropped.elapsed() < Duration::from_secs(1));

    drop(release);
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn native_id_matches_the_running_thread() {
    let (tx, rx) = mpsc::channel();
    let thread = Thread::new();
    thread
        .start(move || tx.send(yaar_thread::current_native_id()).unwrap())
        .unwrap();

    let inside = rx.recv().unwrap();
    thread.join().unwrap();

    assert_eq!(thread.native_id(), Some(inside));
    assert_ne!(inside, Thread::current_native_id());
}

#[test]
fn ids_are_unique() {
    let a = Thread::new();
    let b = Thread::with_name("b");
    assert_ne!(a.id(), b.id());
    assert!(a.id() >= 1);
    assert_eq!(a.name(), None);
    assert_eq!(b.name().as_deref(), Some("b"));
}

#[test]
fn priority_is_pending_before_start() {
    let range = PriorityRange::of(Policy::Other).unwrap();
    let thread = Thread::new();
    assert_eq!(thread.priority(), Priority::Normal);
    assert_eq!(thread.policy(), Policy::Other);
    assert_eq!(thread.os_priority(), range.to_native(Priority::Normal));

    thread.set_priority(Priority::Low).unwrap();
    assert_eq!(thread.priority(), Priority::Low);
    assert_eq!(thread.os_priority(), range.to_native(Priority::Low));

    thread.set_os_priority(range.max, Policy::Other).unwrap();
    assert_eq!(thread.os_priority(), range.max);
    if range.min < range.max {
        assert_eq!(thread.priority(), Priority::Highest);
    }

    assert_eq!(Thread::min_os_priority(Policy::Other).unwrap(), range.min);
    assert_eq!(Thread::max_os_priority(Policy::Other).unwrap(), range.max);
}

#[test]
fn real_time_priority_reports_highest() {
    let thread = Thread::new();
    thread.set_os_priority(1, Policy::Fifo).unwrap();
    assert_eq!(thread.priority(), Priority::Highest);
    assert_eq!(thread.policy(), Policy::Fifo);
    assert_eq!(thread.os_priority(), 1);

    // back to the default policy
    thread.set_priority(Priority::Normal).unwrap();
    assert_eq!(thread.policy(), Policy::Other);
}

#[test]
fn lowered_priority_applies_to_live_thread() {
    let thread = Thread::new();
    thread.set_priority(Priority::Low).unwrap();

    let (release, wait) = blocked_until_dropped();
    thread.start(wait).unwrap();

    thread.set_priority(Priority::Lowest).unwrap();
    assert_eq!(thread.priority(), Priority::Lowest);
    thread.set_priority(Priority::Lowest).unwrap();

    drop(release);
    thread.join().unwrap();
}

#[test]
fn stack_size_is_rounded() {
    let thread = Thread::new();
    assert_eq!(thread.stack_size(), 0);

    thread.set_stack_size(1);
    assert!(thread.stack_size() >= 16 * 1024);

    let requested = (1 << 20) + 1;
    thread.set_stack_size(requested);
    let size = thread.stack_size();
    assert!(size >= requested);
    assert_eq!(size % 4096, 0);

    thread
        .start(|| {
            let buf = [1u8; 256 * 1024];
            assert_eq!(buf.iter().map(|&b| b as usize).sum::<usize>(), buf.len());
        })
        .unwrap();
    thread.join().unwrap();

    thread.set_stack_size(0);
    assert_eq!(thread.stack_size(), 0);
}

#[test]
fn builder_configures_and_spawns() {
    let (tx, rx) = mpsc::channel();
    let thread = Builder::new()
        .name("builder-worker")
        .stack_size(256 * 1024)
        .priority(Priority::Normal)
        .spawn(move || {
            let current = yaar_thread::current().unwrap();
            tx.send((current.name(), current.stack_size())).unwrap();
        })
        .unwrap();

    let (name, stack_size) = rx.recv().unwrap();
    thread.join().unwrap();

    assert_eq!(name.as_deref(), Some("builder-worker"));
    assert!(stack_size >= 256 * 1024);
}

#[cfg(any(target_os = "linux", windows))]
#[test]
fn affinity_binds_live_thread() {
    let (release, wait) = blocked_until_dropped();
    let thread = Thread::new();
    thread.start(wait).unwrap();

    thread.set_affinity(0).unwrap();
    assert_eq!(thread.affinity().unwrap(), Some(0));

    drop(release);
    thread.join().unwrap();
}

#[cfg(any(target_os = "linux", windows))]
#[test]
fn pending_affinity_applies_on_start() {
    let thread = Builder::new().affinity(0).build().unwrap();
    assert_eq!(thread.affinity().unwrap(), Some(0));

    let (release, wait) = blocked_until_dropped();
    let (tx, rx) = mpsc::channel();
    thread
        .start(move || {
            wait();
            tx.send(yaar_thread::current().unwrap().affinity().unwrap())
                .unwrap();
        })
        .unwrap();

    drop(release);
    assert_eq!(rx.recv().unwrap(), Some(0));
    thread.join().unwrap();
}

#[cfg(any(target_os = "linux", windows))]
#[test]
fn affinity_rejects_unknown_cpu() {
    let thread = Thread::new();
    match thread.set_affinity(usize::MAX) {
        Err(Error::Affinity(AffinityError::InvalidCpu { cpu, count })) => {
            assert_eq!(cpu, usize::MAX);
            assert!(count >= yaar_thread::cpu_count());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(thread.affinity().unwrap(), None);
}

#[cfg(not(any(target_os = "linux", windows)))]
#[test]
fn affinity_is_unsupported() {
    let (release, wait) = blocked_until_dropped();
    let thread = Thread::new();
    thread.start(wait).unwrap();

    match thread.set_affinity(0) {
        Err(Error::Affinity(AffinityError::Unsupported)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(thread.affinity().unwrap(), None);

    drop(release);
    thread.join().unwrap();
}

#[test]
fn failed_spawn_leaves_thread_unstarted() {
    let thread = Thread::new();
    thread.set_stack_size(usize::MAX / 2);

    match thread.start(|| {}) {
        Err(Error::ThreadCreation(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!thread.is_running());
    assert!(!thread.is_started());
    thread.join().unwrap();
    assert!(thread.join_timeout(Duration::from_millis(0)).unwrap());

    // the handle stays usable with a sane stack
    thread.set_stack_size(0);
    thread.start(|| {}).unwrap();
    thread.join().unwrap();
    assert!(thread.is_joined());
}

#[test]
fn rejected_priority_on_live_thread_is_still_recorded() {
    let range = PriorityRange::of(Policy::Other).unwrap();
    let (release, wait) = blocked_until_dropped();
    let thread = Thread::new();
    thread.start(wait).unwrap();

    let rejected = range.max + 1;
    match thread.set_os_priority(rejected, Policy::Other) {
        Err(Error::PrioritySet(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(thread.os_priority(), rejected);
    assert_eq!(thread.policy(), Policy::Other);
    assert_eq!(thread.priority(), range.from_native(rejected));
    assert!(thread.is_running());

    drop(release);
    thread.join().unwrap();
}

#[test]
fn rejected_priority_at_start_leaves_thread_started() {
    let range = PriorityRange::of(Policy::Other).unwrap();
    let thread = Thread::new();
    thread.set_os_priority(range.max + 1, Policy::Other).unwrap();

    let (release, wait) = blocked_until_dropped();
    match thread.start(wait) {
        Err(Error::PrioritySet(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(thread.is_started());
    assert!(thread.is_running());

    drop(release);
    thread.join().unwrap();
    assert!(thread.is_joined());
}
