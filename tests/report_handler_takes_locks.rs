use lockgraph::{DeadlockReport, Lockgraph, Mutex};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

#[test]
fn test_report_handler_takes_tracked_locks() {
    // The handler locks tracked mutexes in the reverse of their normal order;
    // those events are not observed, so they neither report nor deadlock
    let journal = Arc::new(Mutex::new(Vec::<usize>::new()));
    let audit = Arc::new(Mutex::new(0usize));
    let (tx, rx) = mpsc::channel::<DeadlockReport>();
    let tx = std::sync::Mutex::new(tx);

    let (j, a) = (Arc::clone(&journal), Arc::clone(&audit));
    Lockgraph::new()
        .on_report(move |report| {
            let mut count = a.lock();
            j.lock().push(report.len());
            *count += 1;
            let _ = tx.lock().unwrap().send(report.clone());
        })
        .start()
        .expect("Failed to initialize detector");

    // Normal order: journal then audit
    {
        let _j = journal.lock();
        let _a = audit.lock();
    }

    let first = Arc::new(Mutex::new(()));
    let second = Arc::new(Mutex::new(()));
    {
        let _f = first.lock();
        let _s = second.lock();
    }
    let (f, s) = (Arc::clone(&first), Arc::clone(&second));
    thread::spawn(move || {
        let _s = s.lock();
        let _f = f.lock();
    })
    .join()
    .unwrap();

    let report = rx.recv_timeout(Duration::from_secs(3)).expect("no report");
    assert_eq!(report.len(), 2);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(*journal.lock(), vec![2]);
    assert_eq!(*audit.lock(), 1);
}
