use lockgraph::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
mod common;
use common::{REPORT_TIMEOUT, expect_report, start_detector};

#[test]
fn test_rwlock_read_inversion_with_mutex() {
    let harness = start_detector();

    let config = Arc::new(RwLock::new(0u32));
    let state = Arc::new(Mutex::new(Vec::<u32>::new()));
    let (config_id, state_id) = (config.id(), state.id());

    // Writer path: state then config (read)
    let (c, s) = (Arc::clone(&config), Arc::clone(&state));
    thread::spawn(move || {
        let mut state = s.lock();
        state.push(*c.read());
    })
    .join()
    .unwrap();

    // Reload path: config (write) then state
    let (c, s) = (Arc::clone(&config), Arc::clone(&state));
    thread::spawn(move || {
        let mut config = c.write();
        *config += s.lock().len() as u32;
    })
    .join()
    .unwrap();

    let report = expect_report(&harness, REPORT_TIMEOUT);
    let mut mutexes = report.mutexes();
    mutexes.sort();
    let mut expected = vec![config_id, state_id];
    expected.sort();
    assert_eq!(mutexes, expected);
}
