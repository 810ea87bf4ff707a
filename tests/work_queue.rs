//! Work Queue Integration Tests
//!
//! Tests for serial execution across producer threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use closed_loop::SerialWorkQueue;
use parking_lot::Mutex;

#[test]
fn test_failing_item_does_not_stop_later_items() {
    let queue = SerialWorkQueue::new();
    let ran = Arc::new(Mutex::new(Vec::new()));

    let r = ran.clone();
    queue.queue_and_run(move || {
        r.lock().push(1);
        Ok(())
    });
    queue.queue_and_run(|| anyhow::bail!("item 2 failed"));
    let r = ran.clone();
    queue.queue_and_run(move || {
        r.lock().push(3);
        Ok(())
    });

    assert!(ran.lock().is_empty());
    queue.start();

    assert_eq!(*ran.lock(), vec![1, 3]);
    assert!(queue.is_empty());
}

#[test]
fn test_concurrent_producers_keep_per_producer_order() {
    let producers = 4;
    let per_producer = 250;

    let queue = Arc::new(SerialWorkQueue::new());
    queue.start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(producers));

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let queue = queue.clone();
            let log = log.clone();
            let in_flight = in_flight.clone();
            let overlap = overlap.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();
                for seq in 0..per_producer {
                    let log = log.clone();
                    let in_flight = in_flight.clone();
                    let overlap = overlap.clone();
                    queue.queue_and_run(move || {
                        if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        log.lock().push((producer, seq));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    });
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // producers that drained returned only once the queue was empty
    assert!(queue.is_empty());
    assert_eq!(overlap.load(Ordering::SeqCst), 0);

    let log = log.lock();
    assert_eq!(log.len(), producers * per_producer);

    for producer in 0..producers {
        let seqs: Vec<usize> = log
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(seqs, (0..per_producer).collect::<Vec<_>>());
    }
}
