use std::sync::mpsc;

use tracing::debug;

/// Producer half of a single-consumer event channel. Cheap to clone; any
/// thread may hold one.
pub struct EventSender<T> {
    tx: mpsc::Sender<T>,
}

/// Consumer half. Exactly one exists per channel; the frame loop drains it
/// to empty once per frame.
pub struct EventReceiver<T> {
    rx: mpsc::Receiver<T>,
}

pub fn channel<T>() -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueues an event. A send after the consumer is gone means the
    /// session is tearing down; the event is dropped with a debug note.
    pub fn send(&self, event: T) {
        if self.tx.send(event).is_err() {
            debug!("event dropped: consumer has shut down");
        }
    }
}

impl<T> EventReceiver<T> {
    /// Nonblocking: takes one pending event if there is one.
    pub fn poll(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Nonblocking drain of everything queued at the time of the call,
    /// in FIFO order.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::channel;

    #[test]
    fn drain_preserves_fifo_order_and_empties_the_queue() {
        let (tx, rx) = channel();
        for i in 0..5 {
            tx.send(i);
        }

        let drained: Vec<i32> = rx.drain().collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(rx.poll().is_none());
    }

    #[test]
    fn senders_clone_across_threads() {
        let (tx, rx) = channel();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tx = tx.clone();
                std::thread::spawn(move || tx.send(i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut got: Vec<i32> = rx.drain().collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn send_after_consumer_drop_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(7);
    }
}
