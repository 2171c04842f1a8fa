use tokio::sync::mpsc;

/// Bounded FIFO of connection slots, the client-side concurrency limit
///  toward one peer.
///
/// Exactly `concurrency_level` slot values circulate: [ConnectionPool::acquire]
///  blocks cooperatively until one is free, [ConnectionPool::release] hands it
///  back. Holding a slot is what gives a request exclusive use of its
///  connection, which in turn is what makes per-connection state safe to
///  mutate without further locking.
pub struct ConnectionPool<C> {
    tx: mpsc::Sender<C>,
    rx: tokio::sync::Mutex<mpsc::Receiver<C>>,
}

impl<C: Send> ConnectionPool<C> {
    pub fn new(slots: impl IntoIterator<Item = C>) -> ConnectionPool<C> {
        let slots: Vec<C> = slots.into_iter().collect();
        assert!(!slots.is_empty(), "a connection pool needs at least one slot");

        let (tx, rx) = mpsc::channel(slots.len());
        for slot in slots {
            tx.try_send(slot)
                .unwrap_or_else(|_| unreachable!("channel was sized for all slots"));
        }
        ConnectionPool {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub async fn acquire(&self) -> C {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .expect("the pool owns a sender, the channel cannot close")
    }

    pub fn release(&self, slot: C) {
        // Slots are conserved: every release matches an acquire, so the
        //  bounded channel always has room.
        self.tx
            .try_send(slot)
            .unwrap_or_else(|_| panic!("released more slots than the pool holds"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_release_cycles() {
        let pool = ConnectionPool::new([1u32, 2]);
        let a = pool.acquire().await;
        let b = pool.acquire().await;
        assert_ne!(a, b);
        pool.release(a);
        pool.release(b);
        // FIFO: the first released slot comes back first
        assert_eq!(pool.acquire().await, a);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let pool = std::sync::Arc::new(ConnectionPool::new([7u32]));
        let held = pool.acquire().await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        // the waiter cannot finish while the single slot is held
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(held);
        assert_eq!(waiter.await.unwrap(), 7);
    }
}
