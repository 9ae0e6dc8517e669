use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-chat mutual exclusion for message mutations within this process.
///
/// Send and regenerate hold a chat's guard from loading the chat until the
/// placeholder is finalized, so a truncate can never interleave with another
/// call's appends. Entries are dropped once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct ChatLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

pub struct ChatGuard {
    _guard: OwnedMutexGuard<()>,
    locks: ChatLocks,
    chat_id: Uuid,
}

impl ChatLocks {
    pub async fn lock(&self, chat_id: Uuid) -> ChatGuard {
        let mutex = {
            let mut map = self.map();
            map.entry(chat_id).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        ChatGuard {
            _guard: guard,
            locks: self.clone(),
            chat_id,
        }
    }

    /// Number of chats with a live lock entry.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ChatGuard {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // One reference in the map, one inside our own guard: no waiters.
        if map
            .get(&self.chat_id)
            .is_some_and(|m| Arc::strong_count(m) == 2)
        {
            map.remove(&self.chat_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_locker_waits_for_the_first() {
        let locks = ChatLocks::default();
        let chat = Uuid::new_v4();

        let first = locks.lock(chat).await;
        let locks2 = locks.clone();
        let mut waiter = tokio::spawn(async move {
            let _g = locks2.lock(chat).await;
        });

        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut waiter)
                .await
                .is_err()
        );
        drop(first);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_chats_do_not_contend() {
        let locks = ChatLocks::default();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock(Uuid::new_v4()))
            .await
            .expect("independent chat lock");
        assert_eq!(locks.len(), 2);
    }
}
