use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Простая карта с временем жизни записей. Просроченные записи удаляются при чтении.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (V, Instant)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, stored_at)) if stored_at.elapsed() < self.ttl => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Запись просрочена
        let mut entries = self.entries.write().await;
        if let Some((_, stored_at)) = entries.get(key) {
            if stored_at.elapsed() >= self.ttl {
                entries.remove(key);
            }
        }
        None
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (value, Instant::now()));
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().await.remove(key).map(|(v, _)| v)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
