use std::collections::HashMap;

use log::{debug, error};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Outgoing channels of every connected client.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<Uuid, UnboundedSender<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tx: UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(id, tx);
        id
    }

    pub fn unregister(&mut self, id: &Uuid) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Serialise `message` once and fan it out. Clients whose send loop has
    /// gone away are dropped. Returns how many clients received it.
    pub fn broadcast<T: Serialize>(&mut self, message: &T) -> usize {
        if self.clients.is_empty() {
            return 0;
        }
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!("❌ Failed to serialise broadcast: {e}");
                return 0;
            }
        };

        self.clients.retain(|id, tx| {
            let alive = tx.send(json.clone()).is_ok();
            if !alive {
                debug!("pruning closed client {id}");
            }
            alive
        });
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn broadcast_reaches_live_clients_and_prunes_closed() {
        let mut registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        registry.register(tx_b);
        drop(rx_b);

        let sent = registry.broadcast(&serde_json::json!({ "type": "pong" }));
        assert_eq!(sent, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), r#"{"type":"pong"}"#);

        assert!(registry.unregister(&a));
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&serde_json::json!({})), 0);
    }
}
