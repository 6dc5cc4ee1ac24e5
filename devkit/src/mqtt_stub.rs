/*!
Broker MQTT simulé pour tests sans Mosquitto

Implémente `Publish` de l'agent:
- Enregistre chaque message publié
- Tient le store des messages retenus (payload vide retenu = suppression)
- Simule un broker injoignable ou des échecs sur des topics donnés
*/

use anyhow::Result;
use async_trait::async_trait;
use sentrylab_agent::{Publish, PublishError};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl MockMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }

    /// Payload vide retenu: efface le message retenu du topic
    pub fn is_clear(&self) -> bool {
        self.retain && self.payload.is_empty()
    }
}

/// Broker en mémoire, partagé entre ses clones
#[derive(Clone, Default)]
pub struct MockBroker {
    published: Arc<Mutex<Vec<MockMessage>>>,
    retained: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
    offline: Arc<AtomicBool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker injoignable: chaque publication échoue
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Les publications sur ce topic échouent
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    /// Simule un message retenu laissé par une exécution précédente
    pub fn seed_retained(&self, topic: &str, payload: &str) {
        self.retained
            .lock()
            .unwrap()
            .insert(topic.to_string(), payload.as_bytes().to_vec());
    }

    /// Tous les messages acceptés, dans l'ordre
    pub fn published(&self) -> Vec<MockMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Messages d'effacement reçus (payload vide retenu)
    pub fn clears(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.is_clear())
            .map(|msg| msg.topic.clone())
            .collect()
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained
            .lock()
            .unwrap()
            .get(topic)
            .map(|payload| String::from_utf8_lossy(payload).to_string())
    }

    pub fn retained_json(&self, topic: &str) -> Result<Option<Value>> {
        match self.retained.lock().unwrap().get(topic) {
            Some(payload) => Ok(Some(serde_json::from_slice(payload)?)),
            None => Ok(None),
        }
    }

    pub fn retained_topics(&self) -> Vec<String> {
        self.retained.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot complet du store retenu
    pub fn retained_snapshot(&self) -> BTreeMap<String, String> {
        self.retained
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, payload)| (topic.clone(), String::from_utf8_lossy(payload).to_string()))
            .collect()
    }

    /// Oublie les messages publiés, garde le store retenu
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl Publish for MockBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(PublishError::Unavailable);
        }
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(PublishError::Client {
                topic: topic.to_string(),
                message: "injected failure".to_string(),
            });
        }

        if retain {
            let mut retained = self.retained.lock().unwrap();
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.clone());
            }
        }

        log::info!("📤 [MOCK] {} (retain={}): {} bytes", topic, retain, payload.len());
        self.published.lock().unwrap().push(MockMessage {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.offline.load(Ordering::Relaxed)
    }
}
