/*!
# SentryLab DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant les tests de l'agent SentryLab avec:
- Broker MQTT simulé (store des messages retenus)
- Exécuteur Proxmox simulé (réponses scriptées)
- Rendu des templates Home Assistant
- Harness de test
*/

pub mod executor_stub;
pub mod mqtt_stub;
pub mod template;
pub mod test_utils;

pub use executor_stub::MockExecutor;
pub use mqtt_stub::{MockBroker, MockMessage};
pub use template::render;
pub use test_utils::TestHarness;
