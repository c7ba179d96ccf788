/*!
# Skywatch DevKit - Doubles de test et utilitaires

Bibliothèque facilitant les tests du kernel Skywatch avec:
- Fournisseur météo simulé (compteur d'appels, pannes, latence)
- Registre de devices en mémoire
- Builders de messages de télémétrie au format des producteurs
- Harness reliant un kernel complet aux doubles
*/

pub mod builders;
pub mod registry_stub;
pub mod test_utils;
pub mod weather_stub;

pub use builders::MessageBuilder;
pub use registry_stub::MockDeviceRegistry;
pub use test_utils::TestHarness;
pub use weather_stub::MockWeatherProvider;
