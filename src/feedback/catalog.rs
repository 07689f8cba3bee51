//! Vehicle lookup for force feedback

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Key of the fallback entry in the game table
pub const DEFAULT_GAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleParams {
    pub tire_grip: f32,
    /// Front weight share, 0.5 is balanced
    pub weight_distribution: f32,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            tire_grip: 1.0,
            weight_distribution: 0.5,
        }
    }
}

pub trait VehicleCatalog: Send + Sync + 'static {
    /// Vehicle for a game executable, falling back to the default mapping
    fn get_vehicle_for_game(&self, game: &str) -> Option<VehicleParams>;

    fn vehicle_names(&self) -> Vec<String>;
}

/// Vehicles by name plus a game executable -> vehicle name table
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    vehicles: HashMap<String, VehicleParams>,
    games: HashMap<String, String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_vehicle(&mut self, name: &str, params: VehicleParams) {
        self.vehicles.insert(name.to_string(), params);
    }

    /// Maps a game executable (case-insensitive) to a vehicle name
    pub fn map_game(&mut self, game: &str, vehicle: &str) {
        self.games
            .insert(game.trim().to_lowercase(), vehicle.to_string());
    }

    fn resolve(&self, vehicle: &str) -> Option<VehicleParams> {
        let params = self.vehicles.get(vehicle).copied();
        if params.is_none() {
            warn!("Vehicle '{}' not found in catalog", vehicle);
        }
        params
    }
}

impl VehicleCatalog for InMemoryCatalog {
    fn get_vehicle_for_game(&self, game: &str) -> Option<VehicleParams> {
        let key = game.trim().to_lowercase();
        if let Some(vehicle) = self.games.get(&key) {
            if let Some(params) = self.resolve(vehicle) {
                info!("Mapped {} to vehicle {}", game, vehicle);
                return Some(params);
            }
        }

        let fallback = self.games.get(DEFAULT_GAME)?;
        debug!("Using default vehicle {} for {}", fallback, game);
        self.resolve(fallback)
    }

    fn vehicle_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vehicles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Catalog with a handful of common sim titles
pub fn builtin_catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.insert_vehicle(
        "gt3",
        VehicleParams {
            tire_grip: 1.2,
            weight_distribution: 0.45,
        },
    );
    catalog.insert_vehicle(
        "rally",
        VehicleParams {
            tire_grip: 0.85,
            weight_distribution: 0.55,
        },
    );
    catalog.insert_vehicle(
        "road",
        VehicleParams {
            tire_grip: 1.0,
            weight_distribution: 0.52,
        },
    );

    for game in ["assetto_corsa.exe", "acc.exe", "rfactor2.exe", "iracing.exe"] {
        catalog.map_game(game, "gt3");
    }
    for game in ["dirtrally2.exe", "dirt4.exe"] {
        catalog.map_game(game, "rally");
    }
    catalog.map_game(DEFAULT_GAME, "road");
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_game_maps_to_vehicle() {
        let catalog = builtin_catalog();
        let params = catalog.get_vehicle_for_game("DirtRally2.exe").unwrap();
        assert_eq!(params.tire_grip, 0.85);
    }

    #[test]
    fn test_unknown_game_uses_default() {
        let catalog = builtin_catalog();
        let params = catalog.get_vehicle_for_game("kart.exe").unwrap();
        assert_eq!(params.weight_distribution, 0.52);
    }

    #[test]
    fn test_missing_vehicle_falls_back_and_empty_catalog_is_none() {
        let mut catalog = builtin_catalog();
        catalog.map_game("broken.exe", "does not exist");
        assert_eq!(
            catalog.get_vehicle_for_game("broken.exe").map(|p| p.tire_grip),
            Some(1.0)
        );
        assert!(InMemoryCatalog::new().get_vehicle_for_game("any.exe").is_none());
    }
}
