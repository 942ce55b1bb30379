// GameFinder - Matching Core
//
// This crate matches tabletop players with game masters who run the same game
// system within the player's travel range, and tells a game master when enough
// players have gathered to form a table.
//
// Each request mutation runs one explicit pass through the ChangeCoordinator in
// domains/matching/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
