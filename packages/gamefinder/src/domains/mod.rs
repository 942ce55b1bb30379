pub mod geocoding;
pub mod matching;
pub mod requests;
