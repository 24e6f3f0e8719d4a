pub mod config;
pub mod control;
pub mod decision;
pub mod domain;
pub mod error;
pub mod geolocation;
pub mod history;
pub mod protocol;
pub mod relay;
pub mod sensor;
pub mod settings;
pub mod tariff;
pub mod temperature;
pub mod util;
pub mod weather;
