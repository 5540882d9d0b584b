//! `agentwire config` — print the default configuration.

use agentwire_config::AppConfig;

pub fn show_default() {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
}
