// Configuration management module
// TOML settings stored under the application base directory

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    BASE_DIR_ENV, Config, ConfigError, EmbeddingConfig, EmbeddingStrategy, GenerationConfig,
    RetrievalConfig,
};

/// Load the configuration from the resolved base directory
#[inline]
pub fn load_config(base_dir: Option<std::path::PathBuf>) -> anyhow::Result<Config> {
    let base_dir = Config::resolve_base_dir(base_dir)?;
    Config::load(base_dir)
}
