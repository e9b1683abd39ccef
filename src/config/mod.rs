// Configuration management: TOML settings and the interactive setup wizard

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChatConfig, Config, ConfigError, EmbeddingConfig, HttpConfig, MAX_TOP_K, QdrantConfig,
    RagConfig,
};

/// Resolve the configuration directory, preferring an explicit override
#[inline]
pub fn get_config_dir(
    override_dir: Option<&std::path::Path>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::config_dir(),
    }
}
