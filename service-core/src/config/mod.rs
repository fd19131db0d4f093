use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::de::DeserializeOwned;

/// Load typed settings from an optional `<file_stem>.{toml,yaml,json}` file,
/// overridden by `<ENV_PREFIX>__SECTION__KEY` environment variables.
///
/// Missing keys fall back to the target type's serde defaults.
pub fn load_settings<T: DeserializeOwned>(file_stem: &str, env_prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
