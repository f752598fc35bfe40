use anyhow::Context;
use config::{Config, Environment, File};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Layer several files and then the environment over `defaults`.
///
/// Later files override earlier ones; missing files are skipped. Keys a
/// layer leaves out keep the value of the layer below, down to `defaults`,
/// so a partial nested table only replaces the keys it names. Environment
/// keys use `__` as the nesting separator (`PREFIX__HIGH__CADENCE_MS`).
pub fn load_cfg_merge<T, P>(
    defaults: &T,
    paths: impl IntoIterator<Item = P>,
    env_prefix: Option<&str>,
) -> anyhow::Result<T>
where
    T: Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let base = Config::try_from(defaults)
        .with_context(|| "failed to serialize default configuration")?;
    let mut builder = Config::builder().add_source(base);

    for p in paths {
        let pb = p.as_ref().to_path_buf();
        if pb.exists() {
            builder = builder.add_source(File::from(pb));
        } else {
            tracing::debug!("config loading: file {} does not exist", pb.display());
        }
    }

    builder = match env_prefix {
        Some(prefix) => builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        ),
        None => builder.add_source(Environment::default().separator("__").try_parsing(true)),
    };

    let cfg = builder
        .build()
        .with_context(|| "failed to build configuration from provided sources")?;

    let des: T = cfg
        .try_deserialize()
        .with_context(|| "failed to deserialize merged configuration")?;

    Ok(des)
}
