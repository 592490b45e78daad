//! Registry updater. Annotates the newest version of a registered model.

use crate::config::TagConfig;
use crate::error::TrackingError;
use crate::tracking::{ModelRegistry, ModelVersion};
use tracing::info;

/// Render a float the way Python's `str(float)` does.
///
/// Shortest round-trip digits. Decimal exponents below -4 or from 16 up use
/// scientific notation with a signed, two-digit exponent (`5e-05`, `1e+16`);
/// everything else is positional and always carries a decimal point.
pub fn python_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scientific = format!("{value:e}");
    if let Some((mantissa, exponent)) = scientific.split_once('e')
        && let Ok(exponent) = exponent.parse::<i32>()
        && !(-4..16).contains(&exponent)
    {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs());
    }
    let rendered = value.to_string();
    if rendered.contains('.') {
        rendered
    } else {
        format!("{rendered}.0")
    }
}

/// Description stored on a model version after training.
pub fn precision_description(precision: f64) -> String {
    format!("Precision> {}", python_float(precision))
}

/// Newest version of `name`, by version number.
///
/// Fails with `NotFound` when the model has no versions yet.
pub async fn latest_version(
    registry: &dyn ModelRegistry,
    name: &str,
) -> Result<ModelVersion, TrackingError> {
    registry
        .get_latest_versions(name, &[])
        .await?
        .into_iter()
        .max_by_key(ModelVersion::version_number)
        .ok_or_else(|| TrackingError::not_found(format!("no versions registered for model '{name}'")))
}

/// Writes the precision description and classification tag onto the newest version.
#[derive(Debug, Clone)]
pub struct RegistryUpdater {
    model_name: String,
    tag: TagConfig,
}

impl RegistryUpdater {
    pub fn new(model_name: impl Into<String>, tag: TagConfig) -> Self {
        Self {
            model_name: model_name.into(),
            tag,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Update the newest version and return it as the server now reports it.
    pub async fn apply(
        &self,
        registry: &dyn ModelRegistry,
        precision: f64,
    ) -> Result<ModelVersion, TrackingError> {
        let latest = latest_version(registry, &self.model_name).await?;
        info!(model = %self.model_name, version = %latest.version, "Updating latest model version");

        let description = precision_description(precision);
        registry
            .update_model_version(&self.model_name, &latest.version, &description)
            .await?;
        registry
            .set_model_version_tag(
                &self.model_name,
                &latest.version,
                &self.tag.key,
                &self.tag.value,
            )
            .await?;

        registry
            .get_model_version(&self.model_name, &latest.version)
            .await
    }
}
