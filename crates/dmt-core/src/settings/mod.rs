//! Extension settings: declared schemas, resolved values and validation
//!
//! Every extension describes its configuration as an ordered list of
//! [`FieldSpec`]s. The [`extract`] step turns that declaration into the
//! [`SettingProperty`] list published in manifests; [`validate_settings`]
//! checks user-supplied [`ExtensionSettings`] against it before a run.

mod property;
mod schema;
mod validate;
mod values;

pub use property::{SettingProperty, SettingType};
pub use schema::{FieldSpec, SettingEnum, SettingsSchema, check_typed, extract};
pub use validate::{ValidationReport, Violation, validate_settings};
pub use values::{ExtensionSettings, REDACTED};
